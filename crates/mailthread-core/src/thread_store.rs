use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::StoreResult;
use crate::{ThreadEntry, placeholders};

const ROOT_REWRITE_CHUNK: usize = 500;

/// A node of the thread forest. `root` always names the tree's root node
/// and `parent` is `None` exactly when the node is that root.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct ThreadRow {
    pub id: i64,
    pub message_id: i64,
    pub root: i64,
    pub parent: Option<i64>,
}

impl ThreadRow {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Inserts a node. A node without a parent starts its own tree; the
/// `set_thread_root` trigger fills in its root.
pub(crate) async fn insert_thread(
    conn: &mut SqliteConnection,
    message_id: i64,
    root: Option<i64>,
    parent: Option<i64>,
) -> StoreResult<ThreadRow> {
    let root = match parent {
        Some(parent_id) => {
            let parent_row = thread_by_id(conn, parent_id).await?.unwrap_or_else(|| {
                panic!("thread forest invariant violated: parent thread {parent_id} does not exist")
            });
            if let Some(root) = root {
                assert_eq!(
                    parent_row.root, root,
                    "thread forest invariant violated: parent {parent_id} lives in tree {} not {root}",
                    parent_row.root
                );
            }
            Some(parent_row.root)
        }
        None => None,
    };
    let id = sqlx::query("INSERT INTO threads (message_id, root, parent) VALUES (?, ?, ?)")
        .bind(message_id)
        .bind(root)
        .bind(parent)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();
    let row = thread_by_id(conn, id)
        .await?
        .unwrap_or_else(|| panic!("thread {id} vanished inside its own transaction"));
    Ok(row)
}

pub(crate) async fn thread_by_id(
    conn: &mut SqliteConnection,
    thread_id: i64,
) -> StoreResult<Option<ThreadRow>> {
    let row = sqlx::query_as::<_, ThreadRow>(
        "SELECT id, message_id, root, parent FROM threads WHERE id = ?",
    )
    .bind(thread_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

pub(crate) async fn thread_for_message(
    conn: &mut SqliteConnection,
    message_id: i64,
) -> StoreResult<Option<ThreadRow>> {
    let row = sqlx::query_as::<_, ThreadRow>(
        "SELECT id, message_id, root, parent FROM threads WHERE message_id = ?",
    )
    .bind(message_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

pub(crate) async fn has_children(conn: &mut SqliteConnection, thread_id: i64) -> StoreResult<bool> {
    let row = sqlx::query_as::<_, (i64,)>("SELECT id FROM threads WHERE parent = ? LIMIT 1")
        .bind(thread_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

/// Parent of `thread` when that parent belongs to a placeholder message.
pub(crate) async fn empty_parent(
    conn: &mut SqliteConnection,
    thread: &ThreadRow,
) -> StoreResult<Option<ThreadRow>> {
    let Some(parent_id) = thread.parent else {
        return Ok(None);
    };
    let row = sqlx::query_as::<_, ThreadRow>(
        "SELECT t.id, t.message_id, t.root, t.parent FROM threads t \
         JOIN messages m ON m.id = t.message_id \
         WHERE t.id = ? AND m.empty = 1",
    )
    .bind(parent_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

pub(crate) async fn delete_thread(conn: &mut SqliteConnection, thread_id: i64) -> StoreResult<()> {
    sqlx::query("DELETE FROM threads WHERE id = ?")
        .bind(thread_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn repoint_message(
    conn: &mut SqliteConnection,
    thread_id: i64,
    message_id: i64,
) -> StoreResult<()> {
    sqlx::query("UPDATE threads SET message_id = ? WHERE id = ?")
        .bind(message_id)
        .bind(thread_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn tree_member_ids(conn: &mut SqliteConnection, root: i64) -> StoreResult<Vec<i64>> {
    let rows = sqlx::query_as::<_, (i64,)>("SELECT id FROM threads WHERE root = ? ORDER BY id")
        .bind(root)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Hangs the whole tree rooted at `tree_root` below `new_parent`, whose tree
/// is rooted at `new_root`. Every node of the grafted tree is rewritten to
/// the new root in the same transaction.
///
/// Panics when the graft would break the forest: `tree_root` is not a root,
/// `new_parent` sits inside the grafted tree, or the rewrite misses nodes.
pub(crate) async fn graft_tree(
    conn: &mut SqliteConnection,
    tree_root: i64,
    new_parent: i64,
    new_root: i64,
) -> StoreResult<()> {
    let source = thread_by_id(conn, tree_root).await?.unwrap_or_else(|| {
        panic!("thread forest invariant violated: graft source {tree_root} does not exist")
    });
    assert!(
        source.is_root() && source.root == source.id,
        "thread forest invariant violated: graft source {tree_root} is not a tree root"
    );
    let target = thread_by_id(conn, new_parent).await?.unwrap_or_else(|| {
        panic!("thread forest invariant violated: graft target {new_parent} does not exist")
    });
    assert_eq!(
        target.root, new_root,
        "thread forest invariant violated: graft target {new_parent} is not in tree {new_root}"
    );

    let members = tree_member_ids(conn, tree_root).await?;
    assert!(
        !members.contains(&new_parent),
        "thread forest invariant violated: grafting tree {tree_root} under {new_parent} creates a cycle"
    );

    let mut rewritten = 0u64;
    for chunk in members.chunks(ROOT_REWRITE_CHUNK) {
        let sql = format!(
            "UPDATE threads SET root = ? WHERE id IN ({})",
            placeholders(chunk.len())
        );
        let mut query = sqlx::query(&sql).bind(new_root);
        for id in chunk {
            query = query.bind(*id);
        }
        rewritten += query.execute(&mut *conn).await?.rows_affected();
    }
    assert_eq!(
        rewritten,
        members.len() as u64,
        "thread forest invariant violated: root rewrite of tree {tree_root} was partial"
    );

    sqlx::query("UPDATE threads SET parent = ? WHERE id = ?")
        .bind(new_parent)
        .bind(tree_root)
        .execute(&mut *conn)
        .await?;
    debug!(tree_root, new_parent, new_root, nodes = members.len(), "grafted thread tree");
    Ok(())
}

pub(crate) async fn visible_members(
    conn: &mut SqliteConnection,
    root: i64,
) -> StoreResult<Vec<ThreadEntry>> {
    let rows = sqlx::query_as::<_, (i64, Option<i64>, i64, Option<String>, Option<i64>)>(
        "SELECT t.id, t.parent, m.id, m.subject, m.date FROM threads t \
         JOIN messages m ON m.id = t.message_id \
         WHERE t.root = ? AND m.deleted = 0 AND m.empty = 0 \
         ORDER BY m.date, t.id",
    )
    .bind(root)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| ThreadEntry {
            thread_id: row.0,
            parent: row.1,
            message_id: row.2,
            subject: row.3,
            date: row.4,
        })
        .collect())
}

pub(crate) async fn all_threads(conn: &mut SqliteConnection) -> StoreResult<Vec<ThreadRow>> {
    let rows = sqlx::query_as::<_, ThreadRow>(
        "SELECT id, message_id, root, parent FROM threads ORDER BY id",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::{graft_tree, insert_thread, thread_by_id};
    use crate::message_store::insert_placeholder;
    use crate::test_support::fixture;

    #[tokio::test]
    async fn graft_rewrites_every_node_of_the_grafted_tree() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let mut txn = fx.store.begin_exclusive().await?;
        let conn = txn.conn();

        let a = insert_placeholder(conn, fx.inbox, "<a@x>").await?;
        let a = insert_thread(conn, a, None, None).await?;
        let b = insert_placeholder(conn, fx.inbox, "<b@x>").await?;
        let b = insert_thread(conn, b, Some(a.root), Some(a.id)).await?;
        let c = insert_placeholder(conn, fx.inbox, "<c@x>").await?;
        let c = insert_thread(conn, c, None, None).await?;

        graft_tree(conn, a.id, c.id, c.root).await?;

        let a = thread_by_id(conn, a.id).await?.ok_or_else(|| anyhow::anyhow!("a missing"))?;
        let b = thread_by_id(conn, b.id).await?.ok_or_else(|| anyhow::anyhow!("b missing"))?;
        assert_eq!(a.parent, Some(c.id));
        assert_eq!(a.root, c.id);
        assert_eq!(b.parent, Some(a.id));
        assert_eq!(b.root, c.id);
        Ok(())
    }

    #[tokio::test]
    #[should_panic(expected = "creates a cycle")]
    async fn graft_into_own_subtree_panics() {
        let fx = fixture().await.unwrap();
        let mut txn = fx.store.begin_exclusive().await.unwrap();
        let conn = txn.conn();

        let a = insert_placeholder(conn, fx.inbox, "<a@x>").await.unwrap();
        let a = insert_thread(conn, a, None, None).await.unwrap();
        let b = insert_placeholder(conn, fx.inbox, "<b@x>").await.unwrap();
        let b = insert_thread(conn, b, Some(a.root), Some(a.id)).await.unwrap();

        graft_tree(conn, a.id, b.id, a.root).await.unwrap();
    }
}
