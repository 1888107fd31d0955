//! Placement of messages in the per-folder thread forest.
//!
//! A message is placed from its own Message-ID plus its ancestor chain, the
//! References list followed by the In-Reply-To id. Every ancestor that is
//! not stored yet gets an empty placeholder message so later arrivals can be
//! hooked underneath it. When the chain runs through two separate trees the
//! later tree is grafted below the earlier link and fully re-rooted.

use std::collections::HashSet;

use mailparse::msgidparse;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::thread_store::{self, ThreadRow};
use crate::txn::StoreTxn;
use crate::message_store;

/// Threading headers of one message, as raw header values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadHeaders {
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

impl ThreadHeaders {
    pub fn new(message_id: &str) -> Self {
        Self {
            message_id: Some(message_id.to_string()),
            ..Self::default()
        }
    }

    pub fn normalized_message_id(&self) -> Option<String> {
        self.message_id.as_deref().and_then(normalize_message_id)
    }

    /// Ancestor ids ordered oldest first, normalized to `<id>` form.
    ///
    /// The first In-Reply-To id is appended unless References already
    /// names it. Each id appears once, at its first position, and the
    /// message's own id is dropped. A header that fails to parse contributes
    /// nothing.
    pub fn ancestor_chain(&self) -> Vec<String> {
        let mut chain = self
            .references
            .as_deref()
            .map(extract_message_ids)
            .unwrap_or_default();
        let parent = self
            .in_reply_to
            .as_deref()
            .and_then(|raw| extract_message_ids(raw).into_iter().next());
        if let Some(parent) = parent {
            if !chain.contains(&parent) {
                chain.push(parent);
            }
        }
        let own = self.normalized_message_id();
        let mut seen = HashSet::new();
        chain.retain(|id| Some(id) != own.as_ref() && seen.insert(id.clone()));
        chain
    }
}

/// First id of a Message-ID style header in `<id>` form.
pub fn normalize_message_id(raw: &str) -> Option<String> {
    extract_message_ids(raw).into_iter().next()
}

fn extract_message_ids(raw: &str) -> Vec<String> {
    let ids = msgidparse(raw)
        .map(|list| list.iter().filter_map(|id| bracket(id)).collect::<Vec<_>>())
        .unwrap_or_else(|e| {
            debug!(header = raw, error = %e, "unparseable message-id header");
            Vec::new()
        });
    if !ids.is_empty() {
        return ids;
    }
    // A lone id without angle brackets.
    let trimmed = raw.trim();
    if !trimmed.is_empty() && !trimmed.contains(char::is_whitespace) {
        return bracket(trimmed).into_iter().collect();
    }
    Vec::new()
}

fn bracket(id: &str) -> Option<String> {
    let inner = id.trim().trim_start_matches('<').trim_end_matches('>').trim();
    (!inner.is_empty()).then(|| format!("<{}>", inner))
}

/// Where a message belongs in the forest, as decided by [`attach_in`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThreadAttachment {
    /// A live message with the same Message-ID already exists in the folder.
    /// Nothing was changed; the new row should become its sibling.
    Existing {
        thread_id: i64,
        message_id: i64,
        root_id: i64,
        parent_id: Option<i64>,
    },
    /// A placeholder for this Message-ID exists and is already in place. The
    /// caller fills that message row.
    Placeholder {
        thread_id: i64,
        message_id: i64,
        root_id: i64,
        parent_id: Option<i64>,
    },
    /// No node exists yet. `parent_id` is the last ancestor, `None` for a
    /// new tree.
    New {
        root_id: Option<i64>,
        parent_id: Option<i64>,
    },
}

impl ThreadAttachment {
    pub fn existing_thread_id(&self) -> Option<i64> {
        match self {
            ThreadAttachment::Existing { thread_id, .. }
            | ThreadAttachment::Placeholder { thread_id, .. } => Some(*thread_id),
            ThreadAttachment::New { .. } => None,
        }
    }

    pub fn existing_message_id(&self) -> Option<i64> {
        match self {
            ThreadAttachment::Existing { message_id, .. }
            | ThreadAttachment::Placeholder { message_id, .. } => Some(*message_id),
            ThreadAttachment::New { .. } => None,
        }
    }

    pub fn root_id(&self) -> Option<i64> {
        match self {
            ThreadAttachment::Existing { root_id, .. }
            | ThreadAttachment::Placeholder { root_id, .. } => Some(*root_id),
            ThreadAttachment::New { root_id, .. } => *root_id,
        }
    }

    pub fn parent_id(&self) -> Option<i64> {
        match self {
            ThreadAttachment::Existing { parent_id, .. }
            | ThreadAttachment::Placeholder { parent_id, .. }
            | ThreadAttachment::New { parent_id, .. } => *parent_id,
        }
    }

    fn placeholder(row: ThreadRow) -> Self {
        ThreadAttachment::Placeholder {
            thread_id: row.id,
            message_id: row.message_id,
            root_id: row.root,
            parent_id: row.parent,
        }
    }
}

/// Outcome of looking a Message-ID up in one folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    /// A real message. `live` is false for tombstones.
    FoundThread { node: ThreadRow, live: bool },
    FoundPlaceholder(ThreadRow),
    NotFound,
}

/// Live messages win over placeholders, placeholders over tombstones; ties
/// go to the oldest row.
async fn lookup(conn: &mut SqliteConnection, folder_id: i64, message_id: &str) -> StoreResult<Lookup> {
    let row = sqlx::query_as::<_, (i64, i64, i64, Option<i64>, i64, i64)>(
        "SELECT t.id, t.message_id, t.root, t.parent, m.empty, m.deleted FROM messages m \
         JOIN threads t ON t.message_id = m.id \
         WHERE m.folder_id = ? AND m.message_id = ? \
         ORDER BY CASE WHEN m.empty = 0 AND m.deleted = 0 THEN 0 WHEN m.empty = 1 THEN 1 ELSE 2 END, m.id \
         LIMIT 1",
    )
    .bind(folder_id)
    .bind(message_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(match row {
        None => Lookup::NotFound,
        Some((id, message_id, root, parent, empty, deleted)) => {
            let node = ThreadRow {
                id,
                message_id,
                root,
                parent,
            };
            if empty != 0 {
                Lookup::FoundPlaceholder(node)
            } else {
                Lookup::FoundThread {
                    node,
                    live: deleted == 0,
                }
            }
        }
    })
}

/// The deepest ancestor placed so far and the tree it lives in.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    root: i64,
    parent: i64,
}

/// Decides where a message with `headers` goes in `folder_id`, creating
/// placeholders and merging trees along the way. Does not insert a node for
/// the message itself; see [`link_message_in`].
///
/// The caller must have checked that the folder exists.
pub async fn attach_in(
    txn: &mut StoreTxn,
    folder_id: i64,
    headers: &ThreadHeaders,
) -> StoreResult<ThreadAttachment> {
    let conn = txn.conn();
    let own_id = headers.normalized_message_id();

    let mut own_placeholder = None;
    if let Some(own) = own_id.as_deref() {
        match lookup(conn, folder_id, own).await? {
            Lookup::FoundThread { node, live: true } => {
                debug!(folder_id, message_id = own, thread = node.id, "message already threaded");
                return Ok(ThreadAttachment::Existing {
                    thread_id: node.id,
                    message_id: node.message_id,
                    root_id: node.root,
                    parent_id: node.parent,
                });
            }
            Lookup::FoundPlaceholder(node) => own_placeholder = Some(node),
            Lookup::FoundThread { live: false, .. } | Lookup::NotFound => {}
        }
    }

    let mut anchor: Option<Anchor> = None;
    let mut created = Vec::new();
    for reference in headers.ancestor_chain() {
        let next = match lookup(conn, folder_id, &reference).await? {
            Lookup::NotFound => {
                let message_id = message_store::insert_placeholder(conn, folder_id, &reference).await?;
                let node = thread_store::insert_thread(
                    conn,
                    message_id,
                    anchor.map(|a| a.root),
                    anchor.map(|a| a.parent),
                )
                .await?;
                debug!(folder_id, reference = %reference, thread = node.id, "created placeholder");
                created.push(node.id);
                Anchor {
                    root: node.root,
                    parent: node.id,
                }
            }
            Lookup::FoundPlaceholder(node) | Lookup::FoundThread { node, .. } => {
                join_chain(conn, anchor, node).await?
            }
        };
        anchor = Some(next);
    }

    let attachment = match own_placeholder {
        Some(node) => {
            let node = current(conn, node.id).await?;
            let node = match anchor {
                Some(anchor) => {
                    join_chain(conn, Some(anchor), node).await?;
                    current(conn, node.id).await?
                }
                None => node,
            };
            ThreadAttachment::placeholder(node)
        }
        None => ThreadAttachment::New {
            root_id: anchor.map(|a| a.root),
            parent_id: anchor.map(|a| a.parent),
        },
    };
    let keep = match attachment {
        ThreadAttachment::New { parent_id, .. } => parent_id,
        _ => None,
    };
    prune_unused_placeholders(conn, &created, keep).await?;
    Ok(attachment)
}

/// Removes placeholders created by this walk that ended up with nothing
/// below them, deepest first. `keep` is the node the message will be linked
/// under.
async fn prune_unused_placeholders(
    conn: &mut SqliteConnection,
    created: &[i64],
    keep: Option<i64>,
) -> StoreResult<()> {
    for &thread_id in created.iter().rev() {
        if Some(thread_id) == keep || thread_store::has_children(conn, thread_id).await? {
            continue;
        }
        let node = current(conn, thread_id).await?;
        thread_store::delete_thread(conn, node.id).await?;
        message_store::delete_message_row(conn, node.message_id).await?;
        debug!(thread = node.id, "dropped unused placeholder");
    }
    Ok(())
}

async fn current(conn: &mut SqliteConnection, thread_id: i64) -> StoreResult<ThreadRow> {
    let row = thread_store::thread_by_id(conn, thread_id).await?;
    Ok(row.unwrap_or_else(|| panic!("thread {thread_id} vanished inside its own transaction")))
}

/// Links an already stored `node` below `anchor`. Nodes keep the parent they
/// already have; a node from another tree brings its whole tree along.
async fn join_chain(
    conn: &mut SqliteConnection,
    anchor: Option<Anchor>,
    node: ThreadRow,
) -> StoreResult<Anchor> {
    let Some(anchor) = anchor else {
        return Ok(Anchor {
            root: node.root,
            parent: node.id,
        });
    };
    // Earlier grafts in this walk may have moved the node.
    let node = current(conn, node.id).await?;

    if node.root != anchor.root {
        if let Some(existing) = node.parent {
            warn!(
                thread = node.id,
                existing_parent = existing,
                claimed_parent = anchor.parent,
                "conflicting parent claim, keeping existing parent"
            );
        }
        info!(
            merged_root = node.root,
            under = anchor.parent,
            new_root = anchor.root,
            "merging thread trees"
        );
        thread_store::graft_tree(conn, node.root, anchor.parent, anchor.root).await?;
    } else if node.parent.is_none() {
        warn!(
            thread = node.id,
            claimed_parent = anchor.parent,
            "ancestor chain loops back to its own root, ignoring link"
        );
        return Ok(anchor);
    } else if node.parent != Some(anchor.parent) {
        warn!(
            thread = node.id,
            existing_parent = ?node.parent,
            claimed_parent = anchor.parent,
            "conflicting parent claim, keeping existing parent"
        );
    }

    Ok(Anchor {
        root: anchor.root,
        parent: node.id,
    })
}

/// Gives the stored message `message_row_id` its node according to
/// `attachment`.
pub async fn link_message_in(
    txn: &mut StoreTxn,
    message_row_id: i64,
    attachment: &ThreadAttachment,
) -> StoreResult<ThreadRow> {
    let conn = txn.conn();
    match *attachment {
        ThreadAttachment::Placeholder {
            thread_id,
            message_id,
            ..
        } => {
            if message_id != message_row_id {
                thread_store::repoint_message(conn, thread_id, message_row_id).await?;
                message_store::delete_message_row(conn, message_id).await?;
                debug!(thread = thread_id, placeholder = message_id, "replaced placeholder row");
            }
            current(conn, thread_id).await
        }
        ThreadAttachment::Existing {
            root_id, parent_id, ..
        } => thread_store::insert_thread(conn, message_row_id, Some(root_id), parent_id).await,
        ThreadAttachment::New { root_id, parent_id } => {
            thread_store::insert_thread(conn, message_row_id, root_id, parent_id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ThreadAttachment, ThreadHeaders, normalize_message_id};
    use crate::MailStore;
    use crate::test_support::{fixture, message, reply, thread_of};

    fn headers(message_id: &str, in_reply_to: Option<&str>, references: Option<&str>) -> ThreadHeaders {
        ThreadHeaders {
            message_id: Some(message_id.to_string()),
            in_reply_to: in_reply_to.map(str::to_string),
            references: references.map(str::to_string),
        }
    }

    #[test]
    fn chain_appends_in_reply_to_and_drops_repeats() {
        let h = headers("<m@x>", Some("<b@x>"), Some("<a@x> <a@x> <b@x>"));
        assert_eq!(h.ancestor_chain(), vec!["<a@x>", "<b@x>"]);

        let h = headers("<m@x>", Some("<c@x>"), Some("<a@x> <b@x>"));
        assert_eq!(h.ancestor_chain(), vec!["<a@x>", "<b@x>", "<c@x>"]);
    }

    #[test]
    fn chain_keeps_the_first_occurrence_of_every_id() {
        let h = headers("<m@x>", Some("<a@x>"), Some("<a@x> <b@x>"));
        assert_eq!(h.ancestor_chain(), vec!["<a@x>", "<b@x>"]);

        let h = headers("<m@x>", None, Some("<a@x> <b@x> <a@x> <c@x>"));
        assert_eq!(h.ancestor_chain(), vec!["<a@x>", "<b@x>", "<c@x>"]);
    }

    #[test]
    fn chain_never_contains_the_message_itself() {
        let h = headers("<m@x>", Some("<m@x>"), Some("<a@x> <m@x>"));
        assert_eq!(h.ancestor_chain(), vec!["<a@x>"]);
    }

    #[test]
    fn message_ids_are_normalized_to_angle_brackets() {
        assert_eq!(normalize_message_id("  <abc@host> "), Some("<abc@host>".to_string()));
        assert_eq!(normalize_message_id("abc@host"), Some("<abc@host>".to_string()));
        assert_eq!(normalize_message_id("   "), None);
    }

    #[tokio::test]
    async fn reply_before_parent_creates_placeholder_then_fills_it() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let b = fx.store.save_message(fx.inbox, Some("2"), &reply("<b@x>", &["<a@x>"])).await?;
        let b_node = thread_of(&fx.store, b).await?;
        let placeholder = b_node.parent.ok_or_else(|| anyhow::anyhow!("b has no parent"))?;

        let attachment = fx.store.attach(fx.inbox, Some("<a@x>"), None, None).await?;
        assert!(matches!(attachment, ThreadAttachment::Placeholder { thread_id, .. } if thread_id == placeholder));

        let a = fx.store.save_message(fx.inbox, Some("1"), &message("<a@x>")).await?;
        let a_node = thread_of(&fx.store, a).await?;
        assert_eq!(a_node.id, placeholder);
        assert!(a_node.is_root());
        assert_eq!(thread_of(&fx.store, b).await?.root, a_node.id);
        assert!(fx.store.verify_thread_forest().await?.is_consistent());
        Ok(())
    }

    #[tokio::test]
    async fn attach_of_already_stored_message_changes_nothing() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let a = fx.store.save_message(fx.inbox, Some("1"), &message("<a@x>")).await?;
        let before = fx.thread_count().await?;

        let attachment = fx
            .store
            .attach(fx.inbox, Some("<a@x>"), None, Some("<zzz@x>"))
            .await?;
        assert_eq!(attachment.existing_message_id(), Some(a));
        assert!(matches!(attachment, ThreadAttachment::Existing { .. }));
        assert_eq!(fx.thread_count().await?, before);
        Ok(())
    }

    #[tokio::test]
    async fn references_spanning_two_trees_merge_them() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let a = fx.store.save_message(fx.inbox, Some("1"), &message("<a@x>")).await?;
        let b = fx.store.save_message(fx.inbox, Some("2"), &reply("<b@x>", &["<a@x>"])).await?;
        let c = fx.store.save_message(fx.inbox, Some("3"), &message("<c@x>")).await?;
        let m = fx
            .store
            .save_message(fx.inbox, Some("4"), &reply("<m@x>", &["<c@x>", "<b@x>"]))
            .await?;

        let (a, b, c, m) = (
            thread_of(&fx.store, a).await?,
            thread_of(&fx.store, b).await?,
            thread_of(&fx.store, c).await?,
            thread_of(&fx.store, m).await?,
        );
        assert!(c.is_root());
        assert_eq!(a.parent, Some(c.id));
        assert_eq!(b.parent, Some(a.id));
        assert_eq!(m.parent, Some(b.id));
        for node in [a, b, c, m] {
            assert_eq!(node.root, c.id);
        }
        assert!(fx.store.verify_thread_forest().await?.is_consistent());
        Ok(())
    }

    #[tokio::test]
    async fn arrival_order_does_not_change_the_final_shape() -> anyhow::Result<()> {
        let fx = fixture().await?;
        // C replies to B which replies to A; C arrives first, then A, then B.
        let c = fx
            .store
            .save_message(fx.inbox, Some("3"), &reply("<c@x>", &["<a@x>", "<b@x>"]))
            .await?;
        let a = fx.store.save_message(fx.inbox, Some("1"), &message("<a@x>")).await?;
        let b = fx.store.save_message(fx.inbox, Some("2"), &reply("<b@x>", &["<a@x>"])).await?;

        let (a, b, c) = (
            thread_of(&fx.store, a).await?,
            thread_of(&fx.store, b).await?,
            thread_of(&fx.store, c).await?,
        );
        assert!(a.is_root());
        assert_eq!(b.parent, Some(a.id));
        assert_eq!(c.parent, Some(b.id));
        assert!([a, b, c].iter().all(|n| n.root == a.id));
        assert_eq!(fx.store.list_messages(fx.inbox).await?.len(), 3);
        assert_eq!(fx.thread_count().await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn siblings_arriving_before_their_parent_share_its_placeholder() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let c = fx.store.save_message(fx.inbox, Some("3"), &reply("<c@x>", &["<a@x>"])).await?;
        let placeholder = thread_of(&fx.store, c).await?.parent;
        let b = fx.store.save_message(fx.inbox, Some("2"), &reply("<b@x>", &["<a@x>"])).await?;

        let (empty,) = sqlx::query_as::<_, (i64,)>(
            "SELECT m.empty FROM threads t JOIN messages m ON m.id = t.message_id WHERE t.id = ?",
        )
        .bind(placeholder)
        .fetch_one(&fx.store.pool)
        .await?;
        assert_eq!(empty, 1);
        let a = fx.store.save_message(fx.inbox, Some("1"), &message("<a@x>")).await?;

        let a_node = thread_of(&fx.store, a).await?;
        assert_eq!(Some(a_node.id), placeholder);
        assert!(a_node.is_root());
        for child in [b, c] {
            let node = thread_of(&fx.store, child).await?;
            assert_eq!(node.parent, Some(a_node.id));
            assert_eq!(node.root, a_node.id);
        }
        let a_row = fx.store.get_message(a).await?.ok_or_else(|| anyhow::anyhow!("a gone"))?;
        assert!(!a_row.empty);
        assert_eq!(fx.thread_count().await?, 3);
        assert!(fx.store.verify_thread_forest().await?.is_consistent());
        Ok(())
    }

    #[tokio::test]
    async fn repeated_attach_with_same_headers_is_stable() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let first = fx
            .store
            .attach(fx.inbox, Some("<m@x>"), Some("<b@x>"), Some("<a@x> <b@x>"))
            .await?;
        let threads = fx.thread_count().await?;
        let second = fx
            .store
            .attach(fx.inbox, Some("<m@x>"), Some("<b@x>"), Some("<a@x> <b@x>"))
            .await?;

        assert_eq!(first, second);
        assert_eq!(fx.thread_count().await?, threads);
        assert!(first.parent_id().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn conflicting_parent_keeps_first_writer() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let b = fx.store.save_message(fx.inbox, Some("2"), &reply("<b@x>", &["<a@x>"])).await?;
        let original_parent = thread_of(&fx.store, b).await?.parent;

        // Claims <b@x> hangs below <z@x> instead.
        fx.store
            .save_message(fx.inbox, Some("9"), &reply("<m@x>", &["<z@x>", "<b@x>"]))
            .await?;

        let b_node = thread_of(&fx.store, b).await?;
        assert_eq!(b_node.parent, original_parent);
        assert!(fx.store.verify_thread_forest().await?.is_consistent());
        Ok(())
    }

    #[tokio::test]
    async fn own_placeholder_is_not_grafted_into_its_own_subtree() -> anyhow::Result<()> {
        let fx = fixture().await?;
        // <b@x> replies to <a@x>, so <a@x> exists as a placeholder root.
        fx.store.save_message(fx.inbox, Some("2"), &reply("<b@x>", &["<a@x>"])).await?;
        // <a@x> then arrives claiming to be a reply to <b@x>.
        let a = fx.store.save_message(fx.inbox, Some("1"), &reply("<a@x>", &["<b@x>"])).await?;

        assert!(thread_of(&fx.store, a).await?.is_root());
        assert!(fx.store.verify_thread_forest().await?.is_consistent());
        Ok(())
    }

    #[tokio::test]
    async fn in_reply_to_naming_an_earlier_reference_leaves_no_stray_placeholders() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let mut data = message("<m@x>");
        data.headers = headers("<m@x>", Some("<a@x>"), Some("<a@x> <b@x>"));
        let m = fx.store.save_message(fx.inbox, Some("1"), &data).await?;

        assert_eq!(fx.thread_count().await?, 3);
        assert_eq!(fx.childless_placeholder_count().await?, 0);
        assert!(thread_of(&fx.store, m).await?.parent.is_some());

        fx.store.destroy_messages(fx.inbox, &["1".to_string()]).await?;
        assert_eq!(fx.thread_count().await?, 0);
        assert_eq!(fx.message_row_count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn chain_looping_back_to_its_root_keeps_new_placeholders_in_use() -> anyhow::Result<()> {
        let fx = fixture().await?;
        fx.store.save_message(fx.inbox, Some("1"), &message("<q@x>")).await?;
        let p = fx.store.save_message(fx.inbox, Some("2"), &reply("<p@x>", &["<q@x>"])).await?;
        let p_node = thread_of(&fx.store, p).await?;

        let mut data = message("<m@x>");
        data.headers = headers("<m@x>", None, Some("<p@x> <n@x> <q@x>"));
        let m = fx.store.save_message(fx.inbox, Some("3"), &data).await?;

        // <m@x> hangs below the new <n@x> placeholder, which hangs below <p@x>.
        let m_node = thread_of(&fx.store, m).await?;
        let (n_parent, n_empty) = sqlx::query_as::<_, (Option<i64>, i64)>(
            "SELECT t.parent, m.empty FROM threads t JOIN messages m ON m.id = t.message_id \
             WHERE t.id = ?",
        )
        .bind(m_node.parent)
        .fetch_one(&fx.store.pool)
        .await?;
        assert_eq!(n_parent, Some(p_node.id));
        assert_eq!(n_empty, 1);
        assert_eq!(fx.childless_placeholder_count().await?, 0);
        assert!(fx.store.verify_thread_forest().await?.is_consistent());

        fx.store.destroy_messages(fx.inbox, &["3".to_string()]).await?;
        assert_eq!(fx.thread_count().await?, 2);
        assert_eq!(fx.message_row_count().await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn placeholder_bypassed_by_a_conflicting_claim_is_dropped() -> anyhow::Result<()> {
        let fx = fixture().await?;
        fx.store.save_message(fx.inbox, Some("1"), &message("<a@x>")).await?;
        let b = fx.store.save_message(fx.inbox, Some("2"), &reply("<b@x>", &["<a@x>"])).await?;

        // Claims <n@x> sits between <a@x> and <b@x>; <b@x> keeps <a@x>.
        let m = fx
            .store
            .save_message(fx.inbox, Some("3"), &reply("<m@x>", &["<a@x>", "<n@x>", "<b@x>"]))
            .await?;

        assert_eq!(thread_of(&fx.store, m).await?.parent, Some(thread_of(&fx.store, b).await?.id));
        assert_eq!(fx.thread_count().await?, 3);
        assert_eq!(fx.message_row_count().await?, 3);
        assert_eq!(fx.childless_placeholder_count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn message_without_ancestors_starts_a_new_tree() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let attachment = fx.store.attach(fx.inbox, Some("<n@x>"), None, Some("")).await?;
        assert_eq!(
            attachment,
            ThreadAttachment::New {
                root_id: None,
                parent_id: None
            }
        );
        Ok(())
    }
}
