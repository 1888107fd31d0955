use tracing::debug;

use crate::error::StoreResult;
use crate::thread_store::{self, ThreadRow};
use crate::txn::StoreTxn;
use crate::{StoredMessage, message_store};

/// Destroys the messages with the given server UIDs in `folder_id`. UIDs
/// without a stored message are skipped. Returns how many were destroyed.
pub async fn destroy_messages_in<S: AsRef<str>>(
    txn: &mut StoreTxn,
    folder_id: i64,
    server_ids: &[S],
) -> StoreResult<usize> {
    message_store::ensure_folder(txn.conn(), folder_id).await?;
    let mut destroyed = 0;
    for uid in server_ids {
        let uid = uid.as_ref();
        match message_store::message_by_uid(txn.conn(), folder_id, uid).await? {
            Some(message) => {
                destroy_message(txn, &message).await?;
                destroyed += 1;
            }
            None => debug!(folder_id, uid, "no message to destroy"),
        }
    }
    Ok(destroyed)
}

/// Removes one message. A message that still has replies below it turns
/// into a placeholder so the replies keep their place. Otherwise its node is
/// removed, followed by every placeholder ancestor left without children.
pub(crate) async fn destroy_message(txn: &mut StoreTxn, message: &StoredMessage) -> StoreResult<()> {
    if let Some(root) = message.message_part_id {
        message_store::delete_parts(txn, root).await?;
    }
    let conn = txn.conn();
    let Some(node) = thread_store::thread_for_message(conn, message.id).await? else {
        message_store::delete_message_row(conn, message.id).await?;
        debug!(message = message.id, "destroyed unthreaded message");
        return Ok(());
    };

    if thread_store::has_children(conn, node.id).await? {
        message_store::make_placeholder(conn, message.id).await?;
        debug!(message = message.id, thread = node.id, "destroyed message kept as placeholder");
        return Ok(());
    }

    let mut next = thread_store::empty_parent(conn, &node).await?;
    remove_node(txn, &node).await?;
    debug!(message = message.id, thread = node.id, "destroyed message");

    while let Some(parent) = next {
        if thread_store::has_children(txn.conn(), parent.id).await? {
            break;
        }
        next = thread_store::empty_parent(txn.conn(), &parent).await?;
        remove_node(txn, &parent).await?;
        debug!(thread = parent.id, "removed orphaned placeholder");
    }
    Ok(())
}

async fn remove_node(txn: &mut StoreTxn, node: &ThreadRow) -> StoreResult<()> {
    let conn = txn.conn();
    thread_store::delete_thread(conn, node.id).await?;
    message_store::delete_message_row(conn, node.message_id).await
}

/// Destroys the tombstones move left behind in `folder_id`.
pub async fn destroy_deleted_messages_in(txn: &mut StoreTxn, folder_id: i64) -> StoreResult<usize> {
    message_store::ensure_folder(txn.conn(), folder_id).await?;
    let ids = message_store::tombstone_ids(txn.conn(), folder_id).await?;
    destroy_by_ids(txn, &ids).await
}

/// Destroys every message of `folder_id` that only carries a local UID.
pub async fn destroy_local_only_messages_in(txn: &mut StoreTxn, folder_id: i64) -> StoreResult<usize> {
    message_store::ensure_folder(txn.conn(), folder_id).await?;
    let ids = message_store::local_only_ids(txn.conn(), folder_id).await?;
    destroy_by_ids(txn, &ids).await
}

async fn destroy_by_ids(txn: &mut StoreTxn, ids: &[i64]) -> StoreResult<usize> {
    let mut destroyed = 0;
    for id in ids {
        // Earlier cascades only remove placeholders, never the rows listed here.
        if let Some(message) = message_store::message_by_id(txn.conn(), *id).await? {
            destroy_message(txn, &message).await?;
            destroyed += 1;
        }
    }
    Ok(destroyed)
}

/// Drops every message, placeholder, node and part of `folder_id`.
pub async fn clear_all_messages_in(txn: &mut StoreTxn, folder_id: i64) -> StoreResult<()> {
    message_store::ensure_folder(txn.conn(), folder_id).await?;
    let roots = sqlx::query_as::<_, (i64,)>(
        "SELECT message_part_id FROM messages WHERE folder_id = ? AND message_part_id IS NOT NULL",
    )
    .bind(folder_id)
    .fetch_all(txn.conn())
    .await?;
    for (root,) in roots {
        message_store::delete_parts(txn, root).await?;
    }
    let conn = txn.conn();
    let threads = sqlx::query(
        "DELETE FROM threads WHERE message_id IN (SELECT id FROM messages WHERE folder_id = ?)",
    )
    .bind(folder_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    let messages = sqlx::query("DELETE FROM messages WHERE folder_id = ?")
        .bind(folder_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    debug!(folder_id, threads, messages, "cleared folder");
    Ok(())
}
