use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::message_store;
use crate::threading::{ThreadAttachment, attach_in, link_message_in};
use crate::txn::StoreTxn;
use crate::{MessageData, StoredMessage};

async fn load_source(txn: &mut StoreTxn, message_id: i64) -> StoreResult<StoredMessage> {
    match message_store::message_by_id(txn.conn(), message_id).await? {
        Some(message) if message.is_visible() => Ok(message),
        _ => Err(StoreError::MessageNotFound(message_id)),
    }
}

/// Copies a message into `destination_folder_id` and threads the copy there.
/// The copy gets a local UID and its own part tree and payload files.
pub async fn copy_message_in(
    txn: &mut StoreTxn,
    message_id: i64,
    destination_folder_id: i64,
) -> StoreResult<i64> {
    let source = load_source(txn, message_id).await?;
    message_store::ensure_folder(txn.conn(), destination_folder_id).await?;

    let data = MessageData {
        headers: source.thread_headers(),
        content: source.content.clone(),
        read: source.read,
        flagged: source.flagged,
        parts: None,
    };
    let attachment = attach_in(txn, destination_folder_id, &data.headers).await?;
    let part_id = match source.message_part_id {
        Some(root) => Some(message_store::duplicate_parts(txn, root).await?),
        None => None,
    };
    let uid = txn.next_local_uid();
    let copy_id = match attachment {
        ThreadAttachment::Placeholder { message_id, .. } => {
            message_store::fill_message(txn.conn(), message_id, Some(&uid), &data, part_id).await?;
            message_id
        }
        _ => {
            message_store::insert_message(txn.conn(), destination_folder_id, &uid, &data, part_id)
                .await?
        }
    };
    link_message_in(txn, copy_id, &attachment).await?;
    debug!(
        source = message_id,
        copy = copy_id,
        folder = destination_folder_id,
        "copied message"
    );
    Ok(copy_id)
}

/// Moves a message by copying it and leaving a tombstone behind. The
/// tombstone keeps its Message-ID and thread node; its content and parts are
/// dropped. Moving into the folder the message is already in is a no-op.
pub async fn move_message_in(
    txn: &mut StoreTxn,
    message_id: i64,
    destination_folder_id: i64,
) -> StoreResult<i64> {
    let source = load_source(txn, message_id).await?;
    if source.folder_id == destination_folder_id {
        debug!(message = message_id, "move into own folder skipped");
        return Ok(message_id);
    }

    let moved_id = copy_message_in(txn, message_id, destination_folder_id).await?;
    if let Some(root) = source.message_part_id {
        message_store::delete_parts(txn, root).await?;
    }
    let tombstone_uid = txn.next_local_uid();
    message_store::make_tombstone(txn.conn(), message_id, &tombstone_uid).await?;
    debug!(
        source = message_id,
        moved = moved_id,
        folder = destination_folder_id,
        "moved message"
    );
    Ok(moved_id)
}
