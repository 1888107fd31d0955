use tracing::debug;

use crate::error::StoreResult;
use crate::message_store;
use crate::threading::{ThreadAttachment, attach_in, link_message_in};
use crate::txn::StoreTxn;
use crate::MessageData;

/// Stores a message in `folder_id` and threads it.
///
/// Saving under a UID that already exists in the folder replaces that
/// row's content and parts in place; its thread node is left alone. Without
/// a server UID the message gets a local one.
pub async fn save_message_in(
    txn: &mut StoreTxn,
    folder_id: i64,
    server_uid: Option<&str>,
    data: &MessageData,
) -> StoreResult<i64> {
    message_store::ensure_folder(txn.conn(), folder_id).await?;
    let uid = match server_uid {
        Some(uid) => uid.to_string(),
        None => txn.next_local_uid(),
    };

    if let Some(existing) = message_store::message_by_uid(txn.conn(), folder_id, &uid).await? {
        if let Some(root) = existing.message_part_id {
            message_store::delete_parts(txn, root).await?;
        }
        let part_id = match &data.parts {
            Some(tree) => Some(message_store::save_parts(txn, tree).await?),
            None => None,
        };
        message_store::fill_message(txn.conn(), existing.id, None, data, part_id).await?;
        debug!(folder_id, uid = %uid, message = existing.id, "replaced message content");
        return Ok(existing.id);
    }

    let attachment = attach_in(txn, folder_id, &data.headers).await?;
    let part_id = match &data.parts {
        Some(tree) => Some(message_store::save_parts(txn, tree).await?),
        None => None,
    };
    let message_id = match attachment {
        ThreadAttachment::Placeholder { message_id, .. } => {
            message_store::fill_message(txn.conn(), message_id, Some(&uid), data, part_id).await?;
            message_id
        }
        _ => message_store::insert_message(txn.conn(), folder_id, &uid, data, part_id).await?,
    };
    let node = link_message_in(txn, message_id, &attachment).await?;
    debug!(folder_id, uid = %uid, message = message_id, thread = node.id, "saved message");
    Ok(message_id)
}
