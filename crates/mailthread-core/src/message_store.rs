use std::collections::HashMap;

use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::txn::StoreTxn;
use crate::{
    DataLocation, LOCAL_UID_PREFIX, MAX_BODY_SIZE_FOR_DATABASE, MessageContent, MessageData,
    NewPart, PartBody, StoredMessage, StoredPart,
};

const MESSAGE_COLUMNS: &str = "id, folder_id, uid, message_id, deleted, empty, subject, date, \
     sender_list, to_list, cc_list, bcc_list, reply_to_list, in_reply_to, message_references, \
     preview, read, flagged, message_part_id";

const PART_COLUMNS: &str =
    "id, root, parent, seq, mime_type, display_name, content_id, data_location, data, decoded_body_size";

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    folder_id: i64,
    uid: Option<String>,
    message_id: Option<String>,
    deleted: i64,
    empty: i64,
    subject: Option<String>,
    date: Option<i64>,
    sender_list: Option<String>,
    to_list: Option<String>,
    cc_list: Option<String>,
    bcc_list: Option<String>,
    reply_to_list: Option<String>,
    in_reply_to: Option<String>,
    message_references: Option<String>,
    preview: Option<String>,
    read: i64,
    flagged: i64,
    message_part_id: Option<i64>,
}

impl From<MessageRow> for StoredMessage {
    fn from(row: MessageRow) -> Self {
        StoredMessage {
            id: row.id,
            folder_id: row.folder_id,
            uid: row.uid,
            message_id: row.message_id,
            in_reply_to: row.in_reply_to,
            references: row.message_references,
            deleted: row.deleted != 0,
            empty: row.empty != 0,
            read: row.read != 0,
            flagged: row.flagged != 0,
            content: MessageContent {
                subject: row.subject,
                date: row.date,
                sender_list: row.sender_list,
                to_list: row.to_list,
                cc_list: row.cc_list,
                bcc_list: row.bcc_list,
                reply_to_list: row.reply_to_list,
                preview: row.preview,
            },
            message_part_id: row.message_part_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PartRow {
    id: i64,
    root: Option<i64>,
    parent: i64,
    seq: i64,
    mime_type: Option<String>,
    display_name: Option<String>,
    content_id: Option<String>,
    data_location: i64,
    data: Option<Vec<u8>>,
    decoded_body_size: Option<i64>,
}

impl From<PartRow> for StoredPart {
    fn from(row: PartRow) -> Self {
        let data_location = DataLocation::from_db(row.data_location).unwrap_or_else(|| {
            warn!(part_id = row.id, value = row.data_location, "unknown data location");
            DataLocation::Missing
        });
        StoredPart {
            id: row.id,
            root: row.root.unwrap_or(row.id),
            parent: (row.parent >= 0).then_some(row.parent),
            seq: row.seq,
            mime_type: row.mime_type,
            display_name: row.display_name,
            content_id: row.content_id,
            data_location,
            data: row.data,
            decoded_body_size: row.decoded_body_size,
        }
    }
}

pub(crate) async fn ensure_folder(conn: &mut SqliteConnection, folder_id: i64) -> StoreResult<()> {
    let row = sqlx::query_as::<_, (i64,)>("SELECT id FROM folders WHERE id = ?")
        .bind(folder_id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(_) => Ok(()),
        None => Err(StoreError::FolderNotFound(folder_id)),
    }
}

pub(crate) async fn message_by_id(
    conn: &mut SqliteConnection,
    id: i64,
) -> StoreResult<Option<StoredMessage>> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?", MESSAGE_COLUMNS);
    let row = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(StoredMessage::from))
}

pub(crate) async fn message_by_uid(
    conn: &mut SqliteConnection,
    folder_id: i64,
    uid: &str,
) -> StoreResult<Option<StoredMessage>> {
    let sql = format!(
        "SELECT {} FROM messages WHERE folder_id = ? AND uid = ?",
        MESSAGE_COLUMNS
    );
    let row = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(folder_id)
        .bind(uid)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(StoredMessage::from))
}

pub(crate) async fn visible_messages(
    conn: &mut SqliteConnection,
    folder_id: i64,
) -> StoreResult<Vec<StoredMessage>> {
    let sql = format!(
        "SELECT {} FROM messages WHERE folder_id = ? AND deleted = 0 AND empty = 0 \
         ORDER BY date DESC, id DESC",
        MESSAGE_COLUMNS
    );
    let rows = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(folder_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(StoredMessage::from).collect())
}

/// Tombstones: rows kept after a move, still carrying their Message-ID.
pub(crate) async fn tombstone_ids(conn: &mut SqliteConnection, folder_id: i64) -> StoreResult<Vec<i64>> {
    let rows = sqlx::query_as::<_, (i64,)>(
        "SELECT id FROM messages WHERE folder_id = ? AND deleted = 1 AND empty = 0 ORDER BY id",
    )
    .bind(folder_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub(crate) async fn local_only_ids(conn: &mut SqliteConnection, folder_id: i64) -> StoreResult<Vec<i64>> {
    let rows = sqlx::query_as::<_, (i64,)>(
        "SELECT id FROM messages WHERE folder_id = ? AND empty = 0 AND uid LIKE ? || '%' ORDER BY id",
    )
    .bind(folder_id)
    .bind(LOCAL_UID_PREFIX)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub(crate) async fn insert_placeholder(
    conn: &mut SqliteConnection,
    folder_id: i64,
    message_id: &str,
) -> StoreResult<i64> {
    let id = sqlx::query(
        "INSERT INTO messages (folder_id, uid, message_id, deleted, empty) VALUES (?, NULL, ?, 0, 1)",
    )
    .bind(folder_id)
    .bind(message_id)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub(crate) async fn insert_message(
    conn: &mut SqliteConnection,
    folder_id: i64,
    uid: &str,
    data: &MessageData,
    message_part_id: Option<i64>,
) -> StoreResult<i64> {
    let content = &data.content;
    let id = sqlx::query(
        "INSERT INTO messages (folder_id, uid, message_id, deleted, empty, subject, date, \
         sender_list, to_list, cc_list, bcc_list, reply_to_list, in_reply_to, message_references, \
         preview, read, flagged, message_part_id) \
         VALUES (?, ?, ?, 0, 0, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(folder_id)
    .bind(uid)
    .bind(data.headers.normalized_message_id())
    .bind(content.subject.as_deref())
    .bind(content.date)
    .bind(content.sender_list.as_deref())
    .bind(content.to_list.as_deref())
    .bind(content.cc_list.as_deref())
    .bind(content.bcc_list.as_deref())
    .bind(content.reply_to_list.as_deref())
    .bind(data.headers.in_reply_to.as_deref())
    .bind(data.headers.references.as_deref())
    .bind(content.preview.as_deref())
    .bind(if data.read { 1 } else { 0 })
    .bind(if data.flagged { 1 } else { 0 })
    .bind(message_part_id)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Writes full content into an existing row and marks it live. `uid` of
/// `None` keeps the row's current UID.
pub(crate) async fn fill_message(
    conn: &mut SqliteConnection,
    id: i64,
    uid: Option<&str>,
    data: &MessageData,
    message_part_id: Option<i64>,
) -> StoreResult<()> {
    let content = &data.content;
    sqlx::query(
        "UPDATE messages SET uid = COALESCE(?, uid), deleted = 0, empty = 0, subject = ?, date = ?, \
         sender_list = ?, to_list = ?, cc_list = ?, bcc_list = ?, reply_to_list = ?, \
         in_reply_to = ?, message_references = ?, preview = ?, read = ?, flagged = ?, \
         message_part_id = ? WHERE id = ?",
    )
    .bind(uid)
    .bind(content.subject.as_deref())
    .bind(content.date)
    .bind(content.sender_list.as_deref())
    .bind(content.to_list.as_deref())
    .bind(content.cc_list.as_deref())
    .bind(content.bcc_list.as_deref())
    .bind(content.reply_to_list.as_deref())
    .bind(data.headers.in_reply_to.as_deref())
    .bind(data.headers.references.as_deref())
    .bind(content.preview.as_deref())
    .bind(if data.read { 1 } else { 0 })
    .bind(if data.flagged { 1 } else { 0 })
    .bind(message_part_id)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Turns a message that still has thread children into a placeholder.
pub(crate) async fn make_placeholder(conn: &mut SqliteConnection, id: i64) -> StoreResult<()> {
    sqlx::query(
        "UPDATE messages SET uid = NULL, deleted = 0, empty = 1, subject = NULL, date = NULL, \
         sender_list = NULL, to_list = NULL, cc_list = NULL, bcc_list = NULL, reply_to_list = NULL, \
         in_reply_to = NULL, message_references = NULL, preview = NULL, read = 0, flagged = 0, \
         message_part_id = NULL WHERE id = ?",
    )
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Marks the source of a move. The Message-ID survives so the thread
/// structure around the row stays intact.
pub(crate) async fn make_tombstone(conn: &mut SqliteConnection, id: i64, uid: &str) -> StoreResult<()> {
    sqlx::query(
        "UPDATE messages SET uid = ?, deleted = 1, empty = 0, subject = NULL, date = NULL, \
         sender_list = NULL, to_list = NULL, cc_list = NULL, bcc_list = NULL, reply_to_list = NULL, \
         in_reply_to = NULL, message_references = NULL, preview = NULL, read = 1, flagged = 0, \
         message_part_id = NULL WHERE id = ?",
    )
    .bind(uid)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn delete_message_row(conn: &mut SqliteConnection, id: i64) -> StoreResult<()> {
    sqlx::query("DELETE FROM messages WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn parts_for_root(
    conn: &mut SqliteConnection,
    root: i64,
) -> StoreResult<Vec<StoredPart>> {
    let sql = format!(
        "SELECT {} FROM message_parts WHERE root = ? ORDER BY id",
        PART_COLUMNS
    );
    let rows = sqlx::query_as::<_, PartRow>(&sql)
        .bind(root)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(StoredPart::from).collect())
}

struct PartInsert<'a> {
    root: Option<i64>,
    parent: Option<i64>,
    seq: i64,
    mime_type: Option<&'a str>,
    display_name: Option<&'a str>,
    content_id: Option<&'a str>,
    location: DataLocation,
    data: Option<&'a [u8]>,
    decoded_body_size: Option<i64>,
}

async fn insert_part(conn: &mut SqliteConnection, part: PartInsert<'_>) -> StoreResult<i64> {
    let id = sqlx::query(
        "INSERT INTO message_parts (root, parent, seq, mime_type, display_name, content_id, \
         data_location, data, decoded_body_size) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(part.root)
    .bind(part.parent.unwrap_or(-1))
    .bind(part.seq)
    .bind(part.mime_type)
    .bind(part.display_name)
    .bind(part.content_id)
    .bind(part.location.as_db())
    .bind(part.data)
    .bind(part.decoded_body_size)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

async fn stage_new_part(
    txn: &mut StoreTxn,
    part: &NewPart,
    root: Option<i64>,
    parent: Option<i64>,
    seq: i64,
) -> StoreResult<i64> {
    let (location, inline, size, on_disk) = match &part.body {
        PartBody::Missing => (DataLocation::Missing, None, None, None),
        PartBody::Multipart => (DataLocation::ChildPartContainsData, None, None, None),
        PartBody::Bytes(bytes) if bytes.len() > MAX_BODY_SIZE_FOR_DATABASE => (
            DataLocation::OnDisk,
            None,
            Some(bytes.len() as i64),
            Some(bytes.as_slice()),
        ),
        PartBody::Bytes(bytes) => (
            DataLocation::InDatabase,
            Some(bytes.as_slice()),
            Some(bytes.len() as i64),
            None,
        ),
    };
    let id = insert_part(
        txn.conn(),
        PartInsert {
            root,
            parent,
            seq,
            mime_type: Some(part.mime_type.as_str()),
            display_name: part.display_name.as_deref(),
            content_id: part.content_id.as_deref(),
            location,
            data: inline,
            decoded_body_size: size,
        },
    )
    .await?;
    if let Some(bytes) = on_disk {
        txn.files().write(id, bytes).await?;
        debug!(part_id = id, size = bytes.len(), "staged part payload on disk");
    }
    Ok(id)
}

/// Stores a MIME tree and returns the id of its root part. Large leaf
/// payloads are staged as files named after their part id.
pub(crate) async fn save_parts(txn: &mut StoreTxn, tree: &NewPart) -> StoreResult<i64> {
    let root = stage_new_part(txn, tree, None, None, 0).await?;
    let mut stack: Vec<(&NewPart, i64, i64)> = Vec::new();
    push_children(&mut stack, tree, root);
    while let Some((part, parent, seq)) = stack.pop() {
        let id = stage_new_part(txn, part, Some(root), Some(parent), seq).await?;
        push_children(&mut stack, part, id);
    }
    Ok(root)
}

fn push_children<'a>(stack: &mut Vec<(&'a NewPart, i64, i64)>, part: &'a NewPart, id: i64) {
    for (index, child) in part.children.iter().enumerate().rev() {
        stack.push((child, id, index as i64));
    }
}

async fn copy_part(
    txn: &mut StoreTxn,
    part: &StoredPart,
    root: Option<i64>,
    parent: Option<i64>,
) -> StoreResult<i64> {
    let id = insert_part(
        txn.conn(),
        PartInsert {
            root,
            parent,
            seq: part.seq,
            mime_type: part.mime_type.as_deref(),
            display_name: part.display_name.as_deref(),
            content_id: part.content_id.as_deref(),
            location: part.data_location,
            data: part.data.as_deref(),
            decoded_body_size: part.decoded_body_size,
        },
    )
    .await?;
    if part.data_location == DataLocation::OnDisk {
        txn.files().duplicate(part.id, id).await?;
    }
    Ok(id)
}

/// Copies the part tree rooted at `source_root`, duplicating on-disk
/// payloads, and returns the new root id.
pub(crate) async fn duplicate_parts(txn: &mut StoreTxn, source_root: i64) -> StoreResult<i64> {
    let parts = parts_for_root(txn.conn(), source_root).await?;
    let top = parts
        .iter()
        .find(|p| p.id == source_root)
        .ok_or(StoreError::PartTreeNotFound(source_root))?;
    let mut children: HashMap<i64, Vec<&StoredPart>> = HashMap::new();
    for part in &parts {
        if let Some(parent) = part.parent {
            children.entry(parent).or_default().push(part);
        }
    }
    for kids in children.values_mut() {
        kids.sort_by_key(|kid| std::cmp::Reverse(kid.seq));
    }

    let root = copy_part(txn, top, None, None).await?;
    let mut stack: Vec<(&StoredPart, i64)> = Vec::new();
    queue_copies(&mut stack, &children, top.id, root);
    while let Some((part, parent)) = stack.pop() {
        let id = copy_part(txn, part, Some(root), Some(parent)).await?;
        queue_copies(&mut stack, &children, part.id, id);
    }
    Ok(root)
}

fn queue_copies<'a>(
    stack: &mut Vec<(&'a StoredPart, i64)>,
    children: &HashMap<i64, Vec<&'a StoredPart>>,
    source: i64,
    copy: i64,
) {
    if let Some(kids) = children.get(&source) {
        stack.extend(kids.iter().map(|kid| (*kid, copy)));
    }
}

/// Deletes a part tree. Its payload files are released and only disappear
/// once the transaction commits.
pub(crate) async fn delete_parts(txn: &mut StoreTxn, root: i64) -> StoreResult<()> {
    let on_disk = sqlx::query_as::<_, (i64,)>(
        "SELECT id FROM message_parts WHERE root = ? AND data_location = ?",
    )
    .bind(root)
    .bind(DataLocation::OnDisk.as_db())
    .fetch_all(txn.conn())
    .await?;
    for (part_id,) in on_disk {
        txn.files().release(part_id);
    }
    sqlx::query("DELETE FROM message_parts WHERE root = ?")
        .bind(root)
        .execute(txn.conn())
        .await?;
    Ok(())
}
