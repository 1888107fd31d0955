use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::Mutex;

mod attachments;
mod copy_move;
mod delete;
mod error;
mod forest;
mod message_store;
mod save;
mod thread_store;
mod threading;
mod txn;

#[cfg(test)]
mod test_support;

pub use attachments::{AttachmentFileManager, StagedFiles};
pub use copy_move::{copy_message_in, move_message_in};
pub use delete::{
    clear_all_messages_in, destroy_deleted_messages_in, destroy_local_only_messages_in,
    destroy_messages_in,
};
pub use error::{StoreError, StoreResult};
pub use forest::{ForestReport, ForestViolation};
pub use save::save_message_in;
pub use thread_store::ThreadRow;
pub use threading::{
    ThreadAttachment, ThreadHeaders, attach_in, link_message_in, normalize_message_id,
};
pub use txn::StoreTxn;

/// Reserved prefix of locally generated UIDs. Servers never hand out UIDs
/// starting with it.
pub const LOCAL_UID_PREFIX: &str = "mailthread-local:";

/// Leaf payloads larger than this are kept on disk instead of in the row.
pub const MAX_BODY_SIZE_FOR_DATABASE: usize = 16 * 1024;

pub fn is_local_uid(uid: &str) -> bool {
    uid.starts_with(LOCAL_UID_PREFIX)
}

pub trait LocalUidGenerator: Send + Sync {
    fn next_uid(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidLocalUids;

impl LocalUidGenerator for UuidLocalUids {
    fn next_uid(&self) -> String {
        format!("{}{}", LOCAL_UID_PREFIX, uuid::Uuid::new_v4())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Folder {
    pub id: i64,
    pub name: String,
}

/// Where a message part keeps its payload. The numeric values are stored in
/// `message_parts.data_location`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataLocation {
    Missing,
    InDatabase,
    OnDisk,
    ChildPartContainsData,
}

impl DataLocation {
    pub fn as_db(self) -> i64 {
        match self {
            DataLocation::Missing => 0,
            DataLocation::InDatabase => 1,
            DataLocation::OnDisk => 2,
            DataLocation::ChildPartContainsData => 3,
        }
    }

    pub fn from_db(value: i64) -> Option<Self> {
        match value {
            0 => Some(DataLocation::Missing),
            1 => Some(DataLocation::InDatabase),
            2 => Some(DataLocation::OnDisk),
            3 => Some(DataLocation::ChildPartContainsData),
            _ => None,
        }
    }
}

/// Content columns of a message row. All of them are null on placeholders
/// and tombstones.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageContent {
    pub subject: Option<String>,
    pub date: Option<i64>,
    pub sender_list: Option<String>,
    pub to_list: Option<String>,
    pub cc_list: Option<String>,
    pub bcc_list: Option<String>,
    pub reply_to_list: Option<String>,
    pub preview: Option<String>,
}

impl MessageContent {
    pub fn is_blank(&self) -> bool {
        *self == MessageContent::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PartBody {
    Missing,
    Bytes(Vec<u8>),
    Multipart,
}

/// A MIME tree node handed to [`SqliteMailStore::save_message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPart {
    pub mime_type: String,
    pub display_name: Option<String>,
    pub content_id: Option<String>,
    pub body: PartBody,
    pub children: Vec<NewPart>,
}

impl NewPart {
    pub fn leaf(mime_type: &str, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            display_name: None,
            content_id: None,
            body: PartBody::Bytes(bytes.into()),
            children: Vec::new(),
        }
    }

    pub fn multipart(mime_type: &str, children: Vec<NewPart>) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            display_name: None,
            content_id: None,
            body: PartBody::Multipart,
            children,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageData {
    pub headers: ThreadHeaders,
    pub content: MessageContent,
    pub read: bool,
    pub flagged: bool,
    pub parts: Option<NewPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: i64,
    pub folder_id: i64,
    pub uid: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub deleted: bool,
    pub empty: bool,
    pub read: bool,
    pub flagged: bool,
    pub content: MessageContent,
    pub message_part_id: Option<i64>,
}

impl StoredMessage {
    /// Deleted or empty rows are kept for thread structure only.
    pub fn is_visible(&self) -> bool {
        !self.deleted && !self.empty
    }

    pub fn thread_headers(&self) -> ThreadHeaders {
        ThreadHeaders {
            message_id: self.message_id.clone(),
            in_reply_to: self.in_reply_to.clone(),
            references: self.references.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredPart {
    pub id: i64,
    pub root: i64,
    pub parent: Option<i64>,
    pub seq: i64,
    pub mime_type: Option<String>,
    pub display_name: Option<String>,
    pub content_id: Option<String>,
    pub data_location: DataLocation,
    pub data: Option<Vec<u8>>,
    pub decoded_body_size: Option<i64>,
}

/// A visible message inside a thread tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadEntry {
    pub thread_id: i64,
    pub parent: Option<i64>,
    pub message_id: i64,
    pub subject: Option<String>,
    pub date: Option<i64>,
}

#[async_trait]
pub trait MailStore: Send + Sync {
    async fn attach(
        &self,
        folder_id: i64,
        message_id: Option<&str>,
        in_reply_to: Option<&str>,
        references: Option<&str>,
    ) -> StoreResult<ThreadAttachment>;
    async fn copy_message(&self, message_id: i64, destination_folder_id: i64) -> StoreResult<i64>;
    async fn move_message(&self, message_id: i64, destination_folder_id: i64) -> StoreResult<i64>;
    async fn destroy_messages(&self, folder_id: i64, server_ids: &[String]) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct SqliteMailStore {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
    attachments: AttachmentFileManager,
    local_uids: Arc<dyn LocalUidGenerator>,
}

impl SqliteMailStore {
    pub async fn connect(path: &str, attachments_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.trim_start_matches("sqlite:"))
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            writer: Arc::new(Mutex::new(())),
            attachments: AttachmentFileManager::new(attachments_dir),
            local_uids: Arc::new(UuidLocalUids),
        })
    }

    pub fn with_local_uids(mut self, generator: Arc<dyn LocalUidGenerator>) -> Self {
        self.local_uids = generator;
        self
    }

    pub async fn init(&self) -> StoreResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn attachments(&self) -> &AttachmentFileManager {
        &self.attachments
    }

    /// Waits for the writer lock and opens the transaction every mutation of
    /// this store runs in.
    pub async fn begin_exclusive(&self) -> StoreResult<StoreTxn> {
        let guard = self.writer.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(StoreTxn::new(
            guard,
            tx,
            StagedFiles::new(self.attachments.clone()),
            self.local_uids.clone(),
        ))
    }

    pub async fn create_folder(&self, name: &str) -> StoreResult<i64> {
        if let Some(id) = self.folder_id_by_name(name).await? {
            return Ok(id);
        }
        let mut txn = self.begin_exclusive().await?;
        let result = sqlx::query("INSERT INTO folders (name) VALUES (?)")
            .bind(name)
            .execute(txn.conn())
            .await?;
        txn.commit().await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn folder_id_by_name(&self, name: &str) -> StoreResult<Option<i64>> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT id FROM folders WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.0))
    }

    pub async fn require_folder(&self, name: &str) -> StoreResult<i64> {
        self.folder_id_by_name(name)
            .await?
            .ok_or_else(|| StoreError::UnknownFolder(name.to_string()))
    }

    pub async fn list_folders(&self) -> StoreResult<Vec<Folder>> {
        let folders = sqlx::query_as::<_, (i64, String)>("SELECT id, name FROM folders ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(folders
            .into_iter()
            .map(|row| Folder {
                id: row.0,
                name: row.1,
            })
            .collect())
    }

    pub async fn save_message(
        &self,
        folder_id: i64,
        server_uid: Option<&str>,
        data: &MessageData,
    ) -> StoreResult<i64> {
        let mut txn = self.begin_exclusive().await?;
        let message_id = save_message_in(&mut txn, folder_id, server_uid, data).await?;
        txn.commit().await?;
        Ok(message_id)
    }

    pub async fn get_message(&self, message_id: i64) -> StoreResult<Option<StoredMessage>> {
        let mut conn = self.pool.acquire().await?;
        message_store::message_by_id(&mut conn, message_id).await
    }

    pub async fn message_id_for_uid(&self, folder_id: i64, uid: &str) -> StoreResult<Option<i64>> {
        let mut conn = self.pool.acquire().await?;
        Ok(message_store::message_by_uid(&mut conn, folder_id, uid)
            .await?
            .map(|m| m.id))
    }

    /// Real messages of a folder, newest first. Placeholders and tombstones
    /// are filtered out.
    pub async fn list_messages(&self, folder_id: i64) -> StoreResult<Vec<StoredMessage>> {
        let mut conn = self.pool.acquire().await?;
        message_store::visible_messages(&mut conn, folder_id).await
    }

    pub async fn thread_for_message(&self, message_id: i64) -> StoreResult<Option<ThreadRow>> {
        let mut conn = self.pool.acquire().await?;
        thread_store::thread_for_message(&mut conn, message_id).await
    }

    pub async fn thread_members(&self, root_thread_id: i64) -> StoreResult<Vec<ThreadEntry>> {
        let mut conn = self.pool.acquire().await?;
        thread_store::visible_members(&mut conn, root_thread_id).await
    }

    pub async fn message_parts(&self, message_id: i64) -> StoreResult<Vec<StoredPart>> {
        let mut conn = self.pool.acquire().await?;
        let message = message_store::message_by_id(&mut conn, message_id)
            .await?
            .ok_or(StoreError::MessageNotFound(message_id))?;
        match message.message_part_id {
            Some(root) => message_store::parts_for_root(&mut conn, root).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn read_part_payload(&self, part: &StoredPart) -> StoreResult<Option<Vec<u8>>> {
        match part.data_location {
            DataLocation::InDatabase => Ok(part.data.clone()),
            DataLocation::OnDisk => Ok(Some(self.attachments.read(part.id).await?)),
            DataLocation::Missing | DataLocation::ChildPartContainsData => Ok(None),
        }
    }

    pub async fn destroy_deleted_messages(&self, folder_id: i64) -> StoreResult<usize> {
        let mut txn = self.begin_exclusive().await?;
        let count = destroy_deleted_messages_in(&mut txn, folder_id).await?;
        txn.commit().await?;
        Ok(count)
    }

    pub async fn destroy_local_only_messages(&self, folder_id: i64) -> StoreResult<usize> {
        let mut txn = self.begin_exclusive().await?;
        let count = destroy_local_only_messages_in(&mut txn, folder_id).await?;
        txn.commit().await?;
        Ok(count)
    }

    pub async fn clear_all_messages(&self, folder_id: i64) -> StoreResult<()> {
        let mut txn = self.begin_exclusive().await?;
        clear_all_messages_in(&mut txn, folder_id).await?;
        txn.commit().await
    }

    pub async fn verify_thread_forest(&self) -> StoreResult<ForestReport> {
        let mut conn = self.pool.acquire().await?;
        forest::verify_forest(&mut conn).await
    }
}

pub(crate) fn placeholders(count: usize) -> String {
    std::iter::repeat_n("?", count)
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl MailStore for SqliteMailStore {
    async fn attach(
        &self,
        folder_id: i64,
        message_id: Option<&str>,
        in_reply_to: Option<&str>,
        references: Option<&str>,
    ) -> StoreResult<ThreadAttachment> {
        let headers = ThreadHeaders {
            message_id: message_id.map(str::to_string),
            in_reply_to: in_reply_to.map(str::to_string),
            references: references.map(str::to_string),
        };
        let mut txn = self.begin_exclusive().await?;
        message_store::ensure_folder(txn.conn(), folder_id).await?;
        let attachment = attach_in(&mut txn, folder_id, &headers).await?;
        txn.commit().await?;
        Ok(attachment)
    }

    async fn copy_message(&self, message_id: i64, destination_folder_id: i64) -> StoreResult<i64> {
        let mut txn = self.begin_exclusive().await?;
        let new_id = copy_message_in(&mut txn, message_id, destination_folder_id).await?;
        txn.commit().await?;
        Ok(new_id)
    }

    async fn move_message(&self, message_id: i64, destination_folder_id: i64) -> StoreResult<i64> {
        let mut txn = self.begin_exclusive().await?;
        let new_id = move_message_in(&mut txn, message_id, destination_folder_id).await?;
        txn.commit().await?;
        Ok(new_id)
    }

    async fn destroy_messages(&self, folder_id: i64, server_ids: &[String]) -> StoreResult<()> {
        let mut txn = self.begin_exclusive().await?;
        destroy_messages_in(&mut txn, folder_id, server_ids).await?;
        txn.commit().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::{LocalUidGenerator, MailStore, is_local_uid};
    use crate::test_support::{fixture, message};

    #[tokio::test]
    async fn init_applies_schema_on_fresh_db() -> anyhow::Result<()> {
        let fx = fixture().await?;

        for (table, required) in [
            ("messages", &["id", "folder_id", "uid", "message_id", "deleted", "empty"][..]),
            ("message_parts", &["id", "root", "parent", "seq", "data_location"][..]),
            ("threads", &["id", "message_id", "root", "parent"][..]),
        ] {
            let rows = sqlx::query_as::<_, (i64, String, String, i64, Option<String>, i64)>(
                &format!("PRAGMA table_info({})", table),
            )
            .fetch_all(&fx.store.pool)
            .await?;
            let columns: HashSet<String> = rows.into_iter().map(|row| row.1).collect();
            for column in required {
                assert!(columns.contains(*column), "missing {}.{}", table, column);
            }
        }

        let trigger = sqlx::query_as::<_, (String,)>(
            "SELECT name FROM sqlite_master WHERE type = 'trigger' AND name = 'set_thread_root'",
        )
        .fetch_optional(&fx.store.pool)
        .await?;
        assert!(trigger.is_some(), "missing set_thread_root trigger");
        Ok(())
    }

    #[tokio::test]
    async fn folders_are_created_once() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let first = fx.store.create_folder("Archive").await?;
        let second = fx.store.create_folder("Archive").await?;
        assert_eq!(first, second);
        assert!(fx.store.list_folders().await?.iter().any(|f| f.name == "Archive"));
        assert!(fx.store.require_folder("Nope").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn operations_on_unknown_ids_report_not_found() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let err = fx
            .store
            .copy_message(9999, fx.inbox)
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("copy of unknown message succeeded"))?;
        assert!(err.is_not_found());

        let saved = fx.store.save_message(fx.inbox, Some("1"), &message("<a@x>")).await?;
        let err = fx
            .store
            .move_message(saved, 4242)
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("move into unknown folder succeeded"))?;
        assert!(err.is_not_found());

        let err = fx
            .store
            .destroy_messages(4242, &["1".to_string()])
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("destroy in unknown folder succeeded"))?;
        assert!(err.is_not_found());
        assert!(fx.store.get_message(saved).await?.is_some());
        Ok(())
    }

    struct CountingUids(AtomicU64);

    impl LocalUidGenerator for CountingUids {
        fn next_uid(&self) -> String {
            format!("{}{}", super::LOCAL_UID_PREFIX, self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn local_messages_use_the_configured_uid_generator() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let store = fx
            .store
            .clone()
            .with_local_uids(Arc::new(CountingUids(AtomicU64::new(100))));
        let id = store.save_message(fx.inbox, None, &message("<local@x>")).await?;
        let saved = store
            .get_message(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing saved message"))?;
        let uid = saved.uid.unwrap_or_default();
        assert!(is_local_uid(&uid));
        assert!(uid.ends_with("100"));
        Ok(())
    }
}
