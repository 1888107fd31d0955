use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    MAX_BODY_SIZE_FOR_DATABASE, MessageContent, MessageData, NewPart, SqliteMailStore,
    ThreadHeaders, ThreadRow,
};

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!(
        "{}-{}-{}",
        nanos,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    )
}

pub(crate) fn temp_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("mailthread-{}-{}", label, unique_suffix()))
}

pub(crate) fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("mailthread-test-{}.db", unique_suffix()))
}

pub(crate) struct Fixture {
    pub store: SqliteMailStore,
    pub inbox: i64,
    db_path: PathBuf,
    attachments_dir: PathBuf,
}

impl Fixture {
    pub async fn thread_count(&self) -> anyhow::Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM threads")
            .fetch_one(&self.store.pool)
            .await?;
        Ok(row.0)
    }

    /// Placeholder nodes with nothing below them.
    pub async fn childless_placeholder_count(&self) -> anyhow::Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM threads t JOIN messages m ON m.id = t.message_id \
             WHERE m.empty = 1 AND NOT EXISTS (SELECT 1 FROM threads c WHERE c.parent = t.id)",
        )
        .fetch_one(&self.store.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn message_row_count(&self) -> anyhow::Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.store.pool)
            .await?;
        Ok(row.0)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.attachments_dir);
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.db_path.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(path);
        }
    }
}

pub(crate) async fn fixture() -> anyhow::Result<Fixture> {
    let db_path = temp_db_path();
    let attachments_dir = temp_dir("attachments");
    let store = SqliteMailStore::connect(&db_path.to_string_lossy(), &attachments_dir).await?;
    store.init().await?;
    let inbox = store.create_folder("INBOX").await?;
    Ok(Fixture {
        store,
        inbox,
        db_path,
        attachments_dir,
    })
}

pub(crate) fn message(message_id: &str) -> MessageData {
    MessageData {
        headers: ThreadHeaders::new(message_id),
        content: MessageContent {
            subject: Some(format!("subject of {}", message_id)),
            date: Some(1_700_000_000),
            sender_list: Some("alice@example.com".to_string()),
            preview: Some("hello".to_string()),
            ..MessageContent::default()
        },
        ..MessageData::default()
    }
}

pub(crate) fn reply(message_id: &str, references: &[&str]) -> MessageData {
    let mut data = message(message_id);
    data.headers.references = Some(references.join(" "));
    data.headers.in_reply_to = references.last().map(|id| id.to_string());
    data
}

/// multipart/mixed with an inline text body and an attachment just over the
/// inline limit.
pub(crate) fn large_attachment_tree() -> NewPart {
    NewPart::multipart(
        "multipart/mixed",
        vec![
            NewPart::leaf("text/plain", b"body text".to_vec()),
            NewPart::leaf(
                "application/octet-stream",
                vec![7u8; MAX_BODY_SIZE_FOR_DATABASE + 1],
            ),
        ],
    )
}

pub(crate) async fn thread_of(store: &SqliteMailStore, message_id: i64) -> anyhow::Result<ThreadRow> {
    store
        .thread_for_message(message_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("message {} has no thread node", message_id))
}
