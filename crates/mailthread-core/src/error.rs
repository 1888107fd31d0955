use thiserror::Error;

/// Failures surfaced by store operations. Each one means the requested
/// operation did not take effect: the enclosing transaction was rolled back
/// and any files staged for it were removed.
///
/// Structural violations of the thread forest are not represented here; they
/// panic at the point of detection.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("attachment i/o failure for message part {part_id}: {source}")]
    AttachmentIo {
        part_id: i64,
        #[source]
        source: std::io::Error,
    },

    #[error("message {0} not found")]
    MessageNotFound(i64),

    #[error("part tree {0} not found")]
    PartTreeNotFound(i64),

    #[error("folder {0} not found")]
    FolderNotFound(i64),

    #[error("folder \"{0}\" not found")]
    UnknownFolder(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::MessageNotFound(_)
                | StoreError::PartTreeNotFound(_)
                | StoreError::FolderNotFound(_)
                | StoreError::UnknownFolder(_)
        )
    }

    pub(crate) fn attachment_io(part_id: i64, source: std::io::Error) -> Self {
        StoreError::AttachmentIo { part_id, source }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
