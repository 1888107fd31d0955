use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Maps message-part ids to payload files in a single directory.
#[derive(Debug, Clone)]
pub struct AttachmentFileManager {
    dir: PathBuf,
}

impl AttachmentFileManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_path(&self, part_id: i64) -> PathBuf {
        self.dir.join(part_id.to_string())
    }

    pub async fn read(&self, part_id: i64) -> StoreResult<Vec<u8>> {
        tokio::fs::read(self.file_path(part_id))
            .await
            .map_err(|e| StoreError::attachment_io(part_id, e))
    }

    pub async fn exists(&self, part_id: i64) -> bool {
        tokio::fs::metadata(self.file_path(part_id)).await.is_ok()
    }

    async fn ensure_dir(&self, part_id: i64) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::attachment_io(part_id, e))
    }
}

/// File side of a store transaction.
///
/// Files written or duplicated here exist immediately but are removed again
/// unless [`StagedFiles::finish`] runs after the SQL commit. Releases are only
/// recorded; the files disappear in `finish`, so a rolled-back delete keeps its
/// payloads.
pub struct StagedFiles {
    manager: AttachmentFileManager,
    created: Vec<PathBuf>,
    released: Vec<PathBuf>,
    settled: bool,
}

impl StagedFiles {
    pub(crate) fn new(manager: AttachmentFileManager) -> Self {
        Self {
            manager,
            created: Vec::new(),
            released: Vec::new(),
            settled: false,
        }
    }

    pub fn manager(&self) -> &AttachmentFileManager {
        &self.manager
    }

    pub async fn write(&mut self, part_id: i64, bytes: &[u8]) -> StoreResult<()> {
        self.manager.ensure_dir(part_id).await?;
        let path = self.manager.file_path(part_id);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::attachment_io(part_id, e))?;
        self.created.push(path);
        Ok(())
    }

    pub async fn duplicate(&mut self, source_part_id: i64, target_part_id: i64) -> StoreResult<()> {
        self.manager.ensure_dir(target_part_id).await?;
        let source = self.manager.file_path(source_part_id);
        let target = self.manager.file_path(target_part_id);
        tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| StoreError::attachment_io(source_part_id, e))?;
        self.created.push(target);
        Ok(())
    }

    pub fn release(&mut self, part_id: i64) {
        self.released.push(self.manager.file_path(part_id));
    }

    pub(crate) async fn finish(mut self) {
        self.settled = true;
        for path in std::mem::take(&mut self.released) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed released payload"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove payload"),
            }
        }
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        for path in &self.created {
            let _ = std::fs::remove_file(path);
        }
    }
}
