use std::sync::Arc;

use sqlx::{Sqlite, SqliteConnection, Transaction};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::LocalUidGenerator;
use crate::attachments::StagedFiles;
use crate::error::StoreResult;

/// One exclusive unit of work against the store.
///
/// Holds the store's writer lock for its whole lifetime. Dropping it without
/// [`StoreTxn::commit`] rolls the SQL back and removes every payload file it
/// created.
pub struct StoreTxn {
    tx: Transaction<'static, Sqlite>,
    files: StagedFiles,
    local_uids: Arc<dyn LocalUidGenerator>,
    _writer: OwnedMutexGuard<()>,
}

impl StoreTxn {
    pub(crate) fn new(
        writer: OwnedMutexGuard<()>,
        tx: Transaction<'static, Sqlite>,
        files: StagedFiles,
        local_uids: Arc<dyn LocalUidGenerator>,
    ) -> Self {
        Self {
            tx,
            files,
            local_uids,
            _writer: writer,
        }
    }

    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    pub fn files(&mut self) -> &mut StagedFiles {
        &mut self.files
    }

    pub fn next_local_uid(&self) -> String {
        self.local_uids.next_uid()
    }

    /// Commits the rows, then deletes payloads released during the
    /// transaction. A failed commit leaves no created files behind.
    pub async fn commit(self) -> StoreResult<()> {
        let StoreTxn {
            tx,
            files,
            _writer,
            ..
        } = self;
        tx.commit().await?;
        files.finish().await;
        debug!("store transaction committed");
        Ok(())
    }
}
