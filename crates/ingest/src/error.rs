use clinicbooks_core::TotalsOverflow;
use clinicbooks_storage::{StorageError, UploadStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Totals(#[from] TotalsOverflow),
    #[error("no files were submitted")]
    NoFiles,
    #[error("upload {0} not found")]
    UploadNotFound(i64),
    #[error("upload {0} is still being processed")]
    StillRunning(i64),
    #[error("upload {id} already finished as {status}")]
    AlreadyFinished { id: i64, status: UploadStatus },
    #[error("ingestion task stopped unexpectedly: {0}")]
    Task(#[from] tokio::task::JoinError),
}
