pub mod audit;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod report;

pub use audit::{run_audit, AuditReport, RecordAudit};
pub use error::IngestError;
pub use orchestrator::{Orchestrator, UploadFile, UploadTicket};
pub use progress::{ProgressChannel, ProgressEvent, ProgressStatus};
pub use report::{BatchResult, RowError, RowWarning};
