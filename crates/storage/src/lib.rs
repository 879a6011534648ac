pub mod db;
pub mod error;
pub mod uploads;
pub mod versions;

pub use db::{create_db, get_clinics, open_db, seed_clinics, DbPool, DEFAULT_BUSY_TIMEOUT};
pub use error::StorageError;
pub use sqlx::Error as SqlxError;
pub use uploads::{
    create_upload, finish_upload, get_upload, list_uploads, mark_processing, unfinished_uploads,
    UploadHistory,
    UploadOutcome, UploadPage, UploadStatus,
};
pub use versions::{
    all_records, commit_version, current_record, get_version, latest_version, list_version_groups,
    list_versions, rollback, version_exists_for_upload, ChangeKind, RecordVersion, VersionFilter,
    VersionGroup, VersionOrigin,
};
