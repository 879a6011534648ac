use clinicbooks_core::RecordKey;
use thiserror::Error;

use crate::uploads::UploadStatus;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("concurrent commits to {0} kept conflicting")]
    ConcurrencyConflict(RecordKey),
    #[error("upload {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: UploadStatus,
        to: UploadStatus,
    },
    #[error("{0}: amount does not fit in the ledger")]
    AmountOutOfRange(String),
    #[error("stored snapshot is unreadable: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("stored row is invalid: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub(crate) fn amount(name: &str) -> Self {
        StorageError::AmountOutOfRange(name.to_string())
    }

    /// True when the database itself cannot be reached, as opposed to a
    /// problem with one particular write.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StorageError::Database(
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Configuration(_)
            )
        )
    }
}

/// Busy, locked or unique-violation failures that a fresh attempt may clear.
pub(crate) fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            if db.is_unique_violation() {
                return true;
            }
            matches!(
                db.code().as_deref(),
                Some("5" | "6" | "261" | "262" | "517" | "773")
            )
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::test_db;

    async fn insert_version(pool: &crate::DbPool, version: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO record_versions (clinic_id, year, month, version, snapshot, change_kind, created_at) \
             VALUES (1, 2024, 6, ?, '{}', 'repair', '2024-06-01T00:00:00Z')",
        )
        .bind(version)
        .execute(pool)
        .await
        .map(|_| ())
    }

    #[tokio::test]
    async fn duplicate_version_number_is_retryable() {
        let (_dir, pool) = test_db().await;
        insert_version(&pool, 1).await.unwrap();
        let err = insert_version(&pool, 1).await.unwrap_err();
        assert!(is_retryable(&err), "{err}");
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let (_dir, pool) = test_db().await;
        let err = sqlx::query("SELECT * FROM no_such_table")
            .execute(&pool)
            .await
            .unwrap_err();
        assert!(!is_retryable(&err));
        assert!(!StorageError::Database(err).is_unavailable());

        assert!(!is_retryable(&sqlx::Error::PoolClosed));
        assert!(StorageError::Database(sqlx::Error::PoolClosed).is_unavailable());
        assert!(!StorageError::NotFound("x".into()).is_unavailable());
    }
}
