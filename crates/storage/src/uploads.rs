use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::DbPool;
use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl UploadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
            UploadStatus::CompletedWithErrors => "completed_with_errors",
            UploadStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::CompletedWithErrors | UploadStatus::Failed
        )
    }

    /// `processing -> processing` is allowed so an interrupted batch can be resumed.
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        match self {
            UploadStatus::Pending => matches!(next, UploadStatus::Processing | UploadStatus::Failed),
            UploadStatus::Processing => next != UploadStatus::Pending,
            _ => false,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "processing" => Ok(UploadStatus::Processing),
            "completed" => Ok(UploadStatus::Completed),
            "completed_with_errors" => Ok(UploadStatus::CompletedWithErrors),
            "failed" => Ok(UploadStatus::Failed),
            other => Err(format!("unknown upload status '{other}'")),
        }
    }
}

/// One ingestion batch as recorded in `upload_history`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadHistory {
    pub id: i64,
    pub status: UploadStatus,
    pub file_names: Vec<String>,
    pub file_count: i64,
    pub records_count: i64,
    pub error_message: Option<String>,
    pub clinics_affected: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Final figures written when a batch reaches a terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub status: UploadStatus,
    pub records_count: i64,
    pub error_message: Option<String>,
    pub clinics_affected: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPage {
    pub items: Vec<UploadHistory>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

type UploadRow = (
    i64,
    String,
    String,
    i64,
    i64,
    Option<String>,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

const UPLOAD_COLUMNS: &str = "id, status, file_names, file_count, records_count, error_message, clinics_affected, created_at, completed_at";

fn upload_from_row(row: UploadRow) -> Result<UploadHistory, StorageError> {
    let (id, status, file_names, file_count, records_count, error_message, clinics, created_at, completed_at) =
        row;
    Ok(UploadHistory {
        id,
        status: status.parse().map_err(StorageError::Corrupt)?,
        file_names: serde_json::from_str(&file_names)?,
        file_count,
        records_count,
        error_message,
        clinics_affected: serde_json::from_str(&clinics)?,
        created_at,
        completed_at,
    })
}

pub async fn create_upload(pool: &DbPool, file_names: &[String]) -> Result<i64, StorageError> {
    let result = sqlx::query(
        "INSERT INTO upload_history (status, file_names, file_count, created_at) VALUES ('pending', ?, ?, ?)",
    )
    .bind(serde_json::to_string(file_names)?)
    .bind(file_names.len() as i64)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn get_upload(pool: &DbPool, id: i64) -> Result<Option<UploadHistory>, StorageError> {
    let row = sqlx::query_as::<_, UploadRow>(&format!(
        "SELECT {UPLOAD_COLUMNS} FROM upload_history WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(upload_from_row).transpose()
}

/// Newest first. `page` is 1-based; `per_page` is clamped to 1..=100.
/// Uploads left `pending` or `processing`, oldest first. After a restart these
/// are batches that were interrupted and can be resumed.
pub async fn unfinished_uploads(pool: &DbPool) -> Result<Vec<UploadHistory>, StorageError> {
    let rows = sqlx::query_as::<_, UploadRow>(&format!(
        "SELECT {UPLOAD_COLUMNS} FROM upload_history WHERE status IN ('pending', 'processing') ORDER BY id"
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(upload_from_row).collect()
}

pub async fn list_uploads(pool: &DbPool, page: u32, per_page: u32) -> Result<UploadPage, StorageError> {
    let page = page.max(1);
    let per_page = per_page.clamp(1, 100);
    let offset = i64::from(page - 1) * i64::from(per_page);

    let (total,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM upload_history")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query_as::<_, UploadRow>(&format!(
        "SELECT {UPLOAD_COLUMNS} FROM upload_history ORDER BY id DESC LIMIT ? OFFSET ?"
    ))
    .bind(i64::from(per_page))
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(UploadPage {
        items: rows
            .into_iter()
            .map(upload_from_row)
            .collect::<Result<_, _>>()?,
        total,
        page,
        per_page,
    })
}

async fn current_status(pool: &DbPool, id: i64) -> Result<UploadStatus, StorageError> {
    let (status,) = sqlx::query_as::<_, (String,)>("SELECT status FROM upload_history WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("upload {id}")))?;
    status.parse().map_err(StorageError::Corrupt)
}

pub async fn mark_processing(pool: &DbPool, id: i64) -> Result<(), StorageError> {
    let from = current_status(pool, id).await?;
    let to = UploadStatus::Processing;
    if !from.can_transition_to(to) {
        return Err(StorageError::InvalidTransition { id, from, to });
    }

    let result = sqlx::query("UPDATE upload_history SET status = ? WHERE id = ? AND status = ?")
        .bind(to.as_str())
        .bind(id)
        .bind(from.as_str())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        let from = current_status(pool, id).await?;
        return Err(StorageError::InvalidTransition { id, from, to });
    }
    Ok(())
}

/// Moves the batch into its terminal status. Terminal rows are never changed again.
pub async fn finish_upload(pool: &DbPool, id: i64, outcome: &UploadOutcome) -> Result<(), StorageError> {
    let from = current_status(pool, id).await?;
    let to = outcome.status;
    if !to.is_terminal() || !from.can_transition_to(to) {
        return Err(StorageError::InvalidTransition { id, from, to });
    }

    let result = sqlx::query(
        r#"
        UPDATE upload_history
        SET status = ?, records_count = ?, error_message = ?, clinics_affected = ?, completed_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(to.as_str())
    .bind(outcome.records_count)
    .bind(&outcome.error_message)
    .bind(serde_json::to_string(&outcome.clinics_affected)?)
    .bind(Utc::now())
    .bind(id)
    .bind(from.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let from = current_status(pool, id).await?;
        return Err(StorageError::InvalidTransition { id, from, to });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::test_db;

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    fn outcome(status: UploadStatus) -> UploadOutcome {
        UploadOutcome {
            status,
            records_count: 2,
            error_message: None,
            clinics_affected: vec![1, 2],
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Processing,
            UploadStatus::Completed,
            UploadStatus::CompletedWithErrors,
            UploadStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<UploadStatus>().unwrap(), status);
        }
        assert!("done".parse::<UploadStatus>().is_err());
    }

    #[test]
    fn terminal_states_are_final() {
        assert!(!UploadStatus::Completed.can_transition_to(UploadStatus::Processing));
        assert!(!UploadStatus::Failed.can_transition_to(UploadStatus::Completed));
        assert!(!UploadStatus::Pending.can_transition_to(UploadStatus::Completed));
        assert!(UploadStatus::Processing.can_transition_to(UploadStatus::CompletedWithErrors));
    }

    #[tokio::test]
    async fn unfinished_uploads_excludes_terminal_ones() {
        let (_dir, pool) = test_db().await;
        let pending = create_upload(&pool, &names(&["a.csv"])).await.unwrap();
        let processing = create_upload(&pool, &names(&["b.csv"])).await.unwrap();
        let done = create_upload(&pool, &names(&["c.csv"])).await.unwrap();
        mark_processing(&pool, processing).await.unwrap();
        mark_processing(&pool, done).await.unwrap();
        finish_upload(&pool, done, &outcome(UploadStatus::Failed)).await.unwrap();

        let ids: Vec<i64> = unfinished_uploads(&pool).await.unwrap().iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![pending, processing]);
    }

    #[tokio::test]
    async fn lifecycle_is_recorded() {
        let (_dir, pool) = test_db().await;
        let id = create_upload(&pool, &names(&["jan.csv", "feb.csv"])).await.unwrap();

        let pending = get_upload(&pool, id).await.unwrap().unwrap();
        assert_eq!(pending.status, UploadStatus::Pending);
        assert_eq!(pending.file_count, 2);
        assert!(pending.completed_at.is_none());

        mark_processing(&pool, id).await.unwrap();
        finish_upload(&pool, id, &outcome(UploadStatus::Completed)).await.unwrap();

        let done = get_upload(&pool, id).await.unwrap().unwrap();
        assert_eq!(done.status, UploadStatus::Completed);
        assert_eq!(done.records_count, 2);
        assert_eq!(done.clinics_affected, vec![1, 2]);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn terminal_upload_cannot_restart() {
        let (_dir, pool) = test_db().await;
        let id = create_upload(&pool, &names(&["a.csv"])).await.unwrap();
        mark_processing(&pool, id).await.unwrap();
        finish_upload(&pool, id, &outcome(UploadStatus::Failed)).await.unwrap();

        let err = mark_processing(&pool, id).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { .. }));
        let err = finish_upload(&pool, id, &outcome(UploadStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn missing_upload_is_not_found() {
        let (_dir, pool) = test_db().await;
        assert!(get_upload(&pool, 42).await.unwrap().is_none());
        assert!(matches!(
            mark_processing(&pool, 42).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn lists_newest_first_with_pages() {
        let (_dir, pool) = test_db().await;
        for i in 0..5 {
            create_upload(&pool, &names(&[&format!("{i}.csv")])).await.unwrap();
        }

        let first = list_uploads(&pool, 1, 2).await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].file_names, names(&["4.csv"]));

        let last = list_uploads(&pool, 3, 2).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].file_names, names(&["0.csv"]));

        let clamped = list_uploads(&pool, 0, 0).await.unwrap();
        assert_eq!(clamped.page, 1);
        assert_eq!(clamped.per_page, 1);
    }
}
