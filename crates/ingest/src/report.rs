use clinicbooks_core::RecordKey;
use clinicbooks_storage::UploadStatus;
use serde::Serialize;
use std::collections::BTreeSet;

/// A row or file that could not be committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub file: String,
    pub record: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowWarning {
    pub file: String,
    pub record: Option<String>,
    pub warning: String,
}

/// Final report of one ingestion batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub upload_id: i64,
    pub status: UploadStatus,
    pub records_processed: usize,
    pub files_processed: usize,
    pub clinics_affected: Vec<i64>,
    pub errors: Vec<RowError>,
    pub warnings: Vec<RowWarning>,
    /// Rows a resumed batch found already committed.
    pub skipped: usize,
}

impl BatchResult {
    pub fn summary(&self) -> Option<String> {
        match (self.status, self.errors.first()) {
            (UploadStatus::Completed, _) => None,
            (_, None) => Some("no records were committed".to_string()),
            (UploadStatus::Failed, Some(first)) if self.errors.len() == 1 => {
                Some(format!("{}: {}", first.file, first.error))
            }
            (_, Some(first)) => Some(format!(
                "{} errors, first: {}: {}",
                self.errors.len(),
                first.file,
                first.error
            )),
        }
    }
}

/// Accumulates the outcome of a batch while it runs.
#[derive(Debug, Default)]
pub(crate) struct BatchReport {
    pub records_processed: usize,
    pub files_processed: usize,
    pub skipped: usize,
    clinics: BTreeSet<i64>,
    errors: Vec<RowError>,
    warnings: Vec<RowWarning>,
}

impl BatchReport {
    pub fn committed(&mut self, key: RecordKey) {
        self.records_processed += 1;
        self.clinics.insert(key.clinic_id.0);
    }

    pub fn already_committed(&mut self, key: RecordKey) {
        self.committed(key);
        self.skipped += 1;
    }

    pub fn error(&mut self, file: &str, record: Option<String>, error: impl ToString) {
        self.errors.push(RowError {
            file: file.to_string(),
            record,
            error: error.to_string(),
        });
    }

    pub fn warn(&mut self, file: &str, record: Option<String>, warning: impl ToString) {
        self.warnings.push(RowWarning {
            file: file.to_string(),
            record,
            warning: warning.to_string(),
        });
    }

    /// `failed` when nothing was committed, otherwise `completed` or
    /// `completed_with_errors` depending on whether any error occurred.
    pub fn status(&self) -> UploadStatus {
        if self.records_processed == 0 {
            UploadStatus::Failed
        } else if self.errors.is_empty() {
            UploadStatus::Completed
        } else {
            UploadStatus::CompletedWithErrors
        }
    }

    pub fn finish(self, upload_id: i64, status: UploadStatus) -> BatchResult {
        BatchResult {
            upload_id,
            status,
            records_processed: self.records_processed,
            files_processed: self.files_processed,
            clinics_affected: self.clinics.into_iter().collect(),
            errors: self.errors,
            warnings: self.warnings,
            skipped: self.skipped,
        }
    }
}
