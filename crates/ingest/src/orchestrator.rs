//! Runs ingestion batches: parse -> map -> validate -> recompute -> commit.

use chrono::{Datelike, Utc};
use clinicbooks_core::{recompute, RecordValidator};
use clinicbooks_import::{parse_sheet, LineItemMapper, RawRow};
use clinicbooks_storage::{
    commit_version, create_upload, finish_upload, get_clinics, get_upload, mark_processing,
    version_exists_for_upload, DbPool, StorageError, UploadOutcome, UploadStatus, VersionOrigin,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::IngestError;
use crate::progress::{ProgressChannel, ProgressEvent, ProgressStatus};
use crate::report::{BatchReport, BatchResult};

/// One submitted file.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Handle to a batch running in the background.
pub struct UploadTicket {
    pub upload_id: i64,
    handle: JoinHandle<BatchResult>,
}

impl UploadTicket {
    pub async fn wait(self) -> Result<BatchResult, IngestError> {
        Ok(self.handle.await?)
    }
}

/// Upload ids with a batch task running in this process.
#[derive(Clone)]
struct Running(Arc<watch::Sender<HashSet<i64>>>);

impl Running {
    fn new() -> Self {
        Self(Arc::new(watch::channel(HashSet::new()).0))
    }

    /// `None` when `upload_id` already has a running batch.
    fn claim(&self, upload_id: i64) -> Option<RunningGuard> {
        let mut claimed = false;
        self.0.send_modify(|ids| claimed = ids.insert(upload_id));
        claimed.then(|| RunningGuard {
            running: self.clone(),
            upload_id,
        })
    }
}

/// Releases its upload id when the batch task ends, panics included.
struct RunningGuard {
    running: Running,
    upload_id: i64,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.0.send_modify(|ids| {
            ids.remove(&self.upload_id);
        });
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    pool: DbPool,
    progress: ProgressChannel,
    mapper: Arc<LineItemMapper>,
    running: Running,
}

/// Row outcome that must stop the whole batch.
struct Fatal(StorageError);

struct BatchRun<'a> {
    upload_id: i64,
    resuming: bool,
    validator: RecordValidator,
    report: BatchReport,
    files: &'a [UploadFile],
}

impl Orchestrator {
    pub fn new(pool: DbPool, progress: ProgressChannel) -> Self {
        Self {
            pool,
            progress,
            mapper: Arc::new(LineItemMapper::default()),
            running: Running::new(),
        }
    }

    pub fn progress(&self) -> &ProgressChannel {
        &self.progress
    }

    /// Waits until no batch started by this orchestrator is still running.
    pub async fn drain(&self) {
        let mut ids = self.running.0.subscribe();
        // The sender lives in `self`, so the channel stays open while waiting.
        let _ = ids.wait_for(|ids| ids.is_empty()).await;
    }

    /// Records a pending batch and starts processing it in the background.
    pub async fn submit(&self, files: Vec<UploadFile>) -> Result<UploadTicket, IngestError> {
        if files.is_empty() {
            return Err(IngestError::NoFiles);
        }
        let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
        let upload_id = create_upload(&self.pool, &names).await?;
        tracing::info!(upload_id, files = names.len(), "upload accepted");

        let guard = self.claim(upload_id)?;
        Ok(self.spawn(guard, files, false))
    }

    /// Reprocesses a batch that never reached a terminal status, typically
    /// one interrupted by a crash.
    ///
    /// Rows whose clinic-month already has a version from this upload are
    /// counted as committed and not written again. A batch still running in
    /// this process cannot be resumed.
    pub async fn resume(&self, upload_id: i64, files: Vec<UploadFile>) -> Result<UploadTicket, IngestError> {
        // Claimed before the status check so a finishing batch cannot slip in between.
        let guard = self.claim(upload_id)?;
        let upload = get_upload(&self.pool, upload_id)
            .await?
            .ok_or(IngestError::UploadNotFound(upload_id))?;
        if upload.status.is_terminal() {
            return Err(IngestError::AlreadyFinished {
                id: upload_id,
                status: upload.status,
            });
        }
        if files.is_empty() {
            return Err(IngestError::NoFiles);
        }
        tracing::info!(upload_id, files = files.len(), "resuming upload");

        Ok(self.spawn(guard, files, true))
    }

    fn claim(&self, upload_id: i64) -> Result<RunningGuard, IngestError> {
        self.running
            .claim(upload_id)
            .ok_or(IngestError::StillRunning(upload_id))
    }

    fn spawn(&self, guard: RunningGuard, files: Vec<UploadFile>, resuming: bool) -> UploadTicket {
        let upload_id = guard.upload_id;
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            this.run(upload_id, &files, resuming).await
        });
        UploadTicket { upload_id, handle }
    }

    async fn run(&self, upload_id: i64, files: &[UploadFile], resuming: bool) -> BatchResult {
        match self.process(upload_id, files, resuming).await {
            Ok(result) => result,
            Err((report, err)) => self.fail(upload_id, report, err).await,
        }
    }

    async fn process(
        &self,
        upload_id: i64,
        files: &[UploadFile],
        resuming: bool,
    ) -> Result<BatchResult, (BatchReport, StorageError)> {
        if let Err(err) = mark_processing(&self.pool, upload_id).await {
            return Err((BatchReport::default(), err));
        }
        let clinics = match get_clinics(&self.pool).await {
            Ok(clinics) => clinics,
            Err(err) => return Err((BatchReport::default(), err.into())),
        };

        let mut run = BatchRun {
            upload_id,
            resuming,
            validator: RecordValidator::new(clinics.iter().map(|c| c.id), Utc::now().year()),
            report: BatchReport::default(),
            files,
        };
        self.publish(&run, 0, None, Some("processing started".to_string()));

        for (file_index, file) in files.iter().enumerate() {
            let sheet = match parse_sheet(&file.name, &file.bytes) {
                Ok(sheet) => sheet,
                Err(err) => {
                    tracing::warn!(upload_id, file = %file.name, error = %err, "skipping unreadable file");
                    run.report.error(&file.name, None, err);
                    continue;
                }
            };
            run.report.files_processed += 1;

            for rejected in &sheet.rejected {
                run.report
                    .error(&file.name, Some(format!("line {}", rejected.line)), &rejected.reason);
            }

            let row_count = sheet.rows.len();
            for (row_index, row) in sheet.rows.iter().enumerate() {
                if let Err(Fatal(err)) = self.process_row(&mut run, &file.name, row).await {
                    return Err((run.report, err));
                }
                let done = (file_index as f64 + (row_index + 1) as f64 / row_count as f64)
                    / files.len() as f64;
                // 100 is reserved for the final event.
                let percent = (done * 100.0).floor().min(99.0) as u8;
                self.publish(&run, percent, Some(&file.name), Some(row.label()));
            }
        }

        let status = run.report.status();
        let result = run.report.finish(upload_id, status);
        let outcome = UploadOutcome {
            status,
            records_count: result.records_processed as i64,
            error_message: result.summary(),
            clinics_affected: result.clinics_affected.clone(),
        };
        if let Err(err) = finish_upload(&self.pool, upload_id, &outcome).await {
            tracing::error!(upload_id, error = %err, "could not record upload outcome");
        }

        tracing::info!(
            upload_id,
            %status,
            records = result.records_processed,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "upload finished"
        );
        self.progress.publish(final_event(&result, None));
        Ok(result)
    }

    async fn process_row(&self, run: &mut BatchRun<'_>, file: &str, row: &RawRow) -> Result<(), Fatal> {
        let label = row.label();
        let mapped = match self.mapper.map(row) {
            Ok(mapped) => mapped,
            Err(err) => {
                tracing::warn!(upload_id = run.upload_id, record = %label, error = %err, "row rejected");
                run.report.error(file, Some(label), err);
                return Ok(());
            }
        };
        for warning in &mapped.warnings {
            run.report.warn(file, Some(label.clone()), warning);
        }

        let checked = run.validator.validate(mapped.candidate).map_err(|e| e.to_string());
        let record = match checked.and_then(|record| recompute(record).map_err(|e| e.to_string())) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(upload_id = run.upload_id, record = %label, %error, "row rejected");
                run.report.error(file, Some(label), error);
                return Ok(());
            }
        };
        let key = record.key();

        if run.resuming {
            match version_exists_for_upload(&self.pool, run.upload_id, key).await {
                Ok(true) => {
                    tracing::debug!(upload_id = run.upload_id, %key, "already committed, skipping");
                    run.report.already_committed(key);
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => return row_storage_error(run, file, label, err),
            }
        }

        match commit_version(&self.pool, &record, &VersionOrigin::upload(run.upload_id)).await {
            Ok(version) => {
                tracing::debug!(upload_id = run.upload_id, %key, version, "row committed");
                run.report.committed(key);
                Ok(())
            }
            Err(err) => row_storage_error(run, file, label, err),
        }
    }

    fn publish(&self, run: &BatchRun<'_>, progress: u8, file: Option<&str>, message: Option<String>) {
        self.progress.publish(ProgressEvent {
            upload_id: run.upload_id,
            status: ProgressStatus::Processing,
            progress,
            current_file: file.or_else(|| run.files.first().map(|f| f.name.as_str())).map(str::to_string),
            records_processed: run.report.records_processed,
            message,
            error: None,
            result: None,
        });
    }

    async fn fail(&self, upload_id: i64, mut report: BatchReport, err: StorageError) -> BatchResult {
        tracing::error!(upload_id, error = %err, "upload failed");
        report.error("", None, &err);
        let result = report.finish(upload_id, UploadStatus::Failed);

        let outcome = UploadOutcome {
            status: UploadStatus::Failed,
            records_count: result.records_processed as i64,
            error_message: Some(err.to_string()),
            clinics_affected: result.clinics_affected.clone(),
        };
        if let Err(finish_err) = finish_upload(&self.pool, upload_id, &outcome).await {
            tracing::error!(upload_id, error = %finish_err, "could not record upload failure");
        }

        self.progress.publish(final_event(&result, Some(err.to_string())));
        result
    }
}

/// Store outages stop the batch; anything else only rejects the row.
fn row_storage_error(run: &mut BatchRun<'_>, file: &str, label: String, err: StorageError) -> Result<(), Fatal> {
    if err.is_unavailable() {
        return Err(Fatal(err));
    }
    tracing::warn!(upload_id = run.upload_id, record = %label, error = %err, "row commit failed");
    run.report.error(file, Some(label), err);
    Ok(())
}

fn final_event(result: &BatchResult, error: Option<String>) -> ProgressEvent {
    let status = match result.status {
        UploadStatus::Failed => ProgressStatus::Failed,
        _ => ProgressStatus::Completed,
    };
    ProgressEvent {
        upload_id: result.upload_id,
        status,
        progress: 100,
        current_file: None,
        records_processed: result.records_processed,
        message: Some(format!("upload {}", result.status)),
        error: error.or_else(|| result.summary()),
        result: Some(result.clone()),
    }
}
