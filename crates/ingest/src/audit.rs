use clinicbooks_core::{drift, recompute, ClinicId, Drift, Period, RecordKey};
use clinicbooks_storage::{
    all_records, commit_version, current_record, latest_version, DbPool, VersionOrigin,
};
use serde::Serialize;

use crate::error::IngestError;

/// Findings for one clinic-month that needed attention.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordAudit {
    pub clinic_id: ClinicId,
    #[serde(flatten)]
    pub period: Period,
    pub drift: Vec<Drift>,
    pub version_mismatch: bool,
    pub repaired_version: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub records_scanned: usize,
    pub fields_fixed: usize,
    /// Records still drifting, or out of step with their latest version, when
    /// the audit finished. Without `fix` this is every flagged record.
    pub still_in_error_after_fix: usize,
    pub drifted_records: usize,
    pub version_mismatches: usize,
    pub fix: bool,
    pub records: Vec<RecordAudit>,
}

/// Recomputes every live record and compares it with what is stored.
///
/// With `fix`, drifted or mismatched records get a `repair` version built from
/// the live leaves with recomputed totals, and are then read back and checked
/// again.
pub async fn run_audit(pool: &DbPool, fix: bool) -> Result<AuditReport, IngestError> {
    let mut report = AuditReport {
        fix,
        ..AuditReport::default()
    };

    for record in all_records(pool).await? {
        report.records_scanned += 1;
        let key = record.key();

        let version_mismatch = match latest_version(pool, key).await? {
            Some(latest) => latest.to_record() != record,
            None => true,
        };
        if version_mismatch {
            tracing::warn!(%key, "live record differs from its latest version");
            report.version_mismatches += 1;
        }

        let drifted = drift(&record)?;
        if drifted.is_empty() && !version_mismatch {
            continue;
        }
        if !drifted.is_empty() {
            report.drifted_records += 1;
            tracing::warn!(%key, fields = drifted.len(), "stored totals drifted");
        }

        let mut repaired_version = None;
        if fix {
            let repaired = recompute(record.clone())?;
            let version = commit_version(pool, &repaired, &VersionOrigin::repair()).await?;
            tracing::info!(%key, version, "record repaired");
            repaired_version = Some(version);
            report.fields_fixed += drifted.len();

            if !is_consistent(pool, key).await? {
                report.still_in_error_after_fix += 1;
            }
        } else {
            report.still_in_error_after_fix += 1;
        }

        report.records.push(RecordAudit {
            clinic_id: key.clinic_id,
            period: key.period,
            drift: drifted,
            version_mismatch,
            repaired_version,
        });
    }

    tracing::info!(
        scanned = report.records_scanned,
        drifted = report.drifted_records,
        fixed = report.fields_fixed,
        mismatches = report.version_mismatches,
        fix,
        "audit finished"
    );
    Ok(report)
}

/// True when the live row has no drift and matches its latest version.
async fn is_consistent(pool: &DbPool, key: RecordKey) -> Result<bool, IngestError> {
    let Some(live) = current_record(pool, key).await? else {
        return Ok(false);
    };
    let in_step = latest_version(pool, key)
        .await?
        .is_some_and(|latest| latest.to_record() == live);
    Ok(in_step && drift(&live)?.is_empty())
}
