//! Append-only record history with write-through to the live record.
//!
//! Every change to a clinic-month goes through [`commit_version`]: the new
//! version row and the live `financial_records` row are written in one
//! transaction, so the highest version of a key always equals the live record.

use chrono::{DateTime, Utc};
use clinicbooks_core::{
    ClinicId, DerivedField, FinancialRecord, Money, Period, RecordKey, RecordSnapshot, Totals,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::DbPool;
use crate::error::{is_retryable, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Upload,
    Rollback,
    Repair,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Upload => "upload",
            ChangeKind::Rollback => "rollback",
            ChangeKind::Repair => "repair",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(ChangeKind::Upload),
            "rollback" => Ok(ChangeKind::Rollback),
            "repair" => Ok(ChangeKind::Repair),
            other => Err(format!("unknown change kind '{other}'")),
        }
    }
}

/// Why a version was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionOrigin {
    pub kind: ChangeKind,
    pub upload_id: Option<i64>,
    pub rolled_back_from: Option<i64>,
}

impl VersionOrigin {
    pub fn upload(upload_id: i64) -> Self {
        VersionOrigin {
            kind: ChangeKind::Upload,
            upload_id: Some(upload_id),
            rolled_back_from: None,
        }
    }

    pub fn rollback(from_version: i64) -> Self {
        VersionOrigin {
            kind: ChangeKind::Rollback,
            upload_id: None,
            rolled_back_from: Some(from_version),
        }
    }

    pub fn repair() -> Self {
        VersionOrigin {
            kind: ChangeKind::Repair,
            upload_id: None,
            rolled_back_from: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordVersion {
    pub id: i64,
    pub clinic_id: ClinicId,
    #[serde(flatten)]
    pub period: Period,
    pub version: i64,
    pub upload_id: Option<i64>,
    pub change_kind: ChangeKind,
    pub rolled_back_from: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub snapshot: RecordSnapshot,
}

impl RecordVersion {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.clinic_id, self.period)
    }

    pub fn to_record(&self) -> FinancialRecord {
        FinancialRecord::from_snapshot(self.key(), self.snapshot.clone())
    }
}

/// Optional filters for history queries. Absent fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionFilter {
    pub clinic_id: Option<i64>,
    pub year: Option<i32>,
    pub month: Option<u32>,
}

/// The history of one clinic-month, newest version first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionGroup {
    pub clinic_id: ClinicId,
    #[serde(flatten)]
    pub period: Period,
    pub current_version: i64,
    pub versions: Vec<RecordVersion>,
}

type VersionRow = (
    i64,
    i64,
    i64,
    i64,
    i64,
    String,
    Option<i64>,
    String,
    Option<i64>,
    DateTime<Utc>,
);

const VERSION_COLUMNS: &str = "id, clinic_id, year, month, version, snapshot, upload_id, change_kind, rolled_back_from, created_at";

fn period_from(year: i64, month: i64) -> Result<Period, StorageError> {
    i32::try_from(year)
        .ok()
        .zip(u32::try_from(month).ok())
        .and_then(|(y, m)| Period::new(y, m))
        .ok_or_else(|| StorageError::Corrupt(format!("invalid period {year}-{month}")))
}

fn version_from_row(row: VersionRow) -> Result<RecordVersion, StorageError> {
    let (id, clinic_id, year, month, version, snapshot, upload_id, kind, rolled_back_from, created_at) =
        row;
    Ok(RecordVersion {
        id,
        clinic_id: ClinicId(clinic_id),
        period: period_from(year, month)?,
        version,
        upload_id,
        change_kind: kind.parse().map_err(StorageError::Corrupt)?,
        rolled_back_from,
        created_at,
        snapshot: serde_json::from_str(&snapshot)?,
    })
}

type LiveRow = (i64, i64, i64, String, i64, i64, i64, i64, i64, i64);

const LIVE_COLUMNS: &str = "clinic_id, year, month, line_items, total_income_cents, total_cogs_cents, gross_profit_cents, total_expenses_cents, net_ordinary_income_cents, net_income_cents";

fn record_from_row(row: LiveRow) -> Result<FinancialRecord, StorageError> {
    let (clinic_id, year, month, line_items, income, cogs, gross, expenses, ordinary, net) = row;
    let mut record = FinancialRecord::new(ClinicId(clinic_id), period_from(year, month)?);
    record.line_items = serde_json::from_str(&line_items)?;
    record.totals = Totals {
        total_income: Money::from_cents(income),
        total_cogs: Money::from_cents(cogs),
        gross_profit: Money::from_cents(gross),
        total_expenses: Money::from_cents(expenses),
        net_ordinary_income: Money::from_cents(ordinary),
        net_income: Money::from_cents(net),
    };
    Ok(record)
}

fn totals_in_cents(totals: &Totals) -> Result<[i64; 6], StorageError> {
    let mut cents = [0i64; 6];
    for (slot, field) in cents.iter_mut().zip(DerivedField::ALL) {
        *slot = totals
            .get(field)
            .try_to_cents()
            .ok_or_else(|| StorageError::amount(field.name()))?;
    }
    Ok(cents)
}

struct PreparedCommit<'a> {
    record: &'a FinancialRecord,
    origin: &'a VersionOrigin,
    snapshot: String,
    line_items: String,
    totals: [i64; 6],
}

/// Appends a version for the record's clinic-month and makes it the live record.
///
/// Returns the new version number. A commit that loses a race with another
/// writer is retried once; a second loss is [`StorageError::ConcurrencyConflict`].
pub async fn commit_version(
    pool: &DbPool,
    record: &FinancialRecord,
    origin: &VersionOrigin,
) -> Result<i64, StorageError> {
    let key = record.key();
    let prepared = PreparedCommit {
        record,
        origin,
        snapshot: serde_json::to_string(&record.snapshot())?,
        line_items: serde_json::to_string(&record.line_items)?,
        totals: totals_in_cents(&record.totals)?,
    };

    let version = match try_commit(pool, &prepared).await {
        Ok(version) => version,
        Err(err) if is_retryable(&err) => {
            tracing::warn!(%key, error = %err, "version commit conflicted, retrying once");
            match try_commit(pool, &prepared).await {
                Ok(version) => version,
                Err(err) if is_retryable(&err) => {
                    tracing::warn!(%key, error = %err, "version commit conflicted again");
                    return Err(StorageError::ConcurrencyConflict(key));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(err) => return Err(err.into()),
    };

    tracing::debug!(%key, version, kind = %origin.kind, "committed version");
    Ok(version)
}

async fn try_commit(pool: &DbPool, commit: &PreparedCommit<'_>) -> Result<i64, sqlx::Error> {
    let record = commit.record;
    let clinic_id = record.clinic_id.0;
    let year = record.period.year();
    let month = i64::from(record.period.month());
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    // Reading the max and inserting in one statement takes the write lock up front.
    let (version,) = sqlx::query_as::<_, (i64,)>(
        r#"
        INSERT INTO record_versions
            (clinic_id, year, month, version, snapshot, upload_id, change_kind, rolled_back_from, created_at)
        SELECT ?1, ?2, ?3, COALESCE(MAX(version), 0) + 1, ?4, ?5, ?6, ?7, ?8
        FROM record_versions
        WHERE clinic_id = ?1 AND year = ?2 AND month = ?3
        RETURNING version
        "#,
    )
    .bind(clinic_id)
    .bind(year)
    .bind(month)
    .bind(&commit.snapshot)
    .bind(commit.origin.upload_id)
    .bind(commit.origin.kind.as_str())
    .bind(commit.origin.rolled_back_from)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    let [income, cogs, gross, expenses, ordinary, net] = commit.totals;
    sqlx::query(
        r#"
        INSERT INTO financial_records
            (clinic_id, year, month, date, line_items, total_income_cents, total_cogs_cents,
             gross_profit_cents, total_expenses_cents, net_ordinary_income_cents, net_income_cents,
             current_version, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (clinic_id, year, month) DO UPDATE SET
            date = excluded.date,
            line_items = excluded.line_items,
            total_income_cents = excluded.total_income_cents,
            total_cogs_cents = excluded.total_cogs_cents,
            gross_profit_cents = excluded.gross_profit_cents,
            total_expenses_cents = excluded.total_expenses_cents,
            net_ordinary_income_cents = excluded.net_ordinary_income_cents,
            net_income_cents = excluded.net_income_cents,
            current_version = excluded.current_version,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(clinic_id)
    .bind(year)
    .bind(month)
    .bind(record.date())
    .bind(&commit.line_items)
    .bind(income)
    .bind(cogs)
    .bind(gross)
    .bind(expenses)
    .bind(ordinary)
    .bind(net)
    .bind(version)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(version)
}

/// Re-commits the snapshot of `version_id` as a new forward version.
pub async fn rollback(pool: &DbPool, version_id: i64) -> Result<i64, StorageError> {
    let target = get_version(pool, version_id)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("version {version_id}")))?;

    let version = commit_version(
        pool,
        &target.to_record(),
        &VersionOrigin::rollback(target.version),
    )
    .await?;

    tracing::info!(key = %target.key(), from = target.version, new_version = version, "rolled back record");
    Ok(version)
}

pub async fn get_version(pool: &DbPool, version_id: i64) -> Result<Option<RecordVersion>, StorageError> {
    let row = sqlx::query_as::<_, VersionRow>(&format!(
        "SELECT {VERSION_COLUMNS} FROM record_versions WHERE id = ?"
    ))
    .bind(version_id)
    .fetch_optional(pool)
    .await?;

    row.map(version_from_row).transpose()
}

pub async fn latest_version(pool: &DbPool, key: RecordKey) -> Result<Option<RecordVersion>, StorageError> {
    let row = sqlx::query_as::<_, VersionRow>(&format!(
        "SELECT {VERSION_COLUMNS} FROM record_versions WHERE clinic_id = ? AND year = ? AND month = ? ORDER BY version DESC LIMIT 1"
    ))
    .bind(key.clinic_id.0)
    .bind(key.period.year())
    .bind(i64::from(key.period.month()))
    .fetch_optional(pool)
    .await?;

    row.map(version_from_row).transpose()
}

/// Most recent first.
pub async fn list_versions(pool: &DbPool, filter: VersionFilter) -> Result<Vec<RecordVersion>, StorageError> {
    let rows = sqlx::query_as::<_, VersionRow>(&format!(
        r#"
        SELECT {VERSION_COLUMNS} FROM record_versions
        WHERE (?1 IS NULL OR clinic_id = ?1)
          AND (?2 IS NULL OR year = ?2)
          AND (?3 IS NULL OR month = ?3)
        ORDER BY id DESC
        "#
    ))
    .bind(filter.clinic_id)
    .bind(filter.year)
    .bind(filter.month.map(i64::from))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(version_from_row).collect()
}

/// Versions grouped by clinic-month. Groups are ordered by their latest change.
pub async fn list_version_groups(
    pool: &DbPool,
    filter: VersionFilter,
) -> Result<Vec<VersionGroup>, StorageError> {
    let mut groups: Vec<VersionGroup> = Vec::new();
    for version in list_versions(pool, filter).await? {
        let key = version.key();
        match groups
            .iter_mut()
            .find(|g| g.clinic_id == key.clinic_id && g.period == key.period)
        {
            Some(group) => {
                group.current_version = group.current_version.max(version.version);
                group.versions.push(version);
            }
            None => groups.push(VersionGroup {
                clinic_id: key.clinic_id,
                period: key.period,
                current_version: version.version,
                versions: vec![version],
            }),
        }
    }

    for group in &mut groups {
        group.versions.sort_by(|a, b| b.version.cmp(&a.version));
    }
    Ok(groups)
}

pub async fn current_record(pool: &DbPool, key: RecordKey) -> Result<Option<FinancialRecord>, StorageError> {
    let row = sqlx::query_as::<_, LiveRow>(&format!(
        "SELECT {LIVE_COLUMNS} FROM financial_records WHERE clinic_id = ? AND year = ? AND month = ?"
    ))
    .bind(key.clinic_id.0)
    .bind(key.period.year())
    .bind(i64::from(key.period.month()))
    .fetch_optional(pool)
    .await?;

    row.map(record_from_row).transpose()
}

pub async fn all_records(pool: &DbPool) -> Result<Vec<FinancialRecord>, StorageError> {
    let rows = sqlx::query_as::<_, LiveRow>(&format!(
        "SELECT {LIVE_COLUMNS} FROM financial_records ORDER BY clinic_id, year, month"
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(record_from_row).collect()
}

/// Whether `upload_id` wrote any version of `key`.
pub async fn version_exists_for_upload(
    pool: &DbPool,
    upload_id: i64,
    key: RecordKey,
) -> Result<bool, StorageError> {
    let (exists,) = sqlx::query_as::<_, (bool,)>(
        "SELECT EXISTS(SELECT 1 FROM record_versions WHERE upload_id = ? AND clinic_id = ? AND year = ? AND month = ?)",
    )
    .bind(upload_id)
    .bind(key.clinic_id.0)
    .bind(key.period.year())
    .bind(i64::from(key.period.month()))
    .fetch_one(pool)
    .await?;

    Ok(exists)
}
