//! Long-format P&L tables: one line per (clinic, month, account).
//!
//! ```text
//! clinic_id,year,month,section,account,amount
//! 1,2024,1,Income,40000 · HD Research Income,"125,000.00"
//! ```
//!
//! A `period` column (`2024-01`) may replace `year` + `month`; `section` is
//! optional.

use regex::Regex;
use std::collections::HashMap;
use std::io::Read;
use std::sync::OnceLock;

use crate::sheet::{ParsedSheet, RawLine, RawRow, RejectedLine, SheetError};

/// Column positions resolved from the header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    pub clinic_column: Option<usize>,
    pub year_column: Option<usize>,
    pub month_column: Option<usize>,
    pub period_column: Option<usize>,
    pub section_column: Option<usize>,
    pub account_column: Option<usize>,
    pub amount_column: Option<usize>,
}

const CLINIC_ALIASES: &[&str] = &["clinicid", "clinic", "clinicnumber", "location"];
const YEAR_ALIASES: &[&str] = &["year", "fiscalyear", "yr"];
const MONTH_ALIASES: &[&str] = &["month", "mo", "monthnumber"];
const PERIOD_ALIASES: &[&str] = &["period", "yearmonth"];
const SECTION_ALIASES: &[&str] = &["section", "category", "group", "accounttype"];
const ACCOUNT_ALIASES: &[&str] = &["account", "accountcode", "code", "accountnumber", "lineitem"];
const AMOUNT_ALIASES: &[&str] = &["amount", "value", "total", "balance"];

fn normalize_header(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

impl ColumnMapping {
    pub fn from_headers(headers: &[String]) -> Result<Self, SheetError> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let find = |aliases: &[&str]| {
            aliases
                .iter()
                .find_map(|alias| normalized.iter().position(|h| h == alias))
        };

        let mapping = ColumnMapping {
            clinic_column: find(CLINIC_ALIASES),
            year_column: find(YEAR_ALIASES),
            month_column: find(MONTH_ALIASES),
            period_column: find(PERIOD_ALIASES),
            section_column: find(SECTION_ALIASES),
            account_column: find(ACCOUNT_ALIASES),
            amount_column: find(AMOUNT_ALIASES),
        };

        if mapping.clinic_column.is_none() {
            return Err(SheetError::MissingColumn("clinic_id"));
        }
        if mapping.account_column.is_none() {
            return Err(SheetError::MissingColumn("account"));
        }
        if mapping.amount_column.is_none() {
            return Err(SheetError::MissingColumn("amount"));
        }
        let has_year_month = mapping.year_column.is_some() && mapping.month_column.is_some();
        if !has_year_month && mapping.period_column.is_none() {
            return Err(SheetError::MissingColumn("year/month"));
        }
        Ok(mapping)
    }
}

/// Leading account number of a cell like `"66030 · Shared Wages"`; other
/// text (e.g. `"Total Income"`) is returned trimmed.
pub fn account_code(cell: &str) -> String {
    static CODE: OnceLock<Regex> = OnceLock::new();
    let re = CODE.get_or_init(|| Regex::new(r"^\s*(\d{3,})\b").expect("static regex"));
    match re.captures(cell) {
        Some(caps) => caps[1].to_string(),
        None => cell.trim().to_string(),
    }
}

fn cell_at(record: &[String], col: Option<usize>) -> &str {
    col.and_then(|c| record.get(c))
        .map(|s| s.as_str())
        .unwrap_or_default()
}

fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>().ok().or_else(|| {
        // Spreadsheet numbers arrive as "2024.0".
        s.parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0 && f.is_finite())
            .map(|f| f as i64)
    })
}

fn parse_period_cell(s: &str) -> Option<(i64, i64)> {
    let s = s.trim();
    let mut parts = s.split(['-', '/']);
    let year = parse_int(parts.next()?)?;
    let month = parse_int(parts.next()?)?;
    Some((year, month))
}

/// Group data lines (header first) into one [`RawRow`] per clinic-month,
/// in order of first appearance.
pub fn parse_table<I>(rows: I) -> Result<ParsedSheet, SheetError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut rows = rows.into_iter();
    let headers = rows.next().ok_or(SheetError::NoDataRows)?;
    let mapping = ColumnMapping::from_headers(&headers)?;

    let mut parsed = ParsedSheet::default();
    let mut index: HashMap<(i64, i64, i64), usize> = HashMap::new();

    for (offset, record) in rows.enumerate() {
        // Header is line 1.
        let line = offset + 2;
        if record.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let cell = |col: Option<usize>| cell_at(&record, col);

        let account = cell(mapping.account_column);
        if account.trim().is_empty() {
            continue;
        }

        let Some(clinic_id) = parse_int(cell(mapping.clinic_column)) else {
            parsed.rejected.push(RejectedLine {
                line,
                reason: format!("clinic id '{}' is not a number", cell(mapping.clinic_column)),
            });
            continue;
        };

        let identity = match (mapping.year_column, mapping.month_column) {
            (Some(_), Some(_)) => parse_int(cell(mapping.year_column))
                .zip(parse_int(cell(mapping.month_column))),
            _ => parse_period_cell(cell(mapping.period_column)),
        };
        let Some((year, month)) = identity else {
            parsed.rejected.push(RejectedLine {
                line,
                reason: "year/month is not a number".to_string(),
            });
            continue;
        };

        let section = Some(cell(mapping.section_column).trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        let raw = RawLine {
            code: account_code(account),
            section,
            amount: cell(mapping.amount_column).to_string(),
        };

        let slot = *index.entry((clinic_id, year, month)).or_insert_with(|| {
            parsed.rows.push(RawRow {
                source_line: line,
                clinic_id,
                year,
                month,
                lines: Vec::new(),
            });
            parsed.rows.len() - 1
        });
        parsed.rows[slot].lines.push(raw);
    }

    Ok(parsed)
}

pub fn import_csv<R: Read>(data: R, delimiter: u8) -> Result<ParsedSheet, SheetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(data);

    let mut table = Vec::new();
    for result in reader.records() {
        let record = result?;
        table.push(record.iter().map(|s| s.to_string()).collect::<Vec<String>>());
    }
    parse_table(table)
}
