//! Turns uploaded file bytes into [`RawRow`]s, one per clinic-month.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Cursor;
use thiserror::Error;

/// One source line: an account code and its amount cell, untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLine {
    pub code: String,
    pub section: Option<String>,
    pub amount: String,
}

/// All lines for one clinic-month, before mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    /// 1-based line (or array index) where the row first appears.
    pub source_line: usize,
    pub clinic_id: i64,
    pub year: i64,
    pub month: i64,
    pub lines: Vec<RawLine>,
}

impl RawRow {
    pub fn label(&self) -> String {
        format!("clinic {} {}-{:02}", self.clinic_id, self.year, self.month)
    }
}

/// A line that could not be attributed to any clinic-month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedLine {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSheet {
    pub rows: Vec<RawRow>,
    pub rejected: Vec<RejectedLine>,
}

#[derive(Error, Debug)]
pub enum SheetError {
    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("Spreadsheet error: {0}")]
    Workbook(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Missing required column: {0}")]
    MissingColumn(&'static str),
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("No data rows")]
    NoDataRows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv { delimiter: u8 },
    Workbook,
    Json,
}

impl SheetFormat {
    pub fn from_file_name(name: &str) -> Result<Self, SheetError> {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(SheetFormat::Csv { delimiter: b',' }),
            "tsv" | "txt" => Ok(SheetFormat::Csv { delimiter: b'\t' }),
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(SheetFormat::Workbook),
            "json" => Ok(SheetFormat::Json),
            _ => Err(SheetError::UnsupportedFormat(name.to_string())),
        }
    }
}

/// Parse an uploaded file, choosing the reader from its extension.
pub fn parse_sheet(file_name: &str, data: &[u8]) -> Result<ParsedSheet, SheetError> {
    let parsed = match SheetFormat::from_file_name(file_name)? {
        SheetFormat::Csv { delimiter } => crate::csv::import_csv(data, delimiter)?,
        SheetFormat::Workbook => parse_workbook(data)?,
        SheetFormat::Json => parse_json(data)?,
    };
    // A sheet whose every line was rejected still reports why.
    if parsed.rows.is_empty() && parsed.rejected.is_empty() {
        return Err(SheetError::NoDataRows);
    }
    Ok(parsed)
}

/// First worksheet, same column layout as the CSV format.
fn parse_workbook(data: &[u8]) -> Result<ParsedSheet, SheetError> {
    use calamine::{open_workbook_auto_from_rs, Reader};

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(data.to_vec()))
        .map_err(|e| SheetError::Workbook(e.to_string()))?;
    let first = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| SheetError::Workbook("workbook has no sheets".to_string()))?;
    let range = workbook
        .worksheet_range(&first)
        .map_err(|e| SheetError::Workbook(e.to_string()))?;

    let rows = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect::<Vec<String>>());
    crate::csv::parse_table(rows)
}

fn cell_to_string(cell: &calamine::Data) -> String {
    use calamine::Data;
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(n) => n.to_string(),
        Data::Float(f) => format!("{}", f),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#ERR({:?})", e),
        Data::DateTime(dt) => format!("{}", dt),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonRow {
    clinic_id: i64,
    year: i64,
    month: i64,
    lines: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    sections: BTreeMap<String, String>,
}

/// `[{ "clinicId": 1, "year": 2024, "month": 1, "lines": { "40000": 125000.0 } }]`
fn parse_json(data: &[u8]) -> Result<ParsedSheet, SheetError> {
    let rows: Vec<JsonRow> = serde_json::from_slice(data)?;
    let rows = rows
        .into_iter()
        .enumerate()
        .map(|(idx, row)| {
            let lines = row
                .lines
                .into_iter()
                .map(|(code, value)| {
                    let amount = match value {
                        serde_json::Value::Null => String::new(),
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    RawLine {
                        section: row.sections.get(&code).cloned(),
                        code,
                        amount,
                    }
                })
                .collect();
            RawRow {
                source_line: idx + 1,
                clinic_id: row.clinic_id,
                year: row.year,
                month: row.month,
                lines,
            }
        })
        .collect();
    Ok(ParsedSheet {
        rows,
        rejected: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(
            SheetFormat::from_file_name("Jan P&L.CSV").unwrap(),
            SheetFormat::Csv { delimiter: b',' }
        );
        assert_eq!(SheetFormat::from_file_name("pl.xlsx").unwrap(), SheetFormat::Workbook);
        assert_eq!(SheetFormat::from_file_name("rows.json").unwrap(), SheetFormat::Json);
        assert!(matches!(
            SheetFormat::from_file_name("notes.pdf"),
            Err(SheetError::UnsupportedFormat(_))
        ));
        assert!(SheetFormat::from_file_name("no_extension").is_err());
    }

    #[test]
    fn json_rows_keep_amount_text() {
        let data = br#"[
            {"clinicId": 3, "year": 2024, "month": 1,
             "lines": {"40000": 125000.5, "66030": "42,000.00", "99999": null},
             "sections": {"66030": "Payroll"}}
        ]"#;
        let parsed = parse_sheet("rows.json", data).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        let row = &parsed.rows[0];
        assert_eq!((row.clinic_id, row.year, row.month), (3, 2024, 1));
        assert_eq!(row.lines.len(), 3);
        let wages = row.lines.iter().find(|l| l.code == "66030").unwrap();
        assert_eq!(wages.amount, "42,000.00");
        assert_eq!(wages.section.as_deref(), Some("Payroll"));
        let income = row.lines.iter().find(|l| l.code == "40000").unwrap();
        assert_eq!(income.amount, "125000.5");
        assert_eq!(row.lines.iter().find(|l| l.code == "99999").unwrap().amount, "");
    }

    #[test]
    fn json_empty_array_has_no_rows() {
        assert!(matches!(parse_sheet("rows.json", b"[]"), Err(SheetError::NoDataRows)));
    }

    #[test]
    fn fully_rejected_csv_keeps_line_reasons() {
        let data = b"clinic_id,year,month,account,amount\nnorth,2024,1,40000,10\nsouth,2024,2,40000,20\n";
        let parsed = parse_sheet("pl.csv", data).unwrap();
        assert!(parsed.rows.is_empty());
        let lines: Vec<usize> = parsed.rejected.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![2, 3]);
        assert_eq!(parsed.rejected[0].reason, "clinic id 'north' is not a number");
    }

    #[test]
    fn header_only_csv_has_no_rows() {
        let data = b"clinic_id,year,month,account,amount\n";
        assert!(matches!(parse_sheet("pl.csv", data), Err(SheetError::NoDataRows)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(parse_sheet("rows.json", b"{not json"), Err(SheetError::Json(_))));
    }

    #[test]
    fn garbage_workbook_is_a_parse_error() {
        assert!(matches!(
            parse_sheet("pl.xlsx", b"definitely not a zip"),
            Err(SheetError::Workbook(_))
        ));
    }
}
