use clinicbooks_core::{
    CandidateRecord, ClinicId, Field, FieldGroup, Lookup, MappingRole, MappingTable, Money,
    EPSILON,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::amount::parse_amount;
use crate::sheet::RawRow;

/// Non-fatal findings from mapping one row. Flagged values never reach a total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MappingWarning {
    UnmappedCode { code: String, amount: String },
    AmbiguousCode { code: String, sections: Vec<FieldGroup> },
    NonNumericAmount { code: String, value: String },
    ParentTotalMismatch { field: Field, parent: Money, components: Money },
}

impl fmt::Display for MappingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingWarning::UnmappedCode { code, amount } => {
                write!(f, "unmapped account code {code} ({amount}) ignored")
            }
            MappingWarning::AmbiguousCode { code, sections } => {
                let names: Vec<String> = sections.iter().map(|s| s.to_string()).collect();
                write!(
                    f,
                    "account code {code} is used by {} and the line has no section; ignored",
                    names.join(", ")
                )
            }
            MappingWarning::NonNumericAmount { code, value } => {
                write!(f, "amount '{value}' for {code} is not a number; treated as 0")
            }
            MappingWarning::ParentTotalMismatch { field, parent, components } => write!(
                f,
                "{}: parent line {parent} differs from its sub-accounts {components}; sub-accounts used",
                field.label()
            ),
        }
    }
}

/// A row whose source lines cannot be combined into a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("{0}: source lines add up to more than an amount can hold")]
    AmountOverflow(Field),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappedRow {
    pub candidate: CandidateRecord,
    pub warnings: Vec<MappingWarning>,
}

#[derive(Default)]
struct FieldAccumulator {
    leaves: Money,
    components: Money,
    has_components: bool,
    parent: Option<Money>,
}

impl FieldAccumulator {
    fn add(&mut self, role: MappingRole, amount: Money) -> Option<()> {
        match role {
            MappingRole::Leaf => self.leaves = self.leaves.checked_add(amount)?,
            MappingRole::Component => {
                self.components = self.components.checked_add(amount)?;
                self.has_components = true;
            }
            MappingRole::ParentTotal => {
                self.parent = Some(self.parent.unwrap_or_default().checked_add(amount)?);
            }
        }
        Some(())
    }

    fn resolve(&self) -> Option<(Money, Option<(Money, Money)>)> {
        if self.has_components {
            let mismatch = self
                .parent
                .filter(|p| !p.approx_eq(self.components, EPSILON))
                .map(|p| (p, self.components));
            Some((self.leaves.checked_add(self.components)?, mismatch))
        } else {
            Some((self.leaves.checked_add(self.parent.unwrap_or_default())?, None))
        }
    }
}

/// Source lines carrying totals the calculation engine derives itself.
fn is_source_total(code: &str) -> bool {
    let lower = code.trim().to_lowercase();
    lower.starts_with("total")
        || matches!(
            lower.as_str(),
            "gross profit" | "net ordinary income" | "net other income" | "net income"
        )
}

/// Maps raw account codes onto the canonical schema.
#[derive(Debug, Clone, Default)]
pub struct LineItemMapper {
    table: MappingTable,
}

impl LineItemMapper {
    pub fn new(table: MappingTable) -> Self {
        Self { table }
    }

    pub fn map(&self, row: &RawRow) -> Result<MappedRow, MapError> {
        let mut warnings = Vec::new();
        let mut fields: BTreeMap<Field, FieldAccumulator> = BTreeMap::new();

        for line in &row.lines {
            let code = line.code.trim();
            if code.is_empty() || is_source_total(code) {
                continue;
            }

            let amount = match parse_amount(&line.amount) {
                Ok(amount) => amount.unwrap_or_default(),
                Err(_) => {
                    warnings.push(MappingWarning::NonNumericAmount {
                        code: code.to_string(),
                        value: line.amount.trim().to_string(),
                    });
                    Money::zero()
                }
            };

            let section = line
                .section
                .as_deref()
                .and_then(|s| s.parse::<FieldGroup>().ok());

            match self.table.lookup(code, section) {
                Lookup::Mapped(mapping) => fields
                    .entry(mapping.field)
                    .or_default()
                    .add(mapping.role, amount)
                    .ok_or(MapError::AmountOverflow(mapping.field))?,
                Lookup::Ambiguous(sections) => warnings.push(MappingWarning::AmbiguousCode {
                    code: code.to_string(),
                    sections,
                }),
                Lookup::Unmapped => warnings.push(MappingWarning::UnmappedCode {
                    code: code.to_string(),
                    amount: line.amount.trim().to_string(),
                }),
            }
        }

        let mut candidate = CandidateRecord::new(ClinicId(row.clinic_id), row.year, row.month);
        for (field, acc) in fields {
            let (value, mismatch) = acc.resolve().ok_or(MapError::AmountOverflow(field))?;
            if let Some((parent, components)) = mismatch {
                warnings.push(MappingWarning::ParentTotalMismatch {
                    field,
                    parent,
                    components,
                });
            }
            candidate.set(field, value);
        }

        Ok(MappedRow {
            candidate,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::RawLine;

    fn line(code: &str, amount: &str) -> RawLine {
        RawLine {
            code: code.to_string(),
            section: None,
            amount: amount.to_string(),
        }
    }

    fn in_section(code: &str, section: &str, amount: &str) -> RawLine {
        RawLine {
            section: Some(section.to_string()),
            ..line(code, amount)
        }
    }

    fn row(lines: Vec<RawLine>) -> RawRow {
        RawRow {
            source_line: 2,
            clinic_id: 1,
            year: 2024,
            month: 1,
            lines,
        }
    }

    fn dollars(n: i64) -> Money {
        Money::from_cents(n * 100)
    }

    #[test]
    fn maps_worked_example() {
        let mapped = LineItemMapper::default().map(&row(vec![
            line("40000", "100000"),
            line("53000", "20000"),
            line("66030", "30000"),
        ])).unwrap();
        assert!(mapped.warnings.is_empty());
        let c = &mapped.candidate;
        assert_eq!(c.clinic_id, ClinicId(1));
        assert_eq!(c.line_items[&Field::HdResearchIncome], dollars(100_000));
        assert_eq!(c.line_items[&Field::CogsMedicalBilling], dollars(20_000));
        assert_eq!(c.line_items[&Field::PayrollSharedWages], dollars(30_000));
        assert_eq!(c.line_items.len(), 3);
    }

    #[test]
    fn unmapped_codes_are_dropped_with_warning() {
        let mapped = LineItemMapper::default().map(&row(vec![
            line("99999", "500"),
            line("12345", "1"),
        ])).unwrap();
        assert!(mapped.candidate.line_items.is_empty());
        assert_eq!(mapped.warnings.len(), 2);
        assert!(matches!(
            &mapped.warnings[0],
            MappingWarning::UnmappedCode { code, .. } if code == "99999"
        ));
    }

    #[test]
    fn several_codes_feed_one_field() {
        let mapped = LineItemMapper::default().map(&row(vec![
            line("66030", "1000"),
            line("66035", "250"),
        ])).unwrap();
        assert_eq!(mapped.candidate.line_items[&Field::PayrollSharedWages], dollars(1_250));
    }

    #[test]
    fn parent_total_is_not_double_counted() {
        let mapped = LineItemMapper::default().map(&row(vec![
            in_section("65200", "Automobile", "600"),
            line("65210", "400"),
            line("65220", "200"),
        ])).unwrap();
        assert!(mapped.warnings.is_empty());
        assert_eq!(mapped.candidate.line_items[&Field::AutomobileExpense], dollars(600));
    }

    #[test]
    fn parent_total_mismatch_prefers_components() {
        let mapped = LineItemMapper::default().map(&row(vec![
            in_section("65200", "Auto", "999"),
            line("65210", "400"),
        ])).unwrap();
        assert_eq!(mapped.candidate.line_items[&Field::AutomobileExpense], dollars(400));
        assert_eq!(
            mapped.warnings,
            vec![MappingWarning::ParentTotalMismatch {
                field: Field::AutomobileExpense,
                parent: dollars(999),
                components: dollars(400),
            }]
        );
    }

    #[test]
    fn parent_total_alone_is_used() {
        let mapped = LineItemMapper::default().map(&row(vec![line("67200", "321")])).unwrap();
        assert_eq!(mapped.candidate.line_items[&Field::Utilities], dollars(321));
    }

    #[test]
    fn overlapping_code_resolved_by_section() {
        let mapped = LineItemMapper::default().map(&row(vec![
            in_section("65200", "Facilities", "75"),
        ])).unwrap();
        assert_eq!(mapped.candidate.line_items[&Field::Janitorial], dollars(75));
        assert!(!mapped.candidate.line_items.contains_key(&Field::AutomobileExpense));
    }

    #[test]
    fn overlapping_code_without_section_is_not_guessed() {
        let mapped = LineItemMapper::default().map(&row(vec![
            line("65200", "75"),
            line("40000", "10"),
        ])).unwrap();
        assert!(!mapped.candidate.line_items.contains_key(&Field::Janitorial));
        assert!(!mapped.candidate.line_items.contains_key(&Field::AutomobileExpense));
        assert!(matches!(
            &mapped.warnings[..],
            [MappingWarning::AmbiguousCode { code, .. }] if code == "65200"
        ));
    }

    #[test]
    fn non_numeric_amount_defaults_to_zero() {
        let mapped = LineItemMapper::default().map(&row(vec![
            line("40000", "n/a"),
            line("41000", ""),
        ])).unwrap();
        assert_eq!(mapped.candidate.line_items[&Field::HdResearchIncome], Money::zero());
        assert_eq!(mapped.candidate.line_items[&Field::PatientServicesIncome], Money::zero());
        assert_eq!(mapped.warnings.len(), 1, "blank cells are silent");
    }

    #[test]
    fn source_totals_are_ignored() {
        let mapped = LineItemMapper::default().map(&row(vec![
            line("40000", "10"),
            line("Total Income", "9999"),
            line("Net Income", "9999"),
        ])).unwrap();
        assert!(mapped.warnings.is_empty());
        assert_eq!(mapped.candidate.line_items.len(), 1);
    }

    #[test]
    fn warnings_display_for_reports() {
        let w = MappingWarning::UnmappedCode {
            code: "99999".into(),
            amount: "5".into(),
        };
        assert_eq!(w.to_string(), "unmapped account code 99999 (5) ignored");
    }

    #[test]
    fn mismatch_warning_names_the_field() {
        let w = MappingWarning::ParentTotalMismatch {
            field: Field::AutomobileExpense,
            parent: dollars(999),
            components: dollars(400),
        };
        assert!(w.to_string().starts_with("Automobile Expense: parent line $999.00"));
    }

    #[test]
    fn overflowing_sum_is_a_row_error() {
        let huge = "70000000000000000000000000000";
        let err = LineItemMapper::default()
            .map(&row(vec![line("40000", huge), line("40010", huge)]))
            .unwrap_err();
        assert!(matches!(err, MapError::AmountOverflow(_)));
    }
}
