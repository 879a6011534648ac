use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::clinic::ClinicId;
use crate::fields::Field;
use crate::period::{Period, RecordKey};
use crate::record::{CandidateRecord, FinancialRecord};

pub const MIN_YEAR: i64 = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("clinicId: clinic {0} does not exist")]
    UnknownClinic(ClinicId),
    #[error("year: {year} is outside {min}..={max}")]
    YearOutOfRange { year: i64, min: i64, max: i64 },
    #[error("month: {0} is outside 1..=12")]
    MonthOutOfRange(i64),
    #[error("{0}: amount is too large to store")]
    AmountOutOfRange(Field),
    #[error("every field is zero; the sheet was probably not parsed")]
    AllZero,
    #[error("{0} appears more than once in this batch")]
    DuplicateInBatch(RecordKey),
}

/// All field-level problems found in one candidate record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Checks candidate records of one batch.
///
/// Holds the keys accepted so far, so a batch cannot write the same
/// clinic-month twice. Use a fresh validator per batch.
pub struct RecordValidator {
    known_clinics: HashSet<ClinicId>,
    current_year: i64,
    accepted: HashSet<RecordKey>,
}

impl RecordValidator {
    pub fn new(known_clinics: impl IntoIterator<Item = ClinicId>, current_year: i32) -> Self {
        Self {
            known_clinics: known_clinics.into_iter().collect(),
            current_year: i64::from(current_year),
            accepted: HashSet::new(),
        }
    }

    /// Marks `key` as already written by this batch (used when resuming).
    pub fn claim(&mut self, key: RecordKey) -> bool {
        self.accepted.insert(key)
    }

    pub fn validate(&mut self, candidate: CandidateRecord) -> Result<FinancialRecord, ValidationErrors> {
        let mut errors = Vec::new();

        if !self.known_clinics.contains(&candidate.clinic_id) {
            errors.push(FieldError::UnknownClinic(candidate.clinic_id));
        }

        let max_year = self.current_year + 1;
        if candidate.year < MIN_YEAR || candidate.year > max_year {
            errors.push(FieldError::YearOutOfRange {
                year: candidate.year,
                min: MIN_YEAR,
                max: max_year,
            });
        }

        if !(1..=12).contains(&candidate.month) {
            errors.push(FieldError::MonthOutOfRange(candidate.month));
        }

        for (field, amount) in &candidate.line_items {
            if amount.try_to_cents().is_none() {
                errors.push(FieldError::AmountOutOfRange(*field));
            }
        }

        if candidate.line_items.values().all(|m| m.is_zero()) {
            errors.push(FieldError::AllZero);
        }

        let period = i32::try_from(candidate.year)
            .ok()
            .zip(u32::try_from(candidate.month).ok())
            .and_then(|(y, m)| Period::new(y, m));

        if let (true, Some(period)) = (errors.is_empty(), period) {
            let key = RecordKey::new(candidate.clinic_id, period);
            if self.accepted.contains(&key) {
                return Err(ValidationErrors(vec![FieldError::DuplicateInBatch(key)]));
            }
            self.accepted.insert(key);
            let mut record = FinancialRecord::new(candidate.clinic_id, period);
            record.line_items = candidate.line_items;
            return Ok(record);
        }

        Err(ValidationErrors(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use rust_decimal::Decimal;

    fn validator() -> RecordValidator {
        RecordValidator::new([ClinicId(1), ClinicId(2)], 2024)
    }

    fn candidate(clinic: i64, year: i64, month: i64) -> CandidateRecord {
        let mut c = CandidateRecord::new(ClinicId(clinic), year, month);
        c.set(Field::HdResearchIncome, Money::from_cents(100_00));
        c
    }

    #[test]
    fn accepts_well_formed_record() {
        let record = validator().validate(candidate(1, 2024, 6)).unwrap();
        assert_eq!(record.period, Period::new(2024, 6).unwrap());
        assert_eq!(record.amount(Field::HdResearchIncome), Money::from_cents(100_00));
    }

    #[test]
    fn rejects_unknown_clinic() {
        let err = validator().validate(candidate(9, 2024, 6)).unwrap_err();
        assert_eq!(err.0, vec![FieldError::UnknownClinic(ClinicId(9))]);
    }

    #[test]
    fn year_bounds() {
        let mut v = validator();
        assert!(v.validate(candidate(1, 2000, 1)).is_ok());
        assert!(v.validate(candidate(1, 2025, 1)).is_ok());
        assert!(matches!(
            v.validate(candidate(1, 1999, 1)).unwrap_err().0[..],
            [FieldError::YearOutOfRange { year: 1999, .. }]
        ));
        assert!(matches!(
            v.validate(candidate(1, 2026, 1)).unwrap_err().0[..],
            [FieldError::YearOutOfRange { max: 2025, .. }]
        ));
    }

    #[test]
    fn month_thirteen_is_rejected() {
        let err = validator().validate(candidate(1, 2024, 13)).unwrap_err();
        assert_eq!(err.0, vec![FieldError::MonthOutOfRange(13)]);
        let err = validator().validate(candidate(1, 2024, 0)).unwrap_err();
        assert_eq!(err.0, vec![FieldError::MonthOutOfRange(0)]);
    }

    #[test]
    fn all_zero_record_is_rejected() {
        let mut c = CandidateRecord::new(ClinicId(1), 2024, 1);
        c.set(Field::Travel, Money::zero());
        let err = validator().validate(c).unwrap_err();
        assert_eq!(err.0, vec![FieldError::AllZero]);

        let empty = CandidateRecord::new(ClinicId(1), 2024, 1);
        assert_eq!(validator().validate(empty).unwrap_err().0, vec![FieldError::AllZero]);
    }

    #[test]
    fn collects_every_error() {
        let c = CandidateRecord::new(ClinicId(42), 1990, 14);
        let err = validator().validate(c).unwrap_err();
        assert_eq!(err.0.len(), 4);
        assert!(err.to_string().contains("; "));
    }

    #[test]
    fn duplicate_in_batch_is_rejected() {
        let mut v = validator();
        assert!(v.validate(candidate(1, 2024, 3)).is_ok());
        let err = v.validate(candidate(1, 2024, 3)).unwrap_err();
        assert!(matches!(err.0[..], [FieldError::DuplicateInBatch(_)]));
        // Other clinic, same month is fine.
        assert!(v.validate(candidate(2, 2024, 3)).is_ok());
    }

    #[test]
    fn rejected_row_does_not_claim_its_key() {
        let mut v = validator();
        let mut zero = CandidateRecord::new(ClinicId(1), 2024, 4);
        zero.set(Field::Travel, Money::zero());
        assert!(v.validate(zero).is_err());
        assert!(v.validate(candidate(1, 2024, 4)).is_ok());
    }

    #[test]
    fn oversized_amount_is_rejected() {
        let mut c = candidate(1, 2024, 5);
        c.set(Field::Travel, Money::from_decimal(Decimal::MAX));
        let err = validator().validate(c).unwrap_err();
        assert_eq!(err.0, vec![FieldError::AmountOutOfRange(Field::Travel)]);
    }
}
