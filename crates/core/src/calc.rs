//! The single formula chain used by ingestion, audit and repair.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::fields::{DerivedField, Field, FieldCategory};
use crate::money::Money;
use crate::record::{FinancialRecord, Totals};

/// Cent-level tolerance for every stored-vs-recomputed comparison.
pub const EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// A derived total that does not fit the decimal range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{0} overflows the amount range")]
pub struct TotalsOverflow(pub DerivedField);

/// Other-expense leaves subtracted below net ordinary income.
const NET_INCOME_DEDUCTIONS: [Field; 5] = [
    Field::DepreciationExpense,
    Field::ManagementFeePaid,
    Field::InterestExpense,
    Field::CorporateAdminFee,
    Field::OtherExpenses,
];

pub fn compute_totals(line_items: &BTreeMap<Field, Money>) -> Result<Totals, TotalsOverflow> {
    let sum = |category: FieldCategory, total: DerivedField| -> Result<Money, TotalsOverflow> {
        line_items
            .iter()
            .filter(|(field, _)| field.category() == category)
            .try_fold(Money::zero(), |acc, (_, amount)| acc.checked_add(*amount))
            .ok_or(TotalsOverflow(total))
    };
    let leaf = |field: Field| line_items.get(&field).copied().unwrap_or_default();

    let total_income = sum(FieldCategory::Income, DerivedField::TotalIncome)?;
    let total_cogs = sum(FieldCategory::CostOfGoodsSold, DerivedField::TotalCogs)?;
    let total_expenses = sum(FieldCategory::OperatingExpense, DerivedField::TotalExpenses)?;
    let gross_profit = total_income
        .checked_sub(total_cogs)
        .ok_or(TotalsOverflow(DerivedField::GrossProfit))?;
    let net_ordinary_income = gross_profit
        .checked_sub(total_expenses)
        .ok_or(TotalsOverflow(DerivedField::NetOrdinaryIncome))?;
    let net_income = net_ordinary_income
        .checked_add(leaf(Field::InterestIncome))
        .and_then(|net| {
            NET_INCOME_DEDUCTIONS
                .iter()
                .try_fold(net, |acc, field| acc.checked_sub(leaf(*field)))
        })
        .ok_or(TotalsOverflow(DerivedField::NetIncome))?;

    Ok(Totals {
        total_income,
        total_cogs,
        gross_profit,
        total_expenses,
        net_ordinary_income,
        net_income,
    })
}

/// Returns the record with every derived total recomputed from its leaves.
/// Stored totals are never consulted.
pub fn recompute(mut record: FinancialRecord) -> Result<FinancialRecord, TotalsOverflow> {
    record.totals = compute_totals(&record.line_items)?;
    Ok(record)
}

/// A stored total that disagrees with its recomputed value by more than [`EPSILON`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Drift {
    pub field: DerivedField,
    pub stored: Money,
    pub expected: Money,
}

pub fn drift(record: &FinancialRecord) -> Result<Vec<Drift>, TotalsOverflow> {
    let expected = compute_totals(&record.line_items)?;
    Ok(DerivedField::ALL
        .iter()
        .filter_map(|field| {
            let stored = record.totals.get(*field);
            let want = expected.get(*field);
            (!stored.approx_eq(want, EPSILON)).then_some(Drift {
                field: *field,
                stored,
                expected: want,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clinic::ClinicId;
    use crate::period::Period;

    fn dollars(n: i64) -> Money {
        Money::from_cents(n * 100)
    }

    fn record(items: &[(Field, i64)]) -> FinancialRecord {
        let mut r = FinancialRecord::new(ClinicId(1), Period::new(2024, 1).unwrap());
        for (field, amount) in items {
            r.set(*field, dollars(*amount));
        }
        r
    }

    #[test]
    fn epsilon_is_one_cent() {
        assert_eq!(EPSILON, Decimal::new(1, 2));
    }

    #[test]
    fn worked_example() {
        let r = recompute(record(&[
            (Field::HdResearchIncome, 100_000),
            (Field::CogsMedicalBilling, 20_000),
            (Field::PayrollSharedWages, 30_000),
        ]))
        .unwrap();
        assert_eq!(r.totals.total_income, dollars(100_000));
        assert_eq!(r.totals.total_cogs, dollars(20_000));
        assert_eq!(r.totals.gross_profit, dollars(80_000));
        assert_eq!(r.totals.total_expenses, dollars(30_000));
        assert_eq!(r.totals.net_ordinary_income, dollars(50_000));
        assert_eq!(r.totals.net_income, dollars(50_000));
    }

    #[test]
    fn net_income_applies_other_income_and_expenses() {
        let r = recompute(record(&[
            (Field::PatientServicesIncome, 10_000),
            (Field::InterestIncome, 100),
            (Field::DepreciationExpense, 200),
            (Field::ManagementFeePaid, 300),
            (Field::InterestExpense, 400),
            (Field::CorporateAdminFee, 500),
            (Field::OtherExpenses, 600),
        ]))
        .unwrap();
        assert_eq!(r.totals.net_ordinary_income, dollars(10_000));
        assert_eq!(r.totals.net_income, dollars(10_000 + 100 - 200 - 300 - 400 - 500 - 600));
        // Other income/expense never leaks into the operating totals.
        assert_eq!(r.totals.total_income, dollars(10_000));
        assert!(r.totals.total_expenses.is_zero());
    }

    #[test]
    fn stale_totals_are_replaced() {
        let mut r = record(&[(Field::LabIncome, 50)]);
        r.totals.total_income = dollars(999);
        r.totals.net_income = dollars(-1);
        let r = recompute(r).unwrap();
        assert_eq!(r.totals.total_income, dollars(50));
        assert_eq!(r.totals.net_income, dollars(50));
    }

    #[test]
    fn recompute_is_idempotent() {
        let once = recompute(record(&[(Field::LabIncome, 10), (Field::Travel, 3)])).unwrap();
        let twice = recompute(once.clone()).unwrap();
        assert_eq!(once, twice);
        assert!(drift(&twice).unwrap().is_empty());
    }

    #[test]
    fn drift_respects_epsilon() {
        let mut r = recompute(record(&[(Field::LabIncome, 10)])).unwrap();
        r.totals.total_income = r.totals.total_income.checked_add(Money::from_cents(1)).unwrap();
        assert!(drift(&r).unwrap().is_empty(), "one cent is within tolerance");

        r.totals.gross_profit = r.totals.gross_profit.checked_add(Money::from_cents(2)).unwrap();
        let d = drift(&r).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].field, DerivedField::GrossProfit);
        assert_eq!(d[0].expected, dollars(10));
    }

    #[test]
    fn formula_invariant_holds_for_mixed_records() {
        let fields = Field::ALL;
        for (i, chunk) in fields.chunks(7).enumerate() {
            let items: Vec<(Field, i64)> =
                chunk.iter().enumerate().map(|(j, f)| (*f, (i * 31 + j * 7) as i64 + 1)).collect();
            let r = recompute(record(&items)).unwrap();
            let t = r.totals;
            assert_eq!(Some(t.gross_profit), t.total_income.checked_sub(t.total_cogs));
            assert_eq!(Some(t.net_ordinary_income), t.gross_profit.checked_sub(t.total_expenses));
        }
    }

    #[test]
    fn overflowing_totals_are_an_error() {
        let huge = Money::from_decimal(Decimal::MAX);
        let mut r = record(&[]);
        r.set(Field::HdResearchIncome, huge);
        r.set(Field::LabIncome, huge);
        assert_eq!(recompute(r).unwrap_err(), TotalsOverflow(DerivedField::TotalIncome));

        let mut r = record(&[]);
        r.set(Field::CogsMedicalBilling, huge);
        r.set(Field::PayrollSharedWages, huge);
        assert_eq!(
            compute_totals(&r.line_items).unwrap_err(),
            TotalsOverflow(DerivedField::NetOrdinaryIncome)
        );
    }
}
