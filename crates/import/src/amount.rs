use clinicbooks_core::Money;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid amount: {0}")]
pub struct AmountError(pub String);

/// Parses a spreadsheet currency cell.
///
/// Blank cells and the accounting dash are `Ok(None)`. Accepts `$`, thousands
/// separators, surrounding spaces and `(123.45)` negatives.
pub fn parse_amount(s: &str) -> Result<Option<Money>, AmountError> {
    let s = s.trim();
    if s.is_empty() || s == "-" {
        return Ok(None);
    }
    let (negative, inner) = if s.starts_with('(') && s.ends_with(')') {
        (true, &s[1..s.len() - 1])
    } else {
        (false, s)
    };
    let cleaned = inner.replace([',', '$', ' '], "");
    let mut dec = Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .map_err(|_| AmountError(s.to_string()))?;
    if negative {
        dec = -dec;
    }
    Ok(Some(Money::from_decimal(dec)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cents(s: &str) -> i64 {
        parse_amount(s).unwrap().unwrap().try_to_cents().unwrap()
    }

    #[test]
    fn parse_amount_plain() {
        assert_eq!(cents("123.45"), 12345);
    }

    #[test]
    fn parse_amount_with_dollar_sign_and_commas() {
        assert_eq!(cents("$1,234.56"), 123456);
    }

    #[test]
    fn parse_amount_negative_forms() {
        assert_eq!(cents("-50.00"), -5000);
        assert_eq!(cents("(75.25)"), -7525);
    }

    #[test]
    fn parse_amount_rounds_to_cents() {
        assert_eq!(cents("10.006"), 1001);
    }

    #[test]
    fn parse_amount_scientific_float_text() {
        assert_eq!(cents("1.25e5"), 12_500_000);
    }

    #[test]
    fn blank_and_dash_are_empty() {
        assert_eq!(parse_amount("").unwrap(), None);
        assert_eq!(parse_amount("  ").unwrap(), None);
        assert_eq!(parse_amount("-").unwrap(), None);
    }

    #[test]
    fn parse_amount_invalid() {
        assert!(parse_amount("n/a").is_err());
        assert!(parse_amount("#REF!").is_err());
    }
}
