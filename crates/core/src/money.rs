//! Money amounts.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, Sub};
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// An amount of money in minor currency units (cents).
///
/// Integer arithmetic keeps sale totals exact; `12.99` parses to 1299 cents.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Largest accepted unit price or unit cost (ten million).
    pub const MAX_UNIT: Money = Money(1_000_000_000);

    /// Largest accepted quantity on one batch or sale line.
    pub const MAX_UNITS: i64 = 1_000_000_000;

    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Amount as a float, for analytics only (never for ledger arithmetic).
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn checked_mul(self, qty: i64) -> Option<Money> {
        self.0.checked_mul(qty).map(Money)
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    /// Sum that reports overflow instead of wrapping.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(amounts: I) -> Option<Money> {
        amounts.into_iter().try_fold(Money::ZERO, Money::checked_add)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl FromStr for Money {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().trim_start_matches('$');
        let (negative, digits) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let invalid = || DomainError::validation(format!("invalid money amount '{s}'"));

        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > 2 || !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };

        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac))
            .ok_or_else(invalid)?;
        Ok(Money(if negative { -cents } else { cents }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_price_formats() {
        assert_eq!("5.99".parse::<Money>().unwrap(), Money::from_cents(599));
        assert_eq!("12".parse::<Money>().unwrap(), Money::from_cents(1200));
        assert_eq!("0.5".parse::<Money>().unwrap(), Money::from_cents(50));
        assert_eq!("$3.49".parse::<Money>().unwrap(), Money::from_cents(349));
        assert_eq!("-1.05".parse::<Money>().unwrap(), Money::from_cents(-105));
    }

    #[test]
    fn rejects_malformed_amounts() {
        for bad in ["", "abc", "1.999", "1.2.3", ".", "--1"] {
            assert!(bad.parse::<Money>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn displays_with_two_decimals() {
        assert_eq!(Money::from_cents(1299).to_string(), "12.99");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-250).to_string(), "-2.50");
    }

    #[test]
    fn arithmetic_is_exact() {
        let total: Money = [Money::from_cents(10), Money::from_cents(20)].into_iter().sum();
        assert_eq!(total, Money::from_cents(30));
        assert_eq!(Money::from_cents(333).checked_mul(3), Some(Money::from_cents(999)));
        assert_eq!(Money::from_cents(100) - Money::from_cents(150), Money::from_cents(-50));
    }

    #[test]
    fn checked_arithmetic_reports_overflow() {
        let big = Money::from_cents(i64::MAX / 2 + 1);
        assert_eq!(big.checked_add(big), None);
        assert_eq!(Money::MAX_UNIT.checked_mul(Money::MAX_UNITS), Some(Money::from_cents(1_000_000_000_000_000_000)));
        assert_eq!(Money::checked_sum([big, Money::from_cents(1), big]), None);
        assert_eq!(
            Money::checked_sum([Money::from_cents(5), Money::from_cents(7)]),
            Some(Money::from_cents(12))
        );
        assert_eq!(Money::from_cents(i64::MIN).checked_sub(Money::from_cents(1)), None);
    }
}
