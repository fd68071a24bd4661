use std::cmp::Ordering;
use std::fmt::{self, Display};

use rust_decimal::Decimal;
use serde::Serialize;

/// A crosstab cell value.
///
/// Sums stay integral while both operands are integral and switch to exact
/// decimal arithmetic otherwise, so merged cells never pick up floating
/// point drift. Comparison is numeric: `2` equals `2.0`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum Number {
    Integer(i128),
    Decimal(Decimal),
}

impl Number {
    pub fn is_integral(self) -> bool {
        matches!(self, Number::Integer(_))
    }

    pub fn as_i128(self) -> Option<i128> {
        match self {
            Number::Integer(i) => Some(i),
            Number::Decimal(_) => None,
        }
    }

    /// The value as a decimal, `None` for integers beyond its 96 bit range.
    pub fn as_decimal(self) -> Option<Decimal> {
        match self {
            Number::Integer(i) => Decimal::try_from_i128_with_scale(i, 0).ok(),
            Number::Decimal(d) => Some(d),
        }
    }

    /// Exact sum, `None` on overflow.
    pub fn checked_add(self, rhs: Number) -> Option<Number> {
        match (self, rhs) {
            (Number::Integer(a), Number::Integer(b)) => a.checked_add(b).map(Number::Integer),
            (a, b) => a.as_decimal()?.checked_add(b.as_decimal()?).map(Number::Decimal),
        }
    }
}

impl Default for Number {
    fn default() -> Self {
        Number::Integer(0)
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Number) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Number {}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Number) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Number) -> Ordering {
        match (*self, *other) {
            (Number::Integer(a), Number::Integer(b)) => a.cmp(&b),
            (Number::Decimal(a), Number::Decimal(b)) => a.cmp(&b),
            (Number::Integer(i), Number::Decimal(d)) => integer_cmp_decimal(i, d),
            (Number::Decimal(d), Number::Integer(i)) => integer_cmp_decimal(i, d).reverse(),
        }
    }
}

// An integer outside the decimal range lies beyond every decimal.
fn integer_cmp_decimal(i: i128, d: Decimal) -> Ordering {
    match Decimal::try_from_i128_with_scale(i, 0) {
        Ok(widened) => widened.cmp(&d),
        Err(_) => i.cmp(&0),
    }
}

impl Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Integer(i) => write!(f, "{i}"),
            Number::Decimal(d) => write!(f, "{d}"),
        }
    }
}

impl From<i128> for Number {
    fn from(i: i128) -> Self {
        Number::Integer(i)
    }
}

impl From<i64> for Number {
    fn from(i: i64) -> Self {
        Number::Integer(i.into())
    }
}

impl From<i32> for Number {
    fn from(i: i32) -> Self {
        Number::Integer(i.into())
    }
}

impl From<u32> for Number {
    fn from(i: u32) -> Self {
        Number::Integer(i.into())
    }
}

impl From<u64> for Number {
    fn from(i: u64) -> Self {
        Number::Integer(i.into())
    }
}

impl From<Decimal> for Number {
    fn from(d: Decimal) -> Self {
        Number::Decimal(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(values: &[Number]) -> Option<Number> {
        values
            .iter()
            .try_fold(Number::default(), |acc, &value| acc.checked_add(value))
    }

    #[test]
    fn test_integral_sum_stays_integral() {
        assert!(matches!(
            Number::from(3).checked_add(Number::from(4)),
            Some(Number::Integer(7))
        ));
        assert_eq!(
            Number::from(3).checked_add(Number::from(Decimal::new(5, 1))),
            Some(Number::Decimal(Decimal::new(35, 1)))
        );
    }

    #[test]
    fn test_decimal_sum_is_exact() {
        let total = sum(&[Number::from(Decimal::new(1, 1)), Number::from(Decimal::new(2, 1))]).unwrap();
        assert_eq!(total.to_string(), "0.3");
    }

    #[test]
    fn test_wide_integer_sum_is_exact() {
        let total = sum(&[Number::from(i64::MAX), Number::from(1), Number::from(-2)]).unwrap();
        assert_eq!(total, Number::Integer(9_223_372_036_854_775_806));
        assert!(total.is_integral());

        assert_eq!(Number::Integer(i128::MAX).checked_add(Number::from(1)), None);
    }

    #[test]
    fn test_numeric_ordering() {
        assert_eq!(Number::from(2), Number::from(Decimal::new(20, 1)));
        assert_ne!(
            Number::from(i64::MAX - 1),
            Number::from(Decimal::new(i64::MAX, 0))
        );
        assert!(Number::from(1) < Number::from(Decimal::new(15, 1)));
        assert!(Number::Integer(i128::MAX) > Number::from(Decimal::MAX));
        assert!(Number::Integer(i128::MIN) < Number::from(Decimal::MIN));
    }
}
