//! Exact money arithmetic
//!
//! Spend limits are compared with `<=`, so amounts are held as integer minor
//! units (cents) rather than floats.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};

/// A non-fractional count of currency minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Convert a decimal major-unit value (e.g. `20.00`) to minor units,
    /// rounding to the nearest cent.
    pub fn from_major(major: f64) -> Option<Self> {
        if !major.is_finite() {
            return None;
        }
        let minor = (major * 100.0).round();
        if minor.abs() > i64::MAX as f64 {
            return None;
        }
        Some(Self(minor as i64))
    }

    pub const fn minor(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        self.saturating_add(rhs)
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_sub(rhs.0))
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, Add::add)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_major_rounds_to_cents() {
        assert_eq!(Amount::from_major(20.0), Some(Amount::from_minor(2000)));
        assert_eq!(Amount::from_major(4.999), Some(Amount::from_minor(500)));
        assert_eq!(Amount::from_major(0.1 + 0.2), Some(Amount::from_minor(30)));
        assert_eq!(Amount::from_major(f64::NAN), None);
    }

    #[test]
    fn display_uses_two_decimals() {
        assert_eq!(Amount::from_minor(2100).to_string(), "21.00");
        assert_eq!(Amount::from_minor(5).to_string(), "0.05");
        assert_eq!(Amount::from_minor(-150).to_string(), "-1.50");
    }

    #[test]
    fn sum_of_amounts() {
        let total: Amount = [500, 1600].into_iter().map(Amount::from_minor).sum();
        assert_eq!(total, Amount::from_minor(2100));
    }
}
