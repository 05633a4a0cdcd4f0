use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};

/// Number of minor units (satoshis) in one coin
pub const COIN: u64 = 100_000_000;

/// A monetary amount in minor units (satoshis)
///
/// Amounts are unsigned by construction; subtraction that would underflow
/// must go through [`Amount::checked_sub`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_sats(sats: u64) -> Self {
        Amount(sats)
    }

    pub const fn from_coins(coins: u64) -> Self {
        Amount(coins * COIN)
    }

    pub const fn as_sats(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// Parse a decimal string denominated in whole coins, e.g. `"0.0001"`
    ///
    /// Accepts at most 8 fractional digits. This is the amount grammar the
    /// RPC surface has always accepted, so it is preserved exactly.
    pub fn from_coin_str(s: &str) -> WalletResult<Amount> {
        let s = s.trim();
        if s.is_empty() || s.starts_with('-') || s.starts_with('+') {
            return Err(WalletError::InvalidParameter(format!(
                "Invalid amount '{s}'"
            )));
        }
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(WalletError::InvalidParameter(format!(
                "Invalid amount '{s}'"
            )));
        }
        if frac_part.len() > 8 {
            return Err(WalletError::InvalidParameter(format!(
                "Invalid amount '{s}': too many decimal places"
            )));
        }
        let int_value: u64 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| WalletError::InvalidParameter(format!("Invalid amount '{s}'")))?
        };
        let mut frac_value: u64 = 0;
        if !frac_part.is_empty() {
            frac_value = frac_part
                .parse()
                .map_err(|_| WalletError::InvalidParameter(format!("Invalid amount '{s}'")))?;
            for _ in frac_part.len()..8 {
                frac_value *= 10;
            }
        }
        int_value
            .checked_mul(COIN)
            .and_then(|v| v.checked_add(frac_value))
            .map(Amount)
            .ok_or_else(|| WalletError::InvalidParameter(format!("Amount '{s}' out of range")))
    }

    /// Format as a decimal coin-unit string with trailing zeros trimmed,
    /// e.g. `Amount::from_sats(10_000)` renders as `"0.0001"`
    pub fn to_coin_string(self) -> String {
        let int_part = self.0 / COIN;
        let frac_part = self.0 % COIN;
        if frac_part == 0 {
            return format!("{int_part}.0");
        }
        let mut frac = format!("{frac_part:08}");
        while frac.ends_with('0') {
            frac.pop();
        }
        format!("{int_part}.{frac}")
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, other: Amount) -> Amount {
        Amount(self.0 + other.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, other: Amount) {
        self.0 += other.0;
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, other: Amount) -> Amount {
        Amount(self.0 - other.0)
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, other: Amount) {
        self.0 -= other.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, |acc, a| acc.saturating_add(a))
    }
}

impl From<u64> for Amount {
    fn from(sats: u64) -> Self {
        Amount(sats)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_coin_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_coin_amounts() {
        assert_eq!(Amount::from_coin_str("1").unwrap(), Amount::from_sats(COIN));
        assert_eq!(
            Amount::from_coin_str("0.0001").unwrap(),
            Amount::from_sats(10_000)
        );
        assert_eq!(
            Amount::from_coin_str("0.00000001").unwrap(),
            Amount::from_sats(1)
        );
        assert_eq!(
            Amount::from_coin_str(".5").unwrap(),
            Amount::from_sats(50_000_000)
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Amount::from_coin_str("").is_err());
        assert!(Amount::from_coin_str("-1").is_err());
        assert!(Amount::from_coin_str("1.000000001").is_err());
        assert!(Amount::from_coin_str("abc").is_err());
        assert!(Amount::from_coin_str(".").is_err());
    }

    #[test]
    fn test_coin_string_round_trip() {
        for sats in [1u64, 546, 10_000, COIN, COIN + 1, 21 * COIN] {
            let a = Amount::from_sats(sats);
            assert_eq!(Amount::from_coin_str(&a.to_coin_string()).unwrap(), a);
        }
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = Amount::from_sats(5);
        let b = Amount::from_sats(3);
        assert_eq!(a.checked_sub(b), Some(Amount::from_sats(2)));
        assert_eq!(b.checked_sub(a), None);
        assert_eq!(Amount::from_sats(u64::MAX).checked_add(a), None);
    }
}
