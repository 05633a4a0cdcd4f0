use std::fmt;

use serde::{Deserialize, Serialize};

use super::amount::{Amount, COIN};
use crate::errors::{WalletError, WalletResult};

/// Conversion factor between a sat/B rate and a coin/kB rate:
/// 1 sat/B = 0.00001 coin/kB
pub const WALLET_COIN_KB_TO_SAT_B: u64 = COIN / 1000;

/// A fee rate in satoshis per 1000 vbytes
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct FeeRate(u64);

impl FeeRate {
    pub const ZERO: FeeRate = FeeRate(0);

    pub const fn from_sat_per_kvb(sat_per_kvb: u64) -> Self {
        FeeRate(sat_per_kvb)
    }

    pub const fn from_sat_per_vb(sat_per_vb: u64) -> Self {
        FeeRate(sat_per_vb * 1000)
    }

    /// Interpret an amount as a per-kilo-vbyte rate
    pub const fn from_amount_per_kvb(amount: Amount) -> Self {
        FeeRate(amount.as_sats())
    }

    pub const fn sat_per_kvb(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Fee owed for a transaction of `vsize` vbytes, rounded up
    pub fn fee_for(self, vsize: usize) -> Amount {
        let vsize = vsize as u64;
        Amount::from_sats((self.0.saturating_mul(vsize) + 999) / 1000)
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/kvB", Amount::from_sats(self.0))
    }
}

/// How the caller asked for a fee rate to be determined
///
/// The string forms of these modes are part of the accepted grammar and
/// must not change: downstream tooling matches on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeeEstimateMode {
    /// Defer to the wallet's defaults
    #[default]
    Unset,
    /// Estimator-backed, shorter-horizon estimate
    Economical,
    /// Estimator-backed, reorg-resistant estimate
    Conservative,
    /// Explicit rate given in coin units per kilobyte
    CoinPerKb,
    /// Explicit rate given in satoshis per byte
    SatPerByte,
}

impl FeeEstimateMode {
    /// Parse a mode keyword, case-insensitively
    pub fn from_mode_str(s: &str) -> WalletResult<FeeEstimateMode> {
        match s.to_ascii_lowercase().as_str() {
            "unset" => Ok(FeeEstimateMode::Unset),
            "economical" => Ok(FeeEstimateMode::Economical),
            "conservative" => Ok(FeeEstimateMode::Conservative),
            "btc/kb" => Ok(FeeEstimateMode::CoinPerKb),
            "sat/b" => Ok(FeeEstimateMode::SatPerByte),
            _ => Err(WalletError::InvalidParameter(
                "Invalid estimate_mode parameter".to_string(),
            )),
        }
    }

    /// The keyword list for error and help text
    pub fn modes() -> &'static [&'static str] {
        &["unset", "economical", "conservative", "btc/kb", "sat/b"]
    }

    pub fn requires_explicit_rate(self) -> bool {
        matches!(
            self,
            FeeEstimateMode::CoinPerKb | FeeEstimateMode::SatPerByte
        )
    }
}

impl fmt::Display for FeeEstimateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeeEstimateMode::Unset => "unset",
            FeeEstimateMode::Economical => "economical",
            FeeEstimateMode::Conservative => "conservative",
            FeeEstimateMode::CoinPerKb => "btc/kb",
            FeeEstimateMode::SatPerByte => "sat/b",
        };
        write!(f, "{s}")
    }
}
