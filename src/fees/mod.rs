//! Fee policy: turning a caller's fee directive into a concrete rate
//!
//! Callers may pin an explicit rate (coin/kB or sat/B), ask for an
//! estimator-backed rate at a confirmation target, or defer to the wallet
//! defaults. The resolved rate is floored at the relay minimum; exceeding
//! the wallet's configured ceiling is a hard error rather than a silent
//! cap, so a mistyped rate can never drain the wallet into fees.

use serde::{Deserialize, Serialize};

use crate::chain::ChainView;
use crate::data_structures::{
    Amount, CoinControl, Destination, FeeEstimateMode, FeeRate, WALLET_COIN_KB_TO_SAT_B,
};
use crate::errors::{WalletError, WalletResult};

/// Rate used to compute the dust floor for outputs
pub const DUST_RELAY_FEE_RATE: FeeRate = FeeRate::from_sat_per_kvb(3000);

/// Default ceiling on any resolved rate: 0.1 coin per kB
pub const DEFAULT_MAX_FEE_RATE: FeeRate = FeeRate::from_sat_per_kvb(10_000_000);

/// Default estimator confirmation target in blocks
pub const DEFAULT_CONFIRM_TARGET: u32 = 6;

/// Smallest output value worth creating at a destination
///
/// Below this, the output would cost more to spend than it is worth; the
/// builder folds such leftovers into the fee instead.
pub fn dust_threshold(destination: &Destination) -> Amount {
    DUST_RELAY_FEE_RATE.fee_for(destination.output_vsize() + destination.input_vsize())
}

/// Validate an estimator confirmation target against the estimator's range
pub fn validate_confirm_target(target: u32, max_blocks: u32) -> WalletResult<u32> {
    if target == 0 || target > max_blocks {
        return Err(WalletError::InvalidParameter(format!(
            "Invalid conf_target, must be between 1 and {max_blocks}"
        )));
    }
    Ok(target)
}

/// Result of parsing one fee-rate string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeStringValue {
    /// An explicit rate
    Rate(FeeRate),
    /// An estimation-mode keyword
    Mode(FeeEstimateMode),
}

/// Parse the fee-rate string grammar
///
/// Accepted forms, unchanged from the historical RPC surface:
///   - a bare decimal, read as coin units per kilobyte ("0.0002")
///   - a sat/B literal ("25sat/b", case-insensitive)
///   - an estimation-mode keyword ("economical", "conservative", ...)
pub fn parse_fee_string(s: &str) -> WalletResult<FeeStringValue> {
    let trimmed = s.trim();
    if let Ok(mode) = FeeEstimateMode::from_mode_str(trimmed) {
        return Ok(FeeStringValue::Mode(mode));
    }
    let lower = trimmed.to_ascii_lowercase();
    if let Some(number) = lower.strip_suffix("sat/b") {
        let sat_per_vb: u64 = number.trim().parse().map_err(|_| {
            WalletError::InvalidParameter(format!("Invalid fee rate '{trimmed}'"))
        })?;
        return Ok(FeeStringValue::Rate(FeeRate::from_sat_per_vb(sat_per_vb)));
    }
    let amount = Amount::from_coin_str(trimmed)
        .map_err(|_| WalletError::InvalidParameter(format!("Invalid fee rate '{trimmed}'")))?;
    Ok(FeeStringValue::Rate(FeeRate::from_amount_per_kvb(amount)))
}

/// Convert an explicit-rate estimate parameter using its mode's unit
///
/// `btc/kb` reads the value as coin units per kB; `sat/b` divides by the
/// historical conversion constant so both express the same rate space.
pub fn rate_from_estimate_param(mode: FeeEstimateMode, param: Amount) -> WalletResult<FeeRate> {
    let sats = match mode {
        FeeEstimateMode::CoinPerKb => param.as_sats(),
        FeeEstimateMode::SatPerByte => param.as_sats() / WALLET_COIN_KB_TO_SAT_B,
        _ => {
            return Err(WalletError::InvalidParameter(
                "Selected estimate_mode does not take a fee rate".to_string(),
            ))
        }
    };
    if sats == 0 {
        return Err(WalletError::InvalidParameter(
            "Fee rate must be greater than 0".to_string(),
        ));
    }
    Ok(FeeRate::from_sat_per_kvb(sats))
}

/// One build's resolved fee-determination inputs
#[derive(Debug, Clone, Copy, Default)]
pub struct FeeDirectives {
    pub mode: FeeEstimateMode,
    pub explicit_rate: Option<FeeRate>,
    pub confirm_target: Option<u32>,
}

impl FeeDirectives {
    pub fn from_coin_control(control: &CoinControl) -> Self {
        FeeDirectives {
            mode: control.fee_mode,
            explicit_rate: control.fee_rate,
            confirm_target: control.confirm_target,
        }
    }
}

/// Wallet-level fee configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeePolicy {
    /// Rate pinned with set_tx_fee; `None` means automatic estimation
    pub wallet_rate: Option<FeeRate>,
    /// Rate used when the estimator has no data
    pub fallback_rate: Option<FeeRate>,
    /// Hard ceiling; resolving above this is an error
    pub max_fee_rate: FeeRate,
    pub default_confirm_target: u32,
}

impl Default for FeePolicy {
    fn default() -> Self {
        FeePolicy {
            wallet_rate: None,
            fallback_rate: None,
            max_fee_rate: DEFAULT_MAX_FEE_RATE,
            default_confirm_target: DEFAULT_CONFIRM_TARGET,
        }
    }
}

impl FeePolicy {
    /// Resolve directives into a concrete rate
    pub async fn resolve(
        &self,
        directives: &FeeDirectives,
        chain: &dyn ChainView,
    ) -> WalletResult<FeeRate> {
        if directives.mode.requires_explicit_rate() && directives.explicit_rate.is_none() {
            return Err(WalletError::InvalidParameter(
                "Selected estimate_mode requires a fee rate".to_string(),
            ));
        }

        let rate = if let Some(rate) = directives.explicit_rate {
            if rate.is_zero() {
                return Err(WalletError::InvalidParameter(
                    "Fee rate must be greater than 0".to_string(),
                ));
            }
            rate
        } else {
            let conservative = directives.mode != FeeEstimateMode::Economical;
            let target = match directives.confirm_target {
                Some(t) => validate_confirm_target(t, chain.estimate_max_blocks())?,
                None => self.default_confirm_target,
            };
            match self.wallet_rate {
                // An explicitly set wallet rate wins over estimation unless
                // the caller gave a target of their own
                Some(rate) if directives.confirm_target.is_none() => rate,
                _ => match chain.estimate_fee(target, conservative).await? {
                    Some(rate) => rate,
                    None => self.fallback_rate.ok_or_else(|| {
                        WalletError::ChainError(
                            "Fee estimation failed and fallback fee is disabled".to_string(),
                        )
                    })?,
                },
            }
        };

        let relay_minimum = chain.relay_minimum_fee().await?;
        let rate = rate.max(relay_minimum);

        if rate > self.max_fee_rate {
            return Err(WalletError::FeeExceedsMaximum(format!(
                "Fee rate {rate} exceeds maximum {}",
                self.max_fee_rate
            )));
        }
        Ok(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChain;

    #[test]
    fn test_grammar_bare_decimal_is_coin_per_kb() {
        match parse_fee_string("0.0002").unwrap() {
            FeeStringValue::Rate(rate) => {
                assert_eq!(rate, FeeRate::from_sat_per_kvb(20_000));
            }
            other => panic!("expected rate, got {other:?}"),
        }
    }

    #[test]
    fn test_grammar_sat_b_literal() {
        match parse_fee_string("25sat/B").unwrap() {
            FeeStringValue::Rate(rate) => {
                assert_eq!(rate, FeeRate::from_sat_per_vb(25));
            }
            other => panic!("expected rate, got {other:?}"),
        }
    }

    #[test]
    fn test_grammar_mode_keywords() {
        assert_eq!(
            parse_fee_string("CONSERVATIVE").unwrap(),
            FeeStringValue::Mode(FeeEstimateMode::Conservative)
        );
        assert_eq!(
            parse_fee_string("sat/b").unwrap(),
            FeeStringValue::Mode(FeeEstimateMode::SatPerByte)
        );
        assert!(parse_fee_string("soon").is_err());
    }

    #[test]
    fn test_estimate_param_conversion() {
        // A parameter of "20" in sat/b mode means 20 sat per byte:
        // 20 * COIN sats divided by COIN/1000 gives 20_000 sat/kvB
        let rate =
            rate_from_estimate_param(FeeEstimateMode::SatPerByte, Amount::from_coins(20)).unwrap();
        assert_eq!(rate, FeeRate::from_sat_per_vb(20));

        let rate = rate_from_estimate_param(
            FeeEstimateMode::CoinPerKb,
            Amount::from_sats(20_000),
        )
        .unwrap();
        assert_eq!(rate, FeeRate::from_sat_per_kvb(20_000));
    }

    #[test]
    fn test_dust_threshold_legacy() {
        // (34 + 148) vbytes at 3 sat/vB
        assert_eq!(
            dust_threshold(&Destination::Legacy([0; 20])),
            Amount::from_sats(546)
        );
    }

    #[tokio::test]
    async fn test_resolve_clamps_to_relay_minimum() {
        let chain = MockChain::new().with_relay_minimum(FeeRate::from_sat_per_kvb(5000));
        let policy = FeePolicy::default();
        let directives = FeeDirectives {
            explicit_rate: Some(FeeRate::from_sat_per_kvb(1000)),
            ..Default::default()
        };
        let rate = policy.resolve(&directives, &chain).await.unwrap();
        assert_eq!(rate, FeeRate::from_sat_per_kvb(5000));
    }

    #[tokio::test]
    async fn test_resolve_rejects_rate_above_ceiling() {
        let chain = MockChain::new();
        let policy = FeePolicy::default();
        let directives = FeeDirectives {
            explicit_rate: Some(FeeRate::from_sat_per_kvb(20_000_000)),
            ..Default::default()
        };
        let err = policy.resolve(&directives, &chain).await.unwrap_err();
        assert!(matches!(err, WalletError::FeeExceedsMaximum(_)));
    }

    #[tokio::test]
    async fn test_resolve_uses_estimator_for_target() {
        let chain = MockChain::new().with_estimate(2, FeeRate::from_sat_per_kvb(8000));
        let policy = FeePolicy::default();
        let directives = FeeDirectives {
            confirm_target: Some(2),
            ..Default::default()
        };
        let rate = policy.resolve(&directives, &chain).await.unwrap();
        assert_eq!(rate, FeeRate::from_sat_per_kvb(8000));
    }

    #[tokio::test]
    async fn test_resolve_estimation_failure_without_fallback() {
        let chain = MockChain::new();
        let policy = FeePolicy::default();
        let err = policy
            .resolve(&FeeDirectives::default(), &chain)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::ChainError(_)));
    }

    #[tokio::test]
    async fn test_mode_without_rate_rejected() {
        let chain = MockChain::new();
        let policy = FeePolicy::default();
        let directives = FeeDirectives {
            mode: FeeEstimateMode::SatPerByte,
            ..Default::default()
        };
        let err = policy.resolve(&directives, &chain).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidParameter(_)));
    }
}
