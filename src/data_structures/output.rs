use serde::{Deserialize, Serialize};

use super::amount::Amount;
use super::destination::Destination;
use super::fee_rate::FeeRate;
use super::hashes::OutPoint;

/// How an output may be spent, if at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpendClass {
    /// Fully spendable with the wallet's own keys
    Spendable,
    /// Watch-only, but the wallet knows the full locking script
    WatchOnlySolvable,
    /// Watch-only and the wallet could not solve the script
    WatchOnlyUnsolvable,
    /// Coinbase or stake output still below its maturity depth
    Immature,
    /// Unconfirmed output from an external source or an unconfirmed
    /// replacement; excluded from selection unless explicitly requested
    Unsafe,
}

/// What kind of transaction produced an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputOrigin {
    Payment,
    Coinbase,
    Stake,
}

/// One transaction output the wallet owns or watches
///
/// This is the unit the balance aggregator and coin selector operate on.
/// Instances are derived views; the ledger is the source of truth and
/// depth/spent/locked flags are recomputed whenever it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedOutput {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub destination: Destination,
    pub origin: OutputOrigin,
    /// Confirmation depth; 0 = unconfirmed, negative = conflicted
    pub depth: i64,
    pub spend_class: SpendClass,
    pub locked: bool,
    /// Destination was previously spent from
    pub reused: bool,
    pub spent: bool,
    /// Every input of the producing transaction belongs to this wallet
    pub from_self: bool,
}

impl OwnedOutput {
    pub fn is_watch_only(&self) -> bool {
        matches!(
            self.spend_class,
            SpendClass::WatchOnlySolvable | SpendClass::WatchOnlyUnsolvable
        )
    }

    pub fn is_mature(&self) -> bool {
        self.spend_class != SpendClass::Immature
    }

    /// Whether automatic selection may consider this output at all
    pub fn is_selectable(&self) -> bool {
        !self.spent && !self.locked && self.depth >= 0
    }

    /// Size contribution of spending this output, in vbytes
    pub fn input_vsize(&self) -> usize {
        self.destination.input_vsize()
    }

    /// Value after deducting the cost of spending this output at `rate`
    ///
    /// Negative when the output costs more to spend than it is worth.
    pub fn effective_value(&self, rate: FeeRate) -> i64 {
        let spend_cost = rate.fee_for(self.input_vsize());
        self.value.as_sats() as i64 - spend_cost.as_sats() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::hashes::TxId;

    fn output(value: u64, depth: i64) -> OwnedOutput {
        OwnedOutput {
            outpoint: OutPoint::new(TxId::from_bytes([1; 32]), 0),
            value: Amount::from_sats(value),
            destination: Destination::Legacy([0; 20]),
            origin: OutputOrigin::Payment,
            depth,
            spend_class: SpendClass::Spendable,
            locked: false,
            reused: false,
            spent: false,
            from_self: true,
        }
    }

    #[test]
    fn test_effective_value_can_go_negative() {
        let o = output(100, 1);
        let rate = FeeRate::from_sat_per_vb(10);
        assert!(o.effective_value(rate) < 0);
    }

    #[test]
    fn test_locked_output_not_selectable() {
        let mut o = output(1000, 1);
        assert!(o.is_selectable());
        o.locked = true;
        assert!(!o.is_selectable());
    }

    #[test]
    fn test_conflicted_output_not_selectable() {
        let o = output(1000, -2);
        assert!(!o.is_selectable());
    }
}
