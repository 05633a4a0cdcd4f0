//! Output universe: every output the wallet could conceivably spend
//!
//! A derived, read-only view over the ledger. Each output carries its
//! current depth, spend class and lock/reuse/spent flags; the view is
//! rebuilt whenever the ledger or lock set changes so callers always see
//! live state.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::data_structures::{
    Amount, OutPoint, OutputOrigin, OwnedOutput, SpendClass,
};
use crate::ledger::{OutputCategory, TransactionLedger};

/// Maturity thresholds for generated outputs
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UniverseParams {
    /// Confirmations before a coinbase output is spendable
    pub coinbase_maturity: i64,
    /// Confirmations before a stake reward is spendable
    pub stake_maturity: i64,
}

impl Default for UniverseParams {
    fn default() -> Self {
        UniverseParams {
            coinbase_maturity: 100,
            stake_maturity: 225,
        }
    }
}

/// Filter for one candidate listing
///
/// Mirrors the query options the listing RPC has always accepted:
/// depth bounds, per-output amount bounds, a result-count cap and an
/// early-exit minimum sum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateFilter {
    pub min_depth: i64,
    pub max_depth: i64,
    pub include_unsafe: bool,
    pub include_watch_only: bool,
    pub include_immature: bool,
    pub minimum_amount: Amount,
    pub maximum_amount: Option<Amount>,
    pub maximum_count: Option<usize>,
    pub minimum_sum_amount: Option<Amount>,
}

impl Default for CandidateFilter {
    fn default() -> Self {
        CandidateFilter {
            min_depth: 1,
            max_depth: 9_999_999,
            include_unsafe: true,
            include_watch_only: false,
            include_immature: false,
            minimum_amount: Amount::ZERO,
            maximum_amount: None,
            maximum_count: None,
            minimum_sum_amount: None,
        }
    }
}

impl CandidateFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_depth_range(mut self, min: i64, max: i64) -> Self {
        self.min_depth = min;
        self.max_depth = max;
        self
    }

    pub fn with_min_depth(mut self, min: i64) -> Self {
        self.min_depth = min;
        self
    }

    pub fn without_unsafe(mut self) -> Self {
        self.include_unsafe = false;
        self
    }

    pub fn with_watch_only(mut self) -> Self {
        self.include_watch_only = true;
        self
    }

    pub fn with_immature(mut self) -> Self {
        self.include_immature = true;
        self
    }

    pub fn with_amount_range(mut self, min: Amount, max: Amount) -> Self {
        self.minimum_amount = min;
        self.maximum_amount = Some(max);
        self
    }

    pub fn with_maximum_count(mut self, count: usize) -> Self {
        self.maximum_count = Some(count);
        self
    }

    pub fn with_minimum_sum(mut self, sum: Amount) -> Self {
        self.minimum_sum_amount = Some(sum);
        self
    }
}

/// Live view over everything the wallet could spend
#[derive(Debug, Default)]
pub struct OutputUniverse {
    outputs: std::collections::BTreeMap<OutPoint, OwnedOutput>,
}

impl OutputUniverse {
    /// Rebuild the view from the ledger and the current lock set
    pub fn derive(
        ledger: &TransactionLedger,
        locked: &BTreeSet<OutPoint>,
        params: &UniverseParams,
    ) -> Self {
        let dirty = ledger.dirty_destinations();
        let mut outputs = std::collections::BTreeMap::new();

        for entry in ledger.entries() {
            if entry.abandoned {
                continue;
            }
            let depth = ledger.depth_of(&entry.txid).unwrap_or(0);
            let replacement_pending =
                entry.signals_rbf && depth == 0 && !ledger.conflicts(&entry.txid).is_empty();

            for output in &entry.outputs {
                if !output.mine && !output.watch_only {
                    continue;
                }
                let outpoint = OutPoint::new(entry.txid, output.vout);
                let origin = match output.category {
                    OutputCategory::Coinbase => OutputOrigin::Coinbase,
                    OutputCategory::Stake => OutputOrigin::Stake,
                    OutputCategory::Send | OutputCategory::Receive => OutputOrigin::Payment,
                };
                let spend_class = if output.watch_only {
                    if output.solvable {
                        SpendClass::WatchOnlySolvable
                    } else {
                        SpendClass::WatchOnlyUnsolvable
                    }
                } else if origin == OutputOrigin::Coinbase && depth < params.coinbase_maturity {
                    SpendClass::Immature
                } else if origin == OutputOrigin::Stake && depth < params.stake_maturity {
                    SpendClass::Immature
                } else if depth < 0 || replacement_pending || (depth == 0 && !entry.from_self) {
                    SpendClass::Unsafe
                } else {
                    SpendClass::Spendable
                };

                outputs.insert(
                    outpoint,
                    OwnedOutput {
                        outpoint,
                        value: output.value,
                        destination: output.destination.clone(),
                        origin,
                        depth,
                        spend_class,
                        locked: locked.contains(&outpoint),
                        reused: dirty.contains(&output.destination),
                        spent: ledger.is_spent(&outpoint),
                        from_self: entry.from_self,
                    },
                );
            }
        }

        OutputUniverse { outputs }
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&OwnedOutput> {
        self.outputs.get(outpoint)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OwnedOutput> {
        self.outputs.values()
    }

    /// Unspent, unlocked outputs passing the filter, in outpoint order
    ///
    /// Dust-sized outputs are listed; value-based pruning is the coin
    /// selector's concern. The `maximum_count` and `minimum_sum_amount`
    /// cutoffs stop iteration early.
    pub fn list_candidates(&self, filter: &CandidateFilter) -> Vec<OwnedOutput> {
        let mut result = Vec::new();
        let mut total = Amount::ZERO;

        for output in self.outputs.values() {
            if output.spent || output.locked {
                continue;
            }
            if output.depth < filter.min_depth || output.depth > filter.max_depth {
                continue;
            }
            if output.value < filter.minimum_amount {
                continue;
            }
            if let Some(max) = filter.maximum_amount {
                if output.value > max {
                    continue;
                }
            }
            match output.spend_class {
                SpendClass::Spendable => {}
                SpendClass::Unsafe => {
                    if !filter.include_unsafe {
                        continue;
                    }
                }
                SpendClass::Immature => {
                    if !filter.include_immature {
                        continue;
                    }
                }
                SpendClass::WatchOnlySolvable | SpendClass::WatchOnlyUnsolvable => {
                    if !filter.include_watch_only {
                        continue;
                    }
                }
            }

            total = total.saturating_add(output.value);
            result.push(output.clone());

            if let Some(max_count) = filter.maximum_count {
                if result.len() >= max_count {
                    break;
                }
            }
            if let Some(min_sum) = filter.minimum_sum_amount {
                if total >= min_sum {
                    break;
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{BlockHash, BlockRef, Destination, TxId};
    use crate::ledger::{LedgerEntry, LedgerOutput};

    fn txid(n: u8) -> TxId {
        TxId::from_bytes([n; 32])
    }

    fn block(height: u64) -> BlockRef {
        BlockRef {
            height,
            hash: BlockHash::from_bytes([height as u8; 32]),
        }
    }

    fn ledger_with_coins(coins: &[(u8, u64, u64)], tip: u64) -> TransactionLedger {
        let mut ledger = TransactionLedger::new();
        for (id, value, height) in coins {
            ledger.record(
                LedgerEntry::new(
                    txid(*id),
                    vec![],
                    vec![LedgerOutput::receive(
                        0,
                        Amount::from_sats(*value),
                        Destination::Legacy([*id; 20]),
                    )],
                )
                .received_at(100 + *id as u64)
                .at_block(block(*height)),
            );
        }
        ledger.set_tip(block(tip));
        ledger
    }

    #[test]
    fn test_candidates_respect_depth_bounds() {
        let ledger = ledger_with_coins(&[(1, 1000, 10), (2, 2000, 19), (3, 3000, 20)], 20);
        let universe = OutputUniverse::derive(&ledger, &BTreeSet::new(), &UniverseParams::default());
        let picks = universe.list_candidates(&CandidateFilter::new().with_depth_range(2, 100));
        let values: Vec<u64> = picks.iter().map(|o| o.value.as_sats()).collect();
        assert_eq!(values, vec![1000, 2000]);
    }

    #[test]
    fn test_locked_outputs_never_listed() {
        let ledger = ledger_with_coins(&[(1, 1000, 10)], 20);
        let mut locked = BTreeSet::new();
        locked.insert(OutPoint::new(txid(1), 0));
        let universe = OutputUniverse::derive(&ledger, &locked, &UniverseParams::default());
        assert!(universe
            .list_candidates(&CandidateFilter::new())
            .is_empty());
    }

    #[test]
    fn test_immature_coinbase_classified() {
        let mut ledger = TransactionLedger::new();
        ledger.record(
            LedgerEntry::new(
                txid(1),
                vec![],
                vec![LedgerOutput::receive(
                    0,
                    Amount::from_sats(5000),
                    Destination::Legacy([1; 20]),
                )
                .with_category(OutputCategory::Coinbase)],
            )
            .received_at(100)
            .at_block(block(10)),
        );
        ledger.set_tip(block(20));
        let universe = OutputUniverse::derive(&ledger, &BTreeSet::new(), &UniverseParams::default());
        let output = universe.get(&OutPoint::new(txid(1), 0)).unwrap();
        assert_eq!(output.spend_class, SpendClass::Immature);

        assert!(universe
            .list_candidates(&CandidateFilter::new())
            .is_empty());
        assert_eq!(
            universe
                .list_candidates(&CandidateFilter::new().with_immature())
                .len(),
            1
        );
    }

    #[test]
    fn test_external_unconfirmed_is_unsafe() {
        let mut ledger = TransactionLedger::new();
        ledger.set_tip(block(20));
        ledger.record(
            LedgerEntry::new(
                txid(1),
                vec![],
                vec![LedgerOutput::receive(
                    0,
                    Amount::from_sats(5000),
                    Destination::Legacy([1; 20]),
                )],
            )
            .received_at(100),
        );
        let universe = OutputUniverse::derive(&ledger, &BTreeSet::new(), &UniverseParams::default());
        let output = universe.get(&OutPoint::new(txid(1), 0)).unwrap();
        assert_eq!(output.spend_class, SpendClass::Unsafe);

        let listed = universe.list_candidates(
            &CandidateFilter::new().with_depth_range(0, 100),
        );
        assert_eq!(listed.len(), 1);
        let listed = universe.list_candidates(
            &CandidateFilter::new().with_depth_range(0, 100).without_unsafe(),
        );
        assert!(listed.is_empty());
    }

    #[test]
    fn test_minimum_sum_stops_early() {
        let ledger = ledger_with_coins(&[(1, 1000, 10), (2, 2000, 10), (3, 3000, 10)], 20);
        let universe = OutputUniverse::derive(&ledger, &BTreeSet::new(), &UniverseParams::default());
        let picks = universe.list_candidates(
            &CandidateFilter::new().with_minimum_sum(Amount::from_sats(2500)),
        );
        assert_eq!(picks.len(), 2);
    }
}
