//! Balance aggregation over the output universe
//!
//! Sums unspent owned outputs into mutually exclusive categories:
//! trusted, untrusted-pending, immature, staked, reused and the
//! watch-only equivalents. The partition is total: with reuse avoidance
//! off, trusted + pending + immature + staked equals the sum of every
//! owned unspent output.

use serde::{Deserialize, Serialize};

use crate::data_structures::{Amount, OutputOrigin, OwnedOutput, SpendClass};

/// Categorized wallet balances
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    /// Confirmed outputs plus unconfirmed change from our own transactions
    pub trusted: Amount,
    /// Unconfirmed outputs created by others
    pub untrusted_pending: Amount,
    /// Coinbase outputs below maturity
    pub immature: Amount,
    /// Stake rewards below spend depth
    pub staked: Amount,
    /// Outputs at previously-spent-from destinations; populated only when
    /// reuse avoidance is on, and excluded from the spendable totals
    pub used: Amount,
    pub watchonly_trusted: Amount,
    pub watchonly_untrusted_pending: Amount,
    pub watchonly_immature: Amount,
}

impl Balances {
    /// Everything the wallet itself could eventually spend
    pub fn total_mine(self) -> Amount {
        self.trusted
            .saturating_add(self.untrusted_pending)
            .saturating_add(self.immature)
            .saturating_add(self.staked)
            .saturating_add(self.used)
    }

    pub fn total_watchonly(self) -> Amount {
        self.watchonly_trusted
            .saturating_add(self.watchonly_untrusted_pending)
            .saturating_add(self.watchonly_immature)
    }
}

fn is_trusted(output: &OwnedOutput) -> bool {
    output.depth >= 1 || (output.depth == 0 && output.from_self)
}

/// Aggregate balances from a snapshot of the output universe
///
/// `min_depth` raises the confirmation bar for the trusted category;
/// outputs that are trusted but shallower than the bar are not counted
/// anywhere. Conflicted outputs (negative depth) never contribute.
pub fn compute_balances<'a>(
    outputs: impl Iterator<Item = &'a OwnedOutput>,
    min_depth: i64,
    avoid_reuse: bool,
) -> Balances {
    let mut balances = Balances::default();

    for output in outputs {
        if output.spent || output.depth < 0 {
            continue;
        }

        match output.spend_class {
            SpendClass::WatchOnlySolvable | SpendClass::WatchOnlyUnsolvable => {
                if is_trusted(output) {
                    if output.depth >= min_depth {
                        balances.watchonly_trusted =
                            balances.watchonly_trusted.saturating_add(output.value);
                    }
                } else if output.depth == 0 {
                    balances.watchonly_untrusted_pending = balances
                        .watchonly_untrusted_pending
                        .saturating_add(output.value);
                }
                continue;
            }
            SpendClass::Immature => {
                match output.origin {
                    OutputOrigin::Stake => {
                        balances.staked = balances.staked.saturating_add(output.value);
                    }
                    _ => {
                        balances.immature = balances.immature.saturating_add(output.value);
                    }
                }
                continue;
            }
            SpendClass::Spendable | SpendClass::Unsafe => {}
        }

        if avoid_reuse && output.reused {
            balances.used = balances.used.saturating_add(output.value);
            continue;
        }

        if is_trusted(output) {
            if output.depth >= min_depth {
                balances.trusted = balances.trusted.saturating_add(output.value);
            }
        } else if output.depth == 0 {
            balances.untrusted_pending =
                balances.untrusted_pending.saturating_add(output.value);
        }
    }

    balances
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{Destination, OutPoint, TxId};

    fn output(n: u8, value: u64, depth: i64) -> OwnedOutput {
        OwnedOutput {
            outpoint: OutPoint::new(TxId::from_bytes([n; 32]), 0),
            value: Amount::from_sats(value),
            destination: Destination::Legacy([n; 20]),
            origin: OutputOrigin::Payment,
            depth,
            spend_class: if depth >= 1 {
                SpendClass::Spendable
            } else {
                SpendClass::Unsafe
            },
            locked: false,
            reused: false,
            spent: false,
            from_self: false,
        }
    }

    #[test]
    fn test_trusted_vs_pending_split() {
        let confirmed = output(1, 1000, 3);
        let mut own_change = output(2, 500, 0);
        own_change.from_self = true;
        let foreign_pending = output(3, 700, 0);

        let outputs = vec![confirmed, own_change, foreign_pending];
        let balances = compute_balances(outputs.iter(), 0, false);
        assert_eq!(balances.trusted, Amount::from_sats(1500));
        assert_eq!(balances.untrusted_pending, Amount::from_sats(700));
    }

    #[test]
    fn test_partition_sums_to_total() {
        let mut outputs = vec![output(1, 1000, 5), output(2, 2000, 0), output(3, 800, 1)];
        outputs[2].spend_class = SpendClass::Immature;
        outputs[2].origin = OutputOrigin::Coinbase;

        let balances = compute_balances(outputs.iter(), 0, false);
        let total: Amount = outputs.iter().map(|o| o.value).sum();
        assert_eq!(balances.total_mine(), total);
    }

    #[test]
    fn test_avoid_reuse_moves_value_to_used() {
        let mut reused = output(1, 1000, 5);
        reused.reused = true;
        let clean = output(2, 2000, 5);
        let outputs = vec![reused, clean];

        let without = compute_balances(outputs.iter(), 0, false);
        assert_eq!(without.trusted, Amount::from_sats(3000));
        assert_eq!(without.used, Amount::ZERO);

        let with = compute_balances(outputs.iter(), 0, true);
        assert_eq!(with.trusted, Amount::from_sats(2000));
        assert_eq!(with.used, Amount::from_sats(1000));
        assert_eq!(with.total_mine(), without.total_mine());
    }

    #[test]
    fn test_stake_rewards_reported_separately() {
        let mut stake = output(1, 4000, 10);
        stake.origin = OutputOrigin::Stake;
        stake.spend_class = SpendClass::Immature;
        let balances = compute_balances([stake].iter(), 0, false);
        assert_eq!(balances.staked, Amount::from_sats(4000));
        assert_eq!(balances.immature, Amount::ZERO);
    }

    #[test]
    fn test_conflicted_and_spent_never_counted() {
        let conflicted = output(1, 1000, -2);
        let mut spent = output(2, 900, 4);
        spent.spent = true;
        let balances = compute_balances([conflicted, spent].iter(), 0, false);
        assert_eq!(balances.total_mine(), Amount::ZERO);
    }

    #[test]
    fn test_watchonly_buckets() {
        let mut watched = output(1, 1200, 2);
        watched.spend_class = SpendClass::WatchOnlySolvable;
        let balances = compute_balances([watched].iter(), 0, false);
        assert_eq!(balances.watchonly_trusted, Amount::from_sats(1200));
        assert_eq!(balances.trusted, Amount::ZERO);
    }
}
