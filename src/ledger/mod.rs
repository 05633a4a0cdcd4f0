//! Wallet transaction ledger
//!
//! Records every transaction the wallet has observed, tracks confirmation
//! depth against the current tip, spent outpoints, symmetric conflict
//! sets and abandonment. Entries are kept in a time-then-insertion index
//! so recent-first listing does not scan the whole map.

pub mod entry;

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::data_structures::{BlockRef, Destination, OutPoint, TxId};
use crate::errors::{WalletError, WalletResult};

pub use entry::{LedgerEntry, LedgerOutput, OutputCategory};

/// In-memory transaction ledger for one wallet
#[derive(Debug, Default)]
pub struct TransactionLedger {
    entries: HashMap<TxId, LedgerEntry>,
    /// (time_received, insertion sequence) -> txid, recent-last
    order: BTreeMap<(u64, u64), TxId>,
    /// Outpoint -> every entry that spends it
    spenders: HashMap<OutPoint, HashSet<TxId>>,
    conflicts: HashMap<TxId, HashSet<TxId>>,
    tip: Option<BlockRef>,
    next_seq: u64,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tip(&self) -> Option<BlockRef> {
        self.tip
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, txid: &TxId) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &TxId) -> Option<&LedgerEntry> {
        self.entries.get(txid)
    }

    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    /// Record a newly observed transaction, or re-observe a known one
    ///
    /// Re-observation refreshes the block reference and clears any
    /// abandoned mark; the original received-time ordering is kept. Spends
    /// of an outpoint already consumed by a different entry mark both
    /// entries conflicted, symmetrically.
    pub fn record(&mut self, mut entry: LedgerEntry) {
        let txid = entry.txid;
        if let Some(existing) = self.entries.get_mut(&txid) {
            entry.time_received = existing.time_received;
            entry.abandoned = false;
            *existing = entry;
        } else {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.order.insert((entry.time_received, seq), txid);
            for input in &entry.inputs {
                let spenders = self.spenders.entry(*input).or_default();
                for other in spenders.iter() {
                    if *other != txid {
                        self.conflicts.entry(txid).or_default().insert(*other);
                        self.conflicts.entry(*other).or_default().insert(txid);
                    }
                }
                spenders.insert(txid);
            }
            self.entries.insert(txid, entry);
        }
    }

    /// Move the ledger to a new chain tip, recomputing all depths
    ///
    /// Entries claiming a block above the new tip revert to unconfirmed
    /// (reorg handling); their depth recomputes to 0 or negative via their
    /// conflict sets.
    pub fn set_tip(&mut self, tip: BlockRef) {
        for entry in self.entries.values_mut() {
            if let Some(block) = entry.block {
                if block.height > tip.height {
                    entry.block = None;
                }
            }
        }
        self.tip = Some(tip);
    }

    /// Confirmation depth of a transaction
    ///
    /// `>= 1` confirmed, `0` unconfirmed, negative when a conflicting
    /// transaction is confirmed instead. `None` for unknown transactions.
    pub fn depth_of(&self, txid: &TxId) -> Option<i64> {
        let entry = self.entries.get(txid)?;
        let tip_height = self.tip.map(|t| t.height);
        if let (Some(block), Some(tip_height)) = (entry.block, tip_height) {
            if tip_height >= block.height {
                return Some((tip_height - block.height + 1) as i64);
            }
            return Some(0);
        }
        // Unconfirmed: conflicted if any rival made it into a block
        let mut depth = 0i64;
        if let Some(rivals) = self.conflicts.get(txid) {
            for rival in rivals {
                if let Some(rival_depth) = self.confirmed_depth(rival) {
                    depth = depth.min(-rival_depth);
                }
            }
        }
        Some(depth)
    }

    fn confirmed_depth(&self, txid: &TxId) -> Option<i64> {
        let entry = self.entries.get(txid)?;
        let block = entry.block?;
        let tip_height = self.tip.map(|t| t.height)?;
        if tip_height >= block.height {
            Some((tip_height - block.height + 1) as i64)
        } else {
            None
        }
    }

    /// Transactions known to conflict with `txid`
    pub fn conflicts(&self, txid: &TxId) -> HashSet<TxId> {
        self.conflicts.get(txid).cloned().unwrap_or_default()
    }

    /// Whether an outpoint is consumed by a live (non-abandoned,
    /// non-conflicted) entry
    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        let Some(spenders) = self.spenders.get(outpoint) else {
            return false;
        };
        spenders.iter().any(|txid| {
            let abandoned = self
                .entries
                .get(txid)
                .map(|e| e.abandoned)
                .unwrap_or(false);
            !abandoned && self.depth_of(txid).unwrap_or(0) >= 0
        })
    }

    /// The live entry spending an outpoint, if any
    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<TxId> {
        self.spenders.get(outpoint)?.iter().copied().find(|txid| {
            let abandoned = self
                .entries
                .get(txid)
                .map(|e| e.abandoned)
                .unwrap_or(false);
            !abandoned && self.depth_of(txid).unwrap_or(0) >= 0
        })
    }

    /// Mark an unconfirmed transaction abandoned so its inputs become
    /// respendable
    ///
    /// Only permitted for entries at depth <= 0 that are not in the relay
    /// pool; anything else is still propagating or already confirmed.
    /// Returns `false` when the entry was already abandoned.
    pub fn mark_abandoned(&mut self, txid: &TxId, in_relay_pool: bool) -> WalletResult<bool> {
        let depth = self
            .depth_of(txid)
            .ok_or_else(|| WalletError::ResourceNotFound(format!("Unknown transaction {txid}")))?;
        if depth > 0 || in_relay_pool {
            return Err(WalletError::InvalidParameter(
                "Transaction not eligible for abandonment".to_string(),
            ));
        }
        let entry = self
            .entries
            .get_mut(txid)
            .ok_or_else(|| WalletError::ResourceNotFound(format!("Unknown transaction {txid}")))?;
        if entry.abandoned {
            return Ok(false);
        }
        entry.abandoned = true;
        Ok(true)
    }

    /// Most recently received entries, newest first, without a full scan
    pub fn recent(&self, count: usize) -> Vec<&LedgerEntry> {
        self.order
            .values()
            .rev()
            .take(count)
            .filter_map(|txid| self.entries.get(txid))
            .collect()
    }

    /// Destinations the wallet has already spent from
    ///
    /// An output paying one of these is flagged reused; spending to such
    /// destinations again leaks address linkage.
    pub fn dirty_destinations(&self) -> HashSet<Destination> {
        let mut dirty = HashSet::new();
        for entry in self.entries.values() {
            if entry.abandoned {
                continue;
            }
            for input in &entry.inputs {
                if let Some(source) = self.entries.get(&input.txid) {
                    if let Some(output) = source.output(input.vout) {
                        if output.mine || output.watch_only {
                            dirty.insert(output.destination.clone());
                        }
                    }
                }
            }
        }
        dirty
    }
}
