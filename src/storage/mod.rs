//! Persistence interface for wallet state
//!
//! The engine writes ledger entries and the persistent lock set through
//! [`WalletStore`] without defining any on-disk layout. A
//! [`MemoryWalletStore`] ships for memory-only wallets and tests; durable
//! backends implement the same trait out of tree.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::data_structures::{OutPoint, TxId};
use crate::errors::WalletResult;
use crate::ledger::LedgerEntry;

/// Storage backend for one wallet
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Prepare the backend (create tables, open files, ...)
    async fn initialize(&self) -> WalletResult<()>;

    /// All ledger entries previously appended
    async fn load_ledger_entries(&self) -> WalletResult<Vec<LedgerEntry>>;

    /// Persist a newly recorded entry
    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> WalletResult<()>;

    /// Persist changes to an existing entry (confirmation, abandonment)
    async fn update_ledger_entry(&self, entry: &LedgerEntry) -> WalletResult<()>;

    /// Outpoints locked with the persistent flag
    async fn load_locked_coins(&self) -> WalletResult<Vec<OutPoint>>;

    /// Replace the persistent lock set
    async fn save_locked_coins(&self, outpoints: &[OutPoint]) -> WalletResult<()>;

    /// Release the backend gracefully
    async fn close(&self) -> WalletResult<()>;
}

/// In-memory store; contents vanish with the process
#[derive(Debug, Default)]
pub struct MemoryWalletStore {
    entries: Mutex<HashMap<TxId, LedgerEntry>>,
    entry_order: Mutex<Vec<TxId>>,
    locked: Mutex<BTreeSet<OutPoint>>,
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn initialize(&self) -> WalletResult<()> {
        Ok(())
    }

    async fn load_ledger_entries(&self) -> WalletResult<Vec<LedgerEntry>> {
        let entries = self.entries.lock().unwrap();
        let order = self.entry_order.lock().unwrap();
        Ok(order
            .iter()
            .filter_map(|txid| entries.get(txid).cloned())
            .collect())
    }

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> WalletResult<()> {
        let mut entries = self.entries.lock().unwrap();
        if entries.insert(entry.txid, entry.clone()).is_none() {
            self.entry_order.lock().unwrap().push(entry.txid);
        }
        Ok(())
    }

    async fn update_ledger_entry(&self, entry: &LedgerEntry) -> WalletResult<()> {
        self.append_ledger_entry(entry).await
    }

    async fn load_locked_coins(&self) -> WalletResult<Vec<OutPoint>> {
        Ok(self.locked.lock().unwrap().iter().copied().collect())
    }

    async fn save_locked_coins(&self, outpoints: &[OutPoint]) -> WalletResult<()> {
        let mut locked = self.locked.lock().unwrap();
        locked.clear();
        locked.extend(outpoints.iter().copied());
        Ok(())
    }

    async fn close(&self) -> WalletResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{Amount, Destination};
    use crate::ledger::LedgerOutput;

    fn entry(n: u8) -> LedgerEntry {
        LedgerEntry::new(
            TxId::from_bytes([n; 32]),
            vec![],
            vec![LedgerOutput::receive(
                0,
                Amount::from_sats(1000),
                Destination::Legacy([n; 20]),
            )],
        )
        .received_at(n as u64)
    }

    #[tokio::test]
    async fn test_entries_round_trip_in_order() {
        let store = MemoryWalletStore::new();
        store.append_ledger_entry(&entry(2)).await.unwrap();
        store.append_ledger_entry(&entry(1)).await.unwrap();
        let loaded = store.load_ledger_entries().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].txid, TxId::from_bytes([2; 32]));
    }

    #[tokio::test]
    async fn test_update_replaces_without_duplicating() {
        let store = MemoryWalletStore::new();
        let mut e = entry(1);
        store.append_ledger_entry(&e).await.unwrap();
        e.abandoned = true;
        store.update_ledger_entry(&e).await.unwrap();
        let loaded = store.load_ledger_entries().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].abandoned);
    }

    #[tokio::test]
    async fn test_locked_coins_round_trip() {
        let store = MemoryWalletStore::new();
        let points = vec![OutPoint::new(TxId::from_bytes([1; 32]), 0)];
        store.save_locked_coins(&points).await.unwrap();
        assert_eq!(store.load_locked_coins().await.unwrap(), points);
    }
}
