use serde::{Deserialize, Serialize};

use crate::data_structures::{Amount, BlockRef, Destination, OutPoint, TxId};

/// Role an output plays from this wallet's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputCategory {
    /// Paid away to a foreign destination
    Send,
    /// Paid to one of the wallet's own destinations
    Receive,
    /// Stake reward output
    Stake,
    /// Block subsidy output
    Coinbase,
}

/// One output slot of a ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerOutput {
    pub vout: u32,
    pub value: Amount,
    pub destination: Destination,
    pub category: OutputCategory,
    /// The wallet can sign for this output
    pub mine: bool,
    /// The wallet watches but cannot sign for this output
    pub watch_only: bool,
    /// For watch-only outputs, whether the full locking script is known
    pub solvable: bool,
}

impl LedgerOutput {
    pub fn receive(vout: u32, value: Amount, destination: Destination) -> Self {
        LedgerOutput {
            vout,
            value,
            destination,
            category: OutputCategory::Receive,
            mine: true,
            watch_only: false,
            solvable: true,
        }
    }

    pub fn send(vout: u32, value: Amount, destination: Destination) -> Self {
        LedgerOutput {
            vout,
            value,
            destination,
            category: OutputCategory::Send,
            mine: false,
            watch_only: false,
            solvable: true,
        }
    }

    pub fn watch_only(mut self, solvable: bool) -> Self {
        self.mine = false;
        self.watch_only = true;
        self.solvable = solvable;
        self
    }

    pub fn with_category(mut self, category: OutputCategory) -> Self {
        self.category = category;
        self
    }
}

/// A wallet-relevant transaction as recorded in the ledger
///
/// Entries are created on first observation and updated in place on
/// confirmation or reorg. They are never deleted, only marked abandoned;
/// eviction is an external pruning concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub txid: TxId,
    /// Outpoints this transaction consumes
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<LedgerOutput>,
    /// Containing block, when confirmed
    pub block: Option<BlockRef>,
    /// Unix time the wallet first saw the transaction
    pub time_received: u64,
    /// Unix time the transaction claims it was created
    pub time_created: u64,
    pub abandoned: bool,
    /// Every input belongs to this wallet
    pub from_self: bool,
    pub signals_rbf: bool,
}

impl LedgerEntry {
    pub fn new(txid: TxId, inputs: Vec<OutPoint>, outputs: Vec<LedgerOutput>) -> Self {
        LedgerEntry {
            txid,
            inputs,
            outputs,
            block: None,
            time_received: 0,
            time_created: 0,
            abandoned: false,
            from_self: false,
            signals_rbf: false,
        }
    }

    pub fn at_block(mut self, block: BlockRef) -> Self {
        self.block = Some(block);
        self
    }

    pub fn received_at(mut self, time: u64) -> Self {
        self.time_received = time;
        if self.time_created == 0 {
            self.time_created = time;
        }
        self
    }

    pub fn from_self(mut self) -> Self {
        self.from_self = true;
        self
    }

    pub fn signaling_rbf(mut self, signal: bool) -> Self {
        self.signals_rbf = signal;
        self
    }

    pub fn output(&self, vout: u32) -> Option<&LedgerOutput> {
        self.outputs.iter().find(|o| o.vout == vout)
    }

    pub fn is_coinbase(&self) -> bool {
        self.outputs
            .iter()
            .any(|o| o.category == OutputCategory::Coinbase)
    }

    pub fn is_stake(&self) -> bool {
        self.outputs
            .iter()
            .any(|o| o.category == OutputCategory::Stake)
    }
}
