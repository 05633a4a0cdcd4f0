use serde::{Deserialize, Serialize};

use super::amount::Amount;
use super::destination::Destination;
use super::hashes::{OutPoint, TxId};

/// Fixed transaction overhead in vbytes (version, counts, locktime)
pub const TX_BASE_VSIZE: usize = 10;

/// Sequence value that opts a transaction into replace-by-fee
pub const SEQUENCE_RBF: u32 = 0xffff_fffd;

/// Highest sequence value that does not signal replaceability
pub const SEQUENCE_FINAL_NO_RBF: u32 = 0xffff_fffe;

/// One requested payment in a build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub destination: Destination,
    pub amount: Amount,
    /// Deduct a share of the fee from this recipient's amount instead of
    /// funding it from inputs
    pub subtract_fee: bool,
}

impl Recipient {
    pub fn new(destination: Destination, amount: Amount) -> Self {
        Recipient {
            destination,
            amount,
            subtract_fee: false,
        }
    }

    pub fn subtracting_fee(mut self) -> Self {
        self.subtract_fee = true;
        self
    }
}

/// An input slot of a draft transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub sequence: u32,
    /// Size contribution of this input once signed, in vbytes
    pub vsize: usize,
}

impl TxInput {
    pub fn signals_rbf(&self) -> bool {
        self.sequence < SEQUENCE_FINAL_NO_RBF
    }
}

/// An output slot of a draft transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Amount,
    pub destination: Destination,
}

/// A transaction under construction
///
/// Drafts are created fresh per build or bump request and either finalized
/// for signing or discarded; they never outlive the call that made them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxDraft {
    pub txid: TxId,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOut>,
    pub fee: Amount,
    /// Index of the change output, if one was emitted
    pub change_position: Option<usize>,
}

impl TxDraft {
    pub fn total_input_value(&self) -> Amount {
        self.inputs.iter().map(|i| i.value).sum()
    }

    pub fn total_output_value(&self) -> Amount {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Estimated size of the finalized transaction in vbytes
    pub fn vsize(&self) -> usize {
        TX_BASE_VSIZE
            + self.inputs.iter().map(|i| i.vsize).sum::<usize>()
            + self
                .outputs
                .iter()
                .map(|o| o.destination.output_vsize())
                .sum::<usize>()
    }

    pub fn signals_rbf(&self) -> bool {
        self.inputs.iter().any(|i| i.signals_rbf())
    }

    /// Check the value-conservation invariant: inputs = outputs + fee
    pub fn conserves_value(&self) -> bool {
        self.total_input_value()
            == self
                .total_output_value()
                .saturating_add(self.fee)
    }
}
