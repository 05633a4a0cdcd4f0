//! Core data structures for the wallet engine
//!
//! Amounts, identifiers, destinations, outputs, fee rates and the
//! per-call selection constraints. These are plain values; behavior lives
//! in the component modules that consume them.

pub mod amount;
pub mod coin_control;
pub mod destination;
pub mod fee_rate;
pub mod hashes;
pub mod output;
pub mod transaction;

pub use amount::{Amount, COIN};
pub use coin_control::{ChangePosition, CoinControl};
pub use destination::Destination;
pub use fee_rate::{FeeEstimateMode, FeeRate, WALLET_COIN_KB_TO_SAT_B};
pub use hashes::{BlockHash, BlockRef, OutPoint, TxId};
pub use output::{OutputOrigin, OwnedOutput, SpendClass};
pub use transaction::{
    Recipient, TxDraft, TxInput, TxOut, SEQUENCE_FINAL_NO_RBF, SEQUENCE_RBF, TX_BASE_VSIZE,
};
