//! Wallet balance and spend engine for UTXO chains
//!
//! This crate implements the core bookkeeping a wallet needs between
//! "what do I own" and "here is a signed transaction": the output
//! universe and its balance categories, coin selection, fee policy,
//! transaction construction with change handling, replace-by-fee bumping
//! and the transaction ledger with conflict and abandonment tracking.
//!
//! Consensus validation, networking, key derivation and on-disk layout
//! are deliberately outside: the engine reaches them through the narrow
//! [`chain::ChainView`], [`signing::SigningProvider`] and
//! [`storage::WalletStore`] traits, for which in-memory test
//! implementations ship in-tree.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use utxo_wallet_engine::chain::MockChain;
//! use utxo_wallet_engine::data_structures::{Amount, CoinControl, Destination, Recipient};
//! use utxo_wallet_engine::signing::MockSigner;
//! use utxo_wallet_engine::storage::MemoryWalletStore;
//! use utxo_wallet_engine::wallet::{Wallet, WalletConfig};
//!
//! # async fn example() -> Result<(), utxo_wallet_engine::errors::WalletError> {
//! let config = WalletConfig::new("hot")
//!     .with_change_destination(Destination::Legacy([0; 20]));
//! let wallet = Wallet::load(
//!     config,
//!     Arc::new(MockChain::new()),
//!     Arc::new(MemoryWalletStore::new()),
//!     Arc::new(MockSigner::signing()),
//! )
//! .await?;
//!
//! let recipient = Recipient::new(Destination::Legacy([1; 20]), Amount::from_coins(1));
//! let result = wallet
//!     .select_and_build(&[recipient], &CoinControl::new())
//!     .await?;
//! println!("sent {} paying fee {}", result.txid, result.fee);
//! # Ok(())
//! # }
//! ```

pub mod balance;
pub mod builder;
pub mod bump;
pub mod chain;
pub mod data_structures;
pub mod errors;
pub mod fees;
pub mod ledger;
pub mod registry;
pub mod selection;
pub mod signing;
pub mod storage;
pub mod universe;
pub mod wallet;

pub use balance::Balances;
pub use builder::{BuildParams, BuiltTransaction};
pub use bump::{BumpOptions, FeeBump};
pub use data_structures::{
    Amount, ChangePosition, CoinControl, Destination, FeeEstimateMode, FeeRate, OutPoint,
    OwnedOutput, Recipient, SpendClass, TxDraft, TxId,
};
pub use errors::{WalletError, WalletResult};
pub use fees::{FeePolicy, FeeStringValue};
pub use ledger::{LedgerEntry, LedgerOutput, OutputCategory, TransactionLedger};
pub use registry::WalletRegistry;
pub use selection::{SelectionOutcome, SelectionStrategy};
pub use universe::{CandidateFilter, OutputUniverse, UniverseParams};
pub use wallet::{SendResult, Wallet, WalletConfig};
