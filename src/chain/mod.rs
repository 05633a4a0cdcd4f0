//! Read-only view of consensus state
//!
//! The engine never validates blocks or scripts itself; everything it
//! needs from the node side comes through [`ChainView`]. A configurable
//! [`MockChain`] ships with the crate for tests and offline use.

use async_trait::async_trait;

use crate::data_structures::{BlockRef, FeeRate, TxId};
use crate::errors::WalletResult;

/// Queries the wallet engine issues against consensus state
#[async_trait]
pub trait ChainView: Send + Sync {
    /// Current active-chain tip
    async fn tip(&self) -> WalletResult<BlockRef>;

    /// Block at `height` on the active chain, if any
    async fn find_block(&self, height: u64) -> WalletResult<Option<BlockRef>>;

    /// Most recent block on the active chain at or below both references
    async fn common_ancestor(
        &self,
        a: BlockRef,
        b: BlockRef,
    ) -> WalletResult<Option<BlockRef>>;

    /// Fee-rate estimate to confirm within `conf_target` blocks
    async fn estimate_fee(
        &self,
        conf_target: u32,
        conservative: bool,
    ) -> WalletResult<Option<FeeRate>>;

    /// Minimum rate the network will relay at all
    async fn relay_minimum_fee(&self) -> WalletResult<FeeRate>;

    /// Minimum rate increment for a replacement to enter the relay pool
    async fn incremental_relay_fee(&self) -> WalletResult<FeeRate>;

    /// Highest confirmation target the estimator supports
    fn estimate_max_blocks(&self) -> u32;

    /// Whether the transaction is final with respect to the current tip
    async fn is_final(&self, txid: &TxId) -> WalletResult<bool>;

    /// Whether the transaction or its unconfirmed ancestry opts into RBF
    async fn is_rbf_opt_in(&self, txid: &TxId) -> WalletResult<bool>;

    /// Whether the transaction currently sits in the node's relay pool
    async fn in_relay_pool(&self, txid: &TxId) -> WalletResult<bool>;
}

pub mod mock {
    //! In-process chain stub with settable state

    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::*;
    use crate::data_structures::BlockHash;

    /// A chain view backed by plain in-memory state
    #[derive(Debug)]
    pub struct MockChain {
        state: Mutex<MockChainState>,
        max_blocks: u32,
    }

    #[derive(Debug)]
    struct MockChainState {
        tip: BlockRef,
        estimates: HashMap<u32, FeeRate>,
        relay_minimum: FeeRate,
        incremental: FeeRate,
        relay_pool: HashSet<TxId>,
        rbf_opt_ins: HashSet<TxId>,
        non_final: HashSet<TxId>,
    }

    impl Default for MockChain {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockChain {
        pub fn new() -> Self {
            MockChain {
                state: Mutex::new(MockChainState {
                    tip: BlockRef {
                        height: 0,
                        hash: BlockHash::from_bytes([0; 32]),
                    },
                    estimates: HashMap::new(),
                    relay_minimum: FeeRate::from_sat_per_kvb(1000),
                    incremental: FeeRate::from_sat_per_kvb(1000),
                    relay_pool: HashSet::new(),
                    rbf_opt_ins: HashSet::new(),
                    non_final: HashSet::new(),
                }),
                max_blocks: 1008,
            }
        }

        pub fn with_height(self, height: u64) -> Self {
            self.set_height(height);
            self
        }

        pub fn with_estimate(self, conf_target: u32, rate: FeeRate) -> Self {
            self.state
                .lock()
                .unwrap()
                .estimates
                .insert(conf_target, rate);
            self
        }

        pub fn with_relay_minimum(self, rate: FeeRate) -> Self {
            self.state.lock().unwrap().relay_minimum = rate;
            self
        }

        pub fn with_incremental_fee(self, rate: FeeRate) -> Self {
            self.state.lock().unwrap().incremental = rate;
            self
        }

        pub fn set_height(&self, height: u64) {
            let mut state = self.state.lock().unwrap();
            state.tip = BlockRef {
                height,
                hash: BlockHash::from_bytes([(height % 251) as u8; 32]),
            };
        }

        pub fn add_to_relay_pool(&self, txid: TxId) {
            self.state.lock().unwrap().relay_pool.insert(txid);
        }

        pub fn remove_from_relay_pool(&self, txid: &TxId) {
            self.state.lock().unwrap().relay_pool.remove(txid);
        }

        pub fn mark_rbf_opt_in(&self, txid: TxId) {
            self.state.lock().unwrap().rbf_opt_ins.insert(txid);
        }

        pub fn mark_non_final(&self, txid: TxId) {
            self.state.lock().unwrap().non_final.insert(txid);
        }
    }

    #[async_trait]
    impl ChainView for MockChain {
        async fn tip(&self) -> WalletResult<BlockRef> {
            Ok(self.state.lock().unwrap().tip)
        }

        async fn find_block(&self, height: u64) -> WalletResult<Option<BlockRef>> {
            let state = self.state.lock().unwrap();
            if height > state.tip.height {
                return Ok(None);
            }
            Ok(Some(BlockRef {
                height,
                hash: BlockHash::from_bytes([(height % 251) as u8; 32]),
            }))
        }

        async fn common_ancestor(
            &self,
            a: BlockRef,
            b: BlockRef,
        ) -> WalletResult<Option<BlockRef>> {
            // Single linear mock chain: the lower block is the ancestor
            Ok(Some(if a.height <= b.height { a } else { b }))
        }

        async fn estimate_fee(
            &self,
            conf_target: u32,
            _conservative: bool,
        ) -> WalletResult<Option<FeeRate>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .estimates
                .get(&conf_target)
                .copied())
        }

        async fn relay_minimum_fee(&self) -> WalletResult<FeeRate> {
            Ok(self.state.lock().unwrap().relay_minimum)
        }

        async fn incremental_relay_fee(&self) -> WalletResult<FeeRate> {
            Ok(self.state.lock().unwrap().incremental)
        }

        fn estimate_max_blocks(&self) -> u32 {
            self.max_blocks
        }

        async fn is_final(&self, txid: &TxId) -> WalletResult<bool> {
            Ok(!self.state.lock().unwrap().non_final.contains(txid))
        }

        async fn is_rbf_opt_in(&self, txid: &TxId) -> WalletResult<bool> {
            Ok(self.state.lock().unwrap().rbf_opt_ins.contains(txid))
        }

        async fn in_relay_pool(&self, txid: &TxId) -> WalletResult<bool> {
            Ok(self.state.lock().unwrap().relay_pool.contains(txid))
        }
    }
}

pub use mock::MockChain;
