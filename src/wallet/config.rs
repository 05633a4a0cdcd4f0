use zeroize::Zeroizing;

use crate::data_structures::Destination;
use crate::fees::FeePolicy;
use crate::selection::SelectionStrategy;
use crate::universe::UniverseParams;

/// Upper bound on an unlock timeout, in seconds
pub const MAX_UNLOCK_SECONDS: u64 = 100_000_000;

/// Default cap on inputs per transaction
pub const DEFAULT_MAX_INPUTS: usize = 400;

/// Static configuration for one wallet instance
///
/// Built once at load time with the `with_*` methods; runtime-mutable
/// pieces (the pinned fee rate, the lock set) live in the wallet itself.
#[derive(Clone)]
pub struct WalletConfig {
    pub name: String,
    /// Exclude previously-spent-from destinations from selection and
    /// report their balance separately
    pub avoid_reuse: bool,
    pub avoid_partial_spends: bool,
    /// Signal replace-by-fee on new transactions by default
    pub signal_rbf: bool,
    pub max_inputs: usize,
    pub selection_strategy: SelectionStrategy,
    pub universe: UniverseParams,
    pub fee_policy: FeePolicy,
    /// Destination change outputs pay to; address derivation is external,
    /// so the engine receives it ready-made
    pub change_destination: Option<Destination>,
    /// Encryption passphrase; `None` leaves the wallet unencrypted
    pub passphrase: Option<Zeroizing<String>>,
    /// Pin the wallet randomness source, for reproducible tests
    pub rng_seed: Option<u64>,
}

impl WalletConfig {
    pub fn new(name: impl Into<String>) -> Self {
        WalletConfig {
            name: name.into(),
            avoid_reuse: false,
            avoid_partial_spends: false,
            signal_rbf: false,
            max_inputs: DEFAULT_MAX_INPUTS,
            selection_strategy: SelectionStrategy::default(),
            universe: UniverseParams::default(),
            fee_policy: FeePolicy::default(),
            change_destination: None,
            passphrase: None,
            rng_seed: None,
        }
    }

    pub fn with_avoid_reuse(mut self) -> Self {
        self.avoid_reuse = true;
        self
    }

    pub fn with_avoid_partial_spends(mut self) -> Self {
        self.avoid_partial_spends = true;
        self
    }

    pub fn with_rbf_default(mut self, signal: bool) -> Self {
        self.signal_rbf = signal;
        self
    }

    pub fn with_max_inputs(mut self, max: usize) -> Self {
        self.max_inputs = max;
        self
    }

    pub fn with_selection_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.selection_strategy = strategy;
        self
    }

    pub fn with_universe_params(mut self, params: UniverseParams) -> Self {
        self.universe = params;
        self
    }

    pub fn with_fee_policy(mut self, policy: FeePolicy) -> Self {
        self.fee_policy = policy;
        self
    }

    pub fn with_change_destination(mut self, destination: Destination) -> Self {
        self.change_destination = Some(destination);
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(Zeroizing::new(passphrase.into()));
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}

impl std::fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletConfig")
            .field("name", &self.name)
            .field("avoid_reuse", &self.avoid_reuse)
            .field("avoid_partial_spends", &self.avoid_partial_spends)
            .field("signal_rbf", &self.signal_rbf)
            .field("max_inputs", &self.max_inputs)
            .field("encrypted", &self.passphrase.is_some())
            .finish()
    }
}
