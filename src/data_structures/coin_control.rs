use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::destination::Destination;
use super::fee_rate::{FeeEstimateMode, FeeRate};
use super::hashes::OutPoint;

/// Where the change output lands in the final output list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChangePosition {
    /// Uniformly random position drawn from the wallet's randomness source
    #[default]
    Random,
    /// Fixed index into the output list
    At(usize),
}

/// Per-call overrides for one selection/build invocation
///
/// Constructed once per request from validated parameters and discarded
/// afterwards; never shared across builds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoinControl {
    /// Outpoints that must be spent, in the order given
    pub include_outpoints: Vec<OutPoint>,
    /// Outpoints that must never be selected
    pub exclude_outpoints: HashSet<OutPoint>,
    /// Permit automatic selection on top of the explicit inclusions
    pub allow_other_inputs: bool,
    /// Minimum confirmation depth for automatic candidates
    pub min_depth: i64,
    /// Maximum confirmation depth for automatic candidates
    pub max_depth: Option<i64>,
    /// Explicit fee rate override
    pub fee_rate: Option<FeeRate>,
    pub fee_mode: FeeEstimateMode,
    pub confirm_target: Option<u32>,
    pub change_destination: Option<Destination>,
    pub change_position: ChangePosition,
    /// Exclude outputs at previously-spent-from destinations
    pub avoid_reuse: bool,
    /// Select all outputs sharing a destination together
    pub avoid_partial_spends: bool,
    pub include_watch_only: bool,
    /// Replace-by-fee signaling; `None` defers to the wallet default
    pub signal_rbf: Option<bool>,
    pub max_inputs: Option<usize>,
}

impl CoinControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inputs(mut self, outpoints: Vec<OutPoint>) -> Self {
        self.include_outpoints = outpoints;
        self
    }

    pub fn with_excluded(mut self, outpoints: impl IntoIterator<Item = OutPoint>) -> Self {
        self.exclude_outpoints.extend(outpoints);
        self
    }

    pub fn allowing_other_inputs(mut self) -> Self {
        self.allow_other_inputs = true;
        self
    }

    pub fn with_min_depth(mut self, depth: i64) -> Self {
        self.min_depth = depth;
        self
    }

    pub fn with_max_depth(mut self, depth: i64) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_fee_rate(mut self, rate: FeeRate) -> Self {
        self.fee_rate = Some(rate);
        self
    }

    pub fn with_fee_mode(mut self, mode: FeeEstimateMode) -> Self {
        self.fee_mode = mode;
        self
    }

    pub fn with_confirm_target(mut self, target: u32) -> Self {
        self.confirm_target = Some(target);
        self
    }

    pub fn with_change_destination(mut self, destination: Destination) -> Self {
        self.change_destination = Some(destination);
        self
    }

    pub fn with_change_position(mut self, position: usize) -> Self {
        self.change_position = ChangePosition::At(position);
        self
    }

    pub fn avoiding_reuse(mut self) -> Self {
        self.avoid_reuse = true;
        self
    }

    pub fn avoiding_partial_spends(mut self) -> Self {
        self.avoid_partial_spends = true;
        self
    }

    pub fn with_watch_only(mut self) -> Self {
        self.include_watch_only = true;
        self
    }

    pub fn with_rbf(mut self, signal: bool) -> Self {
        self.signal_rbf = Some(signal);
        self
    }

    pub fn with_max_inputs(mut self, max: usize) -> Self {
        self.max_inputs = Some(max);
        self
    }

    /// Whether the caller pinned any inputs explicitly
    pub fn has_selected_inputs(&self) -> bool {
        !self.include_outpoints.is_empty()
    }

    pub fn is_excluded(&self, outpoint: &OutPoint) -> bool {
        self.exclude_outpoints.contains(outpoint)
    }
}
