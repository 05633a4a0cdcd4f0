//! Coin selection
//!
//! Given a filtered candidate set and a target, picks outputs whose value
//! covers target plus the fee their own inclusion incurs. Explicit
//! coin-control inclusions always come first; automatic selection then
//! tries a bounded branch-and-bound search for a changeless solution and
//! falls back to a strategy-ordered accumulator whose stop condition
//! accounts for the fee with and without a change output.
//!
//! Selection is fully deterministic: candidates are ordered by a total
//! (value, outpoint) key and the search itself has no random component.

use crate::data_structures::{Amount, FeeRate, OwnedOutput};
use crate::errors::{WalletError, WalletResult};

/// Upper bound on branch-and-bound node visits per selection
const BNB_MAX_TRIES: usize = 100_000;

/// Order in which the fallback accumulator consumes candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
    /// Consolidate small outputs first
    #[default]
    SmallestFirst,
    /// Minimize input count
    LargestFirst,
}

/// Inputs to one selection run
#[derive(Debug, Clone)]
pub struct SelectionParams {
    /// Value the inputs must cover before fees
    pub target: Amount,
    pub fee_rate: FeeRate,
    /// vbytes of the transaction without any inputs or change
    pub base_vsize: usize,
    /// vbytes a change output would add
    pub change_vsize: usize,
    /// Inputs also pay the fee; false when the fee is deducted from the
    /// recipients' outputs instead
    pub fund_fee: bool,
    /// Excess tolerated in a changeless solution before a change output
    /// becomes worthwhile
    pub cost_of_change: Amount,
    pub max_inputs: usize,
    pub strategy: SelectionStrategy,
    /// Treat all outputs sharing a destination as one unit
    pub avoid_partial_spends: bool,
}

/// A successful selection
#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    pub selected: Vec<OwnedOutput>,
    pub total_value: Amount,
    pub fee_without_change: Amount,
    pub fee_with_change: Amount,
    pub requires_change: bool,
}

impl SelectionOutcome {
    /// The fee implied by the change decision
    pub fn fee(&self) -> Amount {
        if self.requires_change {
            self.fee_with_change
        } else {
            self.fee_without_change
        }
    }
}

/// A selectable unit: one output, or a same-destination group when
/// partial-spend avoidance is on
#[derive(Debug, Clone)]
struct Bundle {
    outputs: Vec<OwnedOutput>,
    value: Amount,
    input_vsize: usize,
}

impl Bundle {
    fn single(output: OwnedOutput) -> Self {
        let value = output.value;
        let input_vsize = output.input_vsize();
        Bundle {
            outputs: vec![output],
            value,
            input_vsize,
        }
    }

    fn count(&self) -> usize {
        self.outputs.len()
    }
}

/// Select coins covering `target` (+fee when funding it) from the explicit
/// inclusions plus the automatic pool
///
/// `explicit` outputs are taken unconditionally and first, regardless of
/// value-efficiency. The pool must already respect locks, exclusions and
/// depth limits; this function only decides which of the eligible
/// candidates to take.
pub fn select_coins(
    explicit: Vec<OwnedOutput>,
    pool: Vec<OwnedOutput>,
    params: &SelectionParams,
) -> WalletResult<SelectionOutcome> {
    let mut selected: Vec<OwnedOutput> = Vec::new();
    let mut total = Amount::ZERO;
    for output in explicit {
        if selected.iter().any(|s| s.outpoint == output.outpoint) {
            continue;
        }
        total = total.saturating_add(output.value);
        selected.push(output);
    }

    if selected.len() > params.max_inputs {
        return Err(WalletError::TooManyInputs(format!(
            "{} preselected inputs exceed the maximum of {}",
            selected.len(),
            params.max_inputs
        )));
    }

    if let Some(outcome) = try_finish(&selected, total, params) {
        return Ok(outcome);
    }

    // Drop anything already selected, then bundle what is left
    let pool: Vec<OwnedOutput> = pool
        .into_iter()
        .filter(|o| !selected.iter().any(|s| s.outpoint == o.outpoint))
        .collect();
    let bundles = make_bundles(pool, params.avoid_partial_spends);

    // A changeless solution avoids both the change output now and the cost
    // of spending it later; only worth searching when no inputs are pinned
    // and the inputs fund the fee.
    if selected.is_empty() && params.fund_fee {
        if let Some(outcome) = select_changeless(&bundles, params) {
            return Ok(outcome);
        }
    }

    accumulate(selected, total, bundles, params)
}

fn fee_for_inputs(params: &SelectionParams, input_vsize: usize, with_change: bool) -> Amount {
    if !params.fund_fee {
        return Amount::ZERO;
    }
    let change = if with_change { params.change_vsize } else { 0 };
    params
        .fee_rate
        .fee_for(params.base_vsize + input_vsize + change)
}

/// Check whether an input set already covers the target, and with which
/// change decision
fn try_finish(
    selected: &[OwnedOutput],
    total: Amount,
    params: &SelectionParams,
) -> Option<SelectionOutcome> {
    let input_vsize: usize = selected.iter().map(|o| o.input_vsize()).sum();
    let fee_without_change = fee_for_inputs(params, input_vsize, false);
    let fee_with_change = fee_for_inputs(params, input_vsize, true);
    let required = params.target.checked_add(fee_without_change)?;
    if total < required {
        return None;
    }
    let requires_change = total > params.target.saturating_add(fee_with_change);
    Some(SelectionOutcome {
        selected: selected.to_vec(),
        total_value: total,
        fee_without_change,
        fee_with_change,
        requires_change,
    })
}

fn make_bundles(pool: Vec<OwnedOutput>, group_by_destination: bool) -> Vec<Bundle> {
    if !group_by_destination {
        let mut bundles: Vec<Bundle> = pool.into_iter().map(Bundle::single).collect();
        bundles.sort_by(|a, b| {
            (a.value, a.outputs[0].outpoint).cmp(&(b.value, b.outputs[0].outpoint))
        });
        return bundles;
    }

    let mut bundles: Vec<Bundle> = Vec::new();
    for output in pool {
        match bundles
            .iter_mut()
            .find(|b| b.outputs[0].destination == output.destination)
        {
            Some(bundle) => {
                bundle.value = bundle.value.saturating_add(output.value);
                bundle.input_vsize += output.input_vsize();
                bundle.outputs.push(output);
            }
            None => bundles.push(Bundle::single(output)),
        }
    }
    bundles.sort_by(|a, b| {
        (a.value, a.outputs[0].outpoint).cmp(&(b.value, b.outputs[0].outpoint))
    });
    bundles
}

/// Bounded branch-and-bound search for a subset whose effective value
/// lands inside [target, target + cost_of_change]
///
/// Succeeding means no change output at all; the small excess is paid as
/// extra fee, which is cheaper than creating and later spending change.
fn select_changeless(bundles: &[Bundle], params: &SelectionParams) -> Option<SelectionOutcome> {
    let sel_target = params
        .target
        .checked_add(params.fee_rate.fee_for(params.base_vsize))?
        .as_sats();
    let upper = sel_target.checked_add(params.cost_of_change.as_sats())?;

    // Effective values, largest first; bundles not worth their own spend
    // cost cannot help a changeless match
    let mut candidates: Vec<(u64, usize)> = bundles
        .iter()
        .enumerate()
        .filter_map(|(idx, b)| {
            let spend_cost = params.fee_rate.fee_for(b.input_vsize);
            b.value
                .checked_sub(spend_cost)
                .filter(|eff| !eff.is_zero())
                .map(|eff| (eff.as_sats(), idx))
        })
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut suffix = vec![0u64; candidates.len() + 1];
    for i in (0..candidates.len()).rev() {
        suffix[i] = suffix[i + 1].saturating_add(candidates[i].0);
    }
    if suffix[0] < sel_target {
        return None;
    }

    let mut best: Option<(u64, Vec<usize>)> = None;
    let mut tries = BNB_MAX_TRIES;
    let mut current: Vec<usize> = Vec::new();
    search(
        &candidates,
        &suffix,
        sel_target,
        upper,
        params.max_inputs,
        0,
        0,
        &mut current,
        &mut best,
        &mut tries,
    );

    let (_, picked) = best?;
    let mut selected: Vec<OwnedOutput> = Vec::new();
    let mut total = Amount::ZERO;
    let mut input_count = 0usize;
    for idx in picked {
        let bundle = &bundles[candidates[idx].1];
        input_count += bundle.count();
        total = total.saturating_add(bundle.value);
        selected.extend(bundle.outputs.iter().cloned());
    }
    if input_count > params.max_inputs {
        return None;
    }
    // No change: everything above target goes to fee
    let fee = total.checked_sub(params.target)?;
    Some(SelectionOutcome {
        selected,
        total_value: total,
        fee_without_change: fee,
        fee_with_change: fee,
        requires_change: false,
    })
}

#[allow(clippy::too_many_arguments)]
fn search(
    candidates: &[(u64, usize)],
    suffix: &[u64],
    target: u64,
    upper: u64,
    max_inputs: usize,
    depth: usize,
    value: u64,
    current: &mut Vec<usize>,
    best: &mut Option<(u64, Vec<usize>)>,
    tries: &mut usize,
) {
    if *tries == 0 {
        return;
    }
    *tries -= 1;

    if value > upper {
        return;
    }
    if value >= target {
        let better = match best {
            Some((best_value, _)) => value < *best_value,
            None => true,
        };
        if better {
            *best = Some((value, current.clone()));
        }
        return;
    }
    if depth == candidates.len() || value.saturating_add(suffix[depth]) < target {
        return;
    }
    if current.len() >= max_inputs {
        return;
    }

    current.push(depth);
    search(
        candidates,
        suffix,
        target,
        upper,
        max_inputs,
        depth + 1,
        value + candidates[depth].0,
        current,
        best,
        tries,
    );
    current.pop();
    search(
        candidates,
        suffix,
        target,
        upper,
        max_inputs,
        depth + 1,
        value,
        current,
        best,
        tries,
    );
}

/// Accumulation fallback
///
/// Largest-first simply consumes bundles in descending order. The
/// smallest-first default mirrors the classic knapsack shape: combine
/// bundles too small to cover the target on their own, and weigh the
/// result against the cheapest single bundle that covers it alone,
/// keeping whichever overshoots less.
fn accumulate(
    selected: Vec<OwnedOutput>,
    total: Amount,
    bundles: Vec<Bundle>,
    params: &SelectionParams,
) -> WalletResult<SelectionOutcome> {
    if params.strategy == SelectionStrategy::LargestFirst {
        let mut ordered = bundles;
        ordered.reverse();
        return accumulate_ordered(selected, total, ordered, params);
    }

    let mut smaller = Vec::new();
    let mut lowest_larger: Option<SelectionOutcome> = None;
    for bundle in bundles {
        if lowest_larger.is_none() && selected.len() + bundle.count() <= params.max_inputs {
            let mut with_bundle = selected.clone();
            with_bundle.extend(bundle.outputs.iter().cloned());
            let candidate_total = total.saturating_add(bundle.value);
            if let Some(outcome) = try_finish(&with_bundle, candidate_total, params) {
                lowest_larger = Some(outcome);
                continue;
            }
        }
        smaller.push(bundle);
    }

    match accumulate_ordered(selected, total, smaller, params) {
        Ok(combined) => match lowest_larger {
            Some(single) if single.total_value < combined.total_value => Ok(single),
            _ => Ok(combined),
        },
        Err(err) => lowest_larger.ok_or(err),
    }
}

fn accumulate_ordered(
    mut selected: Vec<OwnedOutput>,
    mut total: Amount,
    bundles: Vec<Bundle>,
    params: &SelectionParams,
) -> WalletResult<SelectionOutcome> {
    let mut remaining = bundles.len();
    for bundle in bundles {
        remaining -= 1;
        if selected.len() + bundle.count() > params.max_inputs {
            if remaining == 0 {
                break;
            }
            continue;
        }
        total = total.saturating_add(bundle.value);
        selected.extend(bundle.outputs.into_iter());

        if let Some(outcome) = try_finish(&selected, total, params) {
            return Ok(outcome);
        }
    }

    // Did the input-count cap rather than the pool run out?
    if selected.len() >= params.max_inputs {
        return Err(WalletError::TooManyInputs(format!(
            "Target not reached within the {} input maximum",
            params.max_inputs
        )));
    }

    let input_vsize: usize = selected.iter().map(|o| o.input_vsize()).sum();
    let required = params
        .target
        .saturating_add(fee_for_inputs(params, input_vsize, true));
    Err(WalletError::InsufficientFunds(format!(
        "Not enough funds. Available: {total}, required: {required}"
    )))
}
