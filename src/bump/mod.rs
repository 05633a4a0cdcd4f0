//! Replace-by-fee bumping
//!
//! Builds a replacement for an unconfirmed, RBF-signaling transaction at
//! a strictly higher fee. Every original input is carried over; the
//! additional fee is absorbed by shrinking (or dropping) the change
//! output, and new inputs are drawn from the candidate pool only when the
//! change cannot cover it.

use rand::Rng;

use crate::data_structures::{
    Amount, Destination, FeeEstimateMode, FeeRate, OwnedOutput, TxDraft, TxId, TxInput, TxOut,
    SEQUENCE_FINAL_NO_RBF, SEQUENCE_RBF, TX_BASE_VSIZE,
};
use crate::errors::{WalletError, WalletResult};
use crate::fees::dust_threshold;

/// Caller options for one bump request
#[derive(Debug, Clone)]
pub struct BumpOptions {
    pub fee_rate: Option<FeeRate>,
    pub confirm_target: Option<u32>,
    pub fee_mode: FeeEstimateMode,
    /// Whether the replacement itself signals replaceability again
    pub replaceable: bool,
}

impl Default for BumpOptions {
    fn default() -> Self {
        BumpOptions {
            fee_rate: None,
            confirm_target: None,
            fee_mode: FeeEstimateMode::Unset,
            replaceable: true,
        }
    }
}

/// A planned replacement transaction
#[derive(Debug, Clone)]
pub struct FeeBump {
    pub draft: TxDraft,
    pub old_fee: Amount,
    pub new_fee: Amount,
    /// False when the wallet holds no spend keys and the draft is handed
    /// back for external signing
    pub signed: bool,
}

/// Everything the planner needs, resolved by the wallet beforehand
#[derive(Debug, Clone)]
pub struct BumpContext {
    /// The original inputs with their values and spend sizes
    pub original_inputs: Vec<(crate::data_structures::OutPoint, Amount, usize)>,
    /// The original outputs, in order
    pub original_outputs: Vec<TxOut>,
    /// Index into `original_outputs` of the output that is ours to shrink
    pub change_index: Option<usize>,
    /// Destination for a fresh change output if the original had none
    pub change_destination: Destination,
    /// Extra candidates, smallest first, for when change cannot absorb
    /// the new fee
    pub pool: Vec<OwnedOutput>,
    pub new_rate: FeeRate,
    pub incremental_rate: FeeRate,
    pub replaceable: bool,
}

/// Plan the replacement
///
/// Returns the draft together with the old and new fee. The new fee
/// always exceeds the old by at least the incremental relay fee for the
/// replacement's size.
pub fn plan_bump<R: Rng>(ctx: &BumpContext, rng: &mut R) -> WalletResult<FeeBump> {
    let in_total: Amount = ctx.original_inputs.iter().map(|(_, v, _)| *v).sum();
    let out_total: Amount = ctx.original_outputs.iter().map(|o| o.value).sum();
    let old_fee = in_total.checked_sub(out_total).ok_or_else(|| {
        WalletError::InternalError("Original transaction pays out more than it takes in".into())
    })?;

    let original_input_vsize: usize = ctx.original_inputs.iter().map(|(_, _, s)| *s).sum();
    let kept_outputs: Vec<TxOut> = ctx
        .original_outputs
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != ctx.change_index)
        .map(|(_, o)| o.clone())
        .collect();
    let kept_out_value: Amount = kept_outputs.iter().map(|o| o.value).sum();
    let change_destination = ctx
        .change_index
        .map(|i| ctx.original_outputs[i].destination.clone())
        .unwrap_or_else(|| ctx.change_destination.clone());
    let change_dust = dust_threshold(&change_destination);

    // Rate floor: the original's rate plus the incremental relay rate
    let original_vsize = TX_BASE_VSIZE
        + original_input_vsize
        + ctx
            .original_outputs
            .iter()
            .map(|o| o.destination.output_vsize())
            .sum::<usize>();
    let old_rate =
        FeeRate::from_sat_per_kvb(old_fee.as_sats().saturating_mul(1000) / original_vsize as u64);
    let minimum_rate = FeeRate::from_sat_per_kvb(
        old_rate
            .sat_per_kvb()
            .saturating_add(ctx.incremental_rate.sat_per_kvb()),
    );
    if ctx.new_rate < minimum_rate {
        return Err(WalletError::InvalidParameter(format!(
            "Insufficient fee rate: {} must be at least {minimum_rate}",
            ctx.new_rate
        )));
    }

    let sequence = if ctx.replaceable {
        SEQUENCE_RBF
    } else {
        SEQUENCE_FINAL_NO_RBF
    };
    let mut inputs: Vec<TxInput> = ctx
        .original_inputs
        .iter()
        .map(|(outpoint, value, vsize)| TxInput {
            outpoint: *outpoint,
            value: *value,
            sequence,
            vsize: *vsize,
        })
        .collect();

    let base_out_vsize: usize = kept_outputs
        .iter()
        .map(|o| o.destination.output_vsize())
        .sum();
    let change_vsize = change_destination.output_vsize();

    let mut pool = ctx.pool.clone();
    pool.sort_by(|a, b| (a.value, a.outpoint).cmp(&(b.value, b.outpoint)));
    let mut pool_iter = pool.into_iter();

    loop {
        let funded: Amount = inputs.iter().map(|i| i.value).sum();
        // Value left over for fee and change once the kept payments are met
        let Some(pot) = funded.checked_sub(kept_out_value) else {
            return Err(WalletError::InternalError(
                "Replacement inputs no longer cover the original payments".into(),
            ));
        };
        let input_vsize: usize = inputs.iter().map(|i| i.vsize).sum();
        let vsize_with_change = TX_BASE_VSIZE + input_vsize + base_out_vsize + change_vsize;
        let vsize_without_change = TX_BASE_VSIZE + input_vsize + base_out_vsize;

        let target_with_change = ctx
            .new_rate
            .fee_for(vsize_with_change)
            .max(old_fee.saturating_add(ctx.incremental_rate.fee_for(vsize_with_change)));
        let target_without_change = ctx
            .new_rate
            .fee_for(vsize_without_change)
            .max(old_fee.saturating_add(ctx.incremental_rate.fee_for(vsize_without_change)));

        if let Some(leftover) = pot.checked_sub(target_with_change) {
            if leftover >= change_dust {
                let mut outputs = kept_outputs.clone();
                let change_position = ctx.change_index.unwrap_or(outputs.len()).min(outputs.len());
                outputs.insert(
                    change_position,
                    TxOut {
                        value: leftover,
                        destination: change_destination.clone(),
                    },
                );
                let draft = TxDraft {
                    txid: TxId::random(rng),
                    inputs,
                    outputs,
                    fee: target_with_change,
                    change_position: Some(change_position),
                };
                return Ok(FeeBump {
                    draft,
                    old_fee,
                    new_fee: target_with_change,
                    signed: false,
                });
            }
        }
        if pot >= target_without_change {
            // Change would be dust: drop it and give the rest to the miner
            let draft = TxDraft {
                txid: TxId::random(rng),
                inputs,
                outputs: kept_outputs.clone(),
                fee: pot,
                change_position: None,
            };
            return Ok(FeeBump {
                draft,
                old_fee,
                new_fee: pot,
                signed: false,
            });
        }

        // Change cannot absorb the new fee: pull in another input
        match pool_iter.next() {
            Some(candidate) => inputs.push(TxInput {
                outpoint: candidate.outpoint,
                value: candidate.value,
                sequence,
                vsize: candidate.input_vsize(),
            }),
            None => {
                return Err(WalletError::InsufficientFunds(
                    "Unable to pay the increased fee from change or additional inputs"
                        .to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{OutPoint, OutputOrigin, SpendClass};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn outpoint(n: u8) -> OutPoint {
        OutPoint::new(TxId::from_bytes([n; 32]), 0)
    }

    fn coin(n: u8, value: u64) -> OwnedOutput {
        OwnedOutput {
            outpoint: outpoint(n),
            value: Amount::from_sats(value),
            destination: Destination::Legacy([n; 20]),
            origin: OutputOrigin::Payment,
            depth: 6,
            spend_class: SpendClass::Spendable,
            locked: false,
            reused: false,
            spent: false,
            from_self: true,
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    /// 1 input (100_000), payment 80_000, change 19_700 => old fee 300
    fn context(new_rate: FeeRate) -> BumpContext {
        BumpContext {
            original_inputs: vec![(outpoint(1), Amount::from_sats(100_000), 148)],
            original_outputs: vec![
                TxOut {
                    value: Amount::from_sats(80_000),
                    destination: Destination::Legacy([50; 20]),
                },
                TxOut {
                    value: Amount::from_sats(19_700),
                    destination: Destination::Legacy([51; 20]),
                },
            ],
            change_index: Some(1),
            change_destination: Destination::Legacy([51; 20]),
            pool: vec![],
            new_rate,
            incremental_rate: FeeRate::from_sat_per_kvb(1000),
            replaceable: true,
        }
    }

    #[test]
    fn test_bump_shrinks_change() {
        let bump = plan_bump(&context(FeeRate::from_sat_per_vb(5)), &mut rng()).unwrap();
        assert!(bump.new_fee > bump.old_fee);
        assert!(bump.draft.conserves_value());
        // All original inputs carried over
        assert_eq!(bump.draft.inputs.len(), 1);
        assert_eq!(bump.draft.inputs[0].outpoint, outpoint(1));
        // Payment output untouched, change shrank
        let payment = bump
            .draft
            .outputs
            .iter()
            .find(|o| o.destination == Destination::Legacy([50; 20]))
            .unwrap();
        assert_eq!(payment.value, Amount::from_sats(80_000));
        let change = &bump.draft.outputs[bump.draft.change_position.unwrap()];
        assert!(change.value < Amount::from_sats(19_700));
    }

    #[test]
    fn test_bump_rejects_rate_below_floor() {
        // Old rate is ~1330 sat/kvB over 226 vbytes; +1000 incremental
        let err = plan_bump(&context(FeeRate::from_sat_per_kvb(1500)), &mut rng()).unwrap_err();
        assert!(matches!(err, WalletError::InvalidParameter(_)));
    }

    #[test]
    fn test_bump_monotonic_by_increment() {
        let ctx = context(FeeRate::from_sat_per_vb(5));
        let bump = plan_bump(&ctx, &mut rng()).unwrap();
        let vsize = bump.draft.vsize();
        assert!(
            bump.new_fee >= bump.old_fee.saturating_add(ctx.incremental_rate.fee_for(vsize))
        );
    }

    #[test]
    fn test_bump_adds_inputs_when_change_too_small() {
        let mut ctx = context(FeeRate::from_sat_per_vb(200));
        // At 200 sat/vB the fee target (~75k) dwarfs the 19_700 change
        ctx.pool = vec![coin(9, 200_000)];
        let bump = plan_bump(&ctx, &mut rng()).unwrap();
        assert_eq!(bump.draft.inputs.len(), 2);
        assert!(bump
            .draft
            .inputs
            .iter()
            .any(|i| i.outpoint == outpoint(1)));
        assert!(bump.draft.conserves_value());
        assert!(bump.new_fee > bump.old_fee);
    }

    #[test]
    fn test_bump_fails_without_funding() {
        let ctx = context(FeeRate::from_sat_per_vb(200));
        let err = plan_bump(&ctx, &mut rng()).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds(_)));
    }

    #[test]
    fn test_dust_change_dropped_into_fee() {
        let mut ctx = context(FeeRate::from_sat_per_vb(5));
        // Shrink the change so the bumped fee leaves less than dust
        ctx.original_outputs[1].value = Amount::from_sats(1_300);
        // old fee = 100_000 - 81_300 = 18_700 over 226 vb (~82 sat/vb):
        // pick a rate just above the floor
        ctx.new_rate = FeeRate::from_sat_per_vb(90);
        let bump = plan_bump(&ctx, &mut rng()).unwrap();
        assert!(bump.draft.change_position.is_none());
        assert_eq!(bump.draft.outputs.len(), 1);
        assert!(bump.draft.conserves_value());
    }
}
