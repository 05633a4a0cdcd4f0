//! Transaction construction
//!
//! Drives the coin selector and fee math to a fixed point: estimate the
//! size, price it, select inputs, re-price from the real input set, and
//! loop (bounded) until the announced fee covers the final size. Decides
//! whether a change output is worth emitting and at which position, and
//! can pay the fee out of designated recipients' amounts instead of the
//! inputs.
//!
//! The announced fee always equals inputs minus outputs exactly, and no
//! emitted output is ever below the dust threshold.

use std::collections::HashSet;

use rand::Rng;

use crate::data_structures::{
    Amount, ChangePosition, CoinControl, Destination, FeeRate, OwnedOutput, Recipient, TxDraft,
    TxId, TxInput, TxOut, SEQUENCE_FINAL_NO_RBF, SEQUENCE_RBF, TX_BASE_VSIZE,
};
use crate::errors::{WalletError, WalletResult};
use crate::fees::dust_threshold;
use crate::selection::{select_coins, SelectionParams, SelectionStrategy};

/// Bound on the fee/selection convergence loop
const MAX_BUILD_ITERATIONS: usize = 10;

/// Resolved inputs to one build, after fee policy and wallet defaults
/// have been applied
#[derive(Debug, Clone)]
pub struct BuildParams {
    pub fee_rate: FeeRate,
    pub change_destination: Destination,
    pub max_inputs: usize,
    pub strategy: SelectionStrategy,
    pub signal_rbf: bool,
}

/// A successfully constructed transaction, not yet signed or recorded
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub draft: TxDraft,
    pub fee: Amount,
    pub change_position: Option<usize>,
    /// The outputs consumed, for spent-marking and lock release
    pub selected: Vec<OwnedOutput>,
}

/// Construct a transaction paying `recipients` from the explicit
/// inclusions plus the automatic pool
///
/// `rng` is the wallet-wide randomness source; it decides the change
/// position (when not pinned) and the draft identifier, and nothing else.
pub fn build_transaction<R: Rng>(
    recipients: &[Recipient],
    explicit: Vec<OwnedOutput>,
    pool: Vec<OwnedOutput>,
    control: &CoinControl,
    params: &BuildParams,
    rng: &mut R,
) -> WalletResult<BuiltTransaction> {
    validate_recipients(recipients, control)?;

    let target: Amount = recipients.iter().map(|r| r.amount).sum();
    let base_vsize: usize = TX_BASE_VSIZE
        + recipients
            .iter()
            .map(|r| r.destination.output_vsize())
            .sum::<usize>();
    let change_vsize = params.change_destination.output_vsize();
    let change_dust = dust_threshold(&params.change_destination);
    let cost_of_change = change_dust.saturating_add(params.fee_rate.fee_for(change_vsize));

    let subtract_count = recipients.iter().filter(|r| r.subtract_fee).count();
    let fund_fee = subtract_count == 0;

    let mut extra_target = Amount::ZERO;
    for _ in 0..MAX_BUILD_ITERATIONS {
        let selection_params = SelectionParams {
            target: target.saturating_add(extra_target),
            fee_rate: params.fee_rate,
            base_vsize,
            change_vsize,
            fund_fee,
            cost_of_change,
            max_inputs: params.max_inputs,
            strategy: params.strategy,
            avoid_partial_spends: control.avoid_partial_spends,
        };
        let outcome = select_coins(explicit.clone(), pool.clone(), &selection_params)?;

        let built = assemble(
            recipients,
            outcome.selected,
            outcome.total_value,
            target,
            fund_fee,
            subtract_count,
            change_dust,
            control,
            params,
            rng,
        )?;

        // Re-price against the real draft; grow the target if the fee
        // fell short of the final size
        let required = params.fee_rate.fee_for(built.draft.vsize());
        if built.fee >= required {
            if !built.draft.conserves_value() {
                return Err(WalletError::InternalError(
                    "Built transaction does not conserve value".to_string(),
                ));
            }
            return Ok(built);
        }
        extra_target = extra_target.saturating_add(required - built.fee);
    }

    Err(WalletError::InternalError(
        "Fee estimation did not converge".to_string(),
    ))
}

fn validate_recipients(recipients: &[Recipient], control: &CoinControl) -> WalletResult<()> {
    if recipients.is_empty() {
        return Err(WalletError::InvalidParameter(
            "Transaction must have at least one recipient".to_string(),
        ));
    }
    let mut seen: HashSet<&Destination> = HashSet::new();
    for recipient in recipients {
        if recipient.amount.is_zero() {
            return Err(WalletError::InvalidParameter(
                "Invalid amount, must be positive".to_string(),
            ));
        }
        if !seen.insert(&recipient.destination) {
            return Err(WalletError::InvalidParameter(
                "Duplicated recipient destination".to_string(),
            ));
        }
        if !recipient.subtract_fee && recipient.amount < dust_threshold(&recipient.destination) {
            return Err(WalletError::DustOutput(format!(
                "Recipient amount {} is below the dust threshold",
                recipient.amount
            )));
        }
    }
    if let ChangePosition::At(position) = control.change_position {
        if position > recipients.len() {
            return Err(WalletError::InvalidParameter(format!(
                "Change position {position} out of range"
            )));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn assemble<R: Rng>(
    recipients: &[Recipient],
    selected: Vec<OwnedOutput>,
    total: Amount,
    target: Amount,
    fund_fee: bool,
    subtract_count: usize,
    change_dust: Amount,
    control: &CoinControl,
    params: &BuildParams,
    rng: &mut R,
) -> WalletResult<BuiltTransaction> {
    let input_vsize: usize = selected.iter().map(|o| o.input_vsize()).sum();
    let base_vsize: usize = TX_BASE_VSIZE
        + recipients
            .iter()
            .map(|r| r.destination.output_vsize())
            .sum::<usize>();
    let change_vsize = params.change_destination.output_vsize();
    let fee_without_change = params.fee_rate.fee_for(base_vsize + input_vsize);
    let fee_with_change = params
        .fee_rate
        .fee_for(base_vsize + input_vsize + change_vsize);

    let mut outputs: Vec<TxOut> = recipients
        .iter()
        .map(|r| TxOut {
            value: r.amount,
            destination: r.destination.clone(),
        })
        .collect();

    let (fee, change_value) = if fund_fee {
        let leftover = total
            .checked_sub(target.saturating_add(fee_with_change))
            .unwrap_or(Amount::ZERO);
        if leftover >= change_dust {
            (fee_with_change, Some(leftover))
        } else {
            // Below-dust leftovers are cheaper to give to the miner than
            // to carry as an unspendable output
            let fee = total.checked_sub(target).ok_or_else(|| {
                WalletError::InternalError("Selection returned less than target".to_string())
            })?;
            (fee, None)
        }
    } else {
        // Fee comes out of the marked recipients; inputs only cover value
        let leftover = total.checked_sub(target).ok_or_else(|| {
            WalletError::InternalError("Selection returned less than target".to_string())
        })?;
        let (rate_fee, change_value) = if leftover >= change_dust {
            (fee_with_change, Some(leftover))
        } else {
            (fee_without_change.saturating_add(leftover), None)
        };
        let deducted = if leftover >= change_dust {
            fee_with_change
        } else {
            fee_without_change
        };
        subtract_fee_from(&mut outputs, recipients, deducted, subtract_count)?;
        (rate_fee, change_value)
    };

    let change_position = match change_value {
        Some(value) => {
            let position = match control.change_position {
                ChangePosition::At(position) => position,
                ChangePosition::Random => rng.gen_range(0..=outputs.len()),
            };
            outputs.insert(
                position,
                TxOut {
                    value,
                    destination: params.change_destination.clone(),
                },
            );
            Some(position)
        }
        None => None,
    };

    let sequence = if params.signal_rbf {
        SEQUENCE_RBF
    } else {
        SEQUENCE_FINAL_NO_RBF
    };
    let inputs: Vec<TxInput> = selected
        .iter()
        .map(|o| TxInput {
            outpoint: o.outpoint,
            value: o.value,
            sequence,
            vsize: o.input_vsize(),
        })
        .collect();

    let draft = TxDraft {
        txid: TxId::random(rng),
        inputs,
        outputs,
        fee,
        change_position,
    };

    Ok(BuiltTransaction {
        draft,
        fee,
        change_position,
        selected,
    })
}

/// Deduct `fee` from the recipients that opted to pay it, splitting
/// evenly with the first marked recipient absorbing the remainder
fn subtract_fee_from(
    outputs: &mut [TxOut],
    recipients: &[Recipient],
    fee: Amount,
    subtract_count: usize,
) -> WalletResult<()> {
    let share = Amount::from_sats(fee.as_sats() / subtract_count as u64);
    let remainder = Amount::from_sats(fee.as_sats() % subtract_count as u64);
    let mut first = true;

    for (output, recipient) in outputs.iter_mut().zip(recipients) {
        if !recipient.subtract_fee {
            continue;
        }
        let mut deduction = share;
        if first {
            deduction = deduction.saturating_add(remainder);
            first = false;
        }
        let reduced = output.value.checked_sub(deduction).ok_or_else(|| {
            WalletError::DustOutput(format!(
                "The transaction amount {} is too small to pay the fee",
                output.value
            ))
        })?;
        if reduced < dust_threshold(&output.destination) {
            return Err(WalletError::DustOutput(format!(
                "Recipient amount after fee deduction {reduced} is below the dust threshold"
            )));
        }
        output.value = reduced;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{OutPoint, OutputOrigin, SpendClass};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn coin(n: u8, value: u64) -> OwnedOutput {
        OwnedOutput {
            outpoint: OutPoint::new(TxId::from_bytes([n; 32]), 0),
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

    fn recipient(n: u8, value: u64) -> Recipient {
        Recipient::new(Destination::Legacy([100 + n; 20]), Amount::from_sats(value))
    }

    fn params() -> BuildParams {
        BuildParams {
            fee_rate: FeeRate::from_sat_per_vb(1),
            change_destination: Destination::Legacy([200; 20]),
            max_inputs: 100,
            strategy: SelectionStrategy::SmallestFirst,
            signal_rbf: true,
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_simple_send_conserves_value() {
        let built = build_transaction(
            &[recipient(1, 400_000_000)],
            vec![],
            vec![coin(1, 500_000_000), coin(2, 300_000_000)],
            &CoinControl::new(),
            &params(),
            &mut rng(),
        )
        .unwrap();

        assert!(built.draft.conserves_value());
        // One input covers the payment; the other stays unspent
        assert_eq!(built.selected.len(), 1);
        assert_eq!(built.selected[0].value, Amount::from_sats(500_000_000));
        assert!(built.change_position.is_some());
        let change = &built.draft.outputs[built.change_position.unwrap()];
        assert_eq!(
            change.value,
            Amount::from_sats(500_000_000) - Amount::from_sats(400_000_000) - built.fee
        );
    }

    #[test]
    fn test_exact_consumption_emits_no_change() {
        // 400_000_226 covers target 400_000_000 plus fee(10+34+34+148=226)
        let built = build_transaction(
            &[recipient(1, 400_000_000)],
            vec![],
            vec![coin(1, 400_000_226)],
            &CoinControl::new(),
            &params(),
            &mut rng(),
        )
        .unwrap();
        assert!(built.change_position.is_none());
        assert_eq!(built.fee, Amount::from_sats(226));
        assert!(built.draft.conserves_value());
    }

    #[test]
    fn test_sub_dust_leftover_folds_into_fee() {
        // Leftover after fees is below dust: folded, not emitted
        let built = build_transaction(
            &[recipient(1, 400_000_000)],
            vec![],
            vec![coin(1, 400_000_500)],
            &CoinControl::new(),
            &params(),
            &mut rng(),
        )
        .unwrap();
        assert!(built.change_position.is_none());
        assert_eq!(built.fee, Amount::from_sats(500));
        assert!(built.draft.conserves_value());
    }

    #[test]
    fn test_change_position_pinned() {
        let control = CoinControl::new().with_change_position(0);
        let built = build_transaction(
            &[recipient(1, 100_000)],
            vec![],
            vec![coin(1, 10_000_000)],
            &control,
            &params(),
            &mut rng(),
        )
        .unwrap();
        assert_eq!(built.change_position, Some(0));
        assert_eq!(
            built.draft.outputs[0].destination,
            Destination::Legacy([200; 20])
        );
    }

    #[test]
    fn test_change_position_random_is_pinnable() {
        let mut a_rng = rng();
        let built_a = build_transaction(
            &[recipient(1, 100_000), recipient(2, 200_000)],
            vec![],
            vec![coin(1, 10_000_000)],
            &CoinControl::new(),
            &params(),
            &mut a_rng,
        )
        .unwrap();
        let mut b_rng = rng();
        let built_b = build_transaction(
            &[recipient(1, 100_000), recipient(2, 200_000)],
            vec![],
            vec![coin(1, 10_000_000)],
            &CoinControl::new(),
            &params(),
            &mut b_rng,
        )
        .unwrap();
        assert_eq!(built_a.change_position, built_b.change_position);
    }

    #[test]
    fn test_subtract_fee_from_recipient() {
        let recipients = vec![recipient(1, 100_000).subtracting_fee()];
        let built = build_transaction(
            &recipients,
            vec![],
            vec![coin(1, 100_000)],
            &CoinControl::new(),
            &params(),
            &mut rng(),
        )
        .unwrap();
        assert!(built.draft.conserves_value());
        assert!(built.change_position.is_none());
        // Recipient got the full input value minus the fee
        assert_eq!(
            built.draft.outputs[0].value,
            Amount::from_sats(100_000) - built.fee
        );
    }

    #[test]
    fn test_duplicate_recipient_rejected() {
        let err = build_transaction(
            &[recipient(1, 100_000), recipient(1, 50_000)],
            vec![],
            vec![coin(1, 10_000_000)],
            &CoinControl::new(),
            &params(),
            &mut rng(),
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::InvalidParameter(_)));
    }

    #[test]
    fn test_dust_recipient_rejected() {
        let err = build_transaction(
            &[recipient(1, 100)],
            vec![],
            vec![coin(1, 10_000_000)],
            &CoinControl::new(),
            &params(),
            &mut rng(),
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::DustOutput(_)));
    }

    #[test]
    fn test_insufficient_funds_propagates() {
        let err = build_transaction(
            &[recipient(1, 500_000_000)],
            vec![],
            vec![coin(1, 100_000_000), coin(2, 100_000_000)],
            &CoinControl::new(),
            &params(),
            &mut rng(),
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds(_)));
    }

    #[test]
    fn test_announced_fee_covers_vsize() {
        let built = build_transaction(
            &[recipient(1, 250_000)],
            vec![],
            vec![coin(1, 120_000), coin(2, 90_000), coin(3, 80_000)],
            &CoinControl::new(),
            &params(),
            &mut rng(),
        )
        .unwrap();
        let required = params().fee_rate.fee_for(built.draft.vsize());
        assert!(built.fee >= required);
        assert!(built.draft.conserves_value());
    }
}
