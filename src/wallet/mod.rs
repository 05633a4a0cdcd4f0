//! Wallet orchestration
//!
//! One [`Wallet`] owns a transaction ledger, the derived output universe
//! and the locked-coin set, all guarded by a single per-wallet mutex:
//! every operation below runs serialized against the others, so a second
//! build always observes the coins the first one consumed. Collaborators
//! (chain view, signing provider, storage) are injected as trait objects.

pub mod config;
pub mod rescan;

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Mutex;

use crate::balance::{compute_balances, Balances};
use crate::builder::{build_transaction, BuildParams, BuiltTransaction};
use crate::bump::{plan_bump, BumpContext, BumpOptions, FeeBump};
use crate::chain::ChainView;
use crate::data_structures::{
    Amount, CoinControl, Destination, FeeRate, OutPoint, OwnedOutput, Recipient, TxDraft, TxId,
    TxOut,
};
use crate::errors::{WalletError, WalletResult};
use crate::fees::{FeeDirectives, FeePolicy};
use crate::ledger::{LedgerEntry, LedgerOutput, OutputCategory, TransactionLedger};
use crate::signing::SigningProvider;
use crate::storage::WalletStore;
use crate::universe::{CandidateFilter, OutputUniverse};

pub use config::{WalletConfig, DEFAULT_MAX_INPUTS, MAX_UNLOCK_SECONDS};
pub use rescan::RescanGuard;

/// Encryption state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncryptionState {
    Unencrypted,
    Locked,
    Unlocked { staking_only: bool },
}

/// Result of a successful build-and-commit
#[derive(Debug, Clone)]
pub struct SendResult {
    pub txid: TxId,
    pub fee: Amount,
    pub change_position: Option<usize>,
    pub draft: TxDraft,
    /// False when the wallet has no spend keys and the draft is returned
    /// unsigned (and unrecorded) for external signing
    pub signed: bool,
}

struct WalletInner {
    ledger: TransactionLedger,
    universe: OutputUniverse,
    locked_coins: BTreeSet<OutPoint>,
    persistent_locks: BTreeSet<OutPoint>,
    encryption: EncryptionState,
    fee_policy: FeePolicy,
    rng: StdRng,
}

impl WalletInner {
    fn refresh(&mut self, params: &crate::universe::UniverseParams) {
        self.universe = OutputUniverse::derive(&self.ledger, &self.locked_coins, params);
    }
}

/// A loaded wallet instance
pub struct Wallet {
    config: WalletConfig,
    chain: Arc<dyn ChainView>,
    store: Arc<dyn WalletStore>,
    signer: Arc<dyn SigningProvider>,
    inner: Arc<Mutex<WalletInner>>,
    rescan_active: Arc<AtomicBool>,
    rescan_abort: Arc<AtomicBool>,
    relock_generation: Arc<AtomicU64>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl Wallet {
    /// Load a wallet: initialize storage, replay the persisted ledger and
    /// lock set, and sync depths to the current tip
    pub async fn load(
        config: WalletConfig,
        chain: Arc<dyn ChainView>,
        store: Arc<dyn WalletStore>,
        signer: Arc<dyn SigningProvider>,
    ) -> WalletResult<Self> {
        store.initialize().await?;

        let mut ledger = TransactionLedger::new();
        for entry in store.load_ledger_entries().await? {
            ledger.record(entry);
        }
        ledger.set_tip(chain.tip().await?);

        let persistent_locks: BTreeSet<OutPoint> =
            store.load_locked_coins().await?.into_iter().collect();
        let locked_coins = persistent_locks.clone();

        let encryption = if config.passphrase.is_some() {
            EncryptionState::Locked
        } else {
            EncryptionState::Unencrypted
        };
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut inner = WalletInner {
            ledger,
            universe: OutputUniverse::default(),
            locked_coins,
            persistent_locks,
            encryption,
            fee_policy: config.fee_policy,
            rng,
        };
        inner.refresh(&config.universe);
        tracing::info!(wallet = %config.name, entries = inner.ledger.len(), "wallet loaded");

        Ok(Wallet {
            config,
            chain,
            store,
            signer,
            inner: Arc::new(Mutex::new(inner)),
            rescan_active: Arc::new(AtomicBool::new(false)),
            rescan_abort: Arc::new(AtomicBool::new(false)),
            relock_generation: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Rendezvous with the chain: pick up the latest tip and recompute
    /// depths before acting, so callers never see state older than their
    /// own prior observations
    async fn ensure_synced(&self, inner: &mut WalletInner) -> WalletResult<()> {
        let tip = self.chain.tip().await?;
        if inner.ledger.tip() != Some(tip) {
            inner.ledger.set_tip(tip);
            inner.refresh(&self.config.universe);
        }
        Ok(())
    }

    fn require_spending_unlocked(&self, inner: &WalletInner) -> WalletResult<()> {
        match inner.encryption {
            EncryptionState::Unencrypted => Ok(()),
            EncryptionState::Unlocked {
                staking_only: false,
            } => Ok(()),
            EncryptionState::Unlocked { staking_only: true } => Err(WalletError::WalletLocked(
                "Wallet is unlocked for staking only".to_string(),
            )),
            EncryptionState::Locked => Err(WalletError::WalletLocked(
                "Please unlock the wallet with the passphrase first".to_string(),
            )),
        }
    }

    // === Balances & candidates ===

    pub async fn compute_balances(
        &self,
        min_depth: i64,
        avoid_reuse: Option<bool>,
    ) -> WalletResult<Balances> {
        let mut inner = self.inner.lock().await;
        self.ensure_synced(&mut inner).await?;
        let avoid_reuse = avoid_reuse.unwrap_or(self.config.avoid_reuse);
        Ok(compute_balances(inner.universe.iter(), min_depth, avoid_reuse))
    }

    pub async fn list_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> WalletResult<Vec<OwnedOutput>> {
        let mut inner = self.inner.lock().await;
        self.ensure_synced(&mut inner).await?;
        Ok(inner.universe.list_candidates(filter))
    }

    // === Ledger surface ===

    /// Record an externally observed or externally signed transaction
    pub async fn record_transaction(&self, mut entry: LedgerEntry) -> WalletResult<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_synced(&mut inner).await?;
        if entry.time_received == 0 {
            entry = entry.received_at(unix_now());
        }
        self.store.append_ledger_entry(&entry).await?;
        inner.ledger.record(entry);
        inner.refresh(&self.config.universe);
        Ok(())
    }

    pub async fn mark_abandoned(&self, txid: &TxId) -> WalletResult<bool> {
        let mut inner = self.inner.lock().await;
        self.ensure_synced(&mut inner).await?;
        let in_pool = self.chain.in_relay_pool(txid).await?;
        let changed = inner.ledger.mark_abandoned(txid, in_pool)?;
        if changed {
            let entry = inner
                .ledger
                .get(txid)
                .cloned()
                .ok_or_else(|| WalletError::InternalError("Abandoned entry vanished".into()))?;
            self.store.update_ledger_entry(&entry).await?;
            inner.refresh(&self.config.universe);
            tracing::info!(wallet = %self.config.name, %txid, "transaction abandoned");
        }
        Ok(changed)
    }

    pub async fn depth_of(&self, txid: &TxId) -> WalletResult<Option<i64>> {
        let mut inner = self.inner.lock().await;
        self.ensure_synced(&mut inner).await?;
        Ok(inner.ledger.depth_of(txid))
    }

    pub async fn conflicts_of(&self, txid: &TxId) -> WalletResult<Vec<TxId>> {
        let inner = self.inner.lock().await;
        let mut conflicts: Vec<TxId> = inner.ledger.conflicts(txid).into_iter().collect();
        conflicts.sort();
        Ok(conflicts)
    }

    pub async fn recent_transactions(&self, count: usize) -> WalletResult<Vec<LedgerEntry>> {
        let mut inner = self.inner.lock().await;
        self.ensure_synced(&mut inner).await?;
        Ok(inner.ledger.recent(count).into_iter().cloned().collect())
    }

    // === Coin locking ===

    /// Lock a batch of outpoints against automatic selection
    ///
    /// The whole batch is validated before anything is applied: one bad
    /// outpoint fails the call and leaves every coin untouched.
    pub async fn lock_coins(&self, outpoints: &[OutPoint], persistent: bool) -> WalletResult<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_synced(&mut inner).await?;

        for outpoint in outpoints {
            let entry = inner.ledger.get(&outpoint.txid).ok_or_else(|| {
                WalletError::InvalidParameter("Invalid parameter, unknown transaction".to_string())
            })?;
            if entry.output(outpoint.vout).is_none() {
                return Err(WalletError::InvalidParameter(
                    "Invalid parameter, vout index out of bounds".to_string(),
                ));
            }
            if inner.ledger.is_spent(outpoint) {
                return Err(WalletError::InvalidParameter(
                    "Invalid parameter, expected unspent output".to_string(),
                ));
            }
            if inner.locked_coins.contains(outpoint) {
                return Err(WalletError::InvalidParameter(
                    "Invalid parameter, output already locked".to_string(),
                ));
            }
        }

        for outpoint in outpoints {
            inner.locked_coins.insert(*outpoint);
            if persistent {
                inner.persistent_locks.insert(*outpoint);
            }
        }
        if persistent {
            let persisted: Vec<OutPoint> = inner.persistent_locks.iter().copied().collect();
            self.store.save_locked_coins(&persisted).await?;
        }
        inner.refresh(&self.config.universe);
        Ok(())
    }

    /// Unlock the given outpoints, or every locked coin when `None`
    pub async fn unlock_coins(&self, outpoints: Option<&[OutPoint]>) -> WalletResult<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_synced(&mut inner).await?;

        let targets: Vec<OutPoint> = match outpoints {
            Some(outpoints) => {
                for outpoint in outpoints {
                    if !inner.locked_coins.contains(outpoint) {
                        return Err(WalletError::InvalidParameter(
                            "Invalid parameter, expected locked output".to_string(),
                        ));
                    }
                }
                outpoints.to_vec()
            }
            None => inner.locked_coins.iter().copied().collect(),
        };

        let mut persistent_changed = false;
        for outpoint in &targets {
            inner.locked_coins.remove(outpoint);
            persistent_changed |= inner.persistent_locks.remove(outpoint);
        }
        if persistent_changed {
            let persisted: Vec<OutPoint> = inner.persistent_locks.iter().copied().collect();
            self.store.save_locked_coins(&persisted).await?;
        }
        inner.refresh(&self.config.universe);
        Ok(())
    }

    pub async fn list_locked(&self) -> Vec<OutPoint> {
        let inner = self.inner.lock().await;
        inner.locked_coins.iter().copied().collect()
    }

    // === Fee configuration ===

    /// Pin the wallet fee rate; zero reverts to automatic estimation
    pub async fn set_tx_fee(&self, rate: FeeRate) -> WalletResult<bool> {
        let mut inner = self.inner.lock().await;
        if rate.is_zero() {
            inner.fee_policy.wallet_rate = None;
            return Ok(true);
        }
        let relay_minimum = self.chain.relay_minimum_fee().await?;
        if rate < relay_minimum {
            return Err(WalletError::InvalidParameter(format!(
                "txfee cannot be less than min relay tx fee ({relay_minimum})"
            )));
        }
        if rate > inner.fee_policy.max_fee_rate {
            return Err(WalletError::FeeExceedsMaximum(format!(
                "txfee cannot be more than wallet max tx fee ({})",
                inner.fee_policy.max_fee_rate
            )));
        }
        inner.fee_policy.wallet_rate = Some(rate);
        Ok(true)
    }

    // === Encryption & relock timer ===

    /// Unlock an encrypted wallet for `timeout_secs` seconds
    ///
    /// A new unlock replaces any pending relock timer: the generation
    /// counter ticks and the superseded timer finds itself stale when it
    /// fires. `staking_only` permits an unlimited (zero) timeout but
    /// refuses sends.
    pub async fn unlock(
        &self,
        passphrase: &str,
        timeout_secs: u64,
        staking_only: bool,
    ) -> WalletResult<()> {
        let expected = self.config.passphrase.as_ref().ok_or_else(|| {
            WalletError::InvalidParameter(
                "Error: running with an unencrypted wallet, but unlock was called".to_string(),
            )
        })?;
        if expected.as_str() != passphrase {
            return Err(WalletError::InvalidParameter(
                "The wallet passphrase entered was incorrect".to_string(),
            ));
        }
        if timeout_secs == 0 && !staking_only {
            return Err(WalletError::InvalidParameter(
                "A timeout is required when unlocking for sending".to_string(),
            ));
        }
        let timeout_secs = timeout_secs.min(MAX_UNLOCK_SECONDS);

        let mut inner = self.inner.lock().await;
        inner.encryption = EncryptionState::Unlocked { staking_only };
        drop(inner);

        let generation = self.relock_generation.fetch_add(1, Ordering::SeqCst) + 1;
        if timeout_secs > 0 {
            let inner = Arc::clone(&self.inner);
            let generations = Arc::clone(&self.relock_generation);
            let name = self.config.name.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
                // A later unlock or explicit lock superseded this timer
                if generations.load(Ordering::SeqCst) != generation {
                    return;
                }
                let mut inner = inner.lock().await;
                if generations.load(Ordering::SeqCst) == generation {
                    inner.encryption = EncryptionState::Locked;
                    tracing::info!(wallet = %name, "relock timer fired, wallet locked");
                }
            });
        }
        Ok(())
    }

    /// Lock the wallet immediately, cancelling any pending relock timer
    pub async fn lock(&self) -> WalletResult<()> {
        if self.config.passphrase.is_none() {
            return Err(WalletError::InvalidParameter(
                "Error: running with an unencrypted wallet, but lock was called".to_string(),
            ));
        }
        self.relock_generation.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        inner.encryption = EncryptionState::Locked;
        Ok(())
    }

    pub async fn is_unlocked_for_sending(&self) -> bool {
        let inner = self.inner.lock().await;
        self.require_spending_unlocked(&inner).is_ok()
    }

    // === Rescan ===

    pub fn rescan_in_progress(&self) -> bool {
        self.rescan_active.load(Ordering::SeqCst)
    }

    /// Request cancellation of a running rescan
    pub fn abort_rescan(&self) {
        self.rescan_abort.store(true, Ordering::SeqCst);
    }

    /// Re-walk the chain from `from_height`, reconciling entry block
    /// references block by block
    ///
    /// Holds the single rescan reservation for its duration; a concurrent
    /// request fails with `ScanInProgress` instead of queueing. Updates
    /// apply atomically per block: a concurrent build sees the state as of
    /// the last fully scanned block. Returns the number of blocks walked.
    pub async fn rescan(&self, from_height: u64) -> WalletResult<u64> {
        let guard = RescanGuard::reserve(
            Arc::clone(&self.rescan_active),
            Arc::clone(&self.rescan_abort),
        )?;
        tracing::info!(wallet = %self.config.name, from_height, "rescan started");

        let tip = self.chain.tip().await?;
        // A reorg deeper than the requested start still has to be walked:
        // restart no later than the fork point with the previous tip
        let known_tip = self.inner.lock().await.ledger.tip();
        let from_height = match known_tip {
            Some(old_tip) if old_tip != tip => self
                .chain
                .common_ancestor(old_tip, tip)
                .await?
                .map(|ancestor| from_height.min(ancestor.height))
                .unwrap_or(0),
            _ => from_height,
        };
        let mut scanned = 0u64;
        for height in from_height..=tip.height {
            if guard.is_aborted() {
                tracing::info!(wallet = %self.config.name, height, "rescan aborted");
                break;
            }
            let block = self.chain.find_block(height).await?;
            let mut inner = self.inner.lock().await;
            let mut dirty = false;
            for txid in inner
                .ledger
                .entries()
                .filter(|e| e.block.map(|b| b.height) == Some(height))
                .map(|e| e.txid)
                .collect::<Vec<_>>()
            {
                let entry = match inner.ledger.get(&txid) {
                    Some(entry) => entry.clone(),
                    None => continue,
                };
                let still_there = block.map(|b| Some(b) == entry.block).unwrap_or(false);
                if !still_there {
                    let mut updated = entry;
                    updated.block = None;
                    self.store.update_ledger_entry(&updated).await?;
                    inner.ledger.record(updated);
                    dirty = true;
                }
            }
            if dirty {
                inner.refresh(&self.config.universe);
            }
            drop(inner);
            scanned += 1;
        }

        let mut inner = self.inner.lock().await;
        self.ensure_synced(&mut inner).await?;
        inner.refresh(&self.config.universe);
        Ok(scanned)
    }

    // === Building & sending ===

    /// Select coins, construct, sign and record a payment
    ///
    /// Nothing is recorded until signing succeeds, so every failure path
    /// leaves the ledger and lock set untouched. Wallets without spend
    /// keys get the unsigned draft back (also unrecorded) for external
    /// signing and a later [`Wallet::record_transaction`].
    pub async fn select_and_build(
        &self,
        recipients: &[Recipient],
        control: &CoinControl,
    ) -> WalletResult<SendResult> {
        let mut inner = self.inner.lock().await;
        self.ensure_synced(&mut inner).await?;
        if self.signer.has_spend_keys() {
            self.require_spending_unlocked(&inner)?;
        }

        let directives = FeeDirectives::from_coin_control(control);
        let fee_rate = inner.fee_policy.resolve(&directives, &*self.chain).await?;

        let explicit = self.resolve_explicit_inputs(&inner, control)?;
        let pool = if !control.has_selected_inputs() || control.allow_other_inputs {
            self.collect_spend_pool(&inner, control, &HashSet::new()).await?
        } else {
            Vec::new()
        };

        let change_destination = control
            .change_destination
            .clone()
            .or_else(|| self.config.change_destination.clone())
            .ok_or_else(|| {
                WalletError::InvalidParameter("No change destination available".to_string())
            })?;
        // Explicit-rate callers are assumed to care about being able to
        // replace; default them into RBF signaling
        let signal_rbf = control
            .signal_rbf
            .or(control.fee_rate.map(|_| true))
            .unwrap_or(self.config.signal_rbf);
        let params = BuildParams {
            fee_rate,
            change_destination,
            max_inputs: control.max_inputs.unwrap_or(self.config.max_inputs),
            strategy: self.config.selection_strategy,
            signal_rbf,
        };

        let built = build_transaction(
            recipients,
            explicit,
            pool,
            control,
            &params,
            &mut inner.rng,
        )?;

        if !self.signer.has_spend_keys() {
            return Ok(SendResult {
                txid: built.draft.txid,
                fee: built.fee,
                change_position: built.change_position,
                draft: built.draft,
                signed: false,
            });
        }

        let outcome = self.signer.sign_inputs(&built.draft).await?;
        if !outcome.complete {
            let detail = outcome
                .input_errors
                .iter()
                .map(|(i, e)| format!("input {i}: {e}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(WalletError::SigningError(format!(
                "Signing transaction failed ({detail})"
            )));
        }

        self.commit_built(&mut inner, &built).await?;
        tracing::info!(
            wallet = %self.config.name,
            txid = %built.draft.txid,
            fee = %built.fee,
            inputs = built.draft.inputs.len(),
            "transaction committed"
        );
        Ok(SendResult {
            txid: built.draft.txid,
            fee: built.fee,
            change_position: built.change_position,
            draft: built.draft,
            signed: true,
        })
    }

    /// Build a higher-fee replacement for an unconfirmed transaction
    pub async fn bump_fee(&self, txid: &TxId, options: &BumpOptions) -> WalletResult<FeeBump> {
        if options.fee_rate.is_some() && options.confirm_target.is_some() {
            return Err(WalletError::InvalidParameter(
                "conf_target can't be set with fee_rate. Please provide either one.".to_string(),
            ));
        }

        let mut inner = self.inner.lock().await;
        self.ensure_synced(&mut inner).await?;
        if self.signer.has_spend_keys() {
            self.require_spending_unlocked(&inner)?;
        }

        let entry = inner
            .ledger
            .get(txid)
            .cloned()
            .ok_or_else(|| {
                WalletError::ResourceNotFound("Invalid or non-wallet transaction id".to_string())
            })?;
        let depth = inner.ledger.depth_of(txid).unwrap_or(0);
        if depth > 0 {
            return Err(WalletError::InvalidParameter(
                "Transaction has been mined and cannot be replaced".to_string(),
            ));
        }
        if depth < 0 {
            return Err(WalletError::AlreadySpent(
                "Transaction is conflicted with a confirmed transaction".to_string(),
            ));
        }
        if entry.abandoned {
            return Err(WalletError::InvalidParameter(
                "Transaction is abandoned".to_string(),
            ));
        }
        if !entry.signals_rbf && !self.chain.is_rbf_opt_in(txid).await? {
            return Err(WalletError::NotReplaceable(
                "Transaction is not BIP 125 replaceable".to_string(),
            ));
        }
        for output in &entry.outputs {
            let outpoint = OutPoint::new(*txid, output.vout);
            if inner.ledger.spender_of(&outpoint).is_some() {
                return Err(WalletError::AlreadySpent(
                    "Transaction has descendants in the wallet".to_string(),
                ));
            }
        }

        // Original inputs must still resolve inside the wallet
        let mut original_inputs = Vec::with_capacity(entry.inputs.len());
        for input in &entry.inputs {
            let source = inner.ledger.get(&input.txid).and_then(|e| e.output(input.vout));
            match source {
                Some(output) => original_inputs.push((
                    *input,
                    output.value,
                    output.destination.input_vsize(),
                )),
                None => {
                    return Err(WalletError::AlreadySpent(format!(
                        "Original input {input} is no longer known to the wallet"
                    )))
                }
            }
        }

        let original_outputs: Vec<TxOut> = entry
            .outputs
            .iter()
            .map(|o| TxOut {
                value: o.value,
                destination: o.destination.clone(),
            })
            .collect();
        let change_index = entry
            .outputs
            .iter()
            .position(|o| o.mine && o.category == OutputCategory::Receive);

        // Fee floor: the original rate plus the incremental relay rate
        let incremental = self.chain.incremental_relay_fee().await?;
        let in_total: Amount = original_inputs.iter().map(|(_, v, _)| *v).sum();
        let out_total: Amount = original_outputs.iter().map(|o| o.value).sum();
        let old_fee = in_total.checked_sub(out_total).ok_or_else(|| {
            WalletError::InternalError("Original transaction pays out more than in".into())
        })?;
        let original_vsize = {
            let draft_vsize: usize = original_inputs.iter().map(|(_, _, s)| *s).sum::<usize>()
                + original_outputs
                    .iter()
                    .map(|o| o.destination.output_vsize())
                    .sum::<usize>()
                + crate::data_structures::TX_BASE_VSIZE;
            draft_vsize
        };
        let floor = FeeRate::from_sat_per_kvb(
            (old_fee.as_sats().saturating_mul(1000) / original_vsize as u64)
                .saturating_add(incremental.sat_per_kvb()),
        );

        let directives = FeeDirectives {
            mode: options.fee_mode,
            explicit_rate: options.fee_rate,
            confirm_target: options.confirm_target,
        };
        let resolved = inner.fee_policy.resolve(&directives, &*self.chain).await?;
        // Estimator-backed rates are floored automatically; an explicit
        // rate below the floor is the caller's error and surfaces in the
        // planner
        let new_rate = if options.fee_rate.is_some() {
            resolved
        } else {
            resolved.max(floor)
        };
        if new_rate > inner.fee_policy.max_fee_rate {
            return Err(WalletError::FeeExceedsMaximum(format!(
                "Replacement fee rate {new_rate} exceeds maximum {}",
                inner.fee_policy.max_fee_rate
            )));
        }

        let mut excluded: HashSet<OutPoint> = entry
            .outputs
            .iter()
            .map(|o| OutPoint::new(*txid, o.vout))
            .collect();
        excluded.extend(entry.inputs.iter().copied());
        let pool = self
            .collect_spend_pool(&inner, &CoinControl::new(), &excluded)
            .await?;

        let change_destination = change_index
            .map(|i| original_outputs[i].destination.clone())
            .or_else(|| self.config.change_destination.clone())
            .ok_or_else(|| {
                WalletError::InvalidParameter("No change destination available".to_string())
            })?;

        let ctx = BumpContext {
            original_inputs,
            original_outputs,
            change_index,
            change_destination,
            pool,
            new_rate,
            incremental_rate: incremental,
            replaceable: options.replaceable,
        };
        let mut bump = plan_bump(&ctx, &mut inner.rng)?;

        if !self.signer.has_spend_keys() {
            return Ok(bump);
        }
        let outcome = self.signer.sign_inputs(&bump.draft).await?;
        if !outcome.complete {
            return Err(WalletError::SigningError(
                "Can't sign replacement transaction".to_string(),
            ));
        }
        bump.signed = true;

        let replacement = self.entry_from_draft(&bump.draft, &entry);
        self.store.append_ledger_entry(&replacement).await?;
        inner.ledger.record(replacement);
        inner.refresh(&self.config.universe);
        tracing::info!(
            wallet = %self.config.name,
            original = %txid,
            replacement = %bump.draft.txid,
            old_fee = %bump.old_fee,
            new_fee = %bump.new_fee,
            "fee bump committed"
        );
        Ok(bump)
    }

    // === Internals ===

    fn resolve_explicit_inputs(
        &self,
        inner: &WalletInner,
        control: &CoinControl,
    ) -> WalletResult<Vec<OwnedOutput>> {
        let mut explicit = Vec::with_capacity(control.include_outpoints.len());
        for outpoint in &control.include_outpoints {
            let output = inner.universe.get(outpoint).ok_or_else(|| {
                WalletError::InvalidParameter(format!(
                    "Invalid parameter, unknown output {outpoint}"
                ))
            })?;
            if output.spent {
                return Err(WalletError::InvalidParameter(format!(
                    "Invalid parameter, expected unspent output {outpoint}"
                )));
            }
            if output.is_watch_only() && !control.include_watch_only {
                return Err(WalletError::InvalidParameter(format!(
                    "Invalid parameter, watch-only output {outpoint}"
                )));
            }
            if !output.is_mature() {
                return Err(WalletError::InvalidParameter(format!(
                    "Invalid parameter, immature output {outpoint}"
                )));
            }
            // Manually selected coins bypass locks
            explicit.push(output.clone());
        }
        Ok(explicit)
    }

    async fn collect_spend_pool(
        &self,
        inner: &WalletInner,
        control: &CoinControl,
        excluded: &HashSet<OutPoint>,
    ) -> WalletResult<Vec<OwnedOutput>> {
        let mut filter = CandidateFilter::new()
            .with_depth_range(
                control.min_depth.max(0),
                control.max_depth.unwrap_or(9_999_999),
            )
            .without_unsafe();
        if control.include_watch_only {
            filter = filter.with_watch_only();
        }
        let avoid_reuse = control.avoid_reuse || self.config.avoid_reuse;
        let mut pool = Vec::new();
        for output in inner.universe.list_candidates(&filter) {
            if control.is_excluded(&output.outpoint)
                || excluded.contains(&output.outpoint)
                || (avoid_reuse && output.reused)
            {
                continue;
            }
            // Unconfirmed change is only trustworthy if the transaction
            // could actually confirm as-is
            if output.depth == 0 && !self.chain.is_final(&output.outpoint.txid).await? {
                continue;
            }
            pool.push(output);
        }
        Ok(pool)
    }

    async fn commit_built(
        &self,
        inner: &mut WalletInner,
        built: &BuiltTransaction,
    ) -> WalletResult<()> {
        let outputs = built
            .draft
            .outputs
            .iter()
            .enumerate()
            .map(|(index, out)| {
                if Some(index) == built.change_position {
                    LedgerOutput::receive(index as u32, out.value, out.destination.clone())
                } else {
                    LedgerOutput::send(index as u32, out.value, out.destination.clone())
                }
            })
            .collect();
        let entry = LedgerEntry::new(
            built.draft.txid,
            built.draft.inputs.iter().map(|i| i.outpoint).collect(),
            outputs,
        )
        .received_at(unix_now())
        .from_self()
        .signaling_rbf(built.draft.signals_rbf());

        self.store.append_ledger_entry(&entry).await?;
        inner.ledger.record(entry);

        // Manually selected coins are released once actually spent
        let mut persistent_changed = false;
        for input in &built.draft.inputs {
            inner.locked_coins.remove(&input.outpoint);
            persistent_changed |= inner.persistent_locks.remove(&input.outpoint);
        }
        if persistent_changed {
            let persisted: Vec<OutPoint> = inner.persistent_locks.iter().copied().collect();
            self.store.save_locked_coins(&persisted).await?;
        }
        inner.refresh(&self.config.universe);
        Ok(())
    }

    fn entry_from_draft(&self, draft: &TxDraft, original: &LedgerEntry) -> LedgerEntry {
        let outputs = draft
            .outputs
            .iter()
            .enumerate()
            .map(|(index, out)| {
                let mine = Some(index) == draft.change_position
                    || original
                        .outputs
                        .iter()
                        .any(|o| o.mine && o.destination == out.destination);
                if mine {
                    LedgerOutput::receive(index as u32, out.value, out.destination.clone())
                } else {
                    LedgerOutput::send(index as u32, out.value, out.destination.clone())
                }
            })
            .collect();
        LedgerEntry::new(
            draft.txid,
            draft.inputs.iter().map(|i| i.outpoint).collect(),
            outputs,
        )
        .received_at(unix_now())
        .from_self()
        .signaling_rbf(draft.signals_rbf())
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("name", &self.config.name)
            .field("rescan_active", &self.rescan_in_progress())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChain;
    use crate::signing::MockSigner;
    use crate::storage::MemoryWalletStore;

    fn txid(n: u8) -> TxId {
        TxId::from_bytes([n; 32])
    }

    async fn simple_wallet() -> Wallet {
        let chain = Arc::new(MockChain::new().with_height(100));
        let store = Arc::new(MemoryWalletStore::new());
        let signer = Arc::new(MockSigner::signing());
        let config = WalletConfig::new("test")
            .with_change_destination(Destination::Legacy([200; 20]))
            .with_rng_seed(7);
        Wallet::load(config, chain, store, signer).await.unwrap()
    }

    fn coin_entry(n: u8, value: u64, height: u64) -> LedgerEntry {
        LedgerEntry::new(
            txid(n),
            vec![],
            vec![LedgerOutput::receive(
                0,
                Amount::from_sats(value),
                Destination::Legacy([n; 20]),
            )],
        )
        .received_at(100 + n as u64)
        .at_block(crate::data_structures::BlockRef {
            height,
            hash: crate::data_structures::BlockHash::from_bytes([height as u8; 32]),
        })
    }

    #[tokio::test]
    async fn test_lock_batch_is_atomic() {
        let wallet = simple_wallet().await;
        wallet
            .record_transaction(coin_entry(1, 10_000, 50))
            .await
            .unwrap();
        wallet
            .record_transaction(coin_entry(2, 20_000, 50))
            .await
            .unwrap();

        let a = OutPoint::new(txid(1), 0);
        let b = OutPoint::new(txid(2), 0);
        wallet.lock_coins(&[a], false).await.unwrap();

        // Batch containing an already-locked coin fails wholesale
        let err = wallet.lock_coins(&[a, b], false).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidParameter(_)));
        assert_eq!(wallet.list_locked().await, vec![a]);

        // Unlocking a coin that is not locked also fails
        let err = wallet.unlock_coins(Some(&[b])).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidParameter(_)));

        wallet.unlock_coins(None).await.unwrap();
        assert!(wallet.list_locked().await.is_empty());
    }

    #[tokio::test]
    async fn test_locked_coin_excluded_from_candidates() {
        let wallet = simple_wallet().await;
        wallet
            .record_transaction(coin_entry(1, 10_000, 50))
            .await
            .unwrap();
        let before = wallet
            .list_candidates(&CandidateFilter::new())
            .await
            .unwrap();
        assert_eq!(before.len(), 1);

        let a = OutPoint::new(txid(1), 0);
        wallet.lock_coins(&[a], false).await.unwrap();
        assert!(wallet
            .list_candidates(&CandidateFilter::new())
            .await
            .unwrap()
            .is_empty());

        wallet.unlock_coins(Some(&[a])).await.unwrap();
        let after = wallet
            .list_candidates(&CandidateFilter::new())
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
    }

    #[tokio::test]
    async fn test_unlock_requires_correct_passphrase() {
        let chain = Arc::new(MockChain::new().with_height(10));
        let store = Arc::new(MemoryWalletStore::new());
        let signer = Arc::new(MockSigner::signing());
        let config = WalletConfig::new("enc")
            .with_passphrase("hunter2")
            .with_change_destination(Destination::Legacy([200; 20]));
        let wallet = Wallet::load(config, chain, store, signer).await.unwrap();

        assert!(!wallet.is_unlocked_for_sending().await);
        assert!(wallet.unlock("wrong", 60, false).await.is_err());
        assert!(!wallet.is_unlocked_for_sending().await);

        wallet.unlock("hunter2", 60, false).await.unwrap();
        assert!(wallet.is_unlocked_for_sending().await);

        wallet.lock().await.unwrap();
        assert!(!wallet.is_unlocked_for_sending().await);
    }

    #[tokio::test]
    async fn test_staking_only_unlock_refuses_sends() {
        let chain = Arc::new(MockChain::new().with_height(10));
        let store = Arc::new(MemoryWalletStore::new());
        let signer = Arc::new(MockSigner::signing());
        let config = WalletConfig::new("enc")
            .with_passphrase("hunter2")
            .with_change_destination(Destination::Legacy([200; 20]));
        let wallet = Wallet::load(config, chain, store, signer).await.unwrap();

        // Zero timeout is only allowed for staking
        assert!(wallet.unlock("hunter2", 0, false).await.is_err());
        wallet.unlock("hunter2", 0, true).await.unwrap();
        assert!(!wallet.is_unlocked_for_sending().await);
    }

    #[tokio::test]
    async fn test_relock_timer_fires_and_is_replaceable() {
        let chain = Arc::new(MockChain::new().with_height(10));
        let store = Arc::new(MemoryWalletStore::new());
        let signer = Arc::new(MockSigner::signing());
        let config = WalletConfig::new("enc")
            .with_passphrase("hunter2")
            .with_change_destination(Destination::Legacy([200; 20]));
        let wallet = Wallet::load(config, chain, store, signer).await.unwrap();

        wallet.unlock("hunter2", 1, false).await.unwrap();
        assert!(wallet.is_unlocked_for_sending().await);
        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert!(!wallet.is_unlocked_for_sending().await);

        // A fresh unlock supersedes the previous timer: the first timer
        // firing must not relock the second session early
        wallet.unlock("hunter2", 1, false).await.unwrap();
        wallet.unlock("hunter2", 600, false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert!(wallet.is_unlocked_for_sending().await);
    }

    #[tokio::test]
    async fn test_rescan_single_reservation() {
        let wallet = simple_wallet().await;
        let guard = RescanGuard::reserve(
            Arc::clone(&wallet.rescan_active),
            Arc::clone(&wallet.rescan_abort),
        )
        .unwrap();
        let err = wallet.rescan(0).await.unwrap_err();
        assert!(matches!(err, WalletError::ScanInProgress(_)));
        drop(guard);
        assert!(wallet.rescan(95).await.is_ok());
    }
}
