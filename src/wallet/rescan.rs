use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::{WalletError, WalletResult};

/// Exclusive reservation for one rescan
///
/// At most one rescan runs per wallet. Acquiring the reservation flips an
/// atomic flag; a second request fails immediately instead of queueing.
/// Dropping the guard releases the slot, including on early error paths.
#[derive(Debug)]
pub struct RescanGuard {
    active: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
}

impl RescanGuard {
    /// Try to reserve the wallet's single rescan slot
    pub fn reserve(active: Arc<AtomicBool>, abort: Arc<AtomicBool>) -> WalletResult<Self> {
        if active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WalletError::ScanInProgress(
                "Wallet is currently rescanning. Abort existing rescan or wait.".to_string(),
            ));
        }
        abort.store(false, Ordering::SeqCst);
        Ok(RescanGuard { active, abort })
    }

    /// Whether an abort was requested while this rescan ran
    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

impl Drop for RescanGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}
