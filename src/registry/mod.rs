//! Wallet registry
//!
//! Explicit load/unload lifecycle for the wallets of one process. Callers
//! hold `Arc<Wallet>` handles; unloading removes the registry's reference
//! and in-flight handles drain naturally. No ambient global map.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::errors::{WalletError, WalletResult};
use crate::wallet::Wallet;

/// The set of loaded wallets
#[derive(Debug, Default)]
pub struct WalletRegistry {
    wallets: RwLock<HashMap<String, Arc<Wallet>>>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly loaded wallet under its configured name
    pub async fn load(&self, wallet: Wallet) -> WalletResult<Arc<Wallet>> {
        let mut wallets = self.wallets.write().await;
        let name = wallet.name().to_string();
        if wallets.contains_key(&name) {
            return Err(WalletError::InvalidParameter(format!(
                "Wallet '{name}' is already loaded"
            )));
        }
        let wallet = Arc::new(wallet);
        wallets.insert(name.clone(), Arc::clone(&wallet));
        tracing::info!(wallet = %name, "wallet registered");
        Ok(wallet)
    }

    /// Drop the registry's handle to a wallet
    pub async fn unload(&self, name: &str) -> WalletResult<()> {
        let mut wallets = self.wallets.write().await;
        match wallets.remove(name) {
            Some(_) => {
                tracing::info!(wallet = %name, "wallet unloaded");
                Ok(())
            }
            None => Err(WalletError::ResourceNotFound(format!(
                "Wallet '{name}' is not loaded"
            ))),
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Wallet>> {
        self.wallets.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.wallets.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.wallets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.wallets.read().await.is_empty()
    }
}
