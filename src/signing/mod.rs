//! Signing provider interface
//!
//! The engine treats signing as a black box: a provider either completes
//! a draft, partially signs it, or reports per-input failures. Key
//! storage and signature algorithms live outside this crate.

use async_trait::async_trait;

use crate::data_structures::TxDraft;
use crate::errors::WalletResult;

/// Result of one signing attempt
#[derive(Debug, Clone, Default)]
pub struct SigningOutcome {
    /// Every input carries a valid signature
    pub complete: bool,
    /// (input index, reason) for each input that could not be signed
    pub input_errors: Vec<(usize, String)>,
}

impl SigningOutcome {
    pub fn complete() -> Self {
        SigningOutcome {
            complete: true,
            input_errors: Vec::new(),
        }
    }
}

/// Something that can attach signatures to a draft transaction
#[async_trait]
pub trait SigningProvider: Send + Sync {
    /// Attempt to sign every input of the draft
    async fn sign_inputs(&self, draft: &TxDraft) -> WalletResult<SigningOutcome>;

    /// Whether spend keys are present at all; without them drafts are
    /// handed back unsigned for external signing
    fn has_spend_keys(&self) -> bool;
}

/// Provider for watch-only wallets: knows no keys, signs nothing
#[derive(Debug, Default)]
pub struct NullSigner;

#[async_trait]
impl SigningProvider for NullSigner {
    async fn sign_inputs(&self, draft: &TxDraft) -> WalletResult<SigningOutcome> {
        Ok(SigningOutcome {
            complete: false,
            input_errors: (0..draft.inputs.len())
                .map(|i| (i, "No spend keys available".to_string()))
                .collect(),
        })
    }

    fn has_spend_keys(&self) -> bool {
        false
    }
}

pub mod mock {
    //! Test signer with scriptable outcomes

    use super::*;

    /// Signer whose behavior is fixed at construction
    #[derive(Debug)]
    pub struct MockSigner {
        complete: bool,
    }

    impl MockSigner {
        /// A signer that completes every draft
        pub fn signing() -> Self {
            MockSigner { complete: true }
        }

        /// A signer that fails every input
        pub fn refusing() -> Self {
            MockSigner { complete: false }
        }
    }

    #[async_trait]
    impl SigningProvider for MockSigner {
        async fn sign_inputs(&self, draft: &TxDraft) -> WalletResult<SigningOutcome> {
            if self.complete {
                Ok(SigningOutcome::complete())
            } else {
                Ok(SigningOutcome {
                    complete: false,
                    input_errors: (0..draft.inputs.len())
                        .map(|i| (i, "Refused by test signer".to_string()))
                        .collect(),
                })
            }
        }

        fn has_spend_keys(&self) -> bool {
            self.complete
        }
    }
}

pub use mock::MockSigner;
