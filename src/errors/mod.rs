//! Error types for the wallet engine
//!
//! Every fallible operation returns [`WalletResult`]. Variants are
//! machine-checkable kinds; the payload carries the human-readable detail.

use thiserror::Error;

/// Errors surfaced by the wallet engine
#[derive(Debug, Clone, Error)]
pub enum WalletError {
    /// Selection could not reach target plus fee
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Malformed or out-of-range caller input; rejected before any state change
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation needs spending authority the wallet does not currently have
    #[error("Wallet locked: {0}")]
    WalletLocked(String),

    /// Fee-bump target did not signal replaceability
    #[error("Transaction not replaceable: {0}")]
    NotReplaceable(String),

    /// Fee-bump target has outputs or inputs already consumed elsewhere
    #[error("Already spent: {0}")]
    AlreadySpent(String),

    /// A produced output would fall below the dust threshold
    #[error("Output below dust threshold: {0}")]
    DustOutput(String),

    /// Selection hit the configured input-count bound
    #[error("Too many inputs: {0}")]
    TooManyInputs(String),

    /// Resolved fee rate exceeds the wallet ceiling; never silently capped
    #[error("Fee exceeds maximum configured rate: {0}")]
    FeeExceedsMaximum(String),

    /// A rescan is already running for this wallet
    #[error("Rescan already in progress: {0}")]
    ScanInProgress(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Chain error: {0}")]
    ChainError(String),

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl WalletError {
    /// Whether the caller can meaningfully retry with different parameters
    ///
    /// Collaborator failures (storage, chain, signing) are non-retriable at
    /// this layer and must be surfaced as-is.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WalletError::InsufficientFunds(_)
                | WalletError::InvalidParameter(_)
                | WalletError::WalletLocked(_)
                | WalletError::NotReplaceable(_)
                | WalletError::AlreadySpent(_)
                | WalletError::DustOutput(_)
                | WalletError::TooManyInputs(_)
                | WalletError::FeeExceedsMaximum(_)
                | WalletError::ScanInProgress(_)
        )
    }
}

/// Result type used throughout the wallet engine
pub type WalletResult<T> = Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(WalletError::InsufficientFunds("x".into()).is_recoverable());
        assert!(WalletError::InvalidParameter("x".into()).is_recoverable());
        assert!(!WalletError::StorageError("x".into()).is_recoverable());
        assert!(!WalletError::ChainError("x".into()).is_recoverable());
    }

    #[test]
    fn test_error_messages_carry_detail() {
        let err = WalletError::InsufficientFunds("available 2.0, required 5.0".into());
        assert!(err.to_string().contains("available 2.0"));
    }
}
