//! Error types for the swap and bridge client

use serde::Serialize;
use thiserror::Error;

/// Bad user input. Blocks the action and is never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Wallet not connected")]
    WalletNotConnected,

    #[error("Select tokens")]
    SelectTokens,

    #[error("Select two different tokens")]
    IdenticalTokens,

    #[error("Select source chain")]
    SelectSourceChain,

    #[error("Select target chain")]
    SelectTargetChain,

    #[error("Source and target chains must differ")]
    IdenticalChains,

    #[error("Enter amount")]
    EnterAmount,

    #[error("Invalid amount")]
    InvalidAmount,

    #[error("Get quote first")]
    QuoteMissing,

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Minimum amount is {min} {token}")]
    BelowMinimum { min: String, token: String },

    #[error("Maximum amount is {max} {token}")]
    AboveMaximum { max: String, token: String },

    #[error("Unknown chain {chain_id}")]
    UnknownChain { chain_id: u32 },

    #[error("Slippage tolerance {0} bps is outside [0, 10000]")]
    SlippageOutOfRange(u32),

    #[error("Deadline {0} minutes is outside [1, 60]")]
    DeadlineOutOfRange(u32),
}

/// Pool or fee data could not be turned into a quote. Retryable by re-requesting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuoteError {
    #[error("Pool is empty")]
    PoolEmpty,

    #[error("Input amount must be positive")]
    InvalidAmount,

    #[error("Pool unreachable: {0}")]
    PoolUnreachable(String),

    #[error("Failed to estimate fees: {0}")]
    EstimationFailed(String),

    #[error("Arithmetic overflow while quoting")]
    Overflow,

    #[error("Quote superseded by a newer request")]
    Superseded,
}

/// Rule violations raised by the bridge contract or the pool. Always fatal
/// to the current operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Transfer {hash} already processed")]
    AlreadyProcessed { hash: String },

    #[error("Insufficient validators: {have} of {need} signatures")]
    InsufficientValidators { have: usize, need: usize },

    #[error("Validator {validator} is not authorized")]
    Unauthorized { validator: String },

    #[error("Invalid signature from validator {validator}")]
    InvalidSignature { validator: String },

    #[error("Price impact {impact}% exceeds maximum {max}%")]
    PriceImpactTooHigh { impact: String, max: String },

    #[error("Output {actual} is below minimum {minimum}")]
    SlippageTooHigh { minimum: u128, actual: u128 },

    #[error("Transfer {hash} not found")]
    TransferNotFound { hash: String },

    #[error("Transfer {hash} was rejected")]
    TransferRejected { hash: String },
}

/// Main error type for the client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Quote(#[from] QuoteError),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Another operation is already in progress")]
    AlreadyInProgress,

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable error classification surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Validation,
    Quote,
    Execution,
    Timeout,
    Protocol,
    Store,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Quote => "quote",
            ErrorKind::Execution => "execution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Store => "store",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl ClientError {
    /// Stable kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Validation(_) => ErrorKind::Validation,
            ClientError::Quote(_) | ClientError::Ledger(_) => ErrorKind::Quote,
            ClientError::Execution(_) | ClientError::AlreadyInProgress => ErrorKind::Execution,
            ClientError::Timeout { .. } => ErrorKind::Timeout,
            ClientError::Protocol(_) => ErrorKind::Protocol,
            ClientError::Store(_) => ErrorKind::Store,
            ClientError::Config(_) => ErrorKind::Config,
            ClientError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if error is retryable.
    ///
    /// Submissions are never retried automatically, so only quote-side
    /// failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Quote(_) | ClientError::Ledger(_))
    }

    pub(crate) fn lock_poisoned(what: &str) -> Self {
        ClientError::Internal(format!("{} lock poisoned", what))
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Error as surfaced to callers: stable kind plus message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ClientError> for ErrorBody {
    fn from(err: &ClientError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(
            ClientError::from(ValidationError::EnterAmount).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ClientError::from(ProtocolError::AlreadyProcessed { hash: "ab".into() }).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(ClientError::AlreadyInProgress.kind(), ErrorKind::Execution);
    }

    #[test]
    fn test_only_quote_side_errors_retry() {
        assert!(ClientError::from(QuoteError::PoolEmpty).is_retryable());
        assert!(!ClientError::Execution("rejected".into()).is_retryable());
        assert!(!ClientError::Timeout { operation: "swap".into() }.is_retryable());
    }

    #[test]
    fn test_validation_messages() {
        let err = ValidationError::BelowMinimum {
            min: "10".into(),
            token: "TON".into(),
        };
        assert_eq!(err.to_string(), "Minimum amount is 10 TON");
    }

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody::from(&ClientError::from(ValidationError::QuoteMissing));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], "validation");
        assert_eq!(json["message"], "Get quote first");
    }
}
