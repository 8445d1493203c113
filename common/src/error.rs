//! Error types for Ledgerline operations.

use crate::{AccountId, TransactionId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Caller-facing classification of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, detected before any work is queued.
    InvalidArgument,
    /// An account or transaction does not exist.
    NotFound,
    /// A business rule rejected the operation.
    BusinessRule,
    /// The service is shutting down or the job was not started in time.
    ServiceUnavailable,
    /// The underlying store failed.
    StorageFailure,
}

/// Main error type for Ledgerline operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Invalid input.
    #[error("{message}")]
    InvalidArgument {
        message: String,
        field: Option<String>,
    },

    /// Account not found.
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// Source account of a transfer not found.
    #[error("from account not found: {0}")]
    SourceAccountNotFound(AccountId),

    /// Destination account of a transfer not found.
    #[error("to account not found: {0}")]
    DestinationAccountNotFound(AccountId),

    /// Transaction record not found.
    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Balance too low for the requested debit.
    #[error("insufficient balance in account {account_id}: required {required}, available {available}")]
    InsufficientBalance {
        account_id: AccountId,
        required: Decimal,
        available: Decimal,
    },

    /// Transaction already has a reversal.
    #[error("transaction {0} has already been reversed")]
    AlreadyReversed(TransactionId),

    /// Transaction is itself a reversal.
    #[error("transaction {0} is a reversal and cannot be reversed")]
    NotReversible(TransactionId),

    /// Service is shutting down.
    #[error("service is shutting down")]
    ServiceUnavailable,

    /// Job was not started before its deadline and was never applied.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Storage backend error.
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl LedgerError {
    /// Create an invalid argument error bound to a field.
    pub fn invalid_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        LedgerError::InvalidArgument {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a storage failure from any displayable error.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        LedgerError::StorageFailure(err.to_string())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            LedgerError::AccountNotFound(_)
            | LedgerError::SourceAccountNotFound(_)
            | LedgerError::DestinationAccountNotFound(_)
            | LedgerError::TransactionNotFound(_) => ErrorKind::NotFound,
            LedgerError::InsufficientBalance { .. }
            | LedgerError::AlreadyReversed(_)
            | LedgerError::NotReversible(_) => ErrorKind::BusinessRule,
            LedgerError::ServiceUnavailable | LedgerError::Timeout(_) => {
                ErrorKind::ServiceUnavailable
            }
            LedgerError::StorageFailure(_) => ErrorKind::StorageFailure,
        }
    }

    /// Check if resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ServiceUnavailable
                | LedgerError::Timeout(_)
                | LedgerError::StorageFailure(_)
        )
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::SourceAccountNotFound(_) => "FROM_ACCOUNT_NOT_FOUND",
            LedgerError::DestinationAccountNotFound(_) => "TO_ACCOUNT_NOT_FOUND",
            LedgerError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            LedgerError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LedgerError::AlreadyReversed(_) => "ALREADY_REVERSED",
            LedgerError::NotReversible(_) => "NOT_REVERSIBLE",
            LedgerError::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            LedgerError::Timeout(_) => "TIMEOUT",
            LedgerError::StorageFailure(_) => "STORAGE_FAILURE",
        }
    }

    /// Field that caused the error, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            LedgerError::InvalidArgument { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

/// Result type alias for Ledgerline operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
