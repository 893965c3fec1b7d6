//! Payout Engine Errors

use thiserror::Error;

use crate::rates::RateRole;
use crate::transfer::TransferStatus;
use crate::types::Amount;

/// Error during payout computation or lifecycle handling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayoutError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    BadDate(String),

    #[error("negative amount: {0}")]
    NegativeAmount(Amount),

    #[error("no applicable {role} interest rate")]
    MissingRate { role: RateRole },

    #[error("invalid transfer transition: {from} -> {to}")]
    InvalidTransition {
        from: TransferStatus,
        to: TransferStatus,
    },

    #[error("unknown transfer status: {0}")]
    UnknownStatus(String),

    #[error("unknown ledger reason: {0}")]
    UnknownReason(String),

    #[error("unknown rate role: {0}")]
    UnknownRole(String),
}

/// Result type for payout operations
pub type PayoutResult<T> = Result<T, PayoutError>;
