//! Payout Transfer Lifecycle
//!
//! One transfer record exists per (recipient, date). Its status is the only
//! field later writers may mutate, and only along the legal edges:
//!
//! ```text
//! pending ──> sent      (deposit ran: allocation + ledger credit)
//! pending ──> success   (administrative settle-only)
//! pending ──> failed    (deposit attempt errored)
//! ```
//!
//! `sent`, `success`, and `failed` are terminal; re-entering `pending` is
//! never valid.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{PayoutError, PayoutResult};

/// Lifecycle state of a payout transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Sent,
    Success,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }

    /// Whether the edge `self -> next` is legal.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        matches!(
            (self, next),
            (
                TransferStatus::Pending,
                TransferStatus::Sent | TransferStatus::Success | TransferStatus::Failed
            )
        )
    }

    /// Validate and take the edge `self -> next`.
    pub fn transition_to(self, next: TransferStatus) -> PayoutResult<TransferStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PayoutError::InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Pending => write!(f, "pending"),
            TransferStatus::Sent => write!(f, "sent"),
            TransferStatus::Success => write!(f, "success"),
            TransferStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TransferStatus {
    type Err = PayoutError;

    fn from_str(s: &str) -> PayoutResult<Self> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "sent" => Ok(TransferStatus::Sent),
            "success" => Ok(TransferStatus::Success),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(PayoutError::UnknownStatus(other.to_string())),
        }
    }
}
