//! Balance Ledger Semantics
//!
//! A recipient's displayed balance is the sum of their ledger entries.
//! Entries are keyed (recipient, date, reason) and stored with a **signed**
//! amount: payouts credit the balance, top-ups and cash-outs debit it. A
//! repeat post to the same key replaces the stored amount, so a retried
//! deposit never double-credits.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{PayoutError, PayoutResult};
use crate::types::Amount;

/// Why a ledger entry exists; determines the stored sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerReason {
    /// Daily payout credit (repay + interest)
    Payout,
    /// Balance moved back into a new investment lot
    Topup,
    /// Balance exchanged out for cash
    Cashout,
}

impl LedgerReason {
    pub fn is_credit(&self) -> bool {
        matches!(self, LedgerReason::Payout)
    }

    /// Convert a non-negative magnitude into the signed stored amount.
    /// Negative magnitudes are rejected before any work happens.
    pub fn signed_amount(&self, magnitude: Amount) -> PayoutResult<Amount> {
        if magnitude < 0 {
            return Err(PayoutError::NegativeAmount(magnitude));
        }
        Ok(if self.is_credit() { magnitude } else { -magnitude })
    }
}

impl fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerReason::Payout => write!(f, "payout"),
            LedgerReason::Topup => write!(f, "topup"),
            LedgerReason::Cashout => write!(f, "cashout"),
        }
    }
}

impl FromStr for LedgerReason {
    type Err = PayoutError;

    fn from_str(s: &str) -> PayoutResult<Self> {
        match s {
            "payout" => Ok(LedgerReason::Payout),
            "topup" => Ok(LedgerReason::Topup),
            "cashout" => Ok(LedgerReason::Cashout),
            other => Err(PayoutError::UnknownReason(other.to_string())),
        }
    }
}
