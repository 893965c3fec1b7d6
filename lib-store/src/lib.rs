//! SQLite persistence for the daily payout engine
//!
//! Single queryable backend for lots, repayment states, payout transfers,
//! repayment logs, the balance ledger, recipients, and rate rules.
//!
//! # Features
//!
//! - WAL mode enabled for better concurrent performance
//! - Automatic schema migrations
//! - Async operations via sqlx
//! - Idempotent upserts on every replay-sensitive key
//! - The whole per-recipient deposit sequence runs in one transaction

pub mod store;

pub use store::{
    DepositOutcome, LedgerEntryRow, LedgerTotals, LotRow, ManualRepaymentOutcome, PayoutStore,
    RateRuleRow, RecipientRow, RepaymentStateRow, TransferDraft, TransferRow,
};
