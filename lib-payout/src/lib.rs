//! Daily Payout Engine Core
//!
//! Pure computation for a fixed-term lending/rewards product: depositors fund
//! investment lots, accrue daily interest split across three roles
//! (depositor, referrer, center), and receive straight-line principal
//! repayments into a virtual balance ledger.
//!
//! This crate holds the money arithmetic and the decision logic only. It does
//! no I/O: persistence lives in `lib-store`, the HTTP surface and batch
//! orchestration in `payoutd`.
//!
//! # Design Principles
//!
//! - **Integer math everywhere.** Amounts are fixed-point micro-units
//!   (`i64`), rates are basis points. Division truncates toward zero, so a
//!   given input always produces the same output on every platform.
//! - **Pure functions.** The accrual calculator and allocation engine take
//!   snapshots in and return outcomes out; callers decide what to persist.
//! - **Typed failures.** Missing rate configuration, negative amounts, and
//!   illegal status transitions are `PayoutError` variants, never silent
//!   defaults.

pub mod accrual;
pub mod allocation;
pub mod errors;
pub mod ledger;
pub mod rates;
pub mod transfer;
pub mod types;

pub use accrual::{compute_daily, DailyEntitlements, Entitlement, EntitlementSums};
pub use allocation::{allocate, allocate_uncapped, AllocationLot, AllocationOutcome, AllocationPortion};
pub use errors::{PayoutError, PayoutResult};
pub use ledger::LedgerReason;
pub use rates::{ActiveRates, RateRole, RateRule, RateSet};
pub use transfer::TransferStatus;
pub use types::{daily_interest, daily_repayment, Amount, InvestmentLot, Recipient, AMOUNT_SCALE};
