//! Core domain types and money arithmetic

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Fixed-point monetary amount in micro-units (1e-6 of the settlement
/// currency). Signed: ledger debits are stored negative.
pub type Amount = i64;

/// Micro-units per whole currency unit
pub const AMOUNT_SCALE: Amount = 1_000_000;

/// Straight-line amortization term and accrual denominator
pub const DAYS_PER_YEAR: i64 = 365;

/// Basis-point denominator (10_000 bps = 100%)
pub const BPS_DENOMINATOR: i64 = 10_000;

/// Today's principal repayment for one lot: `principal / 365`, truncated.
pub fn daily_repayment(principal: Amount) -> Amount {
    principal / DAYS_PER_YEAR
}

/// Today's interest for one lot at an annual rate in basis points:
/// `principal * rate / (10_000 * 365)`, computed in i128 and truncated.
pub fn daily_interest(principal: Amount, annual_rate_bps: u32) -> Amount {
    let numerator = principal as i128 * annual_rate_bps as i128;
    (numerator / (BPS_DENOMINATOR as i128 * DAYS_PER_YEAR as i128)) as Amount
}

/// One discrete investment with its own principal and maturity window.
///
/// Immutable once created; principal reduction is tracked separately in the
/// lot's repayment state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestmentLot {
    pub id: String,
    pub ref_code: String,
    pub principal: Amount,
    pub invest_date: NaiveDate,
    pub maturity_date: NaiveDate,
    pub memo: Option<String>,
}

impl InvestmentLot {
    /// A lot accrues on `date` iff `invest_date <= date <= maturity_date`.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.invest_date <= date && date <= self.maturity_date
    }
}

/// A ref-coded account that can receive repayment or interest, with its
/// referral chain. Owned by onboarding; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub ref_code: String,
    pub name: Option<String>,
    pub referrer_code: Option<String>,
    pub center_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_repayment_truncates() {
        // 1000.000000 currency units over 365 days
        assert_eq!(daily_repayment(1_000 * AMOUNT_SCALE), 2_739_726);
        assert_eq!(daily_repayment(0), 0);
        assert_eq!(daily_repayment(364), 0);
    }

    #[test]
    fn daily_interest_matches_annual_rate() {
        let principal = 1_000 * AMOUNT_SCALE;
        // 60%/yr on 1000 -> 1.643835 per day
        assert_eq!(daily_interest(principal, 6_000), 1_643_835);
        // 12%/yr -> 0.328767
        assert_eq!(daily_interest(principal, 1_200), 328_767);
        // 24%/yr -> 0.657534
        assert_eq!(daily_interest(principal, 2_400), 657_534);
        assert_eq!(daily_interest(principal, 0), 0);
    }

    #[test]
    fn lot_activity_window_is_inclusive() {
        let lot = InvestmentLot {
            id: "lot-1".into(),
            ref_code: "R001".into(),
            principal: AMOUNT_SCALE,
            invest_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            maturity_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            memo: None,
        };
        assert!(lot.is_active_on(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        assert!(lot.is_active_on(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()));
        assert!(!lot.is_active_on(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()));
        assert!(!lot.is_active_on(NaiveDate::from_ymd_opt(2026, 1, 2).unwrap()));
    }
}
