//! Lot Accrual Calculator
//!
//! Computes each recipient's daily entitlement from the active investment
//! lots: a straight-line principal repayment to the lot owner plus interest
//! split across owner, referrer, and center at the rates in force for the
//! lot owner on that date.
//!
//! Fan-in is intentional: a recipient may earn repay/interest as a lot owner
//! and simultaneously as referrer or center for other people's lots; all
//! streams accumulate into a single entitlement per recipient per date, which
//! becomes exactly one payout transfer row.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::errors::PayoutResult;
use crate::rates::RateSet;
use crate::types::{daily_interest, daily_repayment, Amount, InvestmentLot, Recipient};

/// One recipient's accumulated entitlement for a date, broken down by the
/// role the income was earned in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Entitlement {
    pub repay: Amount,
    pub interest_as_owner: Amount,
    pub interest_as_referrer: Amount,
    pub interest_as_center: Amount,
}

impl Entitlement {
    pub fn interest(&self) -> Amount {
        self.interest_as_owner + self.interest_as_referrer + self.interest_as_center
    }

    pub fn total(&self) -> Amount {
        self.repay + self.interest()
    }
}

/// Batch totals across all recipients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntitlementSums {
    pub repay_sum: Amount,
    pub interest_sum: Amount,
    pub total_sum: Amount,
}

/// Result of one daily accrual run: entitlements keyed by recipient ref_code
/// in stable (ascending) order.
#[derive(Debug, Clone, Default)]
pub struct DailyEntitlements {
    pub date: NaiveDate,
    pub rows: BTreeMap<String, Entitlement>,
}

impl DailyEntitlements {
    pub fn sums(&self) -> EntitlementSums {
        let mut sums = EntitlementSums::default();
        for ent in self.rows.values() {
            sums.repay_sum += ent.repay;
            sums.interest_sum += ent.interest();
            sums.total_sum += ent.total();
        }
        sums
    }
}

/// Compute every recipient's entitlement for `date`.
///
/// Lots outside their activity window or with non-positive principal are
/// skipped. Rates are resolved per lot owner; a missing rate aborts the whole
/// run. Referral/center interest is only earned where the owner actually has
/// a referrer/center on file.
pub fn compute_daily(
    date: NaiveDate,
    lots: &[InvestmentLot],
    recipients: &HashMap<String, Recipient>,
    rates: &RateSet,
) -> PayoutResult<DailyEntitlements> {
    let mut rows: BTreeMap<String, Entitlement> = BTreeMap::new();

    for lot in lots {
        if !lot.is_active_on(date) || lot.principal <= 0 {
            continue;
        }

        let owner = lot.ref_code.as_str();
        let active = rates.resolve_all(date, Some(owner))?;

        let repay = daily_repayment(lot.principal);
        let owner_interest = daily_interest(lot.principal, active.owner_bps);

        let entry = rows.entry(owner.to_string()).or_default();
        entry.repay += repay;
        entry.interest_as_owner += owner_interest;

        // Referral chain comes from the owner's recipient record; an owner
        // with no record has no referrer or center on file.
        let chain = recipients.get(owner);

        if let Some(referrer) = chain.and_then(|r| r.referrer_code.as_deref()) {
            let referral_interest = daily_interest(lot.principal, active.referral_bps);
            rows.entry(referrer.to_string()).or_default().interest_as_referrer +=
                referral_interest;
        }
        if let Some(center) = chain.and_then(|r| r.center_code.as_deref()) {
            let center_interest = daily_interest(lot.principal, active.center_bps);
            rows.entry(center.to_string()).or_default().interest_as_center += center_interest;
        }
    }

    Ok(DailyEntitlements { date, rows })
}
