//! Interest Rate Resolution
//!
//! Annual rates are configured as a versioned rule table rather than
//! scattered constants: each rule covers one role over a date window, either
//! globally or for a single recipient. Resolution is a pure function over a
//! snapshot of the table.
//!
//! Precedence for `(role, as_of, ref_code)`:
//! 1. per-recipient rules applicable on `as_of` (latest `start_date` wins)
//! 2. global rules applicable on `as_of` (latest `start_date` wins)
//! 3. any open-ended global rule for the role
//!
//! No match is a configuration error for the whole calculation run, never a
//! silent zero.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::{PayoutError, PayoutResult};

/// The three income streams a lot generates every day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateRole {
    /// Interest credited to the lot owner
    Owner,
    /// Interest credited to the owner's referrer
    Referral,
    /// Interest credited to the owner's center operator
    Center,
}

impl RateRole {
    pub const ALL: &'static [RateRole] = &[RateRole::Owner, RateRole::Referral, RateRole::Center];
}

impl fmt::Display for RateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateRole::Owner => write!(f, "self"),
            RateRole::Referral => write!(f, "referral"),
            RateRole::Center => write!(f, "center"),
        }
    }
}

impl FromStr for RateRole {
    type Err = PayoutError;

    fn from_str(s: &str) -> PayoutResult<Self> {
        match s {
            "self" => Ok(RateRole::Owner),
            "referral" => Ok(RateRole::Referral),
            "center" => Ok(RateRole::Center),
            other => Err(PayoutError::UnknownRole(other.to_string())),
        }
    }
}

/// One rate rule row: a role's annual rate over a date window.
/// `ref_code = None` is a global rule; `end_date = None` is open-ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateRule {
    pub ref_code: Option<String>,
    pub role: RateRole,
    pub annual_rate_bps: u32,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl RateRule {
    fn covers(&self, as_of: NaiveDate) -> bool {
        self.start_date <= as_of && self.end_date.map_or(true, |end| end >= as_of)
    }
}

/// Annual rates (bps) resolved for one lot owner on one date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveRates {
    pub owner_bps: u32,
    pub referral_bps: u32,
    pub center_bps: u32,
}

/// Immutable snapshot of the rate rule table
#[derive(Debug, Clone, Default)]
pub struct RateSet {
    rules: Vec<RateRule>,
}

impl RateSet {
    pub fn new(rules: Vec<RateRule>) -> Self {
        Self { rules }
    }

    /// Resolve one role's annual rate for a recipient on a date.
    pub fn resolve(
        &self,
        role: RateRole,
        as_of: NaiveDate,
        ref_code: Option<&str>,
    ) -> PayoutResult<u32> {
        // Per-recipient override first
        if let Some(code) = ref_code {
            if let Some(bps) = self.best_match(role, as_of, Some(code)) {
                return Ok(bps);
            }
        }
        // Then global rules in the same window
        if let Some(bps) = self.best_match(role, as_of, None) {
            return Ok(bps);
        }
        // Last resort: any open-ended global rule for the role
        self.rules
            .iter()
            .find(|r| r.ref_code.is_none() && r.role == role && r.end_date.is_none())
            .map(|r| r.annual_rate_bps)
            .ok_or(PayoutError::MissingRate { role })
    }

    /// Resolve all three roles for a lot owner, or fail the run.
    pub fn resolve_all(&self, as_of: NaiveDate, ref_code: Option<&str>) -> PayoutResult<ActiveRates> {
        Ok(ActiveRates {
            owner_bps: self.resolve(RateRole::Owner, as_of, ref_code)?,
            referral_bps: self.resolve(RateRole::Referral, as_of, ref_code)?,
            center_bps: self.resolve(RateRole::Center, as_of, ref_code)?,
        })
    }

    fn best_match(&self, role: RateRole, as_of: NaiveDate, scope: Option<&str>) -> Option<u32> {
        self.rules
            .iter()
            .filter(|r| r.role == role && r.ref_code.as_deref() == scope && r.covers(as_of))
            .max_by_key(|r| r.start_date)
            .map(|r| r.annual_rate_bps)
    }
}
