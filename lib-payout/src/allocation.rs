//! Allocation Engine
//!
//! Distributes an aggregate repayment amount across a recipient's
//! outstanding principal lots. Lots with the largest daily repayment
//! obligation are drained first; each lot's draw in one pass is capped at
//! its own daily amount, so a large aggregate deposit cannot over-repay a
//! single lot. Whatever survives one full pass is returned as `remainder`
//! and the caller decides its fate (current policy: dropped).
//!
//! The engine only computes portions; persisting the principal decrements
//! and the matching repayment logs is the caller's job, and both must land
//! together (one transaction) or be replayable through the logs' unique key.

use crate::errors::{PayoutError, PayoutResult};
use crate::types::Amount;

/// Snapshot of one lot's repayment state as input to a pass
#[derive(Debug, Clone)]
pub struct AllocationLot {
    pub lot_id: String,
    pub principal_remaining: Amount,
    pub daily_amount: Amount,
}

/// One lot's share of an allocation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPortion {
    pub lot_id: String,
    pub amount: Amount,
    pub new_remaining: Amount,
}

/// Outcome of one pass: portions in application order plus whatever could
/// not be placed.
#[derive(Debug, Clone, Default)]
pub struct AllocationOutcome {
    pub portions: Vec<AllocationPortion>,
    pub remainder: Amount,
}

impl AllocationOutcome {
    /// Total actually applied against principal
    pub fn allocated(&self) -> Amount {
        self.portions.iter().map(|p| p.amount).sum()
    }
}

/// Daily allocation pass: each lot's draw capped at its `daily_amount`.
pub fn allocate(amount_to_apply: Amount, lots: &[AllocationLot]) -> PayoutResult<AllocationOutcome> {
    run_pass(amount_to_apply, lots, true)
}

/// Administrative pass with no per-lot daily cap; draws are limited only by
/// each lot's remaining principal. Used by manual repayment entry.
pub fn allocate_uncapped(
    amount_to_apply: Amount,
    lots: &[AllocationLot],
) -> PayoutResult<AllocationOutcome> {
    run_pass(amount_to_apply, lots, false)
}

fn run_pass(
    amount_to_apply: Amount,
    lots: &[AllocationLot],
    capped: bool,
) -> PayoutResult<AllocationOutcome> {
    if amount_to_apply < 0 {
        return Err(PayoutError::NegativeAmount(amount_to_apply));
    }

    // Largest daily obligation first; lot id as a stable tie-break.
    let mut ordered: Vec<&AllocationLot> = lots.iter().collect();
    ordered.sort_by(|a, b| {
        b.daily_amount
            .cmp(&a.daily_amount)
            .then_with(|| a.lot_id.cmp(&b.lot_id))
    });

    let mut remaining = amount_to_apply;
    let mut portions = Vec::new();

    for lot in ordered {
        if remaining <= 0 {
            break;
        }
        // Drained lots are skipped, not errors.
        if lot.principal_remaining <= 0 {
            continue;
        }

        let cap = if capped { lot.daily_amount } else { lot.principal_remaining };
        let portion = lot.principal_remaining.min(remaining).min(cap);
        if portion <= 0 {
            continue;
        }

        portions.push(AllocationPortion {
            lot_id: lot.lot_id.clone(),
            amount: portion,
            new_remaining: lot.principal_remaining - portion,
        });
        remaining -= portion;
    }

    Ok(AllocationOutcome {
        portions,
        remainder: remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot(id: &str, remaining: Amount, daily: Amount) -> AllocationLot {
        AllocationLot {
            lot_id: id.into(),
            principal_remaining: remaining,
            daily_amount: daily,
        }
    }

    #[test]
    fn caps_each_lot_at_its_daily_amount() {
        // remaining [100, 50], daily [30, 20], aggregate 45 -> [30, 15]
        let lots = vec![lot("a", 100, 30), lot("b", 50, 20)];
        let out = allocate(45, &lots).unwrap();
        assert_eq!(
            out.portions,
            vec![
                AllocationPortion { lot_id: "a".into(), amount: 30, new_remaining: 70 },
                AllocationPortion { lot_id: "b".into(), amount: 15, new_remaining: 35 },
            ]
        );
        assert_eq!(out.remainder, 0);
        assert_eq!(out.allocated(), 45);
    }

    #[test]
    fn leftover_after_full_pass_is_returned_as_remainder() {
        let lots = vec![lot("a", 40, 10)];
        let out = allocate(50, &lots).unwrap();
        assert_eq!(out.portions.len(), 1);
        assert_eq!(out.portions[0].amount, 10);
        assert_eq!(out.remainder, 40);
    }

    #[test]
    fn orders_by_daily_amount_descending() {
        let lots = vec![lot("small", 100, 5), lot("big", 100, 50)];
        let out = allocate(20, &lots).unwrap();
        assert_eq!(out.portions[0].lot_id, "big");
        assert_eq!(out.portions[0].amount, 20);
        assert_eq!(out.remainder, 0);
    }

    #[test]
    fn stops_early_when_amount_is_exhausted() {
        let lots = vec![lot("a", 100, 30), lot("b", 100, 30), lot("c", 100, 30)];
        let out = allocate(30, &lots).unwrap();
        assert_eq!(out.portions.len(), 1);
    }

    #[test]
    fn drained_lots_are_skipped() {
        let lots = vec![lot("empty", 0, 30), lot("live", 50, 30)];
        let out = allocate(30, &lots).unwrap();
        assert_eq!(out.portions.len(), 1);
        assert_eq!(out.portions[0].lot_id, "live");
    }

    #[test]
    fn portion_never_exceeds_remaining_principal() {
        let lots = vec![lot("a", 7, 30)];
        let out = allocate(30, &lots).unwrap();
        assert_eq!(out.portions[0].amount, 7);
        assert_eq!(out.portions[0].new_remaining, 0);
        assert_eq!(out.remainder, 23);
    }

    #[test]
    fn negative_amount_is_rejected() {
        let err = allocate(-1, &[]).unwrap_err();
        assert_eq!(err, PayoutError::NegativeAmount(-1));
    }

    #[test]
    fn zero_amount_is_a_clean_noop() {
        let lots = vec![lot("a", 100, 30)];
        let out = allocate(0, &lots).unwrap();
        assert!(out.portions.is_empty());
        assert_eq!(out.remainder, 0);
    }

    #[test]
    fn uncapped_pass_ignores_daily_amounts() {
        let lots = vec![lot("a", 40, 10)];
        let out = allocate_uncapped(50, &lots).unwrap();
        assert_eq!(out.portions[0].amount, 40);
        assert_eq!(out.remainder, 10);
    }
}
