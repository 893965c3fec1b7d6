//! Batch Payout Engine
//!
//! Orchestrates the daily run over the store: preview and commit of computed
//! entitlements, the per-recipient deposit batch, and the administrative
//! settle-only shortcut.
//!
//! Deposit is a best-effort batch: one recipient's failure marks only their
//! transfer `failed` and never aborts the rest. The caller gets an itemized
//! report with a typed outcome per recipient.

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use lib_payout::{compute_daily, Amount, TransferStatus};
use lib_store::{DepositOutcome, PayoutStore, TransferDraft};

/// One recipient's computed or stored payout row
#[derive(Debug, Clone, Serialize)]
pub struct PayoutRow {
    pub ref_code: String,
    pub name: Option<String>,
    pub repay_amount: Amount,
    pub interest_amount: Amount,
    pub total_amount: Amount,
    pub status: String,
}

/// Aggregate sums over a set of payout rows
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PayoutSums {
    pub repay_sum: Amount,
    pub interest_sum: Amount,
    pub total_sum: Amount,
}

impl PayoutSums {
    fn accumulate(rows: &[PayoutRow]) -> Self {
        let mut sums = Self::default();
        for row in rows {
            sums.repay_sum += row.repay_amount;
            sums.interest_sum += row.interest_amount;
            sums.total_sum += row.total_amount;
        }
        sums
    }
}

/// Preview of a day's run (nothing persisted)
#[derive(Debug, Clone, Serialize)]
pub struct PreviewReport {
    pub date: NaiveDate,
    pub rows: Vec<PayoutRow>,
    pub sums: PayoutSums,
}

/// Result of committing a day's run as pending transfers
#[derive(Debug, Clone, Serialize)]
pub struct CommitReport {
    pub date: NaiveDate,
    pub upserted: u64,
    pub sums: PayoutSums,
}

/// Per-recipient outcome of the deposit batch
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecipientOutcome {
    /// Allocation applied and ledger credited
    Deposited {
        allocated: Amount,
        remainder: Amount,
        lots_touched: usize,
    },
    /// Transfer was no longer pending; nothing to do (safe retry)
    AlreadySettled,
    /// This recipient's sequence failed and their transfer is now `failed`
    Failed { reason: String },
}

/// Itemized result of one deposit batch
#[derive(Debug, Clone, Serialize)]
pub struct DepositReport {
    pub date: NaiveDate,
    pub results: Vec<RecipientResult>,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipientResult {
    pub ref_code: String,
    #[serde(flatten)]
    pub outcome: RecipientOutcome,
}

/// Batch orchestration over the payout store
#[derive(Clone)]
pub struct PayoutEngine {
    store: PayoutStore,
}

impl PayoutEngine {
    pub fn new(store: PayoutStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &PayoutStore {
        &self.store
    }

    /// Read-only accrual run for a date: computed rows plus sums.
    pub async fn preview(&self, date: NaiveDate) -> Result<PreviewReport> {
        let rows = self.compute_rows(date).await?;
        let sums = PayoutSums::accumulate(&rows);
        Ok(PreviewReport { date, rows, sums })
    }

    /// Compute and persist a date's entitlements as `pending` transfers.
    /// Rows already deposited for that date keep their committed amounts.
    pub async fn commit(&self, date: NaiveDate) -> Result<CommitReport> {
        let rows = self.compute_rows(date).await?;
        let sums = PayoutSums::accumulate(&rows);

        let drafts: Vec<TransferDraft> = rows
            .iter()
            .map(|row| TransferDraft {
                ref_code: row.ref_code.clone(),
                repay: row.repay_amount,
                interest: row.interest_amount,
            })
            .collect();

        let upserted = self.store.upsert_pending_transfers(date, &drafts).await?;
        info!(%date, upserted, total = sums.total_sum, "payout transfers committed");

        Ok(CommitReport { date, upserted, sums })
    }

    /// Stored rows for a date plus sums (what the admin screen lists).
    pub async fn stored(&self, date: NaiveDate) -> Result<PreviewReport> {
        let recipients = self.store.recipient_map().await?;
        let rows: Vec<PayoutRow> = self
            .store
            .list_transfers(date)
            .await?
            .into_iter()
            .map(|t| PayoutRow {
                name: recipients.get(&t.ref_code).and_then(|r| r.name.clone()),
                ref_code: t.ref_code,
                repay_amount: t.repay_amount,
                interest_amount: t.interest_amount,
                total_amount: t.total_amount,
                status: t.status,
            })
            .collect();
        let sums = PayoutSums::accumulate(&rows);
        Ok(PreviewReport { date, rows, sums })
    }

    /// Deposit every pending transfer for a date (optionally scoped to
    /// specific recipients): allocation, ledger credit, status transition,
    /// one recipient at a time, isolating failures.
    pub async fn deposit(
        &self,
        date: NaiveDate,
        ref_codes: Option<&[String]>,
    ) -> Result<DepositReport> {
        let targets: Vec<_> = self
            .store
            .list_transfers(date)
            .await?
            .into_iter()
            .filter(|t| {
                t.parsed_status().map_or(false, |s| s == TransferStatus::Pending)
                    && t.total_amount > 0
                    && ref_codes.map_or(true, |codes| codes.contains(&t.ref_code))
            })
            .collect();

        info!(%date, targets = targets.len(), "deposit batch starting");

        let mut results = Vec::with_capacity(targets.len());
        let (mut succeeded, mut skipped, mut failed) = (0usize, 0usize, 0usize);

        for transfer in targets {
            let outcome = match self.store.apply_deposit(&transfer.ref_code, date).await {
                Ok(DepositOutcome::Applied { allocated, remainder, lots_touched, .. }) => {
                    succeeded += 1;
                    RecipientOutcome::Deposited { allocated, remainder, lots_touched }
                }
                Ok(DepositOutcome::AlreadySettled) => {
                    skipped += 1;
                    RecipientOutcome::AlreadySettled
                }
                Err(e) => {
                    failed += 1;
                    warn!(ref_code = %transfer.ref_code, %date, error = %e, "deposit failed for recipient");
                    if let Err(mark_err) =
                        self.store.mark_transfer_failed(&transfer.ref_code, date).await
                    {
                        warn!(ref_code = %transfer.ref_code, error = %mark_err, "could not mark transfer failed");
                    }
                    RecipientOutcome::Failed { reason: e.to_string() }
                }
            };
            results.push(RecipientResult { ref_code: transfer.ref_code, outcome });
        }

        info!(%date, succeeded, skipped, failed, "deposit batch finished");

        Ok(DepositReport { date, results, succeeded, skipped, failed })
    }

    /// Administrative settle: flip pending transfers to `success` without
    /// allocation or ledger writes.
    pub async fn settle_only(
        &self,
        date: NaiveDate,
        ref_codes: Option<&[String]>,
    ) -> Result<u64> {
        let settled = self.store.settle_pending(date, ref_codes).await?;
        info!(%date, settled, "transfers settled without deposit");
        Ok(settled)
    }

    async fn compute_rows(&self, date: NaiveDate) -> Result<Vec<PayoutRow>> {
        let lots = self.store.lots().await?;
        let recipients = self.store.recipient_map().await?;
        let rates = self.store.rate_set().await?;

        let entitlements = compute_daily(date, &lots, &recipients, &rates)?;

        Ok(entitlements
            .rows
            .into_iter()
            .map(|(ref_code, ent)| PayoutRow {
                name: recipients.get(&ref_code).and_then(|r| r.name.clone()),
                ref_code,
                repay_amount: ent.repay,
                interest_amount: ent.interest(),
                total_amount: ent.total(),
                status: TransferStatus::Pending.to_string(),
            })
            .collect())
    }
}
