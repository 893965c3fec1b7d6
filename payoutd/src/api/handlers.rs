//! API Handlers
//!
//! Thin JSON adapters over the engine and store. Validation (date format,
//! sign checks) happens here before any work; engine and store errors come
//! back as 500 with the error string, per-recipient deposit failures are
//! itemized inside a 200 batch report.

use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use lib_payout::{Amount, LedgerReason, PayoutError};

use super::AppState;

// ============================================================================
// Error Mapping
// ============================================================================

pub enum ApiError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(e) => {
                error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(PayoutError::BadDate(raw.to_string()).to_string()))
}

fn require_positive(amount: Amount) -> Result<Amount, ApiError> {
    if amount <= 0 {
        return Err(ApiError::BadRequest(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(amount)
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

// ============================================================================
// Health
// ============================================================================

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// Payout Runs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CalcRequest {
    pub date: String,
    #[serde(default)]
    pub commit: bool,
}

/// POST /payouts/calc: preview or commit a day's computation
pub async fn payouts_calc(
    State(state): State<AppState>,
    Json(req): Json<CalcRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let date = parse_date(&req.date)?;

    if !req.commit {
        let report = state.engine.preview(date).await?;
        return Ok(Json(json!({
            "date": report.date,
            "rows": report.rows,
            "sums": report.sums,
        })));
    }

    let report = state.engine.commit(date).await?;
    Ok(Json(json!({
        "date": report.date,
        "committed": true,
        "upserted": report.upserted,
        "sums": report.sums,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PayoutsQuery {
    pub date: String,
}

/// GET /payouts?date=: stored transfer rows plus sums
pub async fn payouts_get(
    State(state): State<AppState>,
    Query(query): Query<PayoutsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let date = parse_date(&query.date)?;
    let report = state.engine.stored(date).await?;
    Ok(Json(json!({
        "date": report.date,
        "data": report.rows,
        "sums": report.sums,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub date: String,
    #[serde(default)]
    pub settle_only: bool,
    #[serde(default)]
    pub ref_codes: Option<Vec<String>>,
}

/// POST /payouts/deposit: run allocation + ledger credit for every pending
/// transfer, or (settle_only) flip statuses without touching balances
pub async fn payouts_deposit(
    State(state): State<AppState>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let date = parse_date(&req.date)?;

    if req.settle_only {
        let settled = state
            .engine
            .settle_only(date, req.ref_codes.as_deref())
            .await?;
        return Ok(Json(json!({ "date": date, "settled": settled })));
    }

    let report = state.engine.deposit(date, req.ref_codes.as_deref()).await?;
    Ok(Json(json!({
        "date": report.date,
        "results": report.results,
        "succeeded": report.succeeded,
        "skipped": report.skipped,
        "failed": report.failed,
    })))
}

// ============================================================================
// Lots and Manual Repayments
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateLotRequest {
    pub ref_code: String,
    pub amount: Amount,
    pub invest_date: String,
    pub memo: Option<String>,
}

/// POST /lots/create: new investment lot; matures 365 days after the
/// investment date, repayment state starts at full principal
pub async fn lots_create(
    State(state): State<AppState>,
    Json(req): Json<CreateLotRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let invest_date = parse_date(&req.invest_date)?;
    let amount = require_positive(req.amount)?;
    let maturity_date = invest_date + Duration::days(365);

    let lot_id = state
        .engine
        .store()
        .create_lot(&req.ref_code, amount, invest_date, maturity_date, req.memo.as_deref())
        .await?;

    Ok(Json(json!({
        "ok": true,
        "lot_id": lot_id,
        "maturity_date": maturity_date,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ManualRepaymentRequest {
    pub ref_code: String,
    pub amount: Amount,
    pub memo: Option<String>,
    /// Defaults to today when omitted
    pub date: Option<String>,
}

/// POST /repayments/create: administrative principal reduction, bypassing
/// the automated daily-cap allocation path
pub async fn repayments_create(
    State(state): State<AppState>,
    Json(req): Json<ManualRepaymentRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let amount = require_positive(req.amount)?;
    let date = match &req.date {
        Some(raw) => parse_date(raw)?,
        None => today(),
    };

    let outcome = state
        .engine
        .store()
        .apply_manual_repayment(&req.ref_code, amount, date, req.memo.as_deref())
        .await?;

    Ok(Json(json!({
        "ok": true,
        "applied": outcome.applied,
        "remainder": outcome.remainder,
        "lots_touched": outcome.lots_touched,
    })))
}

// ============================================================================
// Ledger
// ============================================================================

/// GET /ledger/{ref_code}: balance totals plus entries, newest first
pub async fn ledger_get(
    State(state): State<AppState>,
    Path(ref_code): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let totals = state.engine.store().ledger_totals(&ref_code).await?;
    let entries = state.engine.store().list_ledger_entries(&ref_code).await?;
    Ok(Json(json!({
        "ref_code": ref_code,
        "totals": totals,
        "entries": entries,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LedgerEntryRequest {
    pub ref_code: String,
    pub date: String,
    pub reason: String,
    pub amount: Amount,
}

/// POST /ledger/entry: manual balance adjustment (topup/cashout) through
/// the same idempotent upsert the engine uses. Zero amounts are skipped.
pub async fn ledger_entry(
    State(state): State<AppState>,
    Json(req): Json<LedgerEntryRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let date = parse_date(&req.date)?;
    let reason = LedgerReason::from_str(&req.reason)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if req.amount < 0 {
        return Err(ApiError::BadRequest(format!(
            "amount must not be negative, got {}",
            req.amount
        )));
    }

    let inserted = state
        .engine
        .store()
        .post_ledger_entry(&req.ref_code, date, reason, req.amount)
        .await?;

    Ok(Json(json!({ "inserted": inserted })))
}

// ============================================================================
// Cron Triggers
// ============================================================================

/// POST /cron/payouts-calc: commit today's computation
pub async fn cron_payouts_calc(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let date = today();
    let report = state.engine.commit(date).await?;
    Ok(Json(json!({
        "ok": true,
        "step": "payouts-calc",
        "date": date,
        "upserted": report.upserted,
    })))
}

/// POST /cron/payouts-deposit: deposit today's pending transfers
pub async fn cron_payouts_deposit(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let date = today();
    let report = state.engine.deposit(date, None).await?;
    Ok(Json(json!({
        "ok": report.failed == 0,
        "step": "payouts-deposit",
        "date": date,
        "succeeded": report.succeeded,
        "skipped": report.skipped,
        "failed": report.failed,
    })))
}
