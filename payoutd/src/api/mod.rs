//! HTTP API
//!
//! JSON surface over the batch engine and store. Admin routes are open
//! (operator login lives in front of this service); the cron trigger routes
//! require the trusted-scheduler marker header or the configured token.

mod handlers;
mod middleware;

use std::sync::Arc;
use std::time::Duration;

use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::engine::PayoutEngine;

pub use middleware::scheduler_auth;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PayoutEngine>,
    pub scheduler_token: Option<String>,
}

/// Build the service router
pub fn router(engine: PayoutEngine, config: &ServiceConfig) -> Router {
    let state = AppState {
        engine: Arc::new(engine),
        scheduler_token: config.scheduler_token.clone(),
    };

    let cron_routes = Router::new()
        .route("/cron/payouts-calc", post(handlers::cron_payouts_calc))
        .route("/cron/payouts-deposit", post(handlers::cron_payouts_deposit))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            scheduler_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/payouts/calc", post(handlers::payouts_calc))
        .route("/payouts", get(handlers::payouts_get))
        .route("/payouts/deposit", post(handlers::payouts_deposit))
        .route("/repayments/create", post(handlers::repayments_create))
        .route("/lots/create", post(handlers::lots_create))
        .route("/ledger/entry", post(handlers::ledger_entry))
        .route("/ledger/:ref_code", get(handlers::ledger_get))
        .merge(cron_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .with_state(state)
}
