//! Payout Service
//!
//! Batch engine and HTTP API for the daily payout run. The binary in
//! `main.rs` wires configuration, store, engine, and router together; the
//! pieces are exposed as a library so integration tests can drive them
//! directly.

pub mod api;
pub mod config;
pub mod engine;
