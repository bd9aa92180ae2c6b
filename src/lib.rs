// ============================================================================
// Furnishing Orders - Order consistency and synchronization core
// ============================================================================
//
// - domain/       - Order aggregate, line items, payments, subsystem views
// - audit/        - status log, modification log, change classifier
// - finance/      - totals recompute with payment protection
// - status/       - authoritative status resolution and badges
// - sync/         - coordinator keeping orders and subsystems converged
// - store/        - in-memory and Postgres persistence
// - service       - entry point for every mutation
// - worker/       - background jobs with retry and dead letter queue
// - http          - metrics, health and order API
//
// ============================================================================

pub mod audit;
pub mod config;
pub mod domain;
pub mod finance;
pub mod http;
pub mod integrations;
pub mod metrics;
pub mod service;
pub mod status;
pub mod store;
pub mod sync;
pub mod utils;
pub mod worker;
