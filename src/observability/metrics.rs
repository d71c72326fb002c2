//! Metrics collection.
//!
//! # Metrics
//! - `h1_pool_acquire_total` (counter): acquisitions by outcome (`reused`, `connected`)
//! - `h1_pool_evictions_total` (counter): idle evictions by reason
//! - `h1_pool_idle_connections` (gauge): idle entries currently held
//! - `h1_requests_total` (counter): finished exchanges by outcome
//! - `h1_limiter_pending` (gauge): handlers currently executing
//! - `h1_limiter_queued` (gauge): requests waiting for a slot
//! - `h1_limiter_cancelled_total` (counter): queued requests cancelled
//!
//! # Design Decisions
//! - Only the `metrics` facade is used; exporting is the embedder's choice
//! - Labels are static strings to keep updates allocation-free

/// Record how a pool acquisition was satisfied.
pub fn record_acquire(reused: bool) {
    let outcome = if reused { "reused" } else { "connected" };
    metrics::counter!("h1_pool_acquire_total", "outcome" => outcome).increment(1);
}

/// Record an idle connection eviction.
pub fn record_eviction(reason: &'static str) {
    metrics::counter!("h1_pool_evictions_total", "reason" => reason).increment(1);
}

/// Record the current number of idle connections.
pub fn record_idle(count: usize) {
    metrics::gauge!("h1_pool_idle_connections").set(count as f64);
}

/// Record the final outcome of an outbound exchange.
pub fn record_exchange(outcome: &'static str) {
    metrics::counter!("h1_requests_total", "outcome" => outcome).increment(1);
}

/// Record limiter occupancy.
pub fn record_limiter(pending: usize, queued: usize) {
    metrics::gauge!("h1_limiter_pending").set(pending as f64);
    metrics::gauge!("h1_limiter_queued").set(queued as f64);
}

/// Record a queued request cancelled before dispatch.
pub fn record_cancelled() {
    metrics::counter!("h1_limiter_cancelled_total").increment(1);
}
