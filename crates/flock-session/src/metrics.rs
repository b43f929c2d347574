//! Session lifecycle counters
//!
//! - `session_refresh_total` (counter): label `outcome` (`success`, `failure`, `discarded`)
//! - `session_replayed_requests_total` (counter)
//! - `session_rejected_requests_total` (counter)
//! - `session_terminations_total` (counter): label `reason`
//!
//! Without an installed recorder these calls are no-ops.

/// Record the outcome of one refresh call.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("session_refresh_total", "outcome" => outcome).increment(1);
}

pub fn record_replayed(count: u64) {
    metrics::counter!("session_replayed_requests_total").increment(count);
}

pub fn record_rejected(count: u64) {
    metrics::counter!("session_rejected_requests_total").increment(count);
}

pub fn record_termination(reason: &'static str) {
    metrics::counter!("session_terminations_total", "reason" => reason).increment(1);
}
