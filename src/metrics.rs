use tracing::{error, trace};

// Lightweight metric helpers emitted as trace events; the Prometheus recorder
// in main captures the HTTP-level series.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "crosslist.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn retry_wait(attempt: u32, wait_ms: u128) {
    trace!(
        target = "crosslist.metrics",
        attempt,
        wait_ms = wait_ms as u64,
        "retry_backoff_wait"
    );
}

pub fn target_finished(kind: &'static str, status: &str) {
    trace!(
        target = "crosslist.metrics",
        kind = kind,
        status = status,
        "replication_target_finished"
    );
}

/// Ledger writes that fail after the external mutation already happened are
/// an operational alert, not a business error.
pub fn ledger_write_failure(after_external_mutation: bool) {
    error!(
        target = "crosslist.metrics",
        after_external_mutation, "ledger_write_failure"
    );
}
