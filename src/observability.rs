use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: workflow operations executed. Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "booking_operations_total";

/// Histogram: workflow operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "booking_operation_duration_seconds";

/// Counter: submissions/approvals rejected for overlapping a confirmed booking. Labels: operation.
pub const CONFLICTS_TOTAL: &str = "booking_conflicts_total";

/// Counter: recurring occurrences skipped at approval.
pub const OCCURRENCES_SKIPPED_TOTAL: &str = "booking_occurrences_skipped_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL append + fsync duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "booking_wal_flush_duration_seconds";

/// Map an operation result to a short status label for metrics.
pub fn status_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind_label(),
    }
}
