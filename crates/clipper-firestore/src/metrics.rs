//! Document store metrics.

use std::time::Duration;

use metrics::{counter, histogram};

pub mod names {
    /// Calls by operation, collection and HTTP status.
    pub const CALLS_TOTAL: &str = "clipper_firestore_calls_total";
    pub const CALL_SECONDS: &str = "clipper_firestore_call_seconds";
    /// Credit debits retried after a concurrent write.
    pub const DEBIT_RETRIES_TOTAL: &str = "clipper_firestore_debit_retries_total";
}

pub fn record_call(operation: &str, collection: &str, status: u16, elapsed: Duration) {
    counter!(
        names::CALLS_TOTAL,
        "operation" => operation.to_string(),
        "collection" => collection.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(names::CALL_SECONDS, "operation" => operation.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_debit_retry() {
    counter!(names::DEBIT_RETRIES_TOTAL).increment(1);
}
