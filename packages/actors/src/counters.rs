//! Operational counters.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use serde::Serialize;

pub const POLLS: &str = "font_worker_poll_total";
pub const MESSAGES_RECEIVED: &str = "font_worker_messages_received_total";
pub const MESSAGES_PROCESSED: &str = "font_worker_messages_processed_total";
pub const PROCESSING_ERRORS: &str = "font_worker_processing_errors_total";
pub const DEAD_LETTERED: &str = "font_worker_dead_lettered_total";
pub const STAGE_FAILURES: &str = "font_worker_stage_failures_total";
pub const PROCESSING_DURATION: &str = "font_worker_processing_duration_seconds";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(POLLS, Unit::Count, "Queue receive attempts.");
        describe_counter!(
            MESSAGES_RECEIVED,
            Unit::Count,
            "Messages delivered by the queue."
        );
        describe_counter!(
            MESSAGES_PROCESSED,
            Unit::Count,
            "Jobs completed, published and acknowledged."
        );
        describe_counter!(
            PROCESSING_ERRORS,
            Unit::Count,
            "Malformed messages and failed job attempts."
        );
        describe_counter!(
            DEAD_LETTERED,
            Unit::Count,
            "Messages given up on after too many deliveries."
        );
        describe_counter!(
            STAGE_FAILURES,
            Unit::Count,
            "Stage invocations that failed, labelled by stage."
        );
        describe_histogram!(
            PROCESSING_DURATION,
            Unit::Seconds,
            "Wall time of one job attempt, from receipt to log upload."
        );
    });
}

/// In-process mirror of the counters, for health checks and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub polls: u64,
    pub received: u64,
    pub processed: u64,
    pub errors: u64,
    pub dead_lettered: u64,
}
