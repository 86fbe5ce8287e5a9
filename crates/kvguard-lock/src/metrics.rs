// Lock metrics
// Recorded through the `metrics` facade; the binary decides where they go

use metrics::{counter, describe_counter, describe_histogram, histogram};

pub const LOCK_ACQUIRE_TOTAL: &str = "kvguard_lock_acquire_total";
pub const LOCK_RELEASE_TOTAL: &str = "kvguard_lock_release_total";
pub const LOCK_ACQUIRE_DURATION: &str = "kvguard_lock_acquire_duration_seconds";

/// Register descriptions for the lock metrics
pub fn describe() {
    describe_counter!(
        LOCK_ACQUIRE_TOTAL,
        "Total number of lock acquisition attempts by outcome"
    );
    describe_counter!(LOCK_RELEASE_TOTAL, "Total number of lock releases by outcome");
    describe_histogram!(
        LOCK_ACQUIRE_DURATION,
        "Lock acquisition latency in seconds"
    );
}

/// How an acquisition attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    Refreshed,
    RefreshFailed,
    Contended,
    TimedOut,
    Closing,
    Error,
}

impl AcquireOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::Refreshed => "refreshed",
            Self::RefreshFailed => "refresh_failed",
            Self::Contended => "contended",
            Self::TimedOut => "timed_out",
            Self::Closing => "closing",
            Self::Error => "error",
        }
    }
}

pub fn record_acquire(outcome: AcquireOutcome, duration_secs: f64) {
    counter!(LOCK_ACQUIRE_TOTAL, "outcome" => outcome.as_str()).increment(1);
    histogram!(LOCK_ACQUIRE_DURATION).record(duration_secs);
}

pub fn record_release(outcome: &'static str) {
    counter!(LOCK_RELEASE_TOTAL, "outcome" => outcome).increment(1);
}
