//! Time utilities and constants for Ledgerline.

use chrono::{DateTime, Utc};

/// Operational timing defaults.
pub mod constants {
    use std::time::Duration;

    /// How long a submitter waits for a queued job (30 seconds).
    pub fn default_job_timeout() -> Duration {
        Duration::from_secs(30)
    }

    /// Grace period for in-flight HTTP requests at shutdown (10 seconds).
    pub fn shutdown_grace() -> Duration {
        Duration::from_secs(10)
    }
}

/// A timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp at storage precision.
pub fn now() -> Timestamp {
    to_storage_precision(Utc::now())
}

/// Truncate a timestamp to microseconds, the precision PostgreSQL keeps.
pub fn to_storage_precision(ts: Timestamp) -> Timestamp {
    use chrono::SubsecRound;
    ts.trunc_subsecs(6)
}
