pub mod coordinator;
pub mod lock;
pub mod report;
pub mod retry;
pub mod worker;

use std::time::{SystemTime, UNIX_EPOCH};

pub use coordinator::{RaceCoordinator, RaceStatus};
pub use report::{RaceReport, TimingRecord, TokenReport};
pub use worker::{SegmentWorker, Step};

/// Wall clock in seconds since the epoch, as stored for token start times.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
