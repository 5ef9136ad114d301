//! # Domain Layer
//!
//! Block entities and the pure scheduler state machine.

pub mod entities;
pub mod scheduler;

pub use entities::*;
pub use scheduler::*;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock seconds since the Unix epoch, 0 if the clock is before it
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
