//! Shared utilities for the apollonnode layer.
//!
//! - **pending**: expiring request bookkeeping with an injected clock
//! - **stats**: per-command traffic counters
//! - **time**: duration formatting for logs

pub mod pending;
pub mod stats;
pub mod time;

pub use pending::{PendingRequestTracker, RequestToken};
pub use stats::{CommandStats, TrafficStats};
pub use time::format_duration;
