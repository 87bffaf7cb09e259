//! Observability for the recovery coordinator
//!
//! - Structured logging (JSON lines)
//! - Typed events
//! - Atomic counters
//!
//! Observability is read-only: nothing here changes the outcome of a recovery.
//!
//! # Usage
//!
//! ```ignore
//! use tablet_recovery::observability::{Logger, RecoveryEvent, RecoveryMetrics};
//!
//! Logger::info(RecoveryEvent::HeadOfLogSelected, &[("segment_id", "91")]);
//!
//! let metrics = RecoveryMetrics::new();
//! metrics.increment_recoveries_started();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::RecoveryEvent;
pub use logger::{LogCapture, Logger, Severity};
pub use metrics::{MetricsSnapshot, RecoveryMetrics};
