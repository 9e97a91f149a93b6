//! Metrics collection and export for inlet.
//!
//! Metric names live in [`receiver`]; record them with the re-exported
//! `metrics` facade macros. Without an installed recorder they are no-ops.
//! With the `prometheus` feature, [`init_metrics`] installs a Prometheus
//! recorder and the returned [`MetricsHandle`] renders exposition text.
//!
//! ```rust,ignore
//! use inlet_metrics::{counter, receiver};
//!
//! counter!(receiver::MESSAGES_RECEIVED_TOTAL).increment(1);
//! ```

mod definitions;
pub mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
