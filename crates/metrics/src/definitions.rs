//! Metric name and label definitions.
//!
//! This module defines all metric names and common label keys used throughout inlet.

/// Receive pipeline metrics
pub mod receiver {
    /// Messages pushed from the receive loop into the relay
    pub const MESSAGES_RECEIVED_TOTAL: &str = "inlet_receiver_messages_received_total";
    /// Handler invocations that completed, successfully or not
    pub const MESSAGES_HANDLED_TOTAL: &str = "inlet_receiver_messages_handled_total";
    /// Handler invocations that returned an error or panicked
    pub const HANDLER_ERRORS_TOTAL: &str = "inlet_receiver_handler_errors_total";
    /// Failed attempts to open a receiver link
    pub const CONNECT_FAILURES_TOTAL: &str = "inlet_receiver_connect_failures_total";
    /// Receive failures on an open link
    pub const LINK_FAILURES_TOTAL: &str = "inlet_receiver_link_failures_total";
    /// Delay before the next reconnect attempt
    pub const BACKOFF_DELAY_SECONDS: &str = "inlet_receiver_backoff_delay_seconds";
    /// Messages waiting in the relay for a consumer
    pub const RELAY_DEPTH: &str = "inlet_receiver_relay_depth";
    /// Handler execution time in seconds
    pub const HANDLER_DURATION_SECONDS: &str = "inlet_receiver_handler_duration_seconds";
    /// Successful acknowledgments, labelled by outcome (`accept` / `redeliver`)
    pub const ACKNOWLEDGEMENTS_TOTAL: &str = "inlet_receiver_acknowledgements_total";
}

/// Common label keys used across metrics
pub mod labels {
    pub const OUTCOME: &str = "outcome";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Message handler duration buckets (in seconds)
    /// Covers 1ms to 2 minutes
    pub static HANDLER_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            120.0,
        ]
    });
}
