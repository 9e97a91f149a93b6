use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the receive loop and the workers of one pipeline.
///
/// [`PipelineRunner::run`](crate::PipelineRunner::run) resets them when it
/// starts, so they always describe the current or most recent run.
#[derive(Debug, Default)]
pub struct PipelineStats {
    links_opened: AtomicU64,
    connect_failures: AtomicU64,
    link_failures: AtomicU64,
    received: AtomicU64,
    handled: AtomicU64,
    handler_failures: AtomicU64,
    peak_relay_depth: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub links_opened: u64,
    pub connect_failures: u64,
    pub link_failures: u64,
    /// Messages pushed into the relay.
    pub received: u64,
    /// Handler invocations that completed, successfully or not.
    pub handled: u64,
    /// Handler invocations that returned an error or panicked.
    pub handler_failures: u64,
    /// Most messages observed waiting in the relay at once.
    pub peak_relay_depth: u64,
}

impl PipelineStats {
    pub(crate) fn link_opened(&self) {
        self.links_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connect_failed(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn link_failed(&self) {
        self.link_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn relay_depth(&self, depth: usize) {
        self.peak_relay_depth
            .fetch_max(depth as u64, Ordering::Relaxed);
    }

    pub(crate) fn message_handled(&self, failed: bool) {
        self.handled.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.handler_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.links_opened,
            &self.connect_failures,
            &self.link_failures,
            &self.received,
            &self.handled,
            &self.handler_failures,
            &self.peak_relay_depth,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            links_opened: self.links_opened.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            link_failures: self.link_failures.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            peak_relay_depth: self.peak_relay_depth.load(Ordering::Relaxed),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_depth_keeps_the_peak() {
        let stats = PipelineStats::default();
        stats.relay_depth(2);
        stats.relay_depth(3);
        stats.relay_depth(1);
        assert_eq!(stats.snapshot().peak_relay_depth, 3);
    }

    #[test]
    fn reset_clears_every_counter() {
        let stats = PipelineStats::default();
        stats.link_opened();
        stats.connect_failed();
        stats.link_failed();
        stats.message_received();
        stats.message_handled(true);
        stats.relay_depth(4);
        assert_ne!(stats.snapshot(), PipelineStatsSnapshot::default());

        stats.reset();
        assert_eq!(stats.snapshot(), PipelineStatsSnapshot::default());
    }
}
