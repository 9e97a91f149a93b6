use std::{num::NonZeroUsize, time::Duration};

use inlet_config::ReceiverConfig;

use crate::{
    backoff::Backoff,
    error::{Error, Result},
};

/// Validated receiver settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverOptions {
    pub name: String,
    pub address: String,
    /// Relay capacity and number of concurrent handler invocations.
    pub max_concurrency: NonZeroUsize,
    pub receive_timeout: Duration,
    /// Pause after a receive wait that timed out with no message.
    pub idle_pause: Duration,
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
}

impl ReceiverOptions {
    /// Validate `config`, failing fast on missing or out-of-range settings.
    pub fn from_config(config: &ReceiverConfig) -> Result<Self> {
        config.check().map_err(Error::configuration)?;
        let max_concurrency = NonZeroUsize::new(config.max_concurrency)
            .ok_or_else(|| Error::configuration("receiver.max_concurrency must be at least 1"))?;

        Ok(Self {
            name: config.name.trim().to_string(),
            address: config.address.trim().to_string(),
            max_concurrency,
            receive_timeout: Duration::from_secs(config.receive_timeout_secs),
            idle_pause: Duration::from_millis(config.idle_pause_ms),
            backoff_floor: Duration::from_millis(config.backoff_floor_ms),
            backoff_ceiling: Duration::from_millis(config.backoff_ceiling_ms),
        })
    }

    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_floor, self.backoff_ceiling)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn config(name: &str, address: &str, max_concurrency: usize) -> ReceiverConfig {
        ReceiverConfig {
            name: name.into(),
            address: address.into(),
            max_concurrency,
            ..Default::default()
        }
    }

    #[test]
    fn defaults_match_documented_timings() {
        let options = ReceiverOptions::from_config(&config("r", "orders", 3)).unwrap();
        assert_eq!(options.max_concurrency.get(), 3);
        assert_eq!(options.receive_timeout, Duration::from_secs(10));
        assert_eq!(options.idle_pause, Duration::from_secs(1));
        assert_eq!(options.backoff_floor, Duration::from_secs(1));
        assert_eq!(options.backoff_ceiling, Duration::from_secs(10));
    }

    #[rstest]
    #[case("", "orders", 1, "receiver.name")]
    #[case("   ", "orders", 1, "receiver.name")]
    #[case("r", "", 1, "receiver.address")]
    #[case("r", "orders", 0, "receiver.max_concurrency")]
    #[case("r", "orders", usize::MAX, "receiver.max_concurrency")]
    fn rejects_invalid_settings(
        #[case] name: &str,
        #[case] address: &str,
        #[case] max_concurrency: usize,
        #[case] field: &str,
    ) {
        let err = ReceiverOptions::from_config(&config(name, address, max_concurrency)).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains(field), "{err}");
    }
}
