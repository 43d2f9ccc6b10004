//! Real-time client configuration.

use std::time::Duration;

use clinicsync_shared::HubMethods;

use crate::error::{RealtimeError, RealtimeResult};

/// Default hub endpoint, same-origin path of the API host.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:5000/hubs/clinic";

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Hub endpoint URL. `http(s)` URLs are converted to `ws(s)`.
    pub endpoint: String,
    /// Wait before each automatic reconnect attempt. Its length is the number
    /// of attempts before the connection is declared lost.
    pub reconnect_delays: Vec<Duration>,
    /// Attempts per group join.
    pub max_retries: u32,
    /// Wait between join attempts once `reconnect_delays` is exhausted.
    pub retry_fallback_delay: Duration,
    /// Wait before the manual reconnect after automatic reconnection gave up.
    pub manual_reconnect_delay: Duration,
    /// Period of the buffered-event flush while connected.
    pub buffer_flush_interval: Duration,
    /// Maximum events held while disconnected; the oldest is dropped first.
    pub max_buffered_events: usize,
    /// Keep-alive ping period of the WebSocket transport.
    pub keep_alive_interval: Duration,
    /// Remote method names for group membership.
    pub hub_methods: HubMethods,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect_delays: vec![
                Duration::ZERO,
                Duration::from_millis(1000),
                Duration::from_millis(5000),
                Duration::from_millis(10000),
            ],
            max_retries: 3,
            retry_fallback_delay: Duration::from_millis(1000),
            manual_reconnect_delay: Duration::from_secs(2),
            buffer_flush_interval: Duration::from_secs(5),
            max_buffered_events: 1000,
            keep_alive_interval: Duration::from_secs(15),
            hub_methods: HubMethods::default(),
        }
    }
}

impl RealtimeConfig {
    /// Create a configuration for the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Build a configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CLINICSYNC_HUB_URL`: hub endpoint (default: [`DEFAULT_ENDPOINT`])
    /// - `CLINICSYNC_RECONNECT_DELAYS_MS`: comma separated delays, e.g. `0,1000,5000`
    /// - `CLINICSYNC_MAX_RETRIES`: attempts per group join
    pub fn from_env() -> RealtimeResult<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("CLINICSYNC_HUB_URL") {
            config.endpoint = url;
        }
        if let Ok(delays) = std::env::var("CLINICSYNC_RECONNECT_DELAYS_MS") {
            config.reconnect_delays = parse_delays(&delays)?;
        }
        if let Ok(retries) = std::env::var("CLINICSYNC_MAX_RETRIES") {
            config.max_retries = retries.trim().parse().map_err(|_| {
                RealtimeError::config(format!("invalid CLINICSYNC_MAX_RETRIES: {retries}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the reconnect delay schedule.
    #[must_use]
    pub fn reconnect_delays(mut self, delays: Vec<Duration>) -> Self {
        self.reconnect_delays = delays;
        self
    }

    /// Set the reconnect delay schedule in milliseconds.
    #[must_use]
    pub fn reconnect_delays_ms(self, delays: &[u64]) -> Self {
        self.reconnect_delays(delays.iter().copied().map(Duration::from_millis).collect())
    }

    /// Set the number of attempts per group join.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn retry_fallback_delay(mut self, delay: Duration) -> Self {
        self.retry_fallback_delay = delay;
        self
    }

    #[must_use]
    pub fn manual_reconnect_delay(mut self, delay: Duration) -> Self {
        self.manual_reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn buffer_flush_interval(mut self, interval: Duration) -> Self {
        self.buffer_flush_interval = interval;
        self
    }

    #[must_use]
    pub fn max_buffered_events(mut self, max: usize) -> Self {
        self.max_buffered_events = max;
        self
    }

    #[must_use]
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    #[must_use]
    pub fn hub_methods(mut self, methods: HubMethods) -> Self {
        self.hub_methods = methods;
        self
    }

    /// Wait after the `attempt`-th failed join (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        attempt
            .checked_sub(1)
            .and_then(|i| self.reconnect_delays.get(i as usize))
            .copied()
            .unwrap_or(self.retry_fallback_delay)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> RealtimeResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(RealtimeError::config("endpoint cannot be empty"));
        }
        if self.max_retries == 0 {
            return Err(RealtimeError::config("max_retries must be > 0"));
        }
        if self.buffer_flush_interval.is_zero() {
            return Err(RealtimeError::config("buffer_flush_interval must be > 0"));
        }
        if self.keep_alive_interval.is_zero() {
            return Err(RealtimeError::config("keep_alive_interval must be > 0"));
        }
        if self.max_buffered_events == 0 {
            return Err(RealtimeError::config("max_buffered_events must be > 0"));
        }
        Ok(())
    }
}

fn parse_delays(raw: &str) -> RealtimeResult<Vec<Duration>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>().map(Duration::from_millis).map_err(|_| {
                RealtimeError::config(format!("invalid reconnect delay `{part}`"))
            })
        })
        .collect()
}
