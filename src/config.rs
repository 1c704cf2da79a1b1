//! Client configuration.
//!
//! All knobs have defaults; only the endpoint is required. Values can also
//! be taken from the environment:
//!
//! | Variable                        | Field             |
//! |---------------------------------|-------------------|
//! | `RPCSTREAM_ENDPOINT`            | `endpoint`        |
//! | `RPCSTREAM_CONNECT_TIMEOUT_MS`  | `connect_timeout` |
//! | `RPCSTREAM_READ_TIMEOUT_MS`     | `read_timeout`    |

use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::events::DEFAULT_EVENT_CHANNEL_CAPACITY;
use crate::protocol::DEFAULT_MAX_FRAGMENT_LEN;

/// Default bound for connecting, also used as the write deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default force-complete bound for a single background read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable holding the endpoint URI.
pub const ENV_ENDPOINT: &str = "RPCSTREAM_ENDPOINT";
/// Environment variable holding the connect timeout in milliseconds.
pub const ENV_CONNECT_TIMEOUT_MS: &str = "RPCSTREAM_CONNECT_TIMEOUT_MS";
/// Environment variable holding the read timeout in milliseconds.
pub const ENV_READ_TIMEOUT_MS: &str = "RPCSTREAM_READ_TIMEOUT_MS";

/// Configuration for a [`StreamingClient`](crate::StreamingClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8546`.
    pub endpoint: String,
    /// Bound for connect and for each write.
    pub connect_timeout: Duration,
    /// Bound for each background read. The listener stops when it elapses.
    pub read_timeout: Duration,
    /// Capacity of the push-event broadcast channel.
    pub event_channel_capacity: usize,
    /// Largest incomplete message kept between reads, in bytes.
    pub max_fragment_len: usize,
}

impl ClientConfig {
    /// Configuration with defaults for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            max_fragment_len: DEFAULT_MAX_FRAGMENT_LEN,
        }
    }

    /// Build from the `RPCSTREAM_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let endpoint = lookup(ENV_ENDPOINT)
            .ok_or_else(|| ClientError::Config(format!("{} is not set", ENV_ENDPOINT)))?;
        let mut config = Self::new(endpoint);

        if let Some(ms) = lookup(ENV_CONNECT_TIMEOUT_MS) {
            config.connect_timeout = parse_millis(ENV_CONNECT_TIMEOUT_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_READ_TIMEOUT_MS) {
            config.read_timeout = parse_millis(ENV_READ_TIMEOUT_MS, &ms)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ClientError::Config("endpoint must not be empty".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(ClientError::Config(
                "connect timeout must be non-zero".to_string(),
            ));
        }
        if self.read_timeout.is_zero() {
            return Err(ClientError::Config("read timeout must be non-zero".to_string()));
        }
        if self.event_channel_capacity == 0 {
            return Err(ClientError::Config(
                "event channel capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_millis(name: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ClientError::Config(format!("{}={:?}: {}", name, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("ws://localhost:8546");
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.read_timeout, DEFAULT_READ_TIMEOUT);
        assert_eq!(config.event_channel_capacity, DEFAULT_EVENT_CHANNEL_CAPACITY);
        assert_eq!(config.max_fragment_len, DEFAULT_MAX_FRAGMENT_LEN);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_ENDPOINT, "ws://node:8546"),
            (ENV_CONNECT_TIMEOUT_MS, "1500"),
            (ENV_READ_TIMEOUT_MS, " 60000 "),
        ]))
        .unwrap();

        assert_eq!(config.endpoint, "ws://node:8546");
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.read_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_from_lookup_missing_endpoint() {
        let err = ClientConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains(ENV_ENDPOINT));
    }

    #[test]
    fn test_from_lookup_bad_number() {
        let err = ClientConfig::from_lookup(lookup(&[
            (ENV_ENDPOINT, "ws://node:8546"),
            (ENV_CONNECT_TIMEOUT_MS, "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = ClientConfig::new("ws://localhost:8546");
        config.connect_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::new("ws://localhost:8546");
        config.read_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        assert!(ClientConfig::new("  ").validate().is_err());
    }
}
