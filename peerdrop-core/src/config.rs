//! Session tunables. Constants of the protocol, not negotiated with the peer.

use std::time::Duration;

use serde::Deserialize;

use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::wire::MAX_CHUNK_SIZE;

/// Which inbound traffic refreshes the heartbeat liveness timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LivenessPolicy {
    /// Any message proves the peer is alive.
    #[default]
    AnyMessage,
    /// Only `heartbeat` messages count.
    HeartbeatOnly,
}

/// Core configuration. Durations deserialize from milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Outbound chunk size in bytes (default 65536).
    pub chunk_size: usize,
    /// Interval between liveness pings and between liveness checks (default 5s).
    #[serde(rename = "heartbeat_interval_ms", with = "millis")]
    pub heartbeat_interval: Duration,
    /// Silence after which a closed channel is declared dead (default 15s).
    #[serde(rename = "heartbeat_timeout_ms", with = "millis")]
    pub heartbeat_timeout: Duration,
    /// Inbound transfer idle time before it is purged (default 30s).
    #[serde(rename = "transfer_timeout_ms", with = "millis")]
    pub transfer_timeout: Duration,
    /// How often inbound transfers are swept for timeouts (default 5s).
    #[serde(rename = "transfer_sweep_interval_ms", with = "millis")]
    pub transfer_sweep_interval: Duration,
    /// Chunks sent back to back before yielding to other work (default 10).
    pub yield_every: usize,
    pub liveness: LivenessPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            heartbeat_interval: Duration::from_millis(5_000),
            heartbeat_timeout: Duration::from_millis(15_000),
            transfer_timeout: Duration::from_millis(30_000),
            transfer_sweep_interval: Duration::from_millis(5_000),
            yield_every: 10,
            liveness: LivenessPolicy::AnyMessage,
        }
    }
}

impl Config {
    /// Reject values that would stall timers or the send loop, or chunks no frame can carry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Zero("chunk_size"));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::ChunkTooLarge(self.chunk_size));
        }
        if self.yield_every == 0 {
            return Err(ConfigError::Zero("yield_every"));
        }
        for (name, value) in [
            ("heartbeat_interval_ms", self.heartbeat_interval),
            ("heartbeat_timeout_ms", self.heartbeat_timeout),
            ("transfer_timeout_ms", self.transfer_timeout),
            ("transfer_sweep_interval_ms", self.transfer_sweep_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Zero(name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("chunk_size {0} does not fit in one frame (max {MAX_CHUNK_SIZE})")]
    ChunkTooLarge(usize),
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let c = Config::default();
        assert_eq!(c.chunk_size, 65_536);
        assert_eq!(c.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(c.heartbeat_timeout, Duration::from_secs(15));
        assert_eq!(c.transfer_timeout, Duration::from_secs(30));
        assert_eq!(c.transfer_sweep_interval, Duration::from_secs(5));
        assert_eq!(c.yield_every, 10);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_override_from_json() {
        let c: Config = serde_json::from_str(
            r#"{"chunk_size": 1024, "transfer_timeout_ms": 500, "liveness": "heartbeat-only"}"#,
        )
        .unwrap();
        assert_eq!(c.chunk_size, 1024);
        assert_eq!(c.transfer_timeout, Duration::from_millis(500));
        assert_eq!(c.liveness, LivenessPolicy::HeartbeatOnly);
        assert_eq!(c.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn zero_values_rejected() {
        let c = Config {
            yield_every: 0,
            ..Config::default()
        };
        assert!(matches!(c.validate(), Err(ConfigError::Zero("yield_every"))));
        let c = Config {
            heartbeat_timeout: Duration::ZERO,
            ..Config::default()
        };
        assert!(matches!(
            c.validate(),
            Err(ConfigError::Zero("heartbeat_timeout_ms"))
        ));
    }

    #[test]
    fn chunk_size_bounded_by_frame_limit() {
        let c = Config {
            chunk_size: MAX_CHUNK_SIZE,
            ..Config::default()
        };
        assert!(c.validate().is_ok());
        let c = Config {
            chunk_size: 13 * 1024 * 1024,
            ..Config::default()
        };
        assert!(matches!(
            c.validate(),
            Err(ConfigError::ChunkTooLarge(13_631_488))
        ));
    }
}
