//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Outbound request settings.
    pub client: ClientConfig,

    /// Idle connection pool settings.
    pub pool: PoolConfig,

    /// Server-side admission control settings.
    pub limiter: LimiterConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Outbound request configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Connection establishment timeout in seconds (0 disables it).
    pub connect_timeout_secs: u64,

    /// Outbound bytes queued on a connected socket before `write` reports
    /// backpressure.
    pub write_high_water: usize,

    /// Largest response head accepted, in bytes.
    pub max_head_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            write_high_water: 16 * 1024,
            max_head_size: 64 * 1024,
        }
    }
}

impl ClientConfig {
    /// Connect timeout as a `Duration`, `None` when disabled.
    pub fn connect_timeout(&self) -> Option<Duration> {
        match self.connect_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Idle connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// How long a released connection may sit idle before it is closed,
    /// in milliseconds.
    ///
    /// The default is deliberately tiny: just long enough for a connection
    /// to be picked up again within the same loop turn, while giving a
    /// server that closes immediately a chance to be noticed first.
    pub idle_eviction_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_eviction_ms: 1,
        }
    }
}

impl PoolConfig {
    /// Eviction delay as a `Duration`.
    pub fn idle_eviction(&self) -> Duration {
        Duration::from_millis(self.idle_eviction_ms)
    }
}

/// Concurrency limiter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Maximum number of handlers executing at once.
    pub limit: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self { limit: 10 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
