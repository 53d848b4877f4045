//! Configuration for the outbox.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::protocol::Priority;
use crate::store::PageOptions;

const MIB: u64 = 1024 * 1024;

/// Outbox settings as seen by the agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Durable buffering. When off, messages sent while disconnected are dropped.
    pub enabled: bool,
    /// Directory holding one queue directory per priority class.
    pub dir: PathBuf,
    /// On-disk capacity of the prioritized queue in bytes.
    pub prioritized_size: u64,
    /// On-disk capacity of the unprioritized queue in bytes.
    pub unprioritized_size: u64,
    /// How often each queue checks its footprint.
    pub reclaim_interval_secs: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_dir(),
            prioritized_size: 100 * MIB,
            unprioritized_size: 500 * MIB,
            reclaim_interval_secs: 10,
        }
    }
}

impl BufferConfig {
    /// Load from `OUTBOX_*` environment variables (and `.env`), falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(enabled) = lookup("OUTBOX_ENABLED") {
            config.enabled = parse_bool("OUTBOX_ENABLED", &enabled)?;
        }
        if let Some(dir) = lookup("OUTBOX_DIR") {
            config.dir = PathBuf::from(dir);
        }
        if let Some(size) = lookup("OUTBOX_PRIORITIZED_SIZE") {
            config.prioritized_size = parse("OUTBOX_PRIORITIZED_SIZE", &size)?;
        }
        if let Some(size) = lookup("OUTBOX_UNPRIORITIZED_SIZE") {
            config.unprioritized_size = parse("OUTBOX_UNPRIORITIZED_SIZE", &size)?;
        }
        if let Some(secs) = lookup("OUTBOX_RECLAIM_INTERVAL_SECS") {
            config.reclaim_interval_secs = parse("OUTBOX_RECLAIM_INTERVAL_SECS", &secs)?;
        }

        Ok(config)
    }

    /// Queue directory of a priority class.
    pub fn ring_dir(&self, priority: Priority) -> PathBuf {
        self.dir.join(priority.name())
    }

    /// Ring settings for a priority class.
    pub fn ring_options(&self, priority: Priority) -> RingOptions {
        let capacity = match priority {
            Priority::Prioritized => self.prioritized_size,
            Priority::Unprioritized => self.unprioritized_size,
        };
        RingOptions::with_capacity(capacity)
            .with_reclaim_interval(Duration::from_secs(self.reclaim_interval_secs.max(1)))
    }
}

/// Settings of a single durable ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingOptions {
    /// Upper bound on the ring's on-disk footprint.
    pub capacity_bytes: u64,
    /// Page geometry of the underlying store.
    pub pages: PageOptions,
    /// Reclamation starts this many bytes before the capacity is reached.
    pub reclaim_margin: u64,
    /// Interval between periodic footprint checks.
    pub reclaim_interval: Duration,
}

impl RingOptions {
    pub fn with_capacity(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            pages: PageOptions::default(),
            reclaim_margin: MIB,
            reclaim_interval: Duration::from_secs(10),
        }
    }

    pub fn with_pages(mut self, pages: PageOptions) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_reclaim_margin(mut self, margin: u64) -> Self {
        self.reclaim_margin = margin;
        self
    }

    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    /// Check that the capacity can hold at least one entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pages
            .validate()
            .map_err(|e| ConfigError::InvalidPageSize {
                reason: e.to_string(),
            })?;

        let minimum = self.pages.minimum_footprint();
        if self.capacity_bytes < minimum {
            return Err(ConfigError::CapacityTooSmall {
                capacity: self.capacity_bytes,
                minimum,
            });
        }
        if self.reclaim_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "reclaim_interval".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn default_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ironclaw")
        .join("outbox")
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{}': {}", value, e),
        })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{}' is not a boolean", value),
        }),
    }
}
