//! Engine configuration
//!
//! Every field has a default, so an empty RON document `()` is a valid
//! configuration:
//!
//! ```ron
//! (
//!     request_timeout_ms: 10000,
//!     max_retries: 10,
//!     max_in_flight: 8,
//!     backoff: (initial_ms: 1000, max_ms: 60000, multiplier: 2.0),
//!     queue_path: Some("data/queue.db"),
//! )
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    10
}

fn default_max_in_flight() -> usize {
    8
}

fn default_connectivity_poll_ms() -> u64 {
    1_000
}

fn default_initial_ms() -> u64 {
    1_000
}

fn default_max_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

/// Exponential backoff between transient failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay after the first failure
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    /// Upper bound for any delay
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    /// Growth factor per further failure
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl BackoffConfig {
    /// Delay before retrying after `failures` consecutive failures
    ///
    /// `initial * multiplier^(failures - 1)`, capped at `max_ms`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(64) as i32;
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let ms = (self.initial_ms as f64 * multiplier.powi(exponent)).min(self.max_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
            multiplier: default_multiplier(),
        }
    }
}

/// Configuration for the sync engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Per-request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Transient failures tolerated before a command fails for good
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Commands in flight at once, across resources; read it through
    /// [`SyncConfig::max_in_flight`], which treats 0 as 1
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// How often connectivity is re-checked while idle
    #[serde(default = "default_connectivity_poll_ms")]
    pub connectivity_poll_ms: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Queue database file; in-memory queue when absent
    #[serde(default)]
    pub queue_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            max_in_flight: default_max_in_flight(),
            connectivity_poll_ms: default_connectivity_poll_ms(),
            backoff: BackoffConfig::default(),
            queue_path: None,
        }
    }
}

impl SyncConfig {
    /// Parse from a RON string
    pub fn from_ron_str(content: &str) -> Result<Self> {
        let config: SyncConfig =
            ron::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Load from a RON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_ron_str(&content)
    }

    /// Cap on concurrent requests (always at least 1)
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.max(1)
    }

    /// Set the cap on concurrent requests (clamped to at least 1)
    pub fn set_max_in_flight(&mut self, count: usize) {
        self.max_in_flight = count.max(1);
    }

    pub fn with_max_in_flight(mut self, count: usize) -> Self {
        self.set_max_in_flight(count);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connectivity_poll(&self) -> Duration {
        Duration::from_millis(self.connectivity_poll_ms.max(1))
    }
}
