//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NoiseMapError, Result};

/// Configuration for a tracking session.
///
/// Every field has a default, so hosts may supply partial JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Coalescing interval for the speed statistics pass, in milliseconds.
    /// 0 runs statistics inline for every fix. Default: 250
    pub stats_debounce_ms: u64,

    /// Coalescing interval for incremental heatmap pushes to the map sink,
    /// in milliseconds. 0 pushes every point immediately. Default: 100
    pub render_debounce_ms: u64,

    /// Satellite count at which a fix counts as adequate even without a
    /// 2D/3D fix type. Default: 4
    pub min_satellites: u32,

    /// Measurement count from which full recomputes run in parallel
    /// (only with the `parallel` feature). Default: 10_000
    pub parallel_recompute_threshold: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stats_debounce_ms: 250,
            render_debounce_ms: 100,
            min_satellites: 4,
            parallel_recompute_threshold: 10_000,
        }
    }
}

impl SessionConfig {
    /// Parse a (possibly partial) JSON configuration and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SessionConfig =
            serde_json::from_str(json).map_err(|e| NoiseMapError::Config {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_satellites == 0 {
            return Err(NoiseMapError::Config {
                message: "min_satellites must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn stats_debounce(&self) -> Duration {
        Duration::from_millis(self.stats_debounce_ms)
    }

    pub fn render_debounce(&self) -> Duration {
        Duration::from_millis(self.render_debounce_ms)
    }
}
