//! Central settings
//!
//! Settings that control session behavior at the application level:
//! - Default connect timeout and scan duration
//! - Minimum duration below which a fixed scan arms no timer
//! - Chunk length used when the link reports none
//! - Default log filter

use crate::gatt::{DEFAULT_FALLBACK_WRITE_LENGTH, MAX_CHARACTERISTIC_SIZE};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors that can occur during settings validation
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingsError {
    #[error("Invalid connect timeout: must be > 0 ms, got {0}")]
    InvalidConnectTimeout(u64),

    #[error("Invalid scan duration: {0} ms is below the minimum of {1} ms")]
    InvalidScanDuration(u64, u64),

    #[error("Invalid fallback write length: must be 1-{max}, got {0}", max = MAX_CHARACTERISTIC_SIZE)]
    InvalidWriteLength(usize),

    #[error("Invalid log filter: must not be empty")]
    EmptyLogFilter,
}

// ============================================================================
// CENTRAL SETTINGS
// ============================================================================

/// User-configurable central settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralSettings {
    /// Timeout applied by `connect_with_default_timeout`
    pub connect_timeout_ms: u64,

    /// Duration applied by `start_default_scan`
    pub scan_duration_ms: u64,

    /// Fixed-duration scans at or below this run until stopped
    pub min_scan_duration_ms: u64,

    /// Chunk length when the adapter reports a write length of 0
    pub fallback_write_length: usize,

    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl CentralSettings {
    /// Validate settings
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.connect_timeout_ms == 0 {
            return Err(SettingsError::InvalidConnectTimeout(self.connect_timeout_ms));
        }

        if self.scan_duration_ms <= self.min_scan_duration_ms {
            return Err(SettingsError::InvalidScanDuration(
                self.scan_duration_ms,
                self.min_scan_duration_ms,
            ));
        }

        if self.fallback_write_length == 0 || self.fallback_write_length > MAX_CHARACTERISTIC_SIZE {
            return Err(SettingsError::InvalidWriteLength(self.fallback_write_length));
        }

        if self.log_filter.trim().is_empty() {
            return Err(SettingsError::EmptyLogFilter);
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }

    pub fn min_scan_duration(&self) -> Duration {
        Duration::from_millis(self.min_scan_duration_ms)
    }

    /// Parse and validate settings from JSON. Missing fields take defaults.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let settings: Self = serde_json::from_str(json).context("Failed to parse central settings")?;
        settings.validate().context("Invalid central settings")?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize central settings")
    }
}

impl Default for CentralSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            scan_duration_ms: 10_000,
            min_scan_duration_ms: 1,
            fallback_write_length: DEFAULT_FALLBACK_WRITE_LENGTH,
            log_filter: "info".to_string(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
