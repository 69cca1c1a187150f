// =============================================================================
// Sniffer Settings — serde-defaulted configuration with atomic save
// =============================================================================
//
// Every tunable of the sniffer lives here. All fields carry `#[serde(default)]`
// so that adding new fields never breaks loading an older config file.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::CandleInterval;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_last_candles_count() -> usize {
    5
}

fn default_last_trades_count() -> usize {
    100
}

fn default_change_percent_threshold() -> f64 {
    0.5
}

fn default_on_error_sleep_secs() -> u64 {
    10
}

fn default_stream_read_timeout_secs() -> u64 {
    1
}

fn default_volume_monitor_interval_secs() -> u64 {
    1
}

// =============================================================================
// SnifferSettings
// =============================================================================

/// Top-level configuration for the market data sniffer.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnifferSettings {
    // --- Rolling windows -----------------------------------------------------
    /// Capacity of the per-instrument candle window (and its mean window).
    #[serde(default = "default_last_candles_count")]
    pub last_candles_count: usize,

    /// Capacity of the per-instrument trade window.
    #[serde(default = "default_last_trades_count")]
    pub last_trades_count: usize,

    // --- Subscriptions -------------------------------------------------------
    /// Interval of the candle channel subscription.
    #[serde(default)]
    pub candle_interval: CandleInterval,

    /// History span fed into the windows before going live, in minutes.
    /// Falls back to `last_candles_count` minutes when absent.
    #[serde(default)]
    pub history_span_minutes: Option<u64>,

    // --- Alerting ------------------------------------------------------------
    /// Absolute deviation from the rolling candle mean (in percent) above
    /// which a high-change alert fires. Strictly greater-than; an exact hit
    /// does not alert.
    #[serde(default = "default_change_percent_threshold")]
    pub change_percent_threshold: f64,

    // --- Timing --------------------------------------------------------------
    /// Fixed backoff between reconnect attempts. No exponential backoff.
    #[serde(default = "default_on_error_sleep_secs")]
    pub on_error_sleep_secs: u64,

    /// Upper bound on a single blocking stream read, so that `stop()` takes
    /// effect within one timeout even when the feed is silent.
    #[serde(default = "default_stream_read_timeout_secs")]
    pub stream_read_timeout_secs: u64,

    /// Tick interval of the volume-per-second monitor.
    #[serde(default = "default_volume_monitor_interval_secs")]
    pub volume_monitor_interval_secs: u64,

    // --- Notifications -------------------------------------------------------
    /// Send the full instrument list in the start notification.
    #[serde(default)]
    pub send_instrument_list_on_start: bool,
}

impl Default for SnifferSettings {
    fn default() -> Self {
        Self {
            last_candles_count: default_last_candles_count(),
            last_trades_count: default_last_trades_count(),
            candle_interval: CandleInterval::default(),
            history_span_minutes: None,
            change_percent_threshold: default_change_percent_threshold(),
            on_error_sleep_secs: default_on_error_sleep_secs(),
            stream_read_timeout_secs: default_stream_read_timeout_secs(),
            volume_monitor_interval_secs: default_volume_monitor_interval_secs(),
            send_instrument_list_on_start: false,
        }
    }
}

impl SnifferSettings {
    /// Load settings from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings from {}", path.display()))?;

        info!(
            path = %path.display(),
            last_candles_count = settings.last_candles_count,
            change_percent_threshold = settings.change_percent_threshold,
            "settings loaded"
        );

        Ok(settings)
    }

    /// Persist the current settings to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise settings to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp settings to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp settings to {}", path.display()))?;

        info!(path = %path.display(), "settings saved (atomic)");
        Ok(())
    }

    /// Fixed backoff between reconnect attempts.
    pub fn on_error_sleep(&self) -> Duration {
        Duration::from_secs(self.on_error_sleep_secs)
    }

    /// Upper bound on a single stream read.
    pub fn stream_read_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_read_timeout_secs)
    }

    /// Tick interval of the volume monitor.
    pub fn volume_monitor_interval(&self) -> Duration {
        Duration::from_secs(self.volume_monitor_interval_secs)
    }

    /// Span of historical candles used to pre-warm the rolling windows.
    pub fn history_span(&self) -> chrono::Duration {
        let minutes = self
            .history_span_minutes
            .unwrap_or(self.last_candles_count as u64);
        chrono::Duration::minutes(minutes as i64)
    }
}
