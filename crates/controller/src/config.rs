//! Flat JSON config file loading, runtime patching, and validation.
//!
//! The on-disk format is the same flat object the device has always
//! persisted, so a `config.json` written by an older firmware still loads.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Maximum number of scheduled times accepted in daily mode.
pub const MAX_DAILY_TIMES: usize = 4;

// ---------------------------------------------------------------------------
// Scheduling mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Short fixed period, for bench validation only.
    Test,
    /// Every `interval_hours`, measured from the end of the previous cycle.
    Interval,
    /// At each configured `HH:MM` local time-of-day.
    Daily,
}

// ---------------------------------------------------------------------------
// Configuration record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Device name, reported to the remote API.
    pub name: String,
    /// Watering trigger: pump when a measurement falls below this percent.
    pub moisture_threshold: f64,
    /// LED zone bound: below this the bar renders red.
    pub low_threshold: f64,
    /// LED zone bound: below this (and above `low_threshold`) amber.
    pub medium_threshold: f64,
    /// Sensor calibration: voltage at fully wet soil.
    pub min_voltage: f64,
    /// Sensor calibration: voltage at fully dry soil.
    pub max_voltage: f64,
    /// Seconds the pump runs per activation.
    pub pump_duration: u64,
    /// LED bar brightness, 0.0..=1.0.
    pub led_brightness: f64,
    pub mode: Mode,
    /// Interval-mode period in hours (fractional values allowed).
    pub interval_hours: f64,
    /// Daily-mode schedule, up to four zero-padded `HH:MM` entries.
    /// Matching is exact-string: a non-padded entry like "8:00" never fires.
    pub daily_times: Vec<String>,
    /// Fixed offset applied to unix time before the daily-mode `HH:MM`
    /// comparison. Older config files without this field get the default.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i8,
}

fn default_utc_offset() -> i8 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "plantwatch".to_string(),
            moisture_threshold: 30.0,
            low_threshold: 30.0,
            medium_threshold: 50.0,
            min_voltage: 0.5,
            max_voltage: 2.5,
            pump_duration: 5,
            led_brightness: 0.5,
            mode: Mode::Daily,
            interval_hours: 1.0,
            daily_times: vec!["08:00".to_string(), "18:00".to_string()],
            utc_offset_hours: default_utc_offset(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Validate the full record. Collects every violation, not just the
    /// first one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        // ── Thresholds ──────────────────────────────────────
        if !(0.0..=100.0).contains(&self.moisture_threshold) {
            errors.push(format!(
                "moisture_threshold {} out of range [0, 100]",
                self.moisture_threshold
            ));
        }
        if !(0.0..=100.0).contains(&self.low_threshold) {
            errors.push(format!(
                "low_threshold {} out of range [0, 100]",
                self.low_threshold
            ));
        }
        if !(0.0..=100.0).contains(&self.medium_threshold) {
            errors.push(format!(
                "medium_threshold {} out of range [0, 100]",
                self.medium_threshold
            ));
        }
        if self.low_threshold > self.medium_threshold {
            errors.push(format!(
                "low_threshold ({}) must not exceed medium_threshold ({})",
                self.low_threshold, self.medium_threshold
            ));
        }

        // ── Sensor calibration ──────────────────────────────
        if self.min_voltage >= self.max_voltage {
            errors.push(format!(
                "min_voltage ({}) must be less than max_voltage ({})",
                self.min_voltage, self.max_voltage
            ));
        }

        // ── Actuation / scheduling ──────────────────────────
        if self.pump_duration == 0 {
            errors.push("pump_duration must be at least 1 second".to_string());
        }
        if self.interval_hours <= 0.0 {
            errors.push(format!(
                "interval_hours must be positive, got {}",
                self.interval_hours
            ));
        }
        if self.daily_times.len() > MAX_DAILY_TIMES {
            errors.push(format!(
                "daily_times has {} entries, maximum is {MAX_DAILY_TIMES}",
                self.daily_times.len()
            ));
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            errors.push(format!(
                "utc_offset_hours {} out of range [-12, 14]",
                self.utc_offset_hours
            ));
        }

        // ── LED ─────────────────────────────────────────────
        if !(0.0..=1.0).contains(&self.led_brightness) {
            errors.push(format!(
                "led_brightness {} out of range [0.0, 1.0]",
                self.led_brightness
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join("; ")))
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime patch
// ---------------------------------------------------------------------------

/// Partial configuration received over `POST /update`. Unknown JSON keys
/// are ignored, matching what clients of the original firmware could send.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ConfigPatch {
    pub name: Option<String>,
    pub moisture_threshold: Option<f64>,
    pub low_threshold: Option<f64>,
    pub medium_threshold: Option<f64>,
    pub min_voltage: Option<f64>,
    pub max_voltage: Option<f64>,
    pub pump_duration: Option<u64>,
    pub led_brightness: Option<f64>,
    pub mode: Option<Mode>,
    pub interval_hours: Option<f64>,
    pub daily_times: Option<Vec<String>>,
    pub utc_offset_hours: Option<i8>,
}

impl ConfigPatch {
    /// Merge every present field into `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(v) = &self.name {
            config.name = v.clone();
        }
        if let Some(v) = self.moisture_threshold {
            config.moisture_threshold = v;
        }
        if let Some(v) = self.low_threshold {
            config.low_threshold = v;
        }
        if let Some(v) = self.medium_threshold {
            config.medium_threshold = v;
        }
        if let Some(v) = self.min_voltage {
            config.min_voltage = v;
        }
        if let Some(v) = self.max_voltage {
            config.max_voltage = v;
        }
        if let Some(v) = self.pump_duration {
            config.pump_duration = v;
        }
        if let Some(v) = self.led_brightness {
            config.led_brightness = v;
        }
        if let Some(v) = self.mode {
            config.mode = v;
        }
        if let Some(v) = self.interval_hours {
            config.interval_hours = v;
        }
        if let Some(v) = &self.daily_times {
            config.daily_times = v.clone();
        }
        if let Some(v) = self.utc_offset_hours {
            config.utc_offset_hours = v;
        }
    }
}

// ---------------------------------------------------------------------------
// Load + save
// ---------------------------------------------------------------------------

/// Load the config file, falling back to built-in defaults on any failure
/// (missing file, parse error, invalid values). The device must come up
/// either way.
pub fn load(path: &str) -> Config {
    match try_load(path) {
        Ok(config) => {
            info!(path, "config loaded");
            config
        }
        Err(e) => {
            warn!(path, "using default config: {e:#}");
            Config::default()
        }
    }
}

fn try_load(path: &str) -> anyhow::Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse config: {path}"))?;
    config.validate()?;
    Ok(config)
}

/// Persist the config. Best-effort: a crash between the in-memory update
/// and this write loses the latest patch, which callers accept and log.
pub fn save(path: &str, config: &Config) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json).with_context(|| format!("failed to write config: {path}"))?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Assert validation fails and the error message contains `needle`.
    fn assert_invalid(config: &Config, needle: &str) {
        let err = config.validate().unwrap_err();
        let msg = err.to_string();
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Defaults ---------------------------------------------------------

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn default_config_round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, config.name);
        assert_eq!(back.mode, config.mode);
        assert_eq!(back.daily_times, config.daily_times);
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parses_legacy_flat_config() {
        // The exact shape older firmware wrote, without utc_offset_hours.
        let json = r#"{
            "name": "Alex test plant",
            "moisture_threshold": 30.0,
            "pump_duration": 5,
            "led_brightness": 0.5,
            "min_voltage": 0.5,
            "max_voltage": 2.5,
            "low_threshold": 30,
            "medium_threshold": 50,
            "mode": "daily",
            "interval_hours": 1,
            "daily_times": ["16:35", "5:00", "6:00", "8:00"]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.name, "Alex test plant");
        assert_eq!(config.mode, Mode::Daily);
        assert_eq!(config.utc_offset_hours, 2, "missing field gets default");
        config.validate().unwrap();
    }

    #[test]
    fn mode_parses_lowercase() {
        assert_eq!(
            serde_json::from_str::<Mode>("\"test\"").unwrap(),
            Mode::Test
        );
        assert_eq!(
            serde_json::from_str::<Mode>("\"interval\"").unwrap(),
            Mode::Interval
        );
        assert_eq!(
            serde_json::from_str::<Mode>("\"daily\"").unwrap(),
            Mode::Daily
        );
        assert!(serde_json::from_str::<Mode>("\"weekly\"").is_err());
    }

    // -- Validation: thresholds -------------------------------------------

    #[test]
    fn low_above_medium_rejected() {
        let mut config = Config::default();
        config.low_threshold = 60.0;
        config.medium_threshold = 40.0;
        assert_invalid(&config, "must not exceed medium_threshold");
    }

    #[test]
    fn medium_above_hundred_rejected() {
        let mut config = Config::default();
        config.medium_threshold = 101.0;
        assert_invalid(&config, "medium_threshold");
    }

    #[test]
    fn negative_low_rejected() {
        let mut config = Config::default();
        config.low_threshold = -1.0;
        assert_invalid(&config, "low_threshold");
    }

    #[test]
    fn moisture_threshold_out_of_range_rejected() {
        let mut config = Config::default();
        config.moisture_threshold = 150.0;
        assert_invalid(&config, "moisture_threshold");
    }

    #[test]
    fn equal_low_and_medium_accepted() {
        let mut config = Config::default();
        config.low_threshold = 40.0;
        config.medium_threshold = 40.0;
        config.validate().unwrap();
    }

    // -- Validation: calibration and timing --------------------------------

    #[test]
    fn inverted_voltage_bounds_rejected() {
        let mut config = Config::default();
        config.min_voltage = 2.5;
        config.max_voltage = 0.5;
        assert_invalid(&config, "min_voltage");
    }

    #[test]
    fn equal_voltage_bounds_rejected() {
        let mut config = Config::default();
        config.min_voltage = 1.0;
        config.max_voltage = 1.0;
        assert_invalid(&config, "must be less than max_voltage");
    }

    #[test]
    fn zero_pump_duration_rejected() {
        let mut config = Config::default();
        config.pump_duration = 0;
        assert_invalid(&config, "pump_duration");
    }

    #[test]
    fn zero_interval_rejected() {
        let mut config = Config::default();
        config.interval_hours = 0.0;
        assert_invalid(&config, "interval_hours");
    }

    #[test]
    fn too_many_daily_times_rejected() {
        let mut config = Config::default();
        config.daily_times = vec![
            "06:00".into(),
            "09:00".into(),
            "12:00".into(),
            "15:00".into(),
            "18:00".into(),
        ];
        assert_invalid(&config, "daily_times");
    }

    #[test]
    fn unpadded_daily_time_is_not_a_validation_error() {
        // "8:00" silently never matches; that is the caller's contract,
        // not something validation repairs or rejects.
        let mut config = Config::default();
        config.daily_times = vec!["8:00".into()];
        config.validate().unwrap();
    }

    #[test]
    fn utc_offset_out_of_range_rejected() {
        let mut config = Config::default();
        config.utc_offset_hours = 15;
        assert_invalid(&config, "utc_offset_hours");
    }

    #[test]
    fn led_brightness_out_of_range_rejected() {
        let mut config = Config::default();
        config.led_brightness = 1.5;
        assert_invalid(&config, "led_brightness");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut config = Config::default();
        config.low_threshold = 60.0;
        config.medium_threshold = 40.0;
        config.pump_duration = 0;
        config.interval_hours = -1.0;
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("medium_threshold"), "missing threshold error: {msg}");
        assert!(msg.contains("pump_duration"), "missing duration error: {msg}");
        assert!(msg.contains("interval_hours"), "missing interval error: {msg}");
    }

    // -- Patch ------------------------------------------------------------

    #[test]
    fn patch_merges_present_fields_only() {
        let mut config = Config::default();
        let patch: ConfigPatch = serde_json::from_str(
            r#"{"moisture_threshold": 42.0, "mode": "interval"}"#,
        )
        .unwrap();
        patch.apply(&mut config);
        assert_eq!(config.moisture_threshold, 42.0);
        assert_eq!(config.mode, Mode::Interval);
        // Untouched fields keep their values.
        assert_eq!(config.pump_duration, 5);
        assert_eq!(config.name, "plantwatch");
    }

    #[test]
    fn patch_ignores_unknown_keys() {
        let patch: ConfigPatch =
            serde_json::from_str(r#"{"pump_duration": 8, "favourite_color": "green"}"#).unwrap();
        let mut config = Config::default();
        patch.apply(&mut config);
        assert_eq!(config.pump_duration, 8);
    }

    #[test]
    fn empty_patch_changes_nothing() {
        let mut config = Config::default();
        let before = serde_json::to_string(&config).unwrap();
        ConfigPatch::default().apply(&mut config);
        assert_eq!(serde_json::to_string(&config).unwrap(), before);
    }

    // -- Load + save ------------------------------------------------------

    fn temp_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("plantwatch-{tag}-{}.json", std::process::id()))
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let config = load("/nonexistent/plantwatch/config.json");
        assert_eq!(config.name, Config::default().name);
    }

    #[test]
    fn load_garbage_falls_back_to_defaults() {
        let path = temp_path("garbage");
        std::fs::write(&path, "not json at all").unwrap();
        let config = load(path.to_str().unwrap());
        assert_eq!(config.name, Config::default().name);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn load_invalid_values_falls_back_to_defaults() {
        let path = temp_path("invalid");
        let mut bad = Config::default();
        bad.pump_duration = 0;
        std::fs::write(&path, serde_json::to_string(&bad).unwrap()).unwrap();
        let config = load(path.to_str().unwrap());
        assert_eq!(config.pump_duration, Config::default().pump_duration);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn save_then_load_round_trips() {
        let path = temp_path("roundtrip");
        let mut config = Config::default();
        config.name = "balcony basil".to_string();
        config.mode = Mode::Interval;
        save(path.to_str().unwrap(), &config).unwrap();
        let loaded = load(path.to_str().unwrap());
        assert_eq!(loaded.name, "balcony basil");
        assert_eq!(loaded.mode, Mode::Interval);
        std::fs::remove_file(&path).ok();
    }
}
