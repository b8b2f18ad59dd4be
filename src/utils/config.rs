//! Settings: YAML file (optional) → environment overrides → validation.
//!
//! ```yaml
//! unit_id: meter-01
//! acquisition:
//!   interval_seconds: 30
//!   properties: [D3, D7, E1, E7, E0, E3]
//!   coercion: { E7: integer, E0: float }
//! channel:   { capacity: 64, overflow: block, block_timeout_ms: 5000, poll_timeout_ms: 500 }
//! shutdown:  { grace_period_ms: 5000, drain_budget: 32 }
//! csv:       { output_dir: data, filename_format: "{unit}_%Y%m%d.csv" }
//! logging:   { level: info, verbose_level: debug, file: logs/smartmeter.log, max_bytes: 10485760, backup_count: 5 }
//! simulator: { failure_rate: 0.0 }
//! ```

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::acquisition::{
    channel::{OverflowPolicy, MAX_CONSUME_TIMEOUT},
    producer::ProducerConfig,
    reading::PropertyCode,
};
use crate::error::ConfigError;
use crate::persistence::{
    coercion::{default_rules, CoercionRule, CoercionTable},
    consumer::ConsumerConfig,
    sink::DestinationNaming,
};
use crate::utils::logging::{parse_level, LoggingOptions};

pub const ENV_UNIT_ID: &str = "SMARTMETER_UNIT_ID";
pub const ENV_OUTPUT_DIR: &str = "SMARTMETER_OUTPUT_DIR";
pub const ENV_LOG_LEVEL: &str = "SMARTMETER_LOG_LEVEL";
pub const ENV_INTERVAL_SECONDS: &str = "SMARTMETER_INTERVAL_SECONDS";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub unit_id: String,
    pub acquisition: AcquisitionSettings,
    pub channel: ChannelSettings,
    pub shutdown: ShutdownSettings,
    pub csv: CsvSettings,
    pub logging: LoggingSettings,
    pub simulator: SimulatorSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcquisitionSettings {
    pub interval_seconds: u64,
    pub properties: Vec<PropertyCode>,
    pub coercion: BTreeMap<PropertyCode, CoercionRule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelSettings {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    pub block_timeout_ms: u64,
    pub poll_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShutdownSettings {
    pub grace_period_ms: u64,
    pub drain_budget: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CsvSettings {
    pub output_dir: PathBuf,
    pub filename_format: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    pub level: String,
    pub verbose_level: String,
    pub file: Option<PathBuf>,
    /// Rotate `file` once it would grow past this size; 0 disables rotation.
    pub max_bytes: u64,
    /// Rotated generations kept as `file.1` .. `file.N`; 0 disables rotation.
    pub backup_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatorSettings {
    pub failure_rate: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            unit_id: "smartmeter".into(),
            acquisition: AcquisitionSettings::default(),
            channel: ChannelSettings::default(),
            shutdown: ShutdownSettings::default(),
            csv: CsvSettings::default(),
            logging: LoggingSettings::default(),
            simulator: SimulatorSettings::default(),
        }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            properties: ["D3", "D7", "E1", "E7", "E0", "E3"]
                .into_iter()
                .map(PropertyCode::new)
                .collect(),
            coercion: default_rules(),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            capacity: 64,
            overflow: OverflowPolicy::Block,
            block_timeout_ms: 5_000,
            poll_timeout_ms: 500,
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: 5_000,
            drain_budget: 32,
        }
    }
}

impl Default for CsvSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            filename_format: "{unit}_%Y%m%d.csv".into(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            verbose_level: "debug".into(),
            file: None,
            max_bytes: 10 * 1024 * 1024,
            backup_count: 5,
        }
    }
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self { failure_rate: 0.0 }
    }
}

impl Settings {
    /// Load `path` (or defaults when `None`), apply process environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_yaml_str(&text)?
            }
            None => Self::default(),
        };
        settings.apply_env_overrides(|var| std::env::var(var).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse only; no overrides, no validation.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_UNIT_ID) {
            self.unit_id = v;
        }
        if let Some(v) = lookup(ENV_OUTPUT_DIR) {
            self.csv.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = v;
        }
        if let Some(v) = lookup(ENV_INTERVAL_SECONDS) {
            self.acquisition.interval_seconds =
                v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    var: ENV_INTERVAL_SECONDS,
                    value: v.clone(),
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.unit_id.trim().is_empty() {
            return Err(ConfigError::invalid("unit_id", "must not be empty"));
        }
        if self.unit_id.contains(['/', '\\']) {
            return Err(ConfigError::invalid("unit_id", "must not contain path separators"));
        }
        if self.acquisition.interval_seconds == 0 {
            return Err(ConfigError::invalid("acquisition.interval_seconds", "must be > 0"));
        }
        if self.acquisition.properties.is_empty() {
            return Err(ConfigError::invalid("acquisition.properties", "must list at least one code"));
        }
        if self.channel.capacity == 0 {
            return Err(ConfigError::invalid("channel.capacity", "must be > 0"));
        }
        let poll = Duration::from_millis(self.channel.poll_timeout_ms);
        if poll.is_zero() || poll > MAX_CONSUME_TIMEOUT {
            return Err(ConfigError::invalid(
                "channel.poll_timeout_ms",
                format!("must be within 1..={}", MAX_CONSUME_TIMEOUT.as_millis()),
            ));
        }
        if !(0.0..=1.0).contains(&self.simulator.failure_rate) {
            return Err(ConfigError::invalid("simulator.failure_rate", "must be within 0.0..=1.0"));
        }
        parse_level(&self.logging.level)
            .map_err(|e| ConfigError::invalid("logging.level", e.to_string()))?;
        parse_level(&self.logging.verbose_level)
            .map_err(|e| ConfigError::invalid("logging.verbose_level", e.to_string()))?;

        let naming = self.destination_naming()?;
        let a = NaiveDate::from_ymd_opt(2000, 1, 1);
        let b = NaiveDate::from_ymd_opt(2000, 1, 2);
        if let (Some(a), Some(b)) = (a, b) {
            if naming.file_name_for(a) == naming.file_name_for(b) {
                return Err(ConfigError::invalid(
                    "csv.filename_format",
                    "must include the calendar day (e.g. %Y%m%d)",
                ));
            }
        }
        Ok(())
    }

    pub fn destination_naming(&self) -> Result<DestinationNaming, ConfigError> {
        DestinationNaming::new(&self.csv.output_dir, &self.unit_id, &self.csv.filename_format)
            .map_err(|e| ConfigError::invalid("csv.filename_format", e.to_string()))
    }

    pub fn coercion_table(&self) -> CoercionTable {
        CoercionTable::new(self.acquisition.coercion.clone())
    }

    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            source_tag: self.unit_id.clone(),
            properties: self.acquisition.properties.clone(),
            interval: Duration::from_secs(self.acquisition.interval_seconds),
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            poll_timeout: Duration::from_millis(self.channel.poll_timeout_ms),
            grace_period: Duration::from_millis(self.shutdown.grace_period_ms),
            drain_budget: self.shutdown.drain_budget,
        }
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.channel.block_timeout_ms)
    }

    /// Levels were checked by `validate`; fall back to info/debug if called unvalidated.
    pub fn logging_options(&self) -> LoggingOptions {
        LoggingOptions {
            level: parse_level(&self.logging.level).unwrap_or(log::LevelFilter::Info),
            verbose_level: parse_level(&self.logging.verbose_level)
                .unwrap_or(log::LevelFilter::Debug),
            file: self.logging.file.clone(),
            max_bytes: self.logging.max_bytes,
            backup_count: self.logging.backup_count,
        }
    }
}
