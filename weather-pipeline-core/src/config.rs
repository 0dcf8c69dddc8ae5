use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{pipeline::RetryPolicy, pipeline::SensorPolicy, schedule::Schedule};

/// Weather API connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// Logical name of the connection, used in logs.
    pub connection_id: String,
    pub base_url: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Upper bound for a single HTTP request, connect included.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            connection_id: "weathermap_api".to_string(),
            base_url: "https://api.openweathermap.org".to_string(),
            endpoint: "/data/2.5/weather".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// What to fetch and when.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub name: String,
    pub city: String,
    /// Schedule preset, e.g. "@daily".
    pub schedule: String,
    /// No run fires before this date (UTC midnight).
    pub start_date: Option<NaiveDate>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "weather_dag".to_string(),
            city: "ahmedabad".to_string(),
            schedule: "@daily".to_string(),
            start_date: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { retries: 2, retry_delay_secs: 120 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SensorConfig {
    pub poke_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self { poke_interval_secs: 60, timeout_secs: 7 * 24 * 60 * 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SinkConfig {
    /// `s3://bucket[/prefix]`, `file:///dir`, `memory://` or a plain directory.
    pub url: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self { url: "s3://weather-data".to_string() }
    }
}

/// Failure/retry alerting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    pub email: Vec<String>,
    pub email_on_failure: bool,
    pub email_on_retry: bool,
    pub from: String,
    /// Transactional email HTTP API. Alerts are only logged when no key is set.
    pub api_url: String,
    pub api_key: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            email: Vec::new(),
            email_on_failure: false,
            email_on_retry: false,
            from: "weather-pipeline@localhost".to_string(),
            api_url: "https://api.resend.com/emails".to_string(),
            api_key: None,
        }
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// [api]
/// api_key = "..."
///
/// [pipeline]
/// city = "ahmedabad"
///
/// [sink]
/// url = "s3://my-bucket/weather"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
    pub sensor: SensorConfig,
    pub sink: SinkConfig,
    pub alerts: AlertConfig,
}

impl Config {
    /// Load config from the default location, or return defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return defaults.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to the default location.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_file_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-pipeline", "weather-pipeline")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// API key, or an error telling the user how to set one.
    pub fn api_key(&self) -> Result<&str> {
        self.api
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "No API key configured for connection '{}'.\n\
                     Hint: run `weather-pipeline configure` or set WEATHER_PIPELINE_API_KEY.",
                    self.api.connection_id
                )
            })
    }

    pub fn schedule(&self) -> Result<Schedule> {
        self.pipeline.schedule.parse()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retry.retries,
            retry_delay: Duration::from_secs(self.retry.retry_delay_secs),
        }
    }

    pub fn sensor_policy(&self) -> SensorPolicy {
        SensorPolicy {
            poke_interval: Duration::from_secs(self.sensor.poke_interval_secs),
            timeout: Duration::from_secs(self.sensor.timeout_secs),
        }
    }

    /// Check everything needed to run the pipeline end to end.
    pub fn validate(&self) -> Result<()> {
        self.api_key()?;
        if self.pipeline.city.trim().is_empty() {
            return Err(anyhow!("No city configured.\nHint: set `pipeline.city` in the config file."));
        }
        self.schedule()?;
        crate::sink::SinkTarget::parse(&self.sink.url)?;
        if self.api.timeout_secs == 0 {
            return Err(anyhow!("`api.timeout_secs` must be greater than zero"));
        }
        if self.sensor.poke_interval_secs == 0 {
            return Err(anyhow!("`sensor.poke_interval_secs` must be greater than zero"));
        }
        Ok(())
    }
}
