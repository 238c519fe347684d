// config.rs

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::constants::{
    API_CONFIG, API_KEY_ENV, DEFAULT_AQI_CEILING, DEFAULT_BBOX, DEFAULT_DATA_FOLDER,
    DEFAULT_METADATA_FOLDER,
};
use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;
use crate::types::{AqiSource, BoundingBox};
use crate::validation::ValidationLimits;

/// Everything a run needs from the outside world, passed explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Read key for the sensor directory.
    pub api_key: String,
    pub directory_url: String,
    pub feed_url: String,

    pub data_root: PathBuf,
    pub data_folder: String,
    pub metadata_folder: String,

    pub max_records_per_request: u32,
    /// Minimum spacing between consecutive requests to the time-series host.
    #[serde(with = "humantime_serde")]
    pub request_delay: Duration,
    pub max_concurrent: usize,
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub limits: ValidationLimits,

    /// Readings whose index exceeds this are treated as sensor faults.
    pub aqi_ceiling: i32,
    pub aqi_source: AqiSource,
    pub default_bbox: BoundingBox,
}

impl Default for Config {
    fn default() -> Self {
        let limits = &API_CONFIG.request_limits;
        Self {
            api_key: String::new(),
            directory_url: API_CONFIG.directory_url.to_string(),
            feed_url: API_CONFIG.feed_url.to_string(),
            data_root: PathBuf::from("."),
            data_folder: DEFAULT_DATA_FOLDER.to_string(),
            metadata_folder: DEFAULT_METADATA_FOLDER.to_string(),
            max_records_per_request: limits.max_records_per_request,
            request_delay: limits.request_delay,
            max_concurrent: limits.max_concurrent,
            http_timeout: API_CONFIG.timeouts.request,
            connect_timeout: API_CONFIG.timeouts.connection,
            retry: RetryPolicy::default(),
            limits: ValidationLimits::default(),
            aqi_ceiling: DEFAULT_AQI_CEILING,
            aqi_source: AqiSource::default(),
            default_bbox: DEFAULT_BBOX,
        }
    }
}

impl Config {
    /// Loads a JSON config file, then applies environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&text)?;
        config.apply_env();
        config.check()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// `PURPLEAIR_API_KEY` wins over whatever the file says.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.api_key = key.trim().to_string();
            }
        }
    }

    pub fn check(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.max_records_per_request == 0 {
            errors.push("max_records_per_request must be positive".to_string());
        }
        if self.max_concurrent == 0 {
            errors.push("max_concurrent must be positive".to_string());
        }
        if self.aqi_ceiling <= 0 {
            errors.push("aqi_ceiling must be positive".to_string());
        }
        if url::Url::parse(&self.directory_url).is_err() {
            errors.push(format!("directory_url is not a URL: {}", self.directory_url));
        }
        if url::Url::parse(&self.feed_url).is_err() {
            errors.push(format!("feed_url is not a URL: {}", self.feed_url));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::invalid_request(
                "Invalid configuration",
                "config",
                errors,
            ))
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_root.join(&self.data_folder)
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.data_root.join(&self.metadata_folder)
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.http_timeout)
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(self.max_concurrent)
            .build()?)
    }
}
