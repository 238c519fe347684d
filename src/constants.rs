// constants.rs
use once_cell::sync::Lazy;
use std::time::Duration;

use crate::types::BoundingBox;

pub static API_CONFIG: Lazy<APIConfig> = Lazy::new(|| APIConfig {
    directory_url: "https://api.purpleair.com/v1/sensors",
    feed_url: "https://api.thingspeak.com/channels",
    timeouts: TimeoutConfig::default(),
    request_limits: RequestLimits::default(),
});

/// Temescal Valley, the reference default region.
pub const DEFAULT_BBOX: BoundingBox = BoundingBox {
    west: -117.5298,
    south: 33.7180,
    east: -117.4166,
    north: 33.8188,
};

/// Header carrying the directory read key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Environment variable overriding the configured directory key.
pub const API_KEY_ENV: &str = "PURPLEAIR_API_KEY";

/// Fields requested from the sensor directory, in row order after `sensor_index`.
/// `location_type` stays last.
pub const DIRECTORY_FIELDS: [&str; 8] = [
    "name",
    "latitude",
    "longitude",
    "primary_id_a",
    "primary_key_a",
    "primary_id_b",
    "primary_key_b",
    "location_type",
];

/// Directory `location_type` flag for outdoor sensors.
pub const LOCATION_OUTDOOR: i64 = 0;

/// Averages (minutes) the time-series host accepts for its `average` parameter.
pub const SUPPORTED_AVERAGES: [u32; 8] = [10, 15, 20, 30, 60, 240, 720, 1440];

pub const DEFAULT_INTERVAL_MINUTES: u32 = 10;
pub const DEFAULT_AQI_CEILING: i32 = 1200;

pub const DEFAULT_DATA_FOLDER: &str = "Data";
pub const DEFAULT_METADATA_FOLDER: &str = "metadata";

/// Raw feed column names and the semantic names readings are exported under.
pub const FIELD_MAPPING: [(&str, &str); 10] = [
    ("created_at", "created_at"),
    ("entry_id", "entry_id"),
    ("field1", "PM1.0_CF1_ug/m3"),
    ("field2", "PM2.5_CF1_ug/m3"),
    ("field3", "PM10.0_CF1_ug/m3"),
    ("field4", "UptimeMinutes"),
    ("field5", "RSSI_dbm"),
    ("field6", "Temperature_F"),
    ("field7", "Humidity_%"),
    ("field8", "PM2.5_ATM_ug/m3"),
];

#[derive(Debug, Clone)]
pub struct APIConfig {
    pub directory_url: &'static str,
    pub feed_url: &'static str,
    pub timeouts: TimeoutConfig,
    pub request_limits: RequestLimits,
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub request: Duration,
    pub connection: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            connection: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestLimits {
    pub max_records_per_request: u32,
    pub request_delay: Duration,
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub rate_limit_cooldown: Duration,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_records_per_request: 7800,
            request_delay: Duration::from_millis(1500),
            max_concurrent: 1,
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            rate_limit_cooldown: Duration::from_secs(60),
        }
    }
}

pub static ERRORS: Lazy<ErrorConstants> = Lazy::new(|| ErrorConstants {
    invalid_timerange: "Invalid time range specified",
    invalid_bbox: "Invalid bounding box",
    no_sensors: "No outdoor sensors found",
    directory_unavailable: "Sensor directory unavailable",
    rate_limit: "Rate limit exceeded",
    connection_error: "Connection error",
    parse_error: "Data parsing error",
});

#[derive(Debug, Clone)]
pub struct ErrorConstants {
    pub invalid_timerange: &'static str,
    pub invalid_bbox: &'static str,
    pub no_sensors: &'static str,
    pub directory_unavailable: &'static str,
    pub rate_limit: &'static str,
    pub connection_error: &'static str,
    pub parse_error: &'static str,
}
