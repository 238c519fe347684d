use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};

/// Rectangular query region in degrees, west/south/east/north.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self> {
        let bbox = Self {
            west,
            south,
            east,
            north,
        };
        crate::validation::Validator::validate_bounding_box(&bbox)?;
        Ok(bbox)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}_{}", self.west, self.south, self.east, self.north)
    }
}

/// One of a sensor's two redundant measurement streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "a")]
    A,
    #[serde(rename = "b")]
    B,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::A, Channel::B];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::A => "a",
            Channel::B => "b",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" => Ok(Channel::A),
            "b" => Ok(Channel::B),
            other => Err(PipelineError::invalid_request(
                "Unknown channel",
                format!("channel: {}", other),
                vec![format!("channel must be 'a' or 'b', got '{}'", other)],
            )),
        }
    }
}

/// Stream id/key pair used against the time-series host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCredentials {
    pub stream_id: String,
    pub stream_key: String,
}

/// A discovered outdoor sensor. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub sensor_index: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub channel_a: Option<StreamCredentials>,
    pub channel_b: Option<StreamCredentials>,
}

impl SensorRecord {
    pub fn credentials(&self, channel: Channel) -> Option<&StreamCredentials> {
        match channel {
            Channel::A => self.channel_a.as_ref(),
            Channel::B => self.channel_b.as_ref(),
        }
    }
}

/// A `[start, end]` sub-range of a larger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One unit of fetch work: a single sensor channel over a single window.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRequest {
    pub channel: Channel,
    pub sensor_index: i64,
    pub stream_id: String,
    pub stream_key: String,
    pub window: PaginationWindow,
    pub average: Option<u32>,
}

impl fmt::Display for FeedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sensor {} channel {} [{} .. {}]",
            self.sensor_index,
            self.channel,
            self.window.start.format("%Y-%m-%d"),
            self.window.end.format("%Y-%m-%d")
        )
    }
}

/// A positional row of the time-series CSV feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedRow {
    pub created_at: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub entry_id: Option<i64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub field1: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub field2: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub field3: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub field4: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub field5: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub field6: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub field7: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub field8: Option<f64>,
}

/// A feed row with its sensor's identity and location attached.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub sensor_index: i64,
    pub sensor_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub feed: FeedRow,
}

/// Row-wise union of every fetched window for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub channel: Channel,
    pub rows: Vec<RawRow>,
}

/// Which density column the AQI is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiSource {
    /// PM2.5 at atmospheric calibration (`field8`).
    #[default]
    Atmospheric,
    /// PM2.5 at manufacturer CF=1 calibration (`field2`).
    Cf1,
}

/// A normalized reading. Column names match the exported table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(rename = "Lon")]
    pub longitude: f64,
    #[serde(rename = "Lat")]
    pub latitude: f64,
    #[serde(rename = "Sensor")]
    pub sensor_name: String,
    pub created_at: DateTime<Utc>,
    pub entry_id: Option<i64>,
    #[serde(rename = "PM1.0_CF1_ug/m3")]
    pub pm1_0_cf1: Option<f64>,
    #[serde(rename = "PM2.5_CF1_ug/m3")]
    pub pm2_5_cf1: Option<f64>,
    #[serde(rename = "PM10.0_CF1_ug/m3")]
    pub pm10_0_cf1: Option<f64>,
    #[serde(rename = "UptimeMinutes")]
    pub uptime_minutes: Option<f64>,
    #[serde(rename = "RSSI_dbm")]
    pub rssi_dbm: Option<f64>,
    #[serde(rename = "Temperature_F")]
    pub temperature_f: Option<f64>,
    #[serde(rename = "Humidity_%")]
    pub humidity_pct: Option<f64>,
    #[serde(rename = "PM2.5_ATM_ug/m3")]
    pub pm2_5_atm: Option<f64>,
    #[serde(rename = "Ipm25")]
    pub aqi: i32,
    #[serde(default)]
    pub sensor_index: i64,
}

/// Readings per channel, owned by the caller once returned.
pub type ChannelResultSet = BTreeMap<Channel, Vec<Reading>>;

/// Directory ids arrive either as numbers or strings.
pub(crate) fn json_to_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
