//! Sensor discovery against the sensor-network directory.
//!
//! One request per bounding box. Only outdoor sensors with a usable location
//! and at least one channel's stream credentials come back.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::constants::{API_KEY_HEADER, DIRECTORY_FIELDS, ERRORS, LOCATION_OUTDOOR};
use crate::error::{PipelineError, Result};
use crate::retry::{self, RetryPolicy};
use crate::types::{json_to_id, BoundingBox, SensorRecord, StreamCredentials};

/// Anything that can list the outdoor sensors inside a bounding box.
pub trait SensorDirectory {
    fn list_sensors(
        &self,
        bbox: &BoundingBox,
    ) -> impl Future<Output = Result<Vec<SensorRecord>>> + Send;
}

/// Raw directory response: a header row of field names and positional data rows.
#[derive(Debug, Deserialize)]
pub struct DirectoryResponse {
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
}

#[derive(Debug, Clone)]
pub struct DirectoryClient {
    client: Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl DirectoryClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            base_url: config.directory_url.clone(),
            api_key: config.api_key.clone(),
            retry: config.retry.clone(),
        })
    }

    /// Builds the listing URL. The directory names corners north-west/south-east.
    pub fn build_url(&self, bbox: &BoundingBox) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        url.query_pairs_mut()
            .append_pair("fields", &DIRECTORY_FIELDS.join(","))
            .append_pair("location_type", &LOCATION_OUTDOOR.to_string())
            .append_pair("nwlng", &bbox.west.to_string())
            .append_pair("nwlat", &bbox.north.to_string())
            .append_pair("selng", &bbox.east.to_string())
            .append_pair("selat", &bbox.south.to_string());
        Ok(url)
    }

    async fn request_once(&self, url: &Url) -> Result<DirectoryResponse> {
        let response = self
            .client
            .get(url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::rate_limited(self.retry.rate_limit_cooldown));
        }
        if status.is_server_error() {
            return Err(PipelineError::Server {
                message: format!("directory returned {}", status),
                status: status.as_u16(),
                body: response.text().await.ok(),
            });
        }
        if !status.is_success() {
            return Err(PipelineError::DirectoryUnavailable {
                message: format!("directory returned {}", status),
                status: Some(status.as_u16()),
            });
        }

        Ok(response.json::<DirectoryResponse>().await?)
    }
}

impl SensorDirectory for DirectoryClient {
    async fn list_sensors(&self, bbox: &BoundingBox) -> Result<Vec<SensorRecord>> {
        let url = self.build_url(bbox)?;
        let started = Instant::now();

        let target = &url;
        let outcome =
            retry::execute(&self.retry, "sensor directory", move || self.request_once(target)).await;
        let response = outcome.result.map_err(|e| match e {
            PipelineError::DirectoryUnavailable { .. } => e,
            PipelineError::Server { status, .. } => PipelineError::DirectoryUnavailable {
                message: format!("{} after {} attempt(s)", ERRORS.directory_unavailable, outcome.attempts),
                status: Some(status),
            },
            other => PipelineError::DirectoryUnavailable {
                message: format!(
                    "{} after {} attempt(s): {}",
                    ERRORS.directory_unavailable, outcome.attempts, other
                ),
                status: None,
            },
        })?;

        let sensors = parse_sensor_listing(&response);
        info!(
            "Directory listed {} outdoor sensor(s) of {} row(s) in {} ({:?})",
            sensors.len(),
            response.data.len(),
            bbox,
            started.elapsed()
        );
        Ok(sensors)
    }
}

/// Column positions, from the response header when present, else the requested order.
struct Columns(HashMap<String, usize>);

impl Columns {
    fn resolve(fields: &[String]) -> Self {
        let names: Vec<&str> = if fields.is_empty() {
            std::iter::once("sensor_index")
                .chain(DIRECTORY_FIELDS.iter().copied())
                .collect()
        } else {
            fields.iter().map(String::as_str).collect()
        };
        Columns(
            names
                .into_iter()
                .enumerate()
                .map(|(i, name)| (name.to_string(), i))
                .collect(),
        )
    }

    fn get<'a>(&self, row: &'a [Value], name: &str) -> Option<&'a Value> {
        self.0.get(name).and_then(|&i| row.get(i)).filter(|v| !v.is_null())
    }
}

/// Turns a directory response into outdoor sensor records.
///
/// Indoor rows are dropped silently. Rows missing identity or location, or
/// with no channel credentials at all, are skipped with a warning.
pub fn parse_sensor_listing(response: &DirectoryResponse) -> Vec<SensorRecord> {
    let columns = Columns::resolve(&response.fields);
    let mut sensors = Vec::with_capacity(response.data.len());
    let mut indoor = 0usize;
    let mut incomplete = 0usize;

    for row in &response.data {
        match record_from_row(&columns, row) {
            Ok(Some(record)) => sensors.push(record),
            Ok(None) => indoor += 1,
            Err(e) => {
                warn!("Skipping sensor: {}", e);
                incomplete += 1;
            }
        }
    }

    debug!(
        "Directory rows: {} kept, {} not outdoor, {} incomplete",
        sensors.len(),
        indoor,
        incomplete
    );
    sensors
}

fn record_from_row(columns: &Columns, row: &[Value]) -> Result<Option<SensorRecord>> {
    let sensor_index = columns
        .get(row, "sensor_index")
        .or_else(|| row.first())
        .and_then(Value::as_i64)
        .ok_or_else(|| PipelineError::SensorMetadataIncomplete {
            sensor_index: -1,
            message: format!("row without a sensor index: {:?}", row),
        })?;

    let location_type = columns
        .get(row, "location_type")
        .or_else(|| row.last())
        .and_then(Value::as_i64);
    if location_type != Some(LOCATION_OUTDOOR) {
        return Ok(None);
    }

    let incomplete = |message: &str| PipelineError::SensorMetadataIncomplete {
        sensor_index,
        message: message.to_string(),
    };

    let latitude = columns
        .get(row, "latitude")
        .and_then(Value::as_f64)
        .ok_or_else(|| incomplete("missing latitude"))?;
    let longitude = columns
        .get(row, "longitude")
        .and_then(Value::as_f64)
        .ok_or_else(|| incomplete("missing longitude"))?;

    let name = columns
        .get(row, "name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| sensor_index.to_string());

    let credentials = |id: &str, key: &str| -> Option<StreamCredentials> {
        Some(StreamCredentials {
            stream_id: columns.get(row, id).and_then(json_to_id)?,
            stream_key: columns.get(row, key).and_then(json_to_id)?,
        })
    };
    let channel_a = credentials("primary_id_a", "primary_key_a");
    let channel_b = credentials("primary_id_b", "primary_key_b");

    if channel_a.is_none() && channel_b.is_none() {
        return Err(incomplete("no stream credentials on either channel"));
    }
    if channel_a.is_none() || channel_b.is_none() {
        debug!("Sensor {} has credentials for one channel only", sensor_index);
    }

    Ok(Some(SensorRecord {
        sensor_index,
        name,
        latitude,
        longitude,
        channel_a,
        channel_b,
    }))
}
