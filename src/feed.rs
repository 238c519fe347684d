//! Historical readings from the time-series host.
//!
//! Work is split into units of one sensor channel over one pagination window.
//! Units run through a bounded, order-preserving stream behind a shared rate
//! limiter. A unit that fails after its retries is dropped and counted; it
//! never aborts its siblings.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::constants::{ERRORS, SUPPORTED_AVERAGES};
use crate::error::{PipelineError, Result};
use crate::metrics::FetchMetrics;
use crate::pagination::plan_request_windows;
use crate::retry::{self, RetryPolicy};
use crate::types::{Channel, FeedRequest, FeedRow, PaginationWindow, RawRow, RawTable, SensorRecord};

/// Anything that can return the raw feed rows for one unit of work.
pub trait FeedSource {
    fn fetch_window(
        &self,
        request: &FeedRequest,
    ) -> impl Future<Output = Result<Vec<FeedRow>>> + Send;
}

/// Raw tables keyed by channel. A channel no sensor could be fetched for is absent.
pub type RawTableSet = BTreeMap<Channel, RawTable>;

/// The `average` query value for an interval, if the host supports it.
pub fn average_for(interval_minutes: u32) -> Option<u32> {
    SUPPORTED_AVERAGES
        .contains(&interval_minutes)
        .then_some(interval_minutes)
}

/// Start of the window's first day, as the host expects it.
pub fn format_start(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d 00:00:00").to_string()
}

/// End of the window's last day, as the host expects it.
pub fn format_end(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d 23:59:59").to_string()
}

/// Parses a feed CSV body. An empty body is an empty feed.
pub fn parse_feed_csv(body: &str) -> Result<Vec<FeedRow>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut rows = Vec::new();
    for record in reader.deserialize::<FeedRow>() {
        rows.push(record?);
    }
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: Client,
    base_url: String,
    rate_limit_cooldown: Duration,
}

impl HttpFeedSource {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            base_url: config.feed_url.trim_end_matches('/').to_string(),
            rate_limit_cooldown: config.retry.rate_limit_cooldown,
        })
    }

    pub fn build_url(&self, request: &FeedRequest) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{}/feeds.csv", self.base_url, request.stream_id))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("api_key", &request.stream_key)
                .append_pair("start", &format_start(request.window.start))
                .append_pair("end", &format_end(request.window.end));
            if let Some(average) = request.average {
                query.append_pair("average", &average.to_string());
            }
        }
        Ok(url)
    }
}

impl FeedSource for HttpFeedSource {
    async fn fetch_window(&self, request: &FeedRequest) -> Result<Vec<FeedRow>> {
        let url = self.build_url(request)?;
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                PipelineError::transient(
                    format!("{}: {}", ERRORS.connection_error, e),
                    request.to_string(),
                )
            } else {
                PipelineError::Reqwest(e)
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::rate_limited(self.rate_limit_cooldown));
        }
        if !status.is_success() {
            return Err(PipelineError::Server {
                message: format!("feed returned {} for {}", status, request),
                status: status.as_u16(),
                body: response.text().await.ok(),
            });
        }

        let body = response.text().await?;
        parse_feed_csv(&body).map_err(|e| {
            PipelineError::transient(format!("{}: {}", ERRORS.parse_error, e), request.to_string())
        })
    }
}

pub struct TimeSeriesFetcher<F> {
    source: F,
    limiter: Option<DefaultDirectRateLimiter>,
    retry: RetryPolicy,
    max_records: u32,
    max_concurrent: usize,
}

impl<F: FeedSource + Sync> TimeSeriesFetcher<F> {
    pub fn new(source: F, config: &Config) -> Self {
        Self::with_limits(
            source,
            config.retry.clone(),
            config.max_records_per_request,
            config.max_concurrent,
            config.request_delay,
        )
    }

    /// A zero `request_delay` disables the limiter.
    pub fn with_limits(
        source: F,
        retry: RetryPolicy,
        max_records: u32,
        max_concurrent: usize,
        request_delay: Duration,
    ) -> Self {
        let limiter = Quota::with_period(request_delay).map(RateLimiter::direct);
        Self {
            source,
            limiter,
            retry,
            max_records,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn source(&self) -> &F {
        &self.source
    }

    /// Builds the unit list in channel, sensor, window order.
    ///
    /// Sensors without credentials for a channel get no units there; their
    /// windows are counted as skipped.
    pub fn plan_units(
        &self,
        sensors: &[SensorRecord],
        windows: &[PaginationWindow],
        interval_minutes: u32,
        channels: &[Channel],
        metrics: &FetchMetrics,
    ) -> BTreeMap<Channel, Vec<FeedRequest>> {
        let average = average_for(interval_minutes);
        let mut plan: BTreeMap<Channel, Vec<FeedRequest>> = BTreeMap::new();

        for &channel in channels {
            if plan.contains_key(&channel) {
                continue;
            }
            let mut units = Vec::with_capacity(sensors.len() * windows.len());
            for sensor in sensors {
                metrics.record_planned(windows.len());
                let Some(credentials) = sensor.credentials(channel) else {
                    warn!(
                        "{}",
                        PipelineError::SensorMetadataIncomplete {
                            sensor_index: sensor.sensor_index,
                            message: format!("no credentials for channel {}, skipping", channel),
                        }
                    );
                    for _ in windows {
                        metrics.record_unit_skipped();
                    }
                    continue;
                };
                units.extend(windows.iter().map(|window| FeedRequest {
                    channel,
                    sensor_index: sensor.sensor_index,
                    stream_id: credentials.stream_id.clone(),
                    stream_key: credentials.stream_key.clone(),
                    window: *window,
                    average,
                }));
            }
            plan.insert(channel, units);
        }
        plan
    }

    /// Fetches every sensor channel over `[start, end]` and merges per channel.
    ///
    /// Only planning errors propagate. Channels that had no sensor with
    /// credentials are absent from the result.
    pub async fn fetch(
        &self,
        sensors: &[SensorRecord],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval_minutes: u32,
        channels: &[Channel],
        metrics: &FetchMetrics,
    ) -> Result<RawTableSet> {
        let windows = plan_request_windows(start, end, self.max_records, interval_minutes)?;
        let plan = self.plan_units(sensors, &windows, interval_minutes, channels, metrics);

        let mut tables = RawTableSet::new();
        for (channel, units) in plan {
            if units.is_empty() {
                debug!("Channel {}: no sensor has credentials, nothing to fetch", channel);
                continue;
            }

            let partials: Vec<(&FeedRequest, Option<Vec<FeedRow>>)> = stream::iter(units.iter())
                .map(move |unit| async move { (unit, self.fetch_unit(unit, metrics).await) })
                .buffered(self.max_concurrent)
                .collect()
                .await;

            let table = merge_partials(channel, sensors, partials);
            info!(
                "Channel {}: {} unit(s), {} row(s) after merge",
                channel,
                units.len(),
                table.rows.len()
            );
            tables.insert(channel, table);
        }
        Ok(tables)
    }

    /// One unit with its own retry budget. `None` means the unit was dropped.
    async fn fetch_unit(&self, unit: &FeedRequest, metrics: &FetchMetrics) -> Option<Vec<FeedRow>> {
        let context = unit.to_string();
        let source = &self.source;
        let limiter = self.limiter.as_ref();

        let outcome = retry::execute(&self.retry, &context, move || async move {
            if let Some(limiter) = limiter {
                limiter.until_ready().await;
            }
            let started = Instant::now();
            let result = source.fetch_window(unit).await;
            metrics.record_request(started.elapsed());
            if let Err(e) = &result {
                metrics.record_error(Some(e.to_string()));
            }
            result
        })
        .await;

        metrics.record_retries(outcome.retries, outcome.rate_limited);
        match outcome.result {
            Ok(rows) => {
                debug!("{}: {} row(s)", context, rows.len());
                if rows.len() >= self.max_records as usize {
                    warn!(
                        "{} returned {} row(s), at the record cap of {}; the host may have truncated it",
                        context,
                        rows.len(),
                        self.max_records
                    );
                    metrics.record_unit_at_cap();
                }
                metrics.record_unit_success(rows.len());
                Some(rows)
            }
            Err(e) => {
                warn!(
                    "Dropping {} after {} attempt(s): {}",
                    context, outcome.attempts, e
                );
                metrics.record_unit_skipped();
                None
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum RowKey {
    Entry(i64),
    Created(String),
}

/// Single reducer for one channel's partial results.
///
/// Attaches sensor identity and location, drops rows repeated across shared
/// window days (first occurrence wins) and groups rows by sensor order. Row
/// order inside a sensor is window order then feed order.
pub fn merge_partials(
    channel: Channel,
    sensors: &[SensorRecord],
    partials: Vec<(&FeedRequest, Option<Vec<FeedRow>>)>,
) -> RawTable {
    let lookup: HashMap<i64, (usize, &SensorRecord)> = sensors
        .iter()
        .enumerate()
        .map(|(position, sensor)| (sensor.sensor_index, (position, sensor)))
        .collect();

    let mut seen: HashSet<(i64, RowKey)> = HashSet::new();
    let mut rows: Vec<(usize, RawRow)> = Vec::new();
    let mut duplicates = 0usize;

    for (unit, feed_rows) in partials {
        let (Some(feed_rows), Some(&(position, sensor))) =
            (feed_rows, lookup.get(&unit.sensor_index))
        else {
            continue;
        };

        for feed in feed_rows {
            let key = match feed.entry_id {
                Some(id) => RowKey::Entry(id),
                None => RowKey::Created(feed.created_at.clone()),
            };
            if !seen.insert((sensor.sensor_index, key)) {
                duplicates += 1;
                continue;
            }
            rows.push((
                position,
                RawRow {
                    sensor_index: sensor.sensor_index,
                    sensor_name: sensor.name.clone(),
                    latitude: sensor.latitude,
                    longitude: sensor.longitude,
                    feed,
                },
            ));
        }
    }

    if duplicates > 0 {
        debug!("Channel {}: dropped {} duplicate row(s)", channel, duplicates);
    }

    rows.sort_by_key(|(position, _)| *position);
    RawTable {
        channel,
        rows: rows.into_iter().map(|(_, row)| row).collect(),
    }
}
