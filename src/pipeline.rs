//! Directory lookup, fetch and normalization composed into one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::aqi::AqiCategory;
use crate::config::Config;
use crate::constants::{DEFAULT_INTERVAL_MINUTES, ERRORS};
use crate::directory::{DirectoryClient, SensorDirectory};
use crate::error::Result;
use crate::feed::{FeedSource, HttpFeedSource, TimeSeriesFetcher};
use crate::metadata::{MetadataSource, MetadataStore};
use crate::metrics::{FetchMetrics, MetricsSnapshot};
use crate::normalize::{normalize, NormalizeOptions, NormalizeStats};
use crate::types::{BoundingBox, Channel, ChannelResultSet, SensorRecord};
use crate::validation::{ValidationLimits, Validator};

fn default_interval() -> u32 {
    DEFAULT_INTERVAL_MINUTES
}

fn default_channels() -> Vec<Channel> {
    Channel::ALL.to_vec()
}

/// Parameters of a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default = "default_interval")]
    pub interval_minutes: u32,
    #[serde(default = "default_channels")]
    pub channels: Vec<Channel>,
    /// Absent means discover inside the configured default box.
    #[serde(default)]
    pub metadata: Option<MetadataSource>,
    /// Names the metadata artifact and the exported files.
    pub label: String,
}

/// What happened during a run, alongside its results.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub sensors: usize,
    pub metadata_artifact: Option<PathBuf>,
    pub fetch: MetricsSnapshot,
    pub normalize: BTreeMap<Channel, NormalizeStats>,
}

impl RunReport {
    pub fn readings(&self) -> usize {
        self.normalize.values().map(|s| s.kept).sum()
    }
}

#[derive(Debug)]
pub struct PipelineOutput {
    pub results: ChannelResultSet,
    pub report: RunReport,
}

pub struct Pipeline<D, F> {
    directory: D,
    fetcher: TimeSeriesFetcher<F>,
    store: MetadataStore,
    normalize: NormalizeOptions,
    limits: ValidationLimits,
    default_bbox: BoundingBox,
}

impl Pipeline<DirectoryClient, HttpFeedSource> {
    /// The live pipeline over HTTP.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.check()?;
        Ok(Self::new(
            DirectoryClient::new(config)?,
            HttpFeedSource::new(config)?,
            config,
        ))
    }
}

impl<D: SensorDirectory, F: FeedSource + Sync> Pipeline<D, F> {
    pub fn new(directory: D, feed: F, config: &Config) -> Self {
        Self {
            directory,
            fetcher: TimeSeriesFetcher::new(feed, config),
            store: MetadataStore::new(config.metadata_dir()),
            normalize: NormalizeOptions {
                source: config.aqi_source,
                ceiling: config.aqi_ceiling,
            },
            limits: config.limits.clone(),
            default_bbox: config.default_bbox,
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn feed(&self) -> &F {
        self.fetcher.source()
    }

    /// The request's sensor source, falling back to discovery in the default box.
    pub fn metadata_source(&self, request: &RunRequest) -> MetadataSource {
        request
            .metadata
            .clone()
            .unwrap_or(MetadataSource::Discover(self.default_bbox))
    }

    pub fn validate(&self, request: &RunRequest) -> Result<()> {
        Validator::validate_time_range(request.start, request.end, &self.limits)?;
        Validator::validate_interval(request.interval_minutes, &self.limits)?;
        Validator::validate_channels(&request.channels)?;
        Validator::validate_label(&request.label, &self.limits)?;
        if let MetadataSource::Discover(bbox) = self.metadata_source(request) {
            Validator::validate_bounding_box(&bbox)?;
        }
        Ok(())
    }

    /// Sensors for the run, and the artifact they were saved to or loaded from.
    ///
    /// A fresh discovery is saved under the run label when it found anything.
    pub async fn resolve_sensors(
        &self,
        source: &MetadataSource,
        label: &str,
    ) -> Result<(Vec<SensorRecord>, Option<PathBuf>)> {
        match source {
            MetadataSource::LoadNamed(path) => {
                let sensors = self.store.load(path)?;
                Ok((sensors, Some(path.clone())))
            }
            MetadataSource::Discover(bbox) => {
                let sensors = self.directory.list_sensors(bbox).await?;
                if sensors.is_empty() {
                    warn!("{} in {}", ERRORS.no_sensors, bbox);
                    return Ok((sensors, None));
                }
                let path = self.store.save(label, bbox, &sensors)?;
                Ok((sensors, Some(path)))
            }
        }
    }

    /// Runs discovery, fetch and normalization.
    ///
    /// Only channels that produced at least one reading are returned. Dropped
    /// fetch units are counted in the report, never silently lost.
    pub async fn run(&self, request: &RunRequest) -> Result<PipelineOutput> {
        self.validate(request)?;

        let source = self.metadata_source(request);
        let (sensors, metadata_artifact) = self.resolve_sensors(&source, &request.label).await?;

        let metrics = FetchMetrics::new();
        let tables = self
            .fetcher
            .fetch(
                &sensors,
                request.start,
                request.end,
                request.interval_minutes,
                &request.channels,
                &metrics,
            )
            .await?;

        let mut results = ChannelResultSet::new();
        let mut normalize_stats = BTreeMap::new();
        for (channel, table) in &tables {
            let normalized = normalize(table, &self.normalize)?;
            normalize_stats.insert(*channel, normalized.stats);
            if let Some(peak) = normalized.readings.iter().map(|r| r.aqi).max() {
                info!(
                    "Channel {}: {} reading(s), peak AQI {} ({})",
                    channel,
                    normalized.readings.len(),
                    peak,
                    AqiCategory::for_index(peak).label()
                );
                results.insert(*channel, normalized.readings);
            }
        }

        let report = RunReport {
            sensors: sensors.len(),
            metadata_artifact,
            fetch: metrics.snapshot(),
            normalize: normalize_stats,
        };

        if report.fetch.units_skipped > 0 {
            warn!(
                "{} of {} fetch unit(s) skipped; results are incomplete",
                report.fetch.units_skipped, report.fetch.units_planned
            );
        }
        if report.fetch.units_at_cap > 0 {
            warn!(
                "{} fetch unit(s) hit the record cap of a single request; rows may be missing",
                report.fetch.units_at_cap
            );
        }
        if !report.fetch.is_consistent() {
            warn!(
                "Unit accounting mismatch: planned {}, succeeded {}, skipped {}",
                report.fetch.units_planned, report.fetch.units_succeeded, report.fetch.units_skipped
            );
        }
        info!(
            "Run '{}': {} sensor(s), units {} planned / {} succeeded / {} skipped, {} row(s) fetched, {} reading(s) kept in {} channel(s) ({:?})",
            request.label,
            report.sensors,
            report.fetch.units_planned,
            report.fetch.units_succeeded,
            report.fetch.units_skipped,
            report.fetch.rows_fetched,
            report.readings(),
            results.len(),
            report.fetch.elapsed
        );

        Ok(PipelineOutput { results, report })
    }
}
