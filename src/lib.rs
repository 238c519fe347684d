pub mod aqi;
pub mod config;
pub mod constants;
pub mod directory;
pub mod error;
pub mod export;
pub mod feed;
pub mod metadata;
pub mod metrics;
pub mod normalize;
pub mod pagination;
pub mod pipeline;
pub mod retry;
pub mod types;
pub mod validation;

pub use aqi::{calc_aqi, AqiCategory};
pub use config::Config;
pub use directory::{DirectoryClient, SensorDirectory};
pub use error::{PipelineError, Result};
pub use feed::{FeedSource, HttpFeedSource, TimeSeriesFetcher};
pub use metadata::{MetadataSource, MetadataStore};
pub use pagination::plan_windows;
pub use pipeline::{Pipeline, PipelineOutput, RunReport, RunRequest};
pub use types::{BoundingBox, Channel, ChannelResultSet, Reading, SensorRecord};
