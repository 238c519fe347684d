// metadata.rs

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::types::{BoundingBox, SensorRecord};

const ARTIFACT_SUFFIX: &str = "_sensors.json";

/// Where a run gets its sensor list from. Chosen by the caller up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSource {
    /// Query the directory for this box and save the result.
    Discover(BoundingBox),
    /// Reload a previously saved artifact.
    LoadNamed(PathBuf),
}

/// Saved sensor listings, one file per label and bounding box.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, label: &str, bbox: &BoundingBox) -> PathBuf {
        self.root.join(format!("{}_{}{}", label, bbox, ARTIFACT_SUFFIX))
    }

    pub fn save(&self, label: &str, bbox: &BoundingBox, sensors: &[SensorRecord]) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)
            .map_err(|e| PipelineError::metadata(e.to_string(), &self.root))?;

        let path = self.artifact_path(label, bbox);
        let json = serde_json::to_string_pretty(sensors)?;
        fs::write(&path, json).map_err(|e| PipelineError::metadata(e.to_string(), &path))?;

        info!("Saved {} sensor(s) to {}", sensors.len(), path.display());
        Ok(path)
    }

    pub fn load(&self, path: impl AsRef<Path>) -> Result<Vec<SensorRecord>> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| PipelineError::metadata(e.to_string(), path))?;
        let sensors: Vec<SensorRecord> = serde_json::from_str(&text)
            .map_err(|e| PipelineError::metadata(format!("unreadable artifact: {}", e), path))?;

        debug!("Loaded {} sensor(s) from {}", sensors.len(), path.display());
        Ok(sensors)
    }

    /// Saved artifacts, sorted by file name. An absent store is empty.
    pub fn list_artifacts(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let is_artifact = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(ARTIFACT_SUFFIX));
            if path.is_file() && is_artifact {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}
