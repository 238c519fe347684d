// validation.rs

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::ERRORS;
use crate::error::{PipelineError, Result};
use crate::types::{BoundingBox, Channel};

// Labels end up in file names.
static LABEL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("Failed to compile label regex"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationLimits {
    #[serde(with = "humantime_serde")]
    pub max_time_range: Duration,
    pub max_interval_minutes: u32,
    pub max_label_len: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_time_range: Duration::from_secs(2 * 365 * 24 * 60 * 60), // 2 years
            max_interval_minutes: 1440,
            max_label_len: 64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Validator;

impl Validator {
    pub fn validate_bounding_box(bbox: &BoundingBox) -> Result<()> {
        let mut errors = Vec::new();
        let corners = [bbox.west, bbox.south, bbox.east, bbox.north];

        if corners.iter().any(|c| !c.is_finite()) {
            errors.push("Coordinates must be finite");
        } else {
            if bbox.west >= bbox.east {
                errors.push("West longitude must be less than east longitude");
            }
            if bbox.south >= bbox.north {
                errors.push("South latitude must be less than north latitude");
            }
            if !(-180.0..=180.0).contains(&bbox.west) || !(-180.0..=180.0).contains(&bbox.east) {
                errors.push("Longitude must be within [-180, 180]");
            }
            if !(-90.0..=90.0).contains(&bbox.south) || !(-90.0..=90.0).contains(&bbox.north) {
                errors.push("Latitude must be within [-90, 90]");
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::invalid_request(
                ERRORS.invalid_bbox,
                format!(
                    "west: {}, south: {}, east: {}, north: {}",
                    bbox.west, bbox.south, bbox.east, bbox.north
                ),
                errors.into_iter().map(String::from).collect(),
            ))
        }
    }

    pub fn validate_time_range(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limits: &ValidationLimits,
    ) -> Result<()> {
        let mut errors = Vec::new();

        if end <= start {
            errors.push("End time must be after start time".to_string());
        } else if let Ok(max) = chrono::Duration::from_std(limits.max_time_range) {
            if end - start > max {
                errors.push(format!(
                    "Time range cannot exceed {} days",
                    max.num_days()
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::invalid_request(
                ERRORS.invalid_timerange,
                format!("start: {}, end: {}", start, end),
                errors,
            ))
        }
    }

    pub fn validate_interval(interval_minutes: u32, limits: &ValidationLimits) -> Result<()> {
        if interval_minutes == 0 || interval_minutes > limits.max_interval_minutes {
            return Err(PipelineError::invalid_request(
                "Invalid averaging interval",
                format!("interval: {} min", interval_minutes),
                vec![format!(
                    "Interval must be between 1 and {} minutes",
                    limits.max_interval_minutes
                )],
            ));
        }
        Ok(())
    }

    pub fn validate_channels(channels: &[Channel]) -> Result<()> {
        if channels.is_empty() {
            return Err(PipelineError::invalid_request(
                "No channels requested",
                "channels: []",
                vec!["At least one channel must be requested".to_string()],
            ));
        }
        Ok(())
    }

    pub fn validate_label(label: &str, limits: &ValidationLimits) -> Result<()> {
        let mut errors = Vec::new();

        if label.is_empty() {
            errors.push("Label cannot be empty");
        }
        if label.len() > limits.max_label_len {
            errors.push("Label is too long");
        }
        if !label.is_empty() && !LABEL_REGEX.is_match(label) {
            errors.push("Label may only contain letters, digits, '_' and '-'");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::invalid_request(
                "Invalid label",
                format!("label: {}", label),
                errors.into_iter().map(String::from).collect(),
            ))
        }
    }
}
