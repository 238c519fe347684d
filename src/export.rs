// export.rs

use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::types::{BoundingBox, Channel, Reading};

/// `{label}_{YYYYMMDD}_{YYYYMMDD}_{channel}.csv`
pub fn file_name(label: &str, start: DateTime<Utc>, end: DateTime<Utc>, channel: Channel) -> String {
    format!(
        "{}_{}_{}_{}.csv",
        label,
        start.format("%Y%m%d"),
        end.format("%Y%m%d"),
        channel
    )
}

/// Serializes readings to CSV text, header first.
pub fn readings_to_csv(readings: &[Reading]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for reading in readings {
        wtr.serialize(reading)?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| PipelineError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| {
        PipelineError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })
}

/// Writes one channel's readings, creating parent directories as needed.
pub fn write_readings(path: impl AsRef<Path>, readings: &[Reading]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, readings_to_csv(readings)?)?;
    info!("Wrote {} reading(s) to {}", readings.len(), path.display());
    Ok(())
}

/// Reloads a previously exported table.
pub fn read_readings(path: impl AsRef<Path>) -> Result<Vec<Reading>> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let mut readings = Vec::new();
    for record in reader.deserialize::<Reading>() {
        readings.push(record?);
    }
    Ok(readings)
}

/// Smallest box holding every reading. `None` for fewer than two distinct points.
pub fn bounding_box_of(readings: &[Reading]) -> Option<BoundingBox> {
    let first = readings.first()?;
    let init = (first.longitude, first.latitude, first.longitude, first.latitude);
    let (west, south, east, north) = readings.iter().fold(init, |(w, s, e, n), r| {
        (
            w.min(r.longitude),
            s.min(r.latitude),
            e.max(r.longitude),
            n.max(r.latitude),
        )
    });
    BoundingBox::new(west, south, east, north).ok()
}
