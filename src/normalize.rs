//! Raw feed rows to readings. Pure, no I/O.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::aqi::calc_aqi;
use crate::error::Result;
use crate::types::{AqiSource, RawRow, RawTable, Reading};

#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    pub source: AqiSource,
    /// Readings whose index is above this are dropped.
    pub ceiling: i32,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            source: AqiSource::default(),
            ceiling: crate::constants::DEFAULT_AQI_CEILING,
        }
    }
}

/// Where each input row went.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeStats {
    pub input_rows: usize,
    pub null_density: usize,
    pub bad_timestamp: usize,
    pub above_ceiling: usize,
    pub kept: usize,
}

#[derive(Debug, Clone)]
pub struct Normalized {
    pub readings: Vec<Reading>,
    pub stats: NormalizeStats,
}

/// Parses the host's timestamps into UTC instants.
///
/// Accepts `2020-10-26 00:10:00 UTC`, RFC 3339, and `%Y-%m-%d %H:%M:%S %z`.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Some(naive) = raw.strip_suffix(" UTC") {
        return Ok(NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S")?.and_utc());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    Ok(DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z")?.with_timezone(&Utc))
}

fn source_density(row: &RawRow, source: AqiSource) -> Option<f64> {
    match source {
        AqiSource::Atmospheric => row.feed.field8,
        AqiSource::Cf1 => row.feed.field2,
    }
}

/// Converts one channel's raw table into readings.
///
/// Rows without the source density or with an unparseable timestamp are
/// dropped, as are readings above the ceiling. A density that matches no AQI
/// category is an error and aborts the conversion.
pub fn normalize(table: &RawTable, options: &NormalizeOptions) -> Result<Normalized> {
    let mut stats = NormalizeStats {
        input_rows: table.rows.len(),
        ..Default::default()
    };
    let mut readings = Vec::with_capacity(table.rows.len());

    for row in &table.rows {
        let Some(density) = source_density(row, options.source) else {
            stats.null_density += 1;
            continue;
        };

        let created_at = match parse_timestamp(&row.feed.created_at) {
            Ok(at) => at,
            Err(e) => {
                debug!(
                    "Sensor {}: unparseable timestamp {:?}: {}",
                    row.sensor_index, row.feed.created_at, e
                );
                stats.bad_timestamp += 1;
                continue;
            }
        };

        let aqi = calc_aqi(density)?;
        if aqi > options.ceiling {
            stats.above_ceiling += 1;
            continue;
        }

        let feed = &row.feed;
        readings.push(Reading {
            longitude: row.longitude,
            latitude: row.latitude,
            sensor_name: row.sensor_name.clone(),
            created_at,
            entry_id: feed.entry_id,
            pm1_0_cf1: feed.field1,
            pm2_5_cf1: feed.field2,
            pm10_0_cf1: feed.field3,
            uptime_minutes: feed.field4,
            rssi_dbm: feed.field5,
            temperature_f: feed.field6,
            humidity_pct: feed.field7,
            pm2_5_atm: feed.field8,
            aqi,
            sensor_index: row.sensor_index,
        });
    }
    stats.kept = readings.len();

    if stats.bad_timestamp > 0 || stats.above_ceiling > 0 {
        warn!(
            "Channel {}: dropped {} row(s) with bad timestamps and {} above AQI {}",
            table.channel, stats.bad_timestamp, stats.above_ceiling, options.ceiling
        );
    }
    debug!("Channel {}: {:?}", table.channel, stats);

    Ok(Normalized { readings, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::types::{Channel, FeedRow};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn row(created_at: &str, atm: Option<f64>, cf1: Option<f64>) -> RawRow {
        RawRow {
            sensor_index: 77,
            sensor_name: "Hilltop".into(),
            latitude: 33.75,
            longitude: -117.47,
            feed: FeedRow {
                created_at: created_at.into(),
                entry_id: Some(1),
                field2: cf1,
                field8: atm,
                ..Default::default()
            },
        }
    }

    fn table(rows: Vec<RawRow>) -> RawTable {
        RawTable {
            channel: Channel::A,
            rows,
        }
    }

    #[test]
    fn test_null_rows_are_dropped() {
        let raw = table(vec![
            row("2020-10-26 00:00:00 UTC", None, Some(3.0)),
            row("2020-10-26 00:10:00 UTC", Some(10.0), Some(11.0)),
        ]);

        let out = normalize(&raw, &NormalizeOptions::default()).unwrap();
        assert_eq!(out.readings.len(), 1);
        let reading = &out.readings[0];
        assert_eq!(reading.aqi, 42);
        assert_eq!(reading.sensor_name, "Hilltop");
        assert_eq!(reading.sensor_index, 77);
        assert_eq!(
            reading.created_at,
            Utc.with_ymd_and_hms(2020, 10, 26, 0, 10, 0).unwrap()
        );
        assert_eq!(out.stats.null_density, 1);
        assert_eq!(out.stats.kept, 1);
    }

    #[test]
    fn test_cf1_source_reads_field2() {
        let raw = table(vec![row("2020-10-26 00:00:00 UTC", None, Some(20.0))]);
        let options = NormalizeOptions {
            source: AqiSource::Cf1,
            ..Default::default()
        };
        let out = normalize(&raw, &options).unwrap();
        assert_eq!(out.readings[0].aqi, 68);
    }

    #[test]
    fn test_ceiling_drops_spikes() {
        let raw = table(vec![
            row("2020-10-26 00:00:00 UTC", Some(2000.0), None),
            row("2020-10-26 00:10:00 UTC", Some(5.0), None),
        ]);
        let options = NormalizeOptions {
            ceiling: 800,
            ..Default::default()
        };
        let out = normalize(&raw, &options).unwrap();
        assert_eq!(out.readings.len(), 1);
        assert_eq!(out.stats.above_ceiling, 1);
    }

    #[test]
    fn test_infinite_density_fails_the_channel() {
        let raw = table(vec![row("2020-10-26 00:00:00 UTC", Some(f64::INFINITY), None)]);
        assert!(matches!(
            normalize(&raw, &NormalizeOptions::default()),
            Err(PipelineError::MalformedReading { .. })
        ));
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2020, 10, 26, 7, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2020-10-26 07:00:00 UTC").unwrap(), expected);
        assert_eq!(parse_timestamp("2020-10-26T07:00:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2020-10-26 00:00:00 -0700").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_bad_timestamps_are_counted() {
        let raw = table(vec![row("not a time", Some(5.0), None)]);
        let out = normalize(&raw, &NormalizeOptions::default()).unwrap();
        assert!(out.readings.is_empty());
        assert_eq!(out.stats.bad_timestamp, 1);
    }
}
