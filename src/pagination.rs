//! Splits a time range into windows that each stay under a per-request record cap.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use tracing::{debug, warn};

use crate::constants::ERRORS;
use crate::error::{PipelineError, Result};
use crate::types::PaginationWindow;

/// Rows the host would return for `[start, end]` at one row per `interval_minutes`.
pub fn estimated_rows(start: DateTime<Utc>, end: DateTime<Utc>, interval_minutes: u32) -> f64 {
    let minutes = (end - start).num_milliseconds() as f64 / 60_000.0;
    minutes / interval_minutes as f64
}

/// Number of windows needed so no window exceeds `max_records` rows. Never less than one.
pub fn window_count(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_records: u32,
    interval_minutes: u32,
) -> usize {
    let rows = estimated_rows(start, end, interval_minutes);
    ((rows / max_records as f64).ceil() as usize).max(1)
}

/// Returns `count + 1` boundary instants from `start` to exactly `end`.
pub fn plan_boundaries(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_records: u32,
    interval_minutes: u32,
) -> Result<Vec<DateTime<Utc>>> {
    check_inputs(start, end, max_records, interval_minutes)?;

    let count = window_count(start, end, max_records, interval_minutes);
    let span_ms = (end - start).num_milliseconds();
    let mut boundaries = Vec::with_capacity(count + 1);
    for i in 0..count as i64 {
        boundaries.push(start + Duration::milliseconds(span_ms * i / count as i64));
    }
    boundaries.push(end);
    Ok(boundaries)
}

/// Divides `[start, end]` into the minimum number of equal-width windows.
///
/// Adjacent windows share their boundary instant; the first starts at `start`
/// and the last ends at `end`.
pub fn plan_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_records: u32,
    interval_minutes: u32,
) -> Result<Vec<PaginationWindow>> {
    let boundaries = plan_boundaries(start, end, max_records, interval_minutes)?;
    let windows: Vec<PaginationWindow> = boundaries
        .windows(2)
        .map(|pair| PaginationWindow {
            start: pair[0],
            end: pair[1],
        })
        .collect();

    debug!(
        "Planned {} window(s) for {} .. {} at {} min (cap {})",
        windows.len(),
        start,
        end,
        interval_minutes,
        max_records
    );
    Ok(windows)
}

const MINUTES_PER_DAY: i64 = 24 * 60;

fn midnight(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

/// Calendar days a request for `window` covers once widened to whole days.
pub fn request_days(window: &PaginationWindow) -> i64 {
    (window.end.date_naive() - window.start.date_naive()).num_days() + 1
}

/// Rows the host returns for `window` after widening it to whole days.
pub fn request_rows(window: &PaginationWindow, interval_minutes: u32) -> f64 {
    (request_days(window) * MINUTES_PER_DAY) as f64 / interval_minutes as f64
}

/// Windows as the host serves them: from the first day's midnight through the
/// last day's final second.
///
/// Keeps the [`plan_windows`] split when every widened request fits the cap.
/// Otherwise re-plans on whole days that do not overlap, with as many days per
/// request as the cap allows and never fewer than one.
pub fn plan_request_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_records: u32,
    interval_minutes: u32,
) -> Result<Vec<PaginationWindow>> {
    let windows = plan_windows(start, end, max_records, interval_minutes)?;
    if windows
        .iter()
        .all(|w| request_rows(w, interval_minutes) <= max_records as f64)
    {
        return Ok(windows);
    }

    let fitting_days = max_records as i64 * interval_minutes as i64 / MINUTES_PER_DAY;
    if fitting_days == 0 {
        warn!(
            "One day at {} min exceeds the record cap of {}; requests will be truncated",
            interval_minutes, max_records
        );
    }
    let days_per_request = fitting_days.max(1);

    let last = end.date_naive();
    let mut day = start.date_naive();
    let mut aligned = Vec::new();
    while day <= last {
        let final_day = (day + Duration::days(days_per_request - 1)).min(last);
        aligned.push(PaginationWindow {
            start: midnight(day).max(start),
            end: (midnight(final_day) + Duration::seconds(MINUTES_PER_DAY * 60 - 1)).min(end),
        });
        day = final_day + Duration::days(1);
    }

    debug!(
        "Re-planned {} window(s) as {} whole-day request(s) of up to {} day(s)",
        windows.len(),
        aligned.len(),
        days_per_request
    );
    Ok(aligned)
}

fn check_inputs(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_records: u32,
    interval_minutes: u32,
) -> Result<()> {
    let mut errors = Vec::new();
    if end < start {
        errors.push("End time must not precede start time".to_string());
    }
    if max_records == 0 {
        errors.push("Record cap must be positive".to_string());
    }
    if interval_minutes == 0 {
        errors.push("Record interval must be positive".to_string());
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
