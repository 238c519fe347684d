//! PM2.5 to AQI conversion.
//!
//! This is an approximation of the US EPA index computed straight from a
//! particle-density reading; it is not the regulatory 24-hour methodology.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// AQI category, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AqiCategory {
    Good,
    Moderate,
    Sensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
    /// Readings past the top of the scale. Shares hazardous breakpoints.
    BeyondAqi,
}

/// Breakpoints for one category: index range and concentration range (µg/m³).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub category: AqiCategory,
    pub index_low: f64,
    pub index_high: f64,
    pub conc_low: f64,
    pub conc_high: f64,
}

const fn bp(
    category: AqiCategory,
    index_low: f64,
    index_high: f64,
    conc_low: f64,
    conc_high: f64,
) -> Breakpoint {
    Breakpoint {
        category,
        index_low,
        index_high,
        conc_low,
        conc_high,
    }
}

pub const PM25_BREAKPOINTS: [Breakpoint; 7] = [
    bp(AqiCategory::Good, 0.0, 50.0, 0.0, 12.0),
    bp(AqiCategory::Moderate, 51.0, 100.0, 12.1, 35.4),
    bp(AqiCategory::Sensitive, 101.0, 150.0, 35.5, 55.4),
    bp(AqiCategory::Unhealthy, 151.0, 200.0, 55.5, 150.4),
    bp(AqiCategory::VeryUnhealthy, 201.0, 300.0, 150.5, 250.4),
    bp(AqiCategory::Hazardous, 301.0, 500.0, 250.5, 500.4),
    bp(AqiCategory::BeyondAqi, 301.0, 500.0, 250.5, 500.4),
];

/// Lower bound of the open-ended overflow bucket.
const BEYOND_AQI_FLOOR: f64 = 500.5;

impl AqiCategory {
    /// Maps a computed index back to its display label.
    pub fn for_index(aqi: i32) -> Self {
        match aqi {
            i32::MIN..=50 => AqiCategory::Good,
            51..=100 => AqiCategory::Moderate,
            101..=150 => AqiCategory::Sensitive,
            151..=200 => AqiCategory::Unhealthy,
            201..=300 => AqiCategory::VeryUnhealthy,
            _ => AqiCategory::Hazardous,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::Sensitive => "Sensitive",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very",
            AqiCategory::Hazardous | AqiCategory::BeyondAqi => "Hazardous",
        }
    }
}

impl Breakpoint {
    fn matches(&self, value: f64) -> bool {
        if self.category == AqiCategory::BeyondAqi {
            return value >= BEYOND_AQI_FLOOR;
        }
        self.conc_low <= value && value <= self.conc_high
    }

    fn interpolate(&self, value: f64) -> f64 {
        (self.index_high - self.index_low) / (self.conc_high - self.conc_low)
            * (value - self.conc_low)
            + self.index_low
    }
}

/// Negative and NaN readings count as zero; the rest are floored to 0.1.
///
/// Values too large to scale by ten are returned as is; they are far past the
/// top of the scale either way.
pub fn truncate_reading(raw: f64) -> f64 {
    if raw.is_nan() || raw < 0.0 {
        return 0.0;
    }
    let scaled = raw * 10.0;
    if !scaled.is_finite() {
        return raw;
    }
    scaled.floor() / 10.0
}

/// Returns the category a raw reading falls into after truncation.
pub fn categorize(raw: f64) -> Result<&'static Breakpoint> {
    let value = truncate_reading(raw);
    PM25_BREAKPOINTS
        .iter()
        .find(|b| value.is_finite() && b.matches(value))
        .ok_or(PipelineError::MalformedReading { value: raw })
}

/// Converts a PM2.5 density reading to an AQI value.
///
/// Interpolates linearly inside the matching category and rounds half to even.
/// Fails with `MalformedReading` for values that match no category
/// (only `+inf` once negatives and NaN are sanitized).
pub fn calc_aqi(raw: f64) -> Result<i32> {
    let breakpoint = categorize(raw)?;
    let value = truncate_reading(raw);
    Ok(breakpoint.interpolate(value).round_ties_even() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_boundaries() {
        assert_eq!(calc_aqi(0.0).unwrap(), 0);
        assert_eq!(calc_aqi(12.0).unwrap(), 50);
        assert_eq!(calc_aqi(12.1).unwrap(), 51);
        assert_eq!(calc_aqi(35.4).unwrap(), 100);
        assert_eq!(calc_aqi(35.5).unwrap(), 101);
        assert_eq!(calc_aqi(55.4).unwrap(), 150);
        assert_eq!(calc_aqi(150.4).unwrap(), 200);
        assert_eq!(calc_aqi(250.4).unwrap(), 300);
        assert_eq!(calc_aqi(500.4).unwrap(), 500);
    }

    #[test]
    fn test_sanitized_inputs() {
        let zero = calc_aqi(0.0).unwrap();
        assert_eq!(calc_aqi(-5.0).unwrap(), zero);
        assert_eq!(calc_aqi(f64::NAN).unwrap(), zero);
        assert_eq!(calc_aqi(f64::NEG_INFINITY).unwrap(), zero);
    }

    #[test]
    fn test_truncates_instead_of_rounding() {
        // 12.09 floors to 12.0 and stays in the good band
        assert_eq!(calc_aqi(12.09).unwrap(), 50);
        assert_eq!(truncate_reading(35.49), 35.4);
    }

    #[test]
    fn test_known_values() {
        assert_eq!(calc_aqi(10.0).unwrap(), 42);
        assert_eq!(calc_aqi(20.0).unwrap(), 68);
    }

    #[test]
    fn test_beyond_scale_uses_hazardous_breakpoints() {
        let b = categorize(600.0).unwrap();
        assert_eq!(b.category, AqiCategory::BeyondAqi);
        assert!(calc_aqi(600.0).unwrap() > 500);
        assert_eq!(categorize(500.5).unwrap().category, AqiCategory::BeyondAqi);
    }

    #[test]
    fn test_huge_finite_reading_is_beyond_scale() {
        assert_eq!(truncate_reading(1e308), 1e308);
        assert_eq!(categorize(1e308).unwrap().category, AqiCategory::BeyondAqi);
        assert_eq!(calc_aqi(1e308).unwrap(), i32::MAX);
        assert_eq!(calc_aqi(f64::MAX).unwrap(), i32::MAX);
    }

    #[test]
    fn test_infinite_reading_fails_loudly() {
        let err = calc_aqi(f64::INFINITY).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedReading { .. }));
    }

    #[test]
    fn test_monotonic_within_scale() {
        let mut previous = calc_aqi(0.0).unwrap();
        for tenth in 1..=6000 {
            let value = tenth as f64 / 10.0;
            let aqi = calc_aqi(value).unwrap();
            assert!(aqi >= previous, "aqi dropped at {}: {} < {}", value, aqi, previous);
            previous = aqi;
        }
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(AqiCategory::for_index(42), AqiCategory::Good);
        assert_eq!(AqiCategory::for_index(101), AqiCategory::Sensitive);
        assert_eq!(AqiCategory::for_index(301).label(), "Hazardous");
    }
}
