//! Core domain types for the vitals system.
//!
//! This module defines the entities recovered from an export:
//! - Point records and their values
//! - Workout sessions with embedded statistics
//! - Waveform recordings and route track points
//!
//! All of them are created during one ingestion pass and never mutated after.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Metric identifier that workout distance statistics are folded into
pub const DISTANCE_METRIC: &str = "HKQuantityTypeIdentifierDistanceWalkingRunning";

/// Metric identifier that workout energy statistics are folded into
pub const ENERGY_METRIC: &str = "HKQuantityTypeIdentifierEnergyBurned";

/// Metric identifier that workout heart-rate statistics are folded into
pub const HEART_RATE_METRIC: &str = "HKQuantityTypeIdentifierHeartRate";

pub const STEP_COUNT_METRIC: &str = "HKQuantityTypeIdentifierStepCount";
pub const ACTIVE_ENERGY_METRIC: &str = "HKQuantityTypeIdentifierActiveEnergyBurned";
pub const BASAL_ENERGY_METRIC: &str = "HKQuantityTypeIdentifierBasalEnergyBurned";

/// Source name used for records without a `sourceName` attribute
pub const UNKNOWN_SOURCE: &str = "Unknown";

/// Source name attached to aggregates created from workout statistics
pub const WORKOUT_STATS_SOURCE: &str = "Workout Stats";

// ============================================================================
// Point Records
// ============================================================================

/// Value of a point record
///
/// Quantity records carry numbers; category records (sleep stages, stand
/// hours) carry identifiers that are counted but never summed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RecordValue {
    Number(f64),
    Text(String),
}

impl RecordValue {
    /// Interpret a raw attribute value; only finite numbers become `Number`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => RecordValue::Number(n),
            _ => RecordValue::Text(raw.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RecordValue::Number(n) => Some(*n),
            RecordValue::Text(_) => None,
        }
    }
}

/// One timestamped observation of a metric
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PointRecord {
    #[serde(rename = "type")]
    pub record_type: String,
    pub value: RecordValue,
    pub unit: Option<String>,
    /// Epoch milliseconds of the record's day (from `endDate`)
    pub timestamp: i64,
    pub date_key: NaiveDate,
    pub source: String,
}

// ============================================================================
// Workouts
// ============================================================================

/// A summary statistic embedded in a workout block
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatistic {
    /// Metric type after normalization
    pub metric_type: String,
    /// `None` when the raw value was not numeric
    pub value: Option<f64>,
    pub unit: Option<String>,
}

/// A recorded workout session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutSession {
    pub activity_type: String,
    /// Epoch milliseconds; full precision when the start date parses fully,
    /// otherwise the start of the day
    pub start_timestamp: i64,
    pub end_timestamp: Option<i64>,
    pub duration_minutes: f64,
    pub total_energy: f64,
    pub total_distance: f64,
    pub date_key: NaiveDate,
    pub statistics: Vec<SessionStatistic>,
}

// ============================================================================
// Derived Entities
// ============================================================================

/// One sample of a waveform recording
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WaveformSample {
    pub time: Option<f64>,
    pub value: Option<f64>,
}

/// A single electrocardiogram-style recording
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WaveformRecording {
    pub timestamp: Option<String>,
    pub heart_rate: Option<f64>,
    pub classification: Option<String>,
    pub sample_rate: Option<f64>,
    pub samples: Vec<WaveformSample>,
}

/// One point of a recorded route
///
/// Unparseable coordinates are kept as `NaN` rather than dropping the point,
/// so point indices still line up with the source file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackPoint {
    pub lat: f64,
    pub lon: f64,
    pub elevation: Option<f64>,
    pub time: Option<DateTime<Utc>>,
    pub speed: Option<f64>,
}

impl TrackPoint {
    /// Whether both coordinates parsed
    pub fn has_position(&self) -> bool {
        !self.lat.is_nan() && !self.lon.is_nan()
    }
}
