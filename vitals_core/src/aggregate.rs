//! Incremental aggregation of records and workout statistics.
//!
//! Memory stays bounded no matter how large the input: each metric keeps
//! running count/sum/min/max plus a sampled series for charting, and the only
//! per-day state is the distinct-day set and the workouts-per-day counts.

use crate::dates;
use crate::types::{PointRecord, SessionStatistic, WorkoutSession, WORKOUT_STATS_SOURCE};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

/// Which observations of a metric are kept in its sampled series
///
/// The first `threshold` observations are always kept; after that only every
/// `stride`-th one (by running count).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SamplingPolicy {
    pub threshold: u64,
    pub stride: u64,
}

impl SamplingPolicy {
    /// Policy for point records
    pub const RECORDS: SamplingPolicy = SamplingPolicy {
        threshold: 100,
        stride: 10,
    };

    /// Policy for statistics embedded in workouts
    pub const WORKOUT_STATISTICS: SamplingPolicy = SamplingPolicy {
        threshold: 50,
        stride: 5,
    };

    /// Whether the observation with running count `count` is sampled
    pub fn retains(&self, count: u64) -> bool {
        count <= self.threshold || (self.stride > 0 && count % self.stride == 0)
    }
}

/// One retained observation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SampledValue {
    pub date: NaiveDate,
    pub value: f64,
    pub timestamp: i64,
}

/// Running statistics for one metric type
///
/// `count` includes observations whose value was not numeric; `sum`, `min`
/// and `max` only ever see numeric values and are exact, never derived from
/// the sampled series. Until a numeric value arrives `min`/`max` hold the
/// `+inf`/`-inf` sentinels, which serialize as `0`.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricAggregate {
    pub count: u64,
    pub sum: f64,
    #[serde(serialize_with = "finite_or_zero")]
    pub min: f64,
    #[serde(serialize_with = "finite_or_zero")]
    pub max: f64,
    pub unit: Option<String>,
    pub source: Option<String>,
    pub sampled_values: Vec<SampledValue>,
}

impl MetricAggregate {
    fn new(unit: Option<&str>, source: Option<&str>) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            unit: unit.map(str::to_string),
            source: source.map(str::to_string),
            sampled_values: Vec::new(),
        }
    }

    fn observe(
        &mut self,
        value: Option<f64>,
        date: NaiveDate,
        timestamp: i64,
        policy: SamplingPolicy,
    ) {
        self.count += 1;
        let Some(value) = value else {
            return;
        };

        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        if policy.retains(self.count) {
            self.sampled_values.push(SampledValue {
                date,
                value,
                timestamp,
            });
        }
    }

    /// `sum / count`, or 0 for an empty aggregate
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Minimum with the empty sentinel normalized to 0
    pub fn min_or_zero(&self) -> f64 {
        if self.min.is_finite() {
            self.min
        } else {
            0.0
        }
    }

    /// Maximum with the empty sentinel normalized to 0
    pub fn max_or_zero(&self) -> f64 {
        if self.max.is_finite() {
            self.max
        } else {
            0.0
        }
    }
}

fn finite_or_zero<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(if value.is_finite() { *value } else { 0.0 })
}

/// An entity fed to the aggregator
#[derive(Clone, Copy, Debug)]
pub enum Observation<'a> {
    Point(&'a PointRecord),
    /// A normalized workout statistic, dated by its workout
    SessionStatistic {
        statistic: &'a SessionStatistic,
        date_key: NaiveDate,
        timestamp: i64,
    },
}

/// Running aggregation state for one ingestion pass
///
/// No operation fails: non-numeric values still count but skip the
/// arithmetic. Day-indexed state only grows during a pass.
#[derive(Clone, Debug)]
pub struct Aggregator {
    metrics: BTreeMap<String, MetricAggregate>,
    workouts_by_date: BTreeMap<NaiveDate, u32>,
    all_dates: BTreeSet<NaiveDate>,
    date_range: Option<(i64, i64)>,
    total_records: u64,
    total_workouts: u64,
    record_policy: SamplingPolicy,
    statistic_policy: SamplingPolicy,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(SamplingPolicy::RECORDS, SamplingPolicy::WORKOUT_STATISTICS)
    }
}

impl Aggregator {
    pub fn new(record_policy: SamplingPolicy, statistic_policy: SamplingPolicy) -> Self {
        Self {
            metrics: BTreeMap::new(),
            workouts_by_date: BTreeMap::new(),
            all_dates: BTreeSet::new(),
            date_range: None,
            total_records: 0,
            total_workouts: 0,
            record_policy,
            statistic_policy,
        }
    }

    /// Fold one record or workout statistic into its metric aggregate.
    pub fn ingest(&mut self, observation: Observation<'_>) {
        match observation {
            Observation::Point(record) => {
                self.total_records += 1;
                self.note_day(record.date_key, record.timestamp);
                self.observe(
                    &record.record_type,
                    record.value.as_f64(),
                    record.date_key,
                    record.timestamp,
                    record.unit.as_deref(),
                    Some(&record.source),
                    self.record_policy,
                );
            }
            Observation::SessionStatistic {
                statistic,
                date_key,
                timestamp,
            } => {
                self.note_day(date_key, timestamp);
                self.observe(
                    &statistic.metric_type,
                    statistic.value,
                    date_key,
                    timestamp,
                    statistic.unit.as_deref(),
                    Some(WORKOUT_STATS_SOURCE),
                    self.statistic_policy,
                );
            }
        }
    }

    /// Count a workout against its day and fold in its embedded statistics.
    pub fn record_workout(&mut self, session: &WorkoutSession) {
        let timestamp = dates::day_start(session.date_key);

        self.total_workouts += 1;
        self.note_day(session.date_key, timestamp);
        *self.workouts_by_date.entry(session.date_key).or_insert(0) += 1;

        for statistic in &session.statistics {
            self.ingest(Observation::SessionStatistic {
                statistic,
                date_key: session.date_key,
                timestamp,
            });
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn observe(
        &mut self,
        metric_type: &str,
        value: Option<f64>,
        date: NaiveDate,
        timestamp: i64,
        unit: Option<&str>,
        source: Option<&str>,
        policy: SamplingPolicy,
    ) {
        if !self.metrics.contains_key(metric_type) {
            self.metrics
                .insert(metric_type.to_string(), MetricAggregate::new(unit, source));
        }
        if let Some(aggregate) = self.metrics.get_mut(metric_type) {
            aggregate.observe(value, date, timestamp, policy);
        }
    }

    fn note_day(&mut self, date: NaiveDate, timestamp: i64) {
        self.all_dates.insert(date);
        self.date_range = Some(match self.date_range {
            Some((min, max)) => (min.min(timestamp), max.max(timestamp)),
            None => (timestamp, timestamp),
        });
    }

    pub fn metrics(&self) -> &BTreeMap<String, MetricAggregate> {
        &self.metrics
    }

    pub fn workouts_by_date(&self) -> &BTreeMap<NaiveDate, u32> {
        &self.workouts_by_date
    }

    pub fn all_dates(&self) -> &BTreeSet<NaiveDate> {
        &self.all_dates
    }

    /// Smallest and largest timestamp seen across records and workouts
    pub fn date_range(&self) -> Option<(i64, i64)> {
        self.date_range
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn total_workouts(&self) -> u64 {
        self.total_workouts
    }

    pub fn is_empty(&self) -> bool {
        self.total_records == 0 && self.total_workouts == 0
    }

    /// Give up the aggregation state without copying the sampled series.
    pub fn into_parts(self) -> AggregateParts {
        AggregateParts {
            metrics: self.metrics,
            workouts_by_date: self.workouts_by_date,
            all_dates: self.all_dates,
        }
    }
}

/// The owned collections of a finished [`Aggregator`]
#[derive(Debug)]
pub struct AggregateParts {
    pub metrics: BTreeMap<String, MetricAggregate>,
    pub workouts_by_date: BTreeMap<NaiveDate, u32>,
    pub all_dates: BTreeSet<NaiveDate>,
}
