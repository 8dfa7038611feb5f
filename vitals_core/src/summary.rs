//! Summary building and the finalized output model.
//!
//! [`HealthSummary`] is the only thing presentation code consumes: totals,
//! the per-metric aggregates, day indexes and the ranked top-N summary.

use crate::aggregate::{Aggregator, MetricAggregate};
use crate::types::{
    ACTIVE_ENERGY_METRIC, BASAL_ENERGY_METRIC, STEP_COUNT_METRIC,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// How much of the input a summary was built from
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceStats {
    /// Bytes actually decoded and scanned
    pub bytes_processed: u64,
    /// Size of the input before any truncation
    pub original_size: u64,
    /// Whether only a prefix of the input was processed
    pub truncated: bool,
}

impl SourceStats {
    /// The whole input was processed
    pub fn complete(size: u64) -> Self {
        Self {
            bytes_processed: size,
            original_size: size,
            truncated: false,
        }
    }

    /// Only `processed` bytes of an `original_size` input were processed
    pub fn truncated(processed: u64, original_size: u64) -> Self {
        Self {
            bytes_processed: processed,
            original_size,
            truncated: true,
        }
    }

    /// Combine the stats of two documents ingested into one summary
    pub fn merge(self, other: SourceStats) -> Self {
        Self {
            bytes_processed: self.bytes_processed + other.bytes_processed,
            original_size: self.original_size + other.original_size,
            truncated: self.truncated || other.truncated,
        }
    }
}

/// Inclusive range of timestamps, epoch milliseconds
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: i64,
    pub end: i64,
}

/// One entry of the top-N ranking
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TopMetric {
    #[serde(rename = "type")]
    pub metric_type: String,
    pub count: u64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub unit: Option<String>,
}

/// Heart-rate rollup over every metric whose type mentions `HeartRate`
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct HeartRateRollup {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

/// Rollup for additive metrics (steps, calories), rounded like a dashboard
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TotalRollup {
    pub total: f64,
    pub average: f64,
    pub count: u64,
}

/// Derived summary statistics
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    pub total_records: u64,
    pub total_workouts: u64,
    pub metrics_available: Vec<String>,
    pub unique_dates: usize,
    pub date_range: Option<DateRange>,
    pub top_metrics: Vec<TopMetric>,
    pub heart_rate: Option<HeartRateRollup>,
    pub steps: Option<TotalRollup>,
    pub calories: Option<TotalRollup>,
}

/// The finalized aggregate of one ingestion
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub total_records: u64,
    pub total_workouts: u64,
    pub metrics_by_type: BTreeMap<String, MetricAggregate>,
    pub workouts_by_date: BTreeMap<NaiveDate, u32>,
    /// Distinct days, ascending
    pub all_dates: Vec<NaiveDate>,
    pub summary: SummaryStats,
    #[serde(flatten)]
    pub source: SourceStats,
}

impl HealthSummary {
    /// Finalize an aggregator into the output model.
    pub fn build(aggregator: Aggregator, top_n: usize, source: SourceStats) -> Self {
        let summary = build_summary(&aggregator, top_n);
        let parts = aggregator.into_parts();

        Self {
            total_records: summary.total_records,
            total_workouts: summary.total_workouts,
            metrics_by_type: parts.metrics,
            workouts_by_date: parts.workouts_by_date,
            all_dates: parts.all_dates.into_iter().collect(),
            summary,
            source,
        }
    }
}

/// Rank metrics and compute the date span and convenience rollups.
pub fn build_summary(aggregator: &Aggregator, top_n: usize) -> SummaryStats {
    let metrics = aggregator.metrics();

    SummaryStats {
        total_records: aggregator.total_records(),
        total_workouts: aggregator.total_workouts(),
        metrics_available: metrics.keys().cloned().collect(),
        unique_dates: aggregator.all_dates().len(),
        date_range: aggregator
            .date_range()
            .map(|(start, end)| DateRange { start, end }),
        top_metrics: top_metrics(metrics, top_n),
        heart_rate: heart_rate_rollup(metrics),
        steps: total_rollup(metrics, &[STEP_COUNT_METRIC]),
        calories: total_rollup(metrics, &[ACTIVE_ENERGY_METRIC, BASAL_ENERGY_METRIC]),
    }
}

/// The `n` metrics with the most observations, ties broken by name
pub fn top_metrics(metrics: &BTreeMap<String, MetricAggregate>, n: usize) -> Vec<TopMetric> {
    let mut ranked: Vec<(&String, &MetricAggregate)> =
        metrics.iter().filter(|(_, m)| m.count > 0).collect();
    // BTreeMap iteration is already name-ordered and the sort is stable
    ranked.sort_by(|a, b| b.1.count.cmp(&a.1.count));

    ranked
        .into_iter()
        .take(n)
        .map(|(metric_type, m)| TopMetric {
            metric_type: metric_type.clone(),
            count: m.count,
            average: m.average(),
            min: m.min_or_zero(),
            max: m.max_or_zero(),
            unit: m.unit.clone(),
        })
        .collect()
}

fn heart_rate_rollup(metrics: &BTreeMap<String, MetricAggregate>) -> Option<HeartRateRollup> {
    let matching: Vec<&MetricAggregate> = metrics
        .iter()
        .filter(|(name, _)| name.contains("HeartRate"))
        .map(|(_, m)| m)
        .collect();

    let count: u64 = matching.iter().map(|m| m.count).sum();
    if count == 0 {
        return None;
    }
    let sum: f64 = matching.iter().map(|m| m.sum).sum();
    let min = matching.iter().map(|m| m.min).fold(f64::INFINITY, f64::min);
    let max = matching
        .iter()
        .map(|m| m.max)
        .fold(f64::NEG_INFINITY, f64::max);

    Some(HeartRateRollup {
        average: round_to(sum / count as f64, 1),
        min: if min.is_finite() { min } else { 0.0 },
        max: if max.is_finite() { max } else { 0.0 },
        count,
    })
}

fn total_rollup(
    metrics: &BTreeMap<String, MetricAggregate>,
    names: &[&str],
) -> Option<TotalRollup> {
    let matching: Vec<&MetricAggregate> = names.iter().filter_map(|n| metrics.get(*n)).collect();

    let count: u64 = matching.iter().map(|m| m.count).sum();
    if count == 0 {
        return None;
    }
    let sum: f64 = matching.iter().map(|m| m.sum).sum();

    Some(TotalRollup {
        total: sum.round(),
        average: (sum / count as f64).round(),
        count,
    })
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
