//! Whole-document list strategy.
//!
//! For documents small enough to hold in memory, callers sometimes want the
//! raw entities instead of aggregates only. [`parse_document`] returns every
//! record and workout together with the same summary statistics the
//! streaming path produces.

use crate::aggregate::{Aggregator, Observation};
use crate::config::Config;
use crate::ingest::{DocumentKind, Entity, EntityScanner};
use crate::summary::{build_summary, SummaryStats};
use crate::types::{PointRecord, WorkoutSession};
use serde::Serialize;

/// Every entity of one document plus its summary
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedDocument {
    pub records: Vec<PointRecord>,
    pub workouts: Vec<WorkoutSession>,
    pub summary: SummaryStats,
}

/// Parse a complete main export document into entity lists.
///
/// Sampling policies and the top-metric count come from `config`, as they do
/// for streamed ingestion.
pub fn parse_document(text: &str, config: &Config) -> ParsedDocument {
    let mut records = Vec::new();
    let mut workouts = Vec::new();
    let mut aggregator = Aggregator::new(
        config.sampling.records,
        config.sampling.workout_statistics,
    );

    for entity in EntityScanner::new(text, DocumentKind::Main) {
        match entity {
            Entity::Record(record) => {
                aggregator.ingest(Observation::Point(&record));
                records.push(record);
            }
            Entity::Workout(session) => {
                aggregator.record_workout(&session);
                workouts.push(session);
            }
        }
    }

    tracing::debug!(
        "Parsed {} records and {} workouts",
        records.len(),
        workouts.len()
    );

    ParsedDocument {
        records,
        workouts,
        summary: build_summary(&aggregator, config.summary.top_n),
    }
}
