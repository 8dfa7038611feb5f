#![forbid(unsafe_code)]

//! Core extraction and aggregation for the vitals health-export analyzer.
//!
//! This crate provides:
//! - Tag-local scanning of very large export documents (attributes, records, workouts)
//! - Windowed feeding with carry-over so no element is split or seen twice
//! - Incremental per-metric aggregation with bounded sampled series
//! - Summary building, waveform and route extraction
//! - Container discovery, the import pipeline and a background worker
//! - JSON and CSV export of finalized summaries

pub mod aggregate;
pub mod archive;
pub mod attributes;
pub mod config;
pub mod dates;
pub mod derived;
pub mod document;
pub mod error;
pub mod export;
pub mod feeder;
pub mod ingest;
pub mod logging;
pub mod pipeline;
pub mod records;
pub mod summary;
pub mod types;
pub mod worker;
pub mod workouts;

// Re-export commonly used types
pub use aggregate::{Aggregator, MetricAggregate, Observation, SamplingPolicy};
pub use archive::{Archive, DirectoryArchive, ExportLayout, MemoryArchive};
pub use attributes::extract_attribute;
pub use config::{Config, LargeMemberStrategy};
pub use derived::{extract_track_points, extract_waveform};
pub use document::{parse_document, ParsedDocument};
pub use error::{Error, Result};
pub use feeder::{ChunkFeeder, ProgressEvent};
pub use ingest::{DocumentKind, IngestionContext};
pub use pipeline::{
    import_archive, import_archive_on, import_document, import_path, import_path_on, Execution,
    ExportImport,
};
pub use summary::{build_summary, HealthSummary, SourceStats, SummaryStats};
pub use types::*;
pub use worker::{IngestionWorker, WorkerCommand, WorkerEvent};
