//! Error types for the vitals_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for vitals_core operations
///
/// Malformed elements inside a document never surface here; they are dropped
/// at the entity level and only show up as lower counts.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The export container could not be opened or enumerated
    #[error("Archive error: {0}")]
    Archive(String),

    /// The container holds no main record document
    #[error("No main health export document found in archive")]
    MissingMainDocument,

    /// Ingestion finished without a single usable record or workout
    #[error("No health data found in file")]
    NoUsableData,

    /// Background worker protocol failure
    #[error("Worker error: {0}")]
    Worker(String),

    /// Ingestion was cancelled between windows
    #[error("Ingestion cancelled")]
    Cancelled,
}
