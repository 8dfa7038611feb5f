//! Writing finalized summaries to disk.
//!
//! JSON output is the full summary; the CSV is a flat per-metric table for
//! spreadsheets. Both are written to a temp file in the target directory,
//! synced and renamed over the destination, so readers never see a partial
//! file.

use crate::summary::HealthSummary;
use crate::{Error, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const SUMMARY_FILE: &str = "summary.json";
pub const METRICS_FILE: &str = "metrics.csv";

/// One row of the metrics table
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    metric_type: &'a str,
    count: u64,
    sum: f64,
    average: f64,
    min: f64,
    max: f64,
    unit: Option<&'a str>,
    source: Option<&'a str>,
    samples: usize,
}

/// Write any serializable value as pretty JSON, atomically.
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    write_atomically(path, |file| {
        let mut writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    })?;
    tracing::debug!("Wrote JSON to {:?}", path);
    Ok(())
}

/// Write the full summary as JSON.
pub fn write_summary_json(summary: &HealthSummary, path: &Path) -> Result<()> {
    write_json(summary, path)
}

/// Write one CSV row per metric, in metric-name order.
pub fn write_metrics_csv(summary: &HealthSummary, path: &Path) -> Result<()> {
    write_atomically(path, |file| {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(true)
            .from_writer(file);

        for (metric_type, metric) in &summary.metrics_by_type {
            writer.serialize(CsvRow {
                metric_type,
                count: metric.count,
                sum: metric.sum,
                average: metric.average(),
                min: metric.min_or_zero(),
                max: metric.max_or_zero(),
                unit: metric.unit.as_deref(),
                source: metric.source.as_deref(),
                samples: metric.sampled_values.len(),
            })?;
        }

        writer.flush()?;
        Ok(())
    })?;

    tracing::info!(
        "Wrote {} metrics to {:?}",
        summary.metrics_by_type.len(),
        path
    );
    Ok(())
}

/// Write the summary JSON and metrics CSV into `data_dir`.
pub fn save_to_data_dir(summary: &HealthSummary, data_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let json_path = data_dir.join(SUMMARY_FILE);
    let csv_path = data_dir.join(METRICS_FILE);
    write_summary_json(summary, &json_path)?;
    write_metrics_csv(summary, &csv_path)?;
    Ok((json_path, csv_path))
}

fn write_atomically(
    path: &Path,
    write: impl FnOnce(&std::fs::File) -> Result<()>,
) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    // Same directory as the destination so the rename stays atomic
    let temp = NamedTempFile::new_in(parent)?;
    write(temp.as_file())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
