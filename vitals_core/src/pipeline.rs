//! End-to-end import of an export.
//!
//! The main document (and the clinical document, when present) is streamed
//! through one [`IngestionContext`], either on the calling thread or on an
//! [`IngestionWorker`]. Both run the same layout discovery and large-member
//! strategy. Waveform and route members are small and independent, so they
//! are extracted in parallel once the stream is done.

use crate::archive::{Archive, ArchiveMember, DirectoryArchive, ExportLayout};
use crate::config::{Config, IngestConfig, LargeMemberStrategy};
use crate::derived::{extract_track_points, extract_waveform};
use crate::feeder::{feed_reader, ProgressEvent};
use crate::ingest::{DocumentKind, IngestionContext};
use crate::summary::{HealthSummary, SourceStats};
use crate::types::{TrackPoint, WaveformRecording};
use crate::worker::{IngestionWorker, WorkerCommand};
use crate::{Error, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// A waveform recording and the member it came from
#[derive(Clone, Debug, Serialize)]
pub struct MemberWaveform {
    pub member: String,
    pub recording: WaveformRecording,
}

/// The track points of one route member
#[derive(Clone, Debug, Serialize)]
pub struct MemberRoute {
    pub member: String,
    pub points: Vec<TrackPoint>,
}

/// Everything recovered from one export
#[derive(Clone, Debug, Serialize)]
pub struct ExportImport {
    pub summary: HealthSummary,
    /// Sorted by member path
    pub waveforms: Vec<MemberWaveform>,
    /// Sorted by member path
    pub routes: Vec<MemberRoute>,
}

/// Where the documents of an import are ingested
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Execution {
    /// On the calling thread
    #[default]
    Inline,
    /// On a background [`IngestionWorker`]
    Worker,
}

/// How much of one document is read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ReadPlan {
    size: u64,
    /// Prefix length under the `sample` strategy
    limit: Option<u64>,
}

impl ReadPlan {
    fn new(size: u64, config: &IngestConfig) -> Self {
        let sample = config.large_member_strategy == LargeMemberStrategy::Sample
            && size > config.large_member_bytes;
        let limit = sample.then(|| {
            tracing::warn!(
                "Document is {} bytes, only the first {} bytes will be analyzed",
                size,
                config.sample_prefix_bytes
            );
            config.sample_prefix_bytes
        });
        Self { size, limit }
    }

    fn read_limit(&self) -> u64 {
        self.limit.unwrap_or(u64::MAX)
    }

    /// Bytes progress is measured against
    fn total_bytes(&self) -> u64 {
        self.limit.unwrap_or(self.size)
    }

    fn stats(&self, read: u64) -> SourceStats {
        match self.limit {
            Some(_) => SourceStats::truncated(read, self.size),
            None => SourceStats::complete(read),
        }
    }
}

/// Consumer of the documents of one import
trait IngestTarget {
    /// Feed one whole document; returns the bytes read.
    fn ingest(&mut self, reader: &mut dyn Read, kind: DocumentKind, plan: &ReadPlan)
        -> Result<u64>;

    fn finish(self, source: SourceStats) -> Result<HealthSummary>;
}

struct InlineTarget<'c, P> {
    ctx: IngestionContext,
    config: &'c IngestConfig,
    progress: P,
}

impl<'c, P: FnMut(&ProgressEvent)> InlineTarget<'c, P> {
    fn new(config: &'c Config, progress: P) -> Self {
        Self {
            ctx: IngestionContext::new(config),
            config: &config.ingest,
            progress,
        }
    }
}

impl<P: FnMut(&ProgressEvent)> IngestTarget for InlineTarget<'_, P> {
    fn ingest(
        &mut self,
        reader: &mut dyn Read,
        kind: DocumentKind,
        plan: &ReadPlan,
    ) -> Result<u64> {
        feed_reader(
            reader.take(plan.read_limit()),
            kind,
            Some(plan.total_bytes()),
            self.config,
            &mut self.ctx,
            &mut self.progress,
        )
    }

    fn finish(self, source: SourceStats) -> Result<HealthSummary> {
        self.ctx.finalize(source)
    }
}

struct WorkerTarget<P> {
    worker: IngestionWorker,
    window_bytes: usize,
    started: bool,
    progress: P,
}

impl<P: FnMut(&ProgressEvent)> WorkerTarget<P> {
    fn spawn(config: &Config, progress: P) -> Result<Self> {
        Ok(Self {
            worker: IngestionWorker::spawn(config.clone())?,
            window_bytes: config.ingest.window_bytes,
            started: false,
            progress,
        })
    }
}

impl<P: FnMut(&ProgressEvent)> IngestTarget for WorkerTarget<P> {
    fn ingest(
        &mut self,
        reader: &mut dyn Read,
        kind: DocumentKind,
        plan: &ReadPlan,
    ) -> Result<u64> {
        let total_bytes = Some(plan.total_bytes());
        let command = if self.started {
            WorkerCommand::Document { kind, total_bytes }
        } else {
            WorkerCommand::Init { kind, total_bytes }
        };
        self.worker.send(command)?;
        self.started = true;

        self.worker.send_reader(
            reader.take(plan.read_limit()),
            self.window_bytes,
            &mut self.progress,
        )
    }

    fn finish(self, source: SourceStats) -> Result<HealthSummary> {
        self.worker.send(WorkerCommand::Finalize { source })?;
        self.worker.wait(self.progress)
    }
}

/// Import a container: stream its documents, then extract derived members.
pub fn import_archive(
    archive: &dyn Archive,
    config: &Config,
    progress: impl FnMut(&ProgressEvent),
) -> Result<ExportImport> {
    import_archive_on(archive, config, Execution::Inline, progress)
}

/// [`import_archive`] with the documents ingested according to `execution`.
pub fn import_archive_on(
    archive: &dyn Archive,
    config: &Config,
    execution: Execution,
    progress: impl FnMut(&ProgressEvent),
) -> Result<ExportImport> {
    let layout = ExportLayout::discover(archive)?;
    tracing::info!(
        "Importing {} ({} bytes), {} waveform and {} route members",
        layout.main.path,
        layout.main.size,
        layout.waveforms.len(),
        layout.routes.len()
    );

    let summary = match execution {
        Execution::Inline => {
            ingest_layout(archive, &layout, config, InlineTarget::new(config, progress))?
        }
        Execution::Worker => ingest_layout(
            archive,
            &layout,
            config,
            WorkerTarget::spawn(config, progress)?,
        )?,
    };

    let (waveforms, routes) = rayon::join(
        || extract_waveforms(archive, &layout.waveforms),
        || extract_routes(archive, &layout.routes),
    );

    tracing::info!(
        "Imported {} records, {} workouts, {} waveforms, {} routes",
        summary.total_records,
        summary.total_workouts,
        waveforms.len(),
        routes.len()
    );

    Ok(ExportImport {
        summary,
        waveforms,
        routes,
    })
}

/// Import a bare main export document.
pub fn import_document(
    path: &Path,
    config: &Config,
    progress: impl FnMut(&ProgressEvent),
) -> Result<HealthSummary> {
    ingest_document(path, config, InlineTarget::new(config, progress))
}

/// Import an unpacked export folder or a bare document, by what `path` is.
pub fn import_path(
    path: &Path,
    config: &Config,
    progress: impl FnMut(&ProgressEvent),
) -> Result<ExportImport> {
    import_path_on(path, config, Execution::Inline, progress)
}

/// [`import_path`] with the documents ingested according to `execution`.
pub fn import_path_on(
    path: &Path,
    config: &Config,
    execution: Execution,
    progress: impl FnMut(&ProgressEvent),
) -> Result<ExportImport> {
    if path.is_dir() {
        let archive = DirectoryArchive::new(path)?;
        return import_archive_on(&archive, config, execution, progress);
    }

    if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
    {
        return Err(Error::Archive(format!(
            "{:?} is compressed; unpack it and import the folder",
            path
        )));
    }

    let summary = match execution {
        Execution::Inline => ingest_document(path, config, InlineTarget::new(config, progress))?,
        Execution::Worker => {
            ingest_document(path, config, WorkerTarget::spawn(config, progress)?)?
        }
    };
    Ok(ExportImport {
        summary,
        waveforms: Vec::new(),
        routes: Vec::new(),
    })
}

/// Feed the main and clinical documents of `layout` and build the summary.
fn ingest_layout<T: IngestTarget>(
    archive: &dyn Archive,
    layout: &ExportLayout,
    config: &Config,
    mut target: T,
) -> Result<HealthSummary> {
    let plan = ReadPlan::new(layout.main.size, &config.ingest);
    let mut reader = archive.open(&layout.main.path)?;
    let read = target.ingest(&mut reader, DocumentKind::Main, &plan)?;
    let mut source = plan.stats(read);

    if let Some(clinical) = &layout.clinical {
        match ingest_member(archive, clinical, config, &mut target) {
            Ok(stats) => source = source.merge(stats),
            Err(e) => tracing::warn!("Skipping clinical document {}: {}", clinical.path, e),
        }
    }

    target.finish(source)
}

fn ingest_member<T: IngestTarget>(
    archive: &dyn Archive,
    member: &ArchiveMember,
    config: &Config,
    target: &mut T,
) -> Result<SourceStats> {
    let plan = ReadPlan::new(member.size, &config.ingest);
    let mut reader = archive.open(&member.path)?;
    let read = target.ingest(&mut reader, DocumentKind::Clinical, &plan)?;
    Ok(plan.stats(read))
}

fn ingest_document<T: IngestTarget>(
    path: &Path,
    config: &Config,
    mut target: T,
) -> Result<HealthSummary> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    tracing::info!("Importing {:?} ({} bytes)", path, size);

    let plan = ReadPlan::new(size, &config.ingest);
    let read = target.ingest(&mut BufReader::new(file), DocumentKind::Main, &plan)?;
    target.finish(plan.stats(read))
}

fn extract_waveforms(archive: &dyn Archive, members: &[ArchiveMember]) -> Vec<MemberWaveform> {
    let mut waveforms: Vec<MemberWaveform> = members
        .par_iter()
        .filter_map(|member| match archive.read_text(&member.path) {
            Ok(text) => extract_waveform(&text).map(|recording| MemberWaveform {
                member: member.path.clone(),
                recording,
            }),
            Err(e) => {
                tracing::warn!("Failed to read waveform {}: {}", member.path, e);
                None
            }
        })
        .collect();
    waveforms.sort_by(|a, b| a.member.cmp(&b.member));
    waveforms
}

fn extract_routes(archive: &dyn Archive, members: &[ArchiveMember]) -> Vec<MemberRoute> {
    let mut routes: Vec<MemberRoute> = members
        .par_iter()
        .filter_map(|member| match archive.read_text(&member.path) {
            Ok(text) => Some(MemberRoute {
                member: member.path.clone(),
                points: extract_track_points(&text),
            }),
            Err(e) => {
                tracing::warn!("Failed to read route {}: {}", member.path, e);
                None
            }
        })
        .collect();
    routes.sort_by(|a, b| a.member.cmp(&b.member));
    routes
}
