//! Ingestion on a background thread.
//!
//! The host sends `Init`, any number of `Chunk`s and `Finalize`; `Document`
//! switches to the next document of the same ingestion. The worker runs the
//! same feeder and aggregation code as the inline path and answers with
//! progress, per-chunk acknowledgements and exactly one terminal event.

use crate::config::Config;
use crate::feeder::{ChunkFeeder, ProgressEvent};
use crate::ingest::{DocumentKind, IngestionContext};
use crate::summary::{HealthSummary, SourceStats};
use crate::{Error, Result};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Chunks queued ahead of the worker before `send` blocks
const COMMAND_QUEUE: usize = 2;

/// Message from the host to the worker
#[derive(Debug)]
pub enum WorkerCommand {
    /// Start a new ingestion with its first document, discarding any
    /// previous state
    Init {
        kind: DocumentKind,
        total_bytes: Option<u64>,
    },
    /// Flush the current document and continue the same ingestion with
    /// another one
    Document {
        kind: DocumentKind,
        total_bytes: Option<u64>,
    },
    Chunk(Vec<u8>),
    /// Flush the carry-over and build the summary
    Finalize { source: SourceStats },
}

/// Message from the worker to the host
#[derive(Debug)]
pub enum WorkerEvent {
    Progress(ProgressEvent),
    ChunkProcessed { bytes: usize },
    Complete(Box<HealthSummary>),
    Error(Error),
}

/// Handle to a running ingestion thread
pub struct IngestionWorker {
    commands: SyncSender<WorkerCommand>,
    events: Receiver<WorkerEvent>,
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    /// Terminal event picked up while polling for progress
    terminal: Option<WorkerEvent>,
}

impl IngestionWorker {
    /// Start the worker thread.
    pub fn spawn(config: Config) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::sync_channel(COMMAND_QUEUE);
        let (event_tx, event_rx) = mpsc::channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&cancelled);
        let handle = thread::Builder::new()
            .name("vitals-ingest".into())
            .spawn(move || run(config, command_rx, event_tx, flag))?;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            cancelled,
            handle,
            terminal: None,
        })
    }

    pub fn send(&self, command: WorkerCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::Worker("Ingestion worker has stopped".into()))
    }

    /// Send `reader` in windows of `window_bytes`; returns the bytes sent.
    ///
    /// Progress the worker has already reported is forwarded between windows.
    pub fn send_reader<R: Read>(
        &mut self,
        mut reader: R,
        window_bytes: usize,
        mut on_progress: impl FnMut(&ProgressEvent),
    ) -> Result<u64> {
        let mut sent = 0u64;
        loop {
            let mut window = Vec::with_capacity(window_bytes);
            let read = (&mut reader)
                .take(window_bytes as u64)
                .read_to_end(&mut window)?;
            if read == 0 {
                return Ok(sent);
            }
            sent += read as u64;
            self.send(WorkerCommand::Chunk(window))?;
            self.poll_progress(&mut on_progress);
        }
    }

    /// Forward queued progress without blocking.
    pub fn poll_progress(&mut self, mut on_progress: impl FnMut(&ProgressEvent)) {
        while self.terminal.is_none() {
            match self.events.try_recv() {
                Ok(WorkerEvent::Progress(progress)) => on_progress(&progress),
                Ok(WorkerEvent::ChunkProcessed { .. }) => {}
                Ok(event) => self.terminal = Some(event),
                Err(_) => break,
            }
        }
    }

    /// Ask the worker to drop its state; takes effect before the next command.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.events
    }

    /// Close the command channel and wait for the terminal event.
    pub fn wait(self, mut on_progress: impl FnMut(&ProgressEvent)) -> Result<HealthSummary> {
        let IngestionWorker {
            commands,
            events,
            handle,
            terminal,
            ..
        } = self;
        drop(commands);

        let mut outcome = Err(Error::Worker("Worker stopped without a result".into()));
        for event in terminal.into_iter().chain(events.iter()) {
            match event {
                WorkerEvent::Progress(progress) => on_progress(&progress),
                WorkerEvent::ChunkProcessed { .. } => {}
                WorkerEvent::Complete(summary) => {
                    outcome = Ok(*summary);
                    break;
                }
                WorkerEvent::Error(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        if handle.join().is_err() {
            return Err(Error::Worker("Ingestion worker panicked".into()));
        }
        outcome
    }
}

fn run(
    config: Config,
    commands: Receiver<WorkerCommand>,
    events: mpsc::Sender<WorkerEvent>,
    cancelled: Arc<AtomicBool>,
) {
    let mut state: Option<(ChunkFeeder, IngestionContext)> = None;

    // Send errors only mean the host went away; keep draining commands
    for command in commands {
        if cancelled.load(Ordering::SeqCst) {
            tracing::info!("Ingestion cancelled, discarding partial state");
            let _ = events.send(WorkerEvent::Error(Error::Cancelled));
            return;
        }

        match command {
            WorkerCommand::Init { kind, total_bytes } => {
                tracing::debug!(
                    "Worker ingestion started with a {:?} document, {:?} bytes expected",
                    kind,
                    total_bytes
                );
                state = Some((
                    ChunkFeeder::new(kind, total_bytes, &config.ingest),
                    IngestionContext::new(&config),
                ));
            }
            WorkerCommand::Document { kind, total_bytes } => match state.take() {
                Some((feeder, mut ctx)) => {
                    let progress = feeder.finish(&mut ctx);
                    let _ = events.send(WorkerEvent::Progress(progress));
                    tracing::debug!("Worker switched to a {:?} document", kind);
                    state = Some((ChunkFeeder::new(kind, total_bytes, &config.ingest), ctx));
                }
                None => {
                    let _ = events.send(WorkerEvent::Error(Error::Worker(
                        "Received a document before init".into(),
                    )));
                }
            },
            WorkerCommand::Chunk(bytes) => match state.as_mut() {
                Some((feeder, ctx)) => {
                    let progress = feeder.push(&bytes, ctx);
                    let _ = events.send(WorkerEvent::ChunkProcessed { bytes: bytes.len() });
                    let _ = events.send(WorkerEvent::Progress(progress));
                }
                None => {
                    let _ = events.send(WorkerEvent::Error(Error::Worker(
                        "Received a chunk before init".into(),
                    )));
                }
            },
            WorkerCommand::Finalize { source } => match state.take() {
                Some((feeder, mut ctx)) => {
                    let progress = feeder.finish(&mut ctx);
                    let _ = events.send(WorkerEvent::Progress(progress));

                    let event = match ctx.finalize(source) {
                        Ok(summary) => WorkerEvent::Complete(Box::new(summary)),
                        Err(e) => WorkerEvent::Error(e),
                    };
                    let _ = events.send(event);
                }
                None => {
                    let _ = events.send(WorkerEvent::Error(Error::Worker(
                        "Received finalize before init".into(),
                    )));
                }
            },
        }
    }

    if cancelled.load(Ordering::SeqCst) {
        let _ = events.send(WorkerEvent::Error(Error::Cancelled));
    }
}
