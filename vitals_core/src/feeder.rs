//! Windowed feeding of an arbitrarily large document.
//!
//! Bytes arrive in windows of any size. Each window is decoded and appended
//! to the carry-over left by the previous one. The extractors then scan the
//! carry-over as a document prefix: every entity they can decide for good is
//! aggregated, and the text from the first undecided one onwards waits for
//! the next window. The cut point therefore always agrees with how the
//! extractors read tags, including quoted `>` and `/>` inside values.

use crate::config::IngestConfig;
use crate::ingest::{DocumentKind, EntityScanner, IngestionContext};
use crate::Result;
use std::fmt;
use std::io::Read;

/// Progress after one window, advisory only
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressEvent {
    /// Bytes consumed so far
    pub bytes_processed: u64,
    /// Size of the whole input, when known
    pub total_bytes: Option<u64>,
    /// Whole percent of `total_bytes` consumed
    pub percent: Option<u8>,
    pub records: u64,
    pub workouts: u64,
    pub metric_types: usize,
    /// No safe cut point has been found for several windows
    pub recovering: bool,
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mb = self.bytes_processed as f64 / (1024.0 * 1024.0);
        match self.percent {
            Some(percent) => write!(f, "Analyzing... {}% ({:.1}MB)", percent, mb)?,
            None => write!(f, "Analyzing... ({:.1}MB)", mb)?,
        }
        write!(
            f,
            " - {} records, {} metric types",
            self.records, self.metric_types
        )?;
        if self.recovering {
            write!(f, " (recovering...)")?;
        }
        Ok(())
    }
}

/// Push-based carry-over feeder for one document
#[derive(Debug)]
pub struct ChunkFeeder {
    kind: DocumentKind,
    carry: String,
    /// Undecoded tail: an incomplete UTF-8 sequence at a window end
    pending: Vec<u8>,
    bytes_processed: u64,
    total_bytes: Option<u64>,
    stalled_windows: u32,
    recovery_windows: u32,
    max_block_bytes: u64,
}

impl ChunkFeeder {
    pub fn new(kind: DocumentKind, total_bytes: Option<u64>, config: &IngestConfig) -> Self {
        Self {
            kind,
            carry: String::new(),
            pending: Vec::new(),
            bytes_processed: 0,
            total_bytes,
            stalled_windows: 0,
            recovery_windows: config.recovery_windows,
            max_block_bytes: config.max_block_bytes,
        }
    }

    /// Feed one window and process every element that is now complete.
    pub fn push(&mut self, bytes: &[u8], ctx: &mut IngestionContext) -> ProgressEvent {
        self.bytes_processed += bytes.len() as u64;
        self.decode(bytes);

        // A workout block that never closes must not hold the rest of the document
        let max_block = usize::try_from(self.max_block_bytes).unwrap_or(usize::MAX);
        let mut scanner =
            EntityScanner::partial(&self.carry, self.kind).max_open_block(max_block);
        ctx.drain(&mut scanner);
        let cut = scanner.resume_offset();

        let recovering = if cut > 0 {
            self.carry.drain(..cut);
            self.stalled_windows = 0;
            false
        } else {
            self.stalled_windows += 1;
            let recovering = self.stalled_windows >= self.recovery_windows;
            if recovering {
                tracing::warn!(
                    "No element boundary in the last {} windows, carry-over is {} bytes",
                    self.stalled_windows,
                    self.carry.len()
                );
            }
            recovering
        };

        self.progress(ctx, recovering)
    }

    /// Flush whatever is left once the source is exhausted.
    pub fn finish(mut self, ctx: &mut IngestionContext) -> ProgressEvent {
        if !self.pending.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending).into_owned();
            self.carry.push_str(&tail);
            self.pending.clear();
        }
        if !self.carry.is_empty() {
            tracing::debug!("Flushing {} bytes of carry-over", self.carry.len());
            ctx.process(&self.carry, self.kind);
            self.carry.clear();
        }
        self.progress(ctx, false)
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Length of the text currently held back
    pub fn carry_len(&self) -> usize {
        self.carry.len()
    }

    fn decode(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);

        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    self.carry.push_str(text);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    let valid = std::str::from_utf8(&self.pending[start..valid_end]);
                    self.carry.push_str(valid.unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            self.carry.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        // Sequence continues in the next window
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
    }

    fn progress(&self, ctx: &IngestionContext, recovering: bool) -> ProgressEvent {
        let aggregator = ctx.aggregator();
        let percent = self.total_bytes.filter(|total| *total > 0).map(|total| {
            let ratio = self.bytes_processed as f64 / total as f64;
            (ratio * 100.0).min(100.0) as u8
        });

        ProgressEvent {
            bytes_processed: self.bytes_processed,
            total_bytes: self.total_bytes,
            percent,
            records: aggregator.total_records(),
            workouts: aggregator.total_workouts(),
            metric_types: aggregator.metrics().len(),
            recovering,
        }
    }
}

/// Read `reader` window by window through a fresh feeder.
///
/// `progress` sees one event per window plus the final flush; the thread
/// yields between windows. Returns the number of bytes read.
pub fn feed_reader<R: Read>(
    mut reader: R,
    kind: DocumentKind,
    total_bytes: Option<u64>,
    config: &IngestConfig,
    ctx: &mut IngestionContext,
    mut progress: impl FnMut(&ProgressEvent),
) -> Result<u64> {
    let mut feeder = ChunkFeeder::new(kind, total_bytes, config);
    let mut window = Vec::with_capacity(config.window_bytes);

    loop {
        window.clear();
        let read = (&mut reader)
            .take(config.window_bytes as u64)
            .read_to_end(&mut window)?;
        if read == 0 {
            break;
        }

        let event = feeder.push(&window, ctx);
        tracing::debug!("{}", event);
        progress(&event);
        std::thread::yield_now();
    }

    let bytes = feeder.bytes_processed();
    let event = feeder.finish(ctx);
    progress(&event);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::summary::SourceStats;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<HealthData locale="de_DE">
 <Record type="HKQuantityTypeIdentifierHeartRate" sourceName="Jürgens Uhr" unit="count/min" endDate="2023-09-08 08:00:00 +0200" value="72"/>
 <Record type="HKQuantityTypeIdentifierHeartRate" sourceName="Jürgens Uhr" unit="count/min" endDate="2023-09-08 09:00:00 +0200" value="150"/>
 <Record type="HKQuantityTypeIdentifierStepCount" sourceName="心拍計" unit="count" endDate="2023-09-09 10:00:00 +0200" value="500">
  <MetadataEntry key="HKMetadataKeySyncVersion" value="2"/>
 </Record>
 <Workout workoutActivityType="HKWorkoutActivityTypeRunning" startDate="2023-09-08 07:00:00 +0200" endDate="2023-09-08 07:30:00 +0200">
  <WorkoutEvent type="HKWorkoutEventTypeSegment" date="2023-09-08 07:10:00 +0200"/>
  <WorkoutStatistics type="HKQuantityTypeIdentifierDistanceWalkingRunning" sum="5000" unit="m"/>
  <WorkoutStatistics type="HKQuantityTypeIdentifierHeartRate" average="140" unit="count/min"/>
 </Workout>
 <Record type="HKQuantityTypeIdentifierDistanceWalkingRunning" sourceName="Phone" unit="m" endDate="2023-09-10 10:00:00 +0200" value="1200"/>
 <Workout workoutActivityType="HKWorkoutActivityTypeWalking" totalDistance="2.5" startDate="2023-09-10 18:00:00 +0200"/>
 <Record type="HKCategoryTypeIdentifierSleepAnalysis" endDate="2023-09-10 07:00:00 +0200" value="HKCategoryValueSleepAnalysisAsleepCore"/>
</HealthData>
"#;

    fn summary_json(ctx: IngestionContext) -> String {
        let summary = ctx.finalize(SourceStats::complete(0)).unwrap();
        serde_json::to_string(&summary).unwrap()
    }

    fn whole_document() -> String {
        let config = Config::default();
        let mut ctx = IngestionContext::new(&config);
        let mut feeder = ChunkFeeder::new(DocumentKind::Main, None, &config.ingest);
        feeder.push(DOC.as_bytes(), &mut ctx);
        feeder.finish(&mut ctx);
        summary_json(ctx)
    }

    #[test]
    fn test_whole_document_counts() {
        let config = Config::default();
        let mut ctx = IngestionContext::new(&config);
        let mut feeder = ChunkFeeder::new(DocumentKind::Main, None, &config.ingest);
        feeder.push(DOC.as_bytes(), &mut ctx);
        let event = feeder.finish(&mut ctx);

        assert_eq!(event.records, 5);
        assert_eq!(event.workouts, 2);
    }

    #[test]
    fn test_split_at_any_offset_gives_identical_aggregates() {
        let expected = whole_document();
        let bytes = DOC.as_bytes();
        let config = Config::default();

        for split in 1..bytes.len() {
            let mut ctx = IngestionContext::new(&config);
            let mut feeder = ChunkFeeder::new(DocumentKind::Main, None, &config.ingest);
            feeder.push(&bytes[..split], &mut ctx);
            feeder.push(&bytes[split..], &mut ctx);
            feeder.finish(&mut ctx);

            assert_eq!(summary_json(ctx), expected, "split at byte {}", split);
        }
    }

    #[test]
    fn test_small_windows_give_identical_aggregates() {
        let expected = whole_document();

        for window in [1, 7, 64, 333] {
            let mut config = Config::default();
            config.ingest.window_bytes = window;
            let mut ctx = IngestionContext::new(&config);

            let read = feed_reader(
                DOC.as_bytes(),
                DocumentKind::Main,
                Some(DOC.len() as u64),
                &config.ingest,
                &mut ctx,
                |_| {},
            )
            .unwrap();

            assert_eq!(read, DOC.len() as u64);
            assert_eq!(summary_json(ctx), expected, "window of {} bytes", window);
        }
    }

    #[test]
    fn test_multibyte_character_split_across_windows() {
        let config = Config::default();
        let mut ctx = IngestionContext::new(&config);
        let mut feeder = ChunkFeeder::new(DocumentKind::Main, None, &config.ingest);

        let text = r#"<Record type="A" sourceName="ü" value="1" endDate="2023-09-08 00:00:00 +0000"/>"#;
        let bytes = text.as_bytes();
        let umlaut = text.find('ü').unwrap();
        feeder.push(&bytes[..umlaut + 1], &mut ctx);
        feeder.push(&bytes[umlaut + 1..], &mut ctx);
        feeder.finish(&mut ctx);

        let summary = ctx.finalize(SourceStats::complete(0)).unwrap();
        assert_eq!(summary.metrics_by_type["A"].source.as_deref(), Some("ü"));
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let config = Config::default();
        let mut ctx = IngestionContext::new(&config);
        let mut feeder = ChunkFeeder::new(DocumentKind::Main, None, &config.ingest);

        let mut bytes = br#"<Record type="A" sourceName=""#.to_vec();
        bytes.push(0xFF);
        bytes.extend_from_slice(br#"" value="1" endDate="2023-09-08"/>"#);
        feeder.push(&bytes, &mut ctx);
        feeder.finish(&mut ctx);

        let summary = ctx.finalize(SourceStats::complete(0)).unwrap();
        assert_eq!(summary.metrics_by_type["A"].source.as_deref(), Some("\u{FFFD}"));
    }

    fn feed_whole(text: &str, config: &Config) -> IngestionContext {
        let mut ctx = IngestionContext::new(config);
        let mut feeder = ChunkFeeder::new(DocumentKind::Main, None, &config.ingest);
        feeder.push(text.as_bytes(), &mut ctx);
        feeder.finish(&mut ctx);
        ctx
    }

    fn assert_split_invariant(text: &str) {
        let config = Config::default();
        let expected = summary_json(feed_whole(text, &config));
        let bytes = text.as_bytes();

        for split in 1..bytes.len() {
            let mut ctx = IngestionContext::new(&config);
            let mut feeder = ChunkFeeder::new(DocumentKind::Main, None, &config.ingest);
            feeder.push(&bytes[..split], &mut ctx);
            feeder.push(&bytes[split..], &mut ctx);
            feeder.finish(&mut ctx);

            assert_eq!(summary_json(ctx), expected, "split at byte {}", split);
        }
    }

    #[test]
    fn test_cut_never_splits_a_workout_block() {
        let text = r#"<Record type="A" value="1" endDate="2023-09-08"/>
<Workout workoutActivityType="Running" startDate="2023-09-08">
  <WorkoutStatistics type="Distance" value="5"/>"#;
        let config = Config::default();
        let mut ctx = IngestionContext::new(&config);
        let mut feeder = ChunkFeeder::new(DocumentKind::Main, None, &config.ingest);

        let event = feeder.push(text.as_bytes(), &mut ctx);
        assert_eq!(event.records, 1);
        assert_eq!(event.workouts, 0);
        assert_eq!(feeder.carry_len(), text.len() - text.find("<Workout").unwrap());

        let event = feeder.push(b"\n</Workout>", &mut ctx);
        assert_eq!(event.workouts, 1);
        assert_eq!(feeder.carry_len(), 0);
    }

    #[test]
    fn test_no_cut_without_complete_element() {
        let config = Config::default();
        let mut ctx = IngestionContext::new(&config);
        let mut feeder = ChunkFeeder::new(DocumentKind::Main, None, &config.ingest);

        let text = r#"<Record type="A" val"#;
        let event = feeder.push(text.as_bytes(), &mut ctx);
        assert_eq!(event.records, 0);
        assert_eq!(feeder.carry_len(), text.len());

        feeder.push(b"", &mut ctx);
        assert_eq!(feeder.carry_len(), text.len());
    }

    #[test]
    fn test_unbalanced_quote_does_not_swallow_the_document() {
        let text = r#"<HealthData>
 <Record type="A" value="1" endDate="2023-09-08 08:00:00 +0000"/>
 <Record type="B" value="2 endDate="2023-09-08 09:00:00 +0000"/>
 <Record type="C" value="3" endDate="2023-09-09 08:00:00 +0000"/>
</HealthData>"#;
        let config = Config::default();
        let mut ctx = IngestionContext::new(&config);
        let mut feeder = ChunkFeeder::new(DocumentKind::Main, None, &config.ingest);

        let event = feeder.push(text.as_bytes(), &mut ctx);
        assert_eq!(event.records, 2);
        assert!(feeder.carry_len() < "</HealthData>".len() + 2);

        let event = feeder.finish(&mut ctx);
        assert_eq!(event.records, 2);
        assert!(ctx.aggregator().metrics().contains_key("A"));
        assert!(ctx.aggregator().metrics().contains_key("C"));

        assert_split_invariant(text);
    }

    #[test]
    fn test_unclosed_workout_does_not_hold_the_rest() {
        let text = r#"<HealthData>
 <Workout workoutActivityType="Running" startDate="2023-09-08 07:00:00 +0000">
  <WorkoutStatistics type="Distance" value="5"/>
 <Record type="B" value="2" endDate="2023-09-08 08:00:00 +0000"/>
 <Record type="C" value="3" endDate="2023-09-09 08:00:00 +0000"/>
</HealthData>"#;
        let config = Config::default();
        let mut ctx = IngestionContext::new(&config);
        let mut feeder = ChunkFeeder::new(DocumentKind::Main, None, &config.ingest);

        let event = feeder.push(text.as_bytes(), &mut ctx);
        assert_eq!(event.records, 2);
        assert_eq!(event.workouts, 0);
        assert!(feeder.carry_len() < "</HealthData>".len() + 2);

        let event = feeder.finish(&mut ctx);
        assert_eq!(event.records, 2);

        assert_split_invariant(text);
    }

    #[test]
    fn test_oversized_open_block_is_dropped() {
        let mut text = String::from(
            r#"<Workout workoutActivityType="Running" startDate="2023-09-08 07:00:00 +0000">"#,
        );
        for _ in 0..8 {
            text.push_str("\n  <WorkoutEvent type=\"Segment\" date=\"2023-09-08 07:10:00 +0000\"/>");
        }

        let mut config = Config::default();
        config.ingest.max_block_bytes = 128;
        let mut ctx = IngestionContext::new(&config);
        let mut feeder = ChunkFeeder::new(DocumentKind::Main, None, &config.ingest);

        feeder.push(text.as_bytes(), &mut ctx);
        assert!(feeder.carry_len() < text.len());

        let tail = r#"
<Record type="B" value="2" endDate="2023-09-08 08:00:00 +0000"/>
</Workout>"#;
        let event = feeder.push(tail.as_bytes(), &mut ctx);
        assert_eq!(event.records, 1);
        assert_eq!(feeder.finish(&mut ctx).workouts, 0);
    }

    #[test]
    fn test_self_close_inside_value_survives_any_split() {
        let text = r#"<HealthData>
 <Record type="A" sourceName="X/>Y" value="1" endDate="2023-09-08 08:00:00 +0000"/>
</HealthData>"#;
        let config = Config::default();
        let ctx = feed_whole(text, &config);
        let summary = ctx.finalize(SourceStats::complete(0)).unwrap();
        assert_eq!(summary.total_records, 1);
        assert_eq!(summary.metrics_by_type["A"].source.as_deref(), Some("X/>Y"));

        assert_split_invariant(text);
    }

    #[test]
    fn test_markup_inside_values_survives_any_split() {
        let text = r#"<HealthData>
 <Record type="A" sourceName="a > b" unit="count" value="1" endDate="2023-09-08 08:00:00 +0000"/>
 <Record type="A" sourceName="x/>y" device="&lt;&lt;Watch&gt;&gt;" value="2" endDate="2023-09-08 09:00:00 +0000">
  <MetadataEntry key="note" value="ends with />"/>
 </Record>
 <Workout workoutActivityType="Running" note="a/>b" startDate="2023-09-08 07:00:00 +0000" endDate="2023-09-08 07:30:00 +0000">
  <WorkoutStatistics type="A" sum="5" unit="count" label="x>y/>z"/>
 </Workout>
 <Record type="B" sourceName="/>" value="3" endDate="2023-09-09 08:00:00 +0000"/>
</HealthData>"#;
        let config = Config::default();
        let summary = feed_whole(text, &config)
            .finalize(SourceStats::complete(0))
            .unwrap();
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.total_workouts, 1);

        assert_split_invariant(text);
    }

    #[test]
    fn test_recovery_is_reported_and_flushed() {
        let mut config = Config::default();
        config.ingest.recovery_windows = 2;
        let mut ctx = IngestionContext::new(&config);
        let mut feeder = ChunkFeeder::new(DocumentKind::Main, None, &config.ingest);

        let text = r#"<Record type="A" value="1" endDate="2023-09-08"/>"#;
        let bytes = text.as_bytes();
        let first = feeder.push(&bytes[..10], &mut ctx);
        let second = feeder.push(&bytes[10..20], &mut ctx);
        assert!(!first.recovering);
        assert!(second.recovering);
        assert_eq!(feeder.carry_len(), 20);

        let third = feeder.push(&bytes[20..], &mut ctx);
        assert!(!third.recovering);
        assert_eq!(third.records, 1);
        assert_eq!(feeder.carry_len(), 0);
    }

    #[test]
    fn test_progress_display() {
        let event = ProgressEvent {
            bytes_processed: 3 * 1024 * 1024,
            total_bytes: Some(6 * 1024 * 1024),
            percent: Some(50),
            records: 1200,
            workouts: 3,
            metric_types: 14,
            recovering: false,
        };
        assert_eq!(
            event.to_string(),
            "Analyzing... 50% (3.0MB) - 1200 records, 14 metric types"
        );
    }

    #[test]
    fn test_progress_percent_from_total() {
        let mut config = Config::default();
        config.ingest.window_bytes = DOC.len() / 2 + 1;
        let mut ctx = IngestionContext::new(&config);

        let mut events = Vec::new();
        feed_reader(
            DOC.as_bytes(),
            DocumentKind::Main,
            Some(DOC.len() as u64),
            &config.ingest,
            &mut ctx,
            |event| events.push(event.clone()),
        )
        .unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].percent, Some(50));
        assert_eq!(events.last().unwrap().percent, Some(100));
        assert_eq!(events.last().unwrap().records, 5);
    }
}
