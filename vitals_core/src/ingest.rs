//! Per-ingestion state and document-order entity scanning.
//!
//! Every ingestion call owns one [`IngestionContext`]; nothing about a pass
//! survives in globals, so independent ingestions never see each other.

use crate::aggregate::{Aggregator, Observation};
use crate::attributes::{find_open_tag_any, read_tag, TagRead};
use crate::config::Config;
use crate::records::{record_from_tag, CLINICAL_ELEMENTS};
use crate::summary::{HealthSummary, SourceStats};
use crate::types::{PointRecord, WorkoutSession};
use crate::workouts::{self, BlockRead, WORKOUT_ELEMENT};
use crate::Result;

const MAIN_ELEMENTS: &[&str] = &["Record", WORKOUT_ELEMENT];

/// Which kind of document a buffer belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
    /// The main export: records and workouts
    Main,
    /// The clinical export: records only, under several element names
    Clinical,
}

/// An entity recovered from the tag stream
#[derive(Clone, Debug, PartialEq)]
pub enum Entity {
    Record(PointRecord),
    Workout(WorkoutSession),
}

/// Iterator over records and workouts in the order they appear.
///
/// Keeping document order means a metric fed by both records and workout
/// statistics sees the same observation sequence however the input was
/// split into windows.
///
/// A scanner built with [`EntityScanner::partial`] treats its text as a
/// prefix of the document: it stops at the first entity that more text could
/// still change and reports that offset through
/// [`EntityScanner::resume_offset`]. Everything before the offset has been
/// decided for good.
pub struct EntityScanner<'a> {
    text: &'a str,
    pos: usize,
    kind: DocumentKind,
    partial: bool,
    max_open_block: usize,
    resume: Option<usize>,
}

impl<'a> EntityScanner<'a> {
    /// Scan a complete document
    pub fn new(text: &'a str, kind: DocumentKind) -> Self {
        Self {
            text,
            pos: 0,
            kind,
            partial: false,
            max_open_block: usize::MAX,
            resume: None,
        }
    }

    /// Scan a prefix of a document that may continue
    pub fn partial(text: &'a str, kind: DocumentKind) -> Self {
        Self {
            partial: true,
            ..Self::new(text, kind)
        }
    }

    /// Drop an open workout block once it spans more than `bytes` instead of
    /// waiting for its close marker.
    pub fn max_open_block(mut self, bytes: usize) -> Self {
        self.max_open_block = bytes;
        self
    }

    /// Offset where scanning has to resume once more text is available.
    ///
    /// Only meaningful after the iterator returned `None`.
    pub fn resume_offset(&self) -> usize {
        self.resume.unwrap_or(self.pos)
    }

    fn stop_at(&mut self, offset: usize) -> Option<Entity> {
        self.resume = Some(if self.partial { offset } else { self.text.len() });
        None
    }
}

impl<'a> Iterator for EntityScanner<'a> {
    type Item = Entity;

    fn next(&mut self) -> Option<Entity> {
        if self.resume.is_some() {
            return None;
        }
        let elements = match self.kind {
            DocumentKind::Main => MAIN_ELEMENTS,
            DocumentKind::Clinical => CLINICAL_ELEMENTS,
        };

        loop {
            let Some((start, name)) = find_open_tag_any(self.text, elements, self.pos) else {
                // A trailing `<` may be the start of an element name still in transit
                let tail = &self.text[self.pos..];
                let keep = tail.rfind('<').map_or(self.text.len(), |i| self.pos + i);
                return self.stop_at(keep);
            };

            let tag = match read_tag(self.text, start, name) {
                TagRead::Complete(tag) => tag,
                TagRead::Broken { resume } => {
                    self.pos = resume;
                    continue;
                }
                TagRead::Incomplete => return self.stop_at(start),
            };

            if tag.name == WORKOUT_ELEMENT && self.kind == DocumentKind::Main {
                match workouts::read_block(self.text, &tag) {
                    BlockRead::Complete { end, session } => {
                        self.pos = end;
                        if let Some(session) = session {
                            return Some(Entity::Workout(session));
                        }
                    }
                    BlockRead::Abandoned { resume } => self.pos = resume,
                    BlockRead::Incomplete
                        if self.partial && self.text.len() - start <= self.max_open_block =>
                    {
                        return self.stop_at(start);
                    }
                    BlockRead::Incomplete => {
                        tracing::debug!("Dropping workout block that never closed");
                        self.pos = tag.end;
                    }
                }
            } else {
                self.pos = tag.end;
                if let Some(record) = record_from_tag(&tag) {
                    return Some(Entity::Record(record));
                }
            }
        }
    }
}

/// Mutable state of one ingestion call
#[derive(Debug)]
pub struct IngestionContext {
    aggregator: Aggregator,
    top_n: usize,
}

impl IngestionContext {
    pub fn new(config: &Config) -> Self {
        Self {
            aggregator: Aggregator::new(
                config.sampling.records,
                config.sampling.workout_statistics,
            ),
            top_n: config.summary.top_n,
        }
    }

    /// Extract and aggregate every entity of the complete text `text`.
    pub fn process(&mut self, text: &str, kind: DocumentKind) {
        self.drain(&mut EntityScanner::new(text, kind));
    }

    /// Aggregate everything `scanner` yields.
    pub fn drain(&mut self, scanner: &mut EntityScanner<'_>) {
        for entity in scanner {
            match entity {
                Entity::Record(record) => self.aggregator.ingest(Observation::Point(&record)),
                Entity::Workout(session) => self.aggregator.record_workout(&session),
            }
        }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Close the pass and build the output model.
    ///
    /// Fails with [`crate::Error::NoUsableData`] when nothing was recovered.
    pub fn finalize(self, source: SourceStats) -> Result<HealthSummary> {
        if self.aggregator.is_empty() {
            tracing::warn!(
                "Ingestion of {} bytes produced no records or workouts",
                source.bytes_processed
            );
            return Err(crate::Error::NoUsableData);
        }
        Ok(HealthSummary::build(self.aggregator, self.top_n, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DISTANCE_METRIC;
    use crate::Error;
    use chrono::NaiveDate;

    const DOC: &str = r#"<HealthData>
 <Record type="HeartRate" value="72" endDate="2023-09-08 08:00:00 +0000"/>
 <Workout workoutActivityType="Running" startDate="2023-09-08 07:00:00 +0000" endDate="2023-09-08 07:30:00 +0000">
  <WorkoutStatistics type="DistanceWalkingRunning" value="5000" unit="m"/>
 </Workout>
 <Record type="HeartRate" value="150" endDate="2023-09-08 09:00:00 +0000"/>
</HealthData>"#;

    #[test]
    fn test_entities_in_document_order() {
        let entities: Vec<_> = EntityScanner::new(DOC, DocumentKind::Main).collect();
        assert_eq!(entities.len(), 3);
        assert!(matches!(entities[0], Entity::Record(_)));
        assert!(matches!(entities[1], Entity::Workout(_)));
        assert!(matches!(entities[2], Entity::Record(_)));
    }

    #[test]
    fn test_clinical_documents_skip_workouts() {
        let entities: Vec<_> = EntityScanner::new(DOC, DocumentKind::Clinical).collect();
        assert_eq!(entities.len(), 2);
        assert!(entities.iter().all(|e| matches!(e, Entity::Record(_))));
    }

    #[test]
    fn test_process_and_finalize() {
        let mut ctx = IngestionContext::new(&Config::default());
        ctx.process(DOC, DocumentKind::Main);

        let summary = ctx.finalize(SourceStats::complete(DOC.len() as u64)).unwrap();
        assert_eq!(summary.total_records, 2);
        assert_eq!(summary.total_workouts, 1);
        assert_eq!(summary.metrics_by_type[DISTANCE_METRIC].sum, 5000.0);
        assert_eq!(
            summary.workouts_by_date[&NaiveDate::from_ymd_opt(2023, 9, 8).unwrap()],
            1
        );
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let mut ctx = IngestionContext::new(&Config::default());
        ctx.process("<HealthData></HealthData>", DocumentKind::Main);
        let result = ctx.finalize(SourceStats::complete(25));
        assert!(matches!(result, Err(Error::NoUsableData)));
    }

    #[test]
    fn test_unbalanced_quote_only_drops_its_own_record() {
        let text = r#"<HealthData>
 <Record type="A" value="1 endDate="2023-09-08"/>
 <Record type="B" value="2" endDate="2023-09-08 08:00:00 +0000"/>
 <Record type="C" value="3" endDate="2023-09-09 08:00:00 +0000"/>
</HealthData>"#;
        let mut ctx = IngestionContext::new(&Config::default());
        ctx.process(text, DocumentKind::Main);

        let aggregator = ctx.aggregator();
        assert_eq!(aggregator.total_records(), 2);
        assert!(aggregator.metrics().contains_key("B"));
        assert!(aggregator.metrics().contains_key("C"));
    }

    #[test]
    fn test_unclosed_workout_does_not_hide_later_records() {
        let text = r#"<HealthData>
 <Workout workoutActivityType="Running" startDate="2023-09-08">
 <Record type="B" value="2" endDate="2023-09-08 08:00:00 +0000"/>
 <Record type="C" value="3" endDate="2023-09-09 08:00:00 +0000"/>
</HealthData>"#;
        let entities: Vec<_> = EntityScanner::new(text, DocumentKind::Main).collect();
        assert_eq!(entities.len(), 2);
        assert!(entities.iter().all(|e| matches!(e, Entity::Record(_))));
    }

    #[test]
    fn test_partial_scan_stops_at_undecided_entity() {
        let text = r#"<Record type="A" value="1" endDate="2023-09-08"/>
<Workout workoutActivityType="Running" startDate="2023-09-08">
  <WorkoutStatistics type="Distance" value="5"/>"#;
        let mut scanner = EntityScanner::partial(text, DocumentKind::Main);
        assert_eq!(scanner.by_ref().count(), 1);
        let resume = scanner.resume_offset();
        assert!(text[resume..].starts_with("<Workout "));

        // A complete text drops the open block instead
        let mut scanner = EntityScanner::new(text, DocumentKind::Main);
        assert_eq!(scanner.by_ref().count(), 1);
        assert_eq!(scanner.resume_offset(), text.len());
    }

    #[test]
    fn test_partial_scan_keeps_a_truncated_element_name() {
        let text = r#"<Record type="A" value="1" endDate="2023-09-08"/> <Reco"#;
        let mut scanner = EntityScanner::partial(text, DocumentKind::Main);
        assert_eq!(scanner.by_ref().count(), 1);
        assert_eq!(&text[scanner.resume_offset()..], "<Reco");
    }

    #[test]
    fn test_partial_scan_drops_oversized_open_block() {
        let text = r#"<Workout workoutActivityType="Running" startDate="2023-09-08">
  <WorkoutStatistics type="Distance" value="5"/>"#;

        let mut waiting = EntityScanner::partial(text, DocumentKind::Main).max_open_block(text.len());
        assert_eq!(waiting.by_ref().count(), 0);
        assert_eq!(waiting.resume_offset(), 0);

        let mut dropping = EntityScanner::partial(text, DocumentKind::Main).max_open_block(16);
        assert_eq!(dropping.by_ref().count(), 0);
        assert!(dropping.resume_offset() > 0);
    }

    #[test]
    fn test_contexts_are_independent() {
        let mut first = IngestionContext::new(&Config::default());
        first.process(DOC, DocumentKind::Main);

        let second = IngestionContext::new(&Config::default());
        assert!(second.aggregator().is_empty());
        assert_eq!(first.aggregator().total_records(), 2);
    }
}
