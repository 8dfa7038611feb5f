//! Point-record extraction from the main export document.
//!
//! Records appear as `<Record type=".." value=".." endDate=".." .../>` or as
//! an open tag followed by metadata children. Only the tag's own attributes
//! are read, so children never leak into a record.

use crate::attributes::{next_tag_any, Tag};
use crate::dates;
use crate::types::{PointRecord, RecordValue, UNKNOWN_SOURCE};

pub const RECORD_ELEMENTS: &[&str] = &["Record"];

/// Element names used by the clinical export for the same kind of record
pub const CLINICAL_ELEMENTS: &[&str] = &["Record", "HKQuantityTypeRecord", "HKCategoryTypeRecord"];

/// Iterator over the well-formed point records of a text buffer.
///
/// Matches missing `type`, `value` or a parseable `endDate` are skipped
/// silently. `startDate` is never consulted.
pub struct RecordScanner<'a> {
    text: &'a str,
    pos: usize,
    elements: &'static [&'static str],
}

impl<'a> RecordScanner<'a> {
    /// Scan for `<Record>` elements of the main export document
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            elements: RECORD_ELEMENTS,
        }
    }

    /// Scan for the record element names of the clinical document
    pub fn clinical(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            elements: CLINICAL_ELEMENTS,
        }
    }
}

impl<'a> Iterator for RecordScanner<'a> {
    type Item = PointRecord;

    fn next(&mut self) -> Option<PointRecord> {
        loop {
            let tag = next_tag_any(self.text, self.elements, self.pos)?;
            self.pos = tag.end;
            if let Some(record) = record_from_tag(&tag) {
                return Some(record);
            }
        }
    }
}

/// Build a point record from a record tag, or `None` when it is malformed.
pub fn record_from_tag(tag: &Tag<'_>) -> Option<PointRecord> {
    let record_type = tag.attr("type")?;
    let value = tag.attr("value")?;
    let timestamp = dates::day_timestamp(tag.attr("endDate")?)?;
    let date_key = dates::date_key(timestamp)?;

    if record_type.is_empty() {
        return None;
    }

    Some(PointRecord {
        record_type: record_type.to_string(),
        value: RecordValue::parse(value),
        unit: tag.attr("unit").map(str::to_string),
        timestamp,
        date_key,
        source: tag
            .attr("sourceName")
            .unwrap_or(UNKNOWN_SOURCE)
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<HealthData locale="en_US">
 <Record type="HKQuantityTypeIdentifierHeartRate" sourceName="Watch" unit="count/min" startDate="2023-09-07 23:58:00 +0200" endDate="2023-09-08 00:01:00 +0200" value="72"/>
 <Record type="HKQuantityTypeIdentifierStepCount" unit="count" endDate="2023-09-09 10:00:00 +0200" value="500">
  <MetadataEntry key="HKMetadataKeySyncVersion" value="2"/>
 </Record>
 <Record type="HKCategoryTypeIdentifierSleepAnalysis" sourceName="Phone" endDate="2023-09-09 07:00:00 +0200" value="HKCategoryValueSleepAnalysisAsleepCore"/>
</HealthData>
"#;

    #[test]
    fn test_scans_all_records() {
        let records: Vec<_> = RecordScanner::new(SAMPLE).collect();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].record_type, "HKQuantityTypeIdentifierHeartRate");
        assert_eq!(records[0].value, RecordValue::Number(72.0));
        assert_eq!(records[0].unit.as_deref(), Some("count/min"));
        assert_eq!(records[0].source, "Watch");
        // endDate wins over startDate
        assert_eq!(
            records[0].date_key,
            NaiveDate::from_ymd_opt(2023, 9, 8).unwrap()
        );
    }

    #[test]
    fn test_children_do_not_leak_into_record() {
        let records: Vec<_> = RecordScanner::new(SAMPLE).collect();
        assert_eq!(records[1].value, RecordValue::Number(500.0));
        assert_eq!(records[1].source, UNKNOWN_SOURCE);
    }

    #[test]
    fn test_text_values_are_kept() {
        let records: Vec<_> = RecordScanner::new(SAMPLE).collect();
        assert!(records[2].value.as_f64().is_none());
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let text = r#"
<Record value="1" endDate="2023-09-08 00:00:00 +0000"/>
<Record type="A" endDate="2023-09-08 00:00:00 +0000"/>
<Record type="A" value="1"/>
<Record type="A" value="1" endDate="not a date"/>
<Record type="A" value="2" endDate="2023-09-08 00:00:00 +0000"/>
"#;
        let records: Vec<_> = RecordScanner::new(text).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, RecordValue::Number(2.0));
    }

    #[test]
    fn test_incomplete_trailing_tag_is_not_emitted() {
        let text = r#"<Record type="A" value="1" endDate="2023-09-08 00:00:00 +0000"/><Record type="B" val"#;
        assert_eq!(RecordScanner::new(text).count(), 1);
    }

    #[test]
    fn test_clinical_element_names() {
        let text = r#"<HKQuantityTypeRecord type="HKQuantityTypeIdentifierBodyMass" value="70" unit="kg" endDate="2023-01-02 08:00:00 +0000"/>
<Record type="X" value="1" endDate="2023-01-03 08:00:00 +0000"/>"#;
        assert_eq!(RecordScanner::new(text).count(), 1);
        assert_eq!(RecordScanner::clinical(text).count(), 2);
    }
}
