//! Extractors for the small auxiliary members of an export.
//!
//! Waveform recordings and route files are individually small, so each is
//! parsed in one pass over the whole member text. Nothing here is streamed.

use crate::attributes::{element_text, next_tag, next_tag_any, Tag};
use crate::types::{TrackPoint, WaveformRecording, WaveformSample};
use chrono::{DateTime, Utc};

const WAVEFORM_ELEMENTS: &[&str] = &["ElectrocardiogramData", "ECG", "Electrocardiogram"];
const SAMPLE_ELEMENT: &str = "Sample";
const TRACK_POINT_ELEMENT: &str = "trkpt";

/// Extract the waveform recording of one member.
///
/// `None` when the text holds no waveform element, which callers treat as
/// "no data in this file".
pub fn extract_waveform(text: &str) -> Option<WaveformRecording> {
    let tag = next_tag_any(text, WAVEFORM_ELEMENTS, 0)?;
    let interior = block_interior(text, &tag);

    let mut samples = Vec::new();
    let mut pos = 0;
    while let Some(sample) = next_tag(interior, SAMPLE_ELEMENT, pos) {
        pos = sample.end;
        let value = non_empty(sample.attr("value"))
            .or_else(|| element_text(&interior[sample.start..], SAMPLE_ELEMENT));

        samples.push(WaveformSample {
            time: sample.attr("time").and_then(parse_number),
            value: value.and_then(parse_number),
        });
    }

    Some(WaveformRecording {
        timestamp: non_empty(tag.attr("timestamp"))
            .or_else(|| non_empty(tag.attr("recordingDate")))
            .map(str::to_string),
        heart_rate: non_empty(tag.attr("heartRate"))
            .or_else(|| non_empty(tag.attr("hr")))
            .and_then(parse_number),
        classification: non_empty(tag.attr("classification")).map(str::to_string),
        sample_rate: tag.attr("sampleRate").and_then(parse_number),
        samples,
    })
}

/// Extract every track point of a GPX-like route member.
///
/// Points whose `lat`/`lon` fail to parse are kept with `NaN` coordinates.
pub fn extract_track_points(text: &str) -> Vec<TrackPoint> {
    let mut points = Vec::new();
    let mut pos = 0;

    while let Some(tag) = next_tag(text, TRACK_POINT_ELEMENT, pos) {
        pos = tag.end;
        let block = block_interior(text, &tag);

        points.push(TrackPoint {
            lat: tag.attr("lat").and_then(parse_number).unwrap_or(f64::NAN),
            lon: tag.attr("lon").and_then(parse_number).unwrap_or(f64::NAN),
            elevation: element_text(block, "ele").and_then(parse_number),
            time: element_text(block, "time").and_then(parse_time),
            speed: element_text(block, "speed").and_then(parse_number),
        });
    }

    points
}

/// Text between an open tag and its close marker; the rest of the text when
/// the marker is missing, empty for a self-closing tag.
fn block_interior<'a>(text: &'a str, tag: &Tag<'a>) -> &'a str {
    if tag.self_closing {
        return "";
    }
    let closing = format!("</{}>", tag.name);
    let rest = &text[tag.end..];
    match rest.find(&closing) {
        Some(end) => &rest[..end],
        None => rest,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok()
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
