//! Workout session extraction.
//!
//! Modern exports write each workout as a block:
//!
//! ```text
//! <Workout workoutActivityType="HKWorkoutActivityTypeRunning" startDate=".." endDate=".." duration="31.2" durationUnit="min">
//!   <WorkoutStatistics type="HKQuantityTypeIdentifierDistanceWalkingRunning" sum="5.01" unit="km"/>
//!   <WorkoutEvent .../>
//! </Workout>
//! ```
//!
//! Older exports use a self-closing `<Workout .../>` with totals as attributes.
//! Both forms are accepted.

use crate::attributes::{find_open_tag_any, next_tag, Tag};
use crate::dates;
use crate::types::{
    SessionStatistic, WorkoutSession, DISTANCE_METRIC, ENERGY_METRIC, HEART_RATE_METRIC,
};

pub const WORKOUT_ELEMENT: &str = "Workout";
pub const WORKOUT_CLOSE: &str = "</Workout>";
const STATISTIC_ELEMENT: &str = "WorkoutStatistics";

/// Elements that never appear inside a workout block
const BLOCK_INTERRUPTIONS: &[&str] = &["Record", WORKOUT_ELEMENT];

/// Closing tag of the main export document
pub const DOCUMENT_CLOSE: &str = "</HealthData>";

/// Outcome of reading one workout block
#[derive(Clone, Debug, PartialEq)]
pub enum BlockRead {
    /// The block ends at `end`; `session` is `None` when it is malformed
    Complete {
        end: usize,
        session: Option<WorkoutSession>,
    },
    /// Another entity or the end of the document came before the close
    /// marker. The block is dropped and scanning resumes at `resume`.
    Abandoned { resume: usize },
    /// Neither the close marker nor anything ending the block has arrived yet
    Incomplete,
}

/// Iterator over the well-formed workout sessions of a complete text.
///
/// A block left open at the end of the text is dropped.
pub struct WorkoutScanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> WorkoutScanner<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }
}

impl<'a> Iterator for WorkoutScanner<'a> {
    type Item = WorkoutSession;

    fn next(&mut self) -> Option<WorkoutSession> {
        loop {
            let tag = next_tag(self.text, WORKOUT_ELEMENT, self.pos)?;
            match read_block(self.text, &tag) {
                BlockRead::Complete { end, session } => {
                    self.pos = end;
                    if session.is_some() {
                        return session;
                    }
                }
                BlockRead::Abandoned { resume } => self.pos = resume,
                BlockRead::Incomplete => return None,
            }
        }
    }
}

/// Read the workout whose open tag is `tag`.
pub fn read_block(text: &str, tag: &Tag<'_>) -> BlockRead {
    if tag.self_closing {
        return BlockRead::Complete {
            end: tag.end,
            session: session_from_block(tag, ""),
        };
    }

    let rest = &text[tag.end..];
    let close = rest.find(WORKOUT_CLOSE);
    let searched = &rest[..close.unwrap_or(rest.len())];
    let interrupted = find_open_tag_any(searched, BLOCK_INTERRUPTIONS, 0).is_some()
        || searched.contains(DOCUMENT_CLOSE);

    match close {
        _ if interrupted => {
            tracing::debug!("Dropping workout block without a close marker");
            BlockRead::Abandoned { resume: tag.end }
        }
        Some(close) => BlockRead::Complete {
            end: tag.end + close + WORKOUT_CLOSE.len(),
            session: session_from_block(tag, &rest[..close]),
        },
        None => BlockRead::Incomplete,
    }
}

/// Map an embedded statistic type onto the shared metric taxonomy.
///
/// First match wins: distance, then energy, then heart rate; anything else
/// keeps its own name.
pub fn normalize_statistic_type(raw: &str) -> String {
    if raw.contains("Distance") {
        DISTANCE_METRIC.to_string()
    } else if raw.contains("Energy") {
        ENERGY_METRIC.to_string()
    } else if raw.contains("HeartRate") {
        HEART_RATE_METRIC.to_string()
    } else {
        raw.to_string()
    }
}

/// Build a session from a workout open tag and the text inside its block.
fn session_from_block(tag: &Tag<'_>, interior: &str) -> Option<WorkoutSession> {
    let activity_type = tag.attr("workoutActivityType").filter(|t| !t.is_empty())?;
    let start_raw = tag.attr("startDate")?;
    let date_key = dates::parse_day(start_raw)?;

    let start_timestamp =
        dates::parse_instant(start_raw).unwrap_or_else(|| dates::day_start(date_key));
    let end_timestamp = tag
        .attr("endDate")
        .and_then(|raw| dates::parse_instant(raw).or_else(|| dates::day_timestamp(raw)));

    let statistics = extract_statistics(interior);

    let duration_minutes = tag
        .attr("duration")
        .and_then(parse_number)
        .map(|d| d * minutes_per_unit(tag.attr("durationUnit")))
        .or_else(|| {
            end_timestamp
                .filter(|end| *end >= start_timestamp)
                .map(|end| (end - start_timestamp) as f64 / 60_000.0)
        })
        .unwrap_or(0.0);

    let total_energy = tag
        .attr("totalEnergyBurned")
        .and_then(parse_number)
        .or_else(|| statistic_total(&statistics, ENERGY_METRIC))
        .unwrap_or(0.0);
    let total_distance = tag
        .attr("totalDistance")
        .and_then(parse_number)
        .or_else(|| statistic_total(&statistics, DISTANCE_METRIC))
        .unwrap_or(0.0);

    Some(WorkoutSession {
        activity_type: activity_type.to_string(),
        start_timestamp,
        end_timestamp,
        duration_minutes,
        total_energy,
        total_distance,
        date_key,
        statistics,
    })
}

/// Every `<WorkoutStatistics>` carrying a type and some value attribute.
fn extract_statistics(interior: &str) -> Vec<SessionStatistic> {
    let mut statistics = Vec::new();
    let mut pos = 0;
    while let Some(tag) = next_tag(interior, STATISTIC_ELEMENT, pos) {
        pos = tag.end;

        let Some(raw_type) = tag.attr("type") else {
            continue;
        };
        // Older exports use `value`, newer ones `sum` or `average`
        let Some(raw_value) = tag
            .attr("value")
            .or_else(|| tag.attr("sum"))
            .or_else(|| tag.attr("average"))
        else {
            continue;
        };

        statistics.push(SessionStatistic {
            metric_type: normalize_statistic_type(raw_type),
            value: parse_number(raw_value),
            unit: tag.attr("unit").map(str::to_string),
        });
    }
    statistics
}

fn statistic_total(statistics: &[SessionStatistic], metric: &str) -> Option<f64> {
    let values: Vec<f64> = statistics
        .iter()
        .filter(|s| s.metric_type == metric)
        .filter_map(|s| s.value)
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum())
    }
}

fn minutes_per_unit(unit: Option<&str>) -> f64 {
    match unit {
        Some("s") | Some("sec") => 1.0 / 60.0,
        Some("hr") | Some("h") => 60.0,
        _ => 1.0,
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}
