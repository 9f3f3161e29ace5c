//! The canonical record model: the normalized shape every source event
//! takes before reconciliation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The time span a record covers.
///
/// All-day records carry a start date only; the source's end date is
/// dropped during normalization. Timed records carry both endpoints as
/// canonical offset-suffixed instants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Interval {
    AllDay { date: NaiveDate },
    Timed { start: String, end: String },
}

impl Interval {
    /// The string the sink stores as the start of its date field.
    pub fn start_value(&self) -> String {
        match self {
            Interval::AllDay { date } => date.format("%Y-%m-%d").to_string(),
            Interval::Timed { start, .. } => start.clone(),
        }
    }

    /// The end of the date field, for the shapes that have one.
    pub fn end_value(&self) -> Option<String> {
        match self {
            Interval::AllDay { .. } => None,
            Interval::Timed { end, .. } => Some(end.clone()),
        }
    }
}

/// One normalized source event, the unit of reconciliation.
///
/// Instances are transient: produced by one fetch, consumed by one
/// reconciliation pass. The sink itself is the durable state, and
/// `external_id` is the join key between the two systems.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalRecord {
    /// Stable identifier assigned by the source; unique per source.
    pub external_id: String,
    pub title: String,
    pub interval: Interval,
    /// Empty string when the source has no location.
    pub location: String,
    /// Empty string when the source has no description.
    pub description: String,
}

/// The sink-side identity a record acquires once created or found.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialization {
    pub sink_id: String,
}

/// A record as the sink currently stores it, keyed by `sink_id` and joined
/// to the source via `external_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SinkRecord {
    pub sink_id: String,
    pub external_id: String,
    pub title: String,
    /// `None` when the stored date could not be read back; that never
    /// compares equal, so the record gets rewritten.
    pub interval: Option<Interval>,
    pub location: String,
    pub description: String,
}

impl CanonicalRecord {
    /// Content equality against the sink's copy.
    ///
    /// Compares `title`, `interval` (both endpoints), `location` and
    /// `description`. Join keys are excluded: they locate the record, they
    /// are not content. Exact match only; this predicate is the sole
    /// basis for the update-vs-skip decision.
    pub fn content_eq(&self, sink: &SinkRecord) -> bool {
        sink.interval.as_ref() == Some(&self.interval)
            && self.title == sink.title
            && self.location == sink.location
            && self.description == sink.description
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical() -> CanonicalRecord {
        CanonicalRecord {
            external_id: "gcal-event-1".to_string(),
            title: "Team Standup".to_string(),
            interval: Interval::Timed {
                start: "2024-03-01T09:00:00.000+09:00".to_string(),
                end: "2024-03-01T09:30:00.000+09:00".to_string(),
            },
            location: "Room 4".to_string(),
            description: String::new(),
        }
    }

    fn sink_copy(record: &CanonicalRecord) -> SinkRecord {
        SinkRecord {
            sink_id: "page-abc".to_string(),
            external_id: record.external_id.clone(),
            title: record.title.clone(),
            interval: Some(record.interval.clone()),
            location: record.location.clone(),
            description: record.description.clone(),
        }
    }

    #[test]
    fn test_content_eq_ignores_join_keys() {
        let record = canonical();
        let mut sink = sink_copy(&record);
        sink.sink_id = "page-other".to_string();
        sink.external_id = "something-else".to_string();

        assert!(record.content_eq(&sink));
    }

    #[test]
    fn test_content_eq_detects_each_field_change() {
        let record = canonical();

        let mut sink = sink_copy(&record);
        sink.title = "Team Standup (moved)".to_string();
        assert!(!record.content_eq(&sink));

        let mut sink = sink_copy(&record);
        sink.interval = Some(Interval::Timed {
            start: "2024-03-01T09:00:00.000+09:00".to_string(),
            end: "2024-03-01T10:00:00.000+09:00".to_string(),
        });
        assert!(!record.content_eq(&sink));

        let mut sink = sink_copy(&record);
        sink.location = String::new();
        assert!(!record.content_eq(&sink));

        let mut sink = sink_copy(&record);
        sink.description = "agenda".to_string();
        assert!(!record.content_eq(&sink));
    }

    #[test]
    fn test_unreadable_sink_interval_never_equal() {
        let record = canonical();
        let mut sink = sink_copy(&record);
        sink.interval = None;

        assert!(!record.content_eq(&sink));
    }

    #[test]
    fn test_all_day_sink_values() {
        let interval = Interval::AllDay {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        };
        assert_eq!(interval.start_value(), "2024-03-01");
        assert_eq!(interval.end_value(), None);
    }

    #[test]
    fn test_timed_sink_values() {
        let interval = Interval::Timed {
            start: "2024-03-01T09:00:00.000Z".to_string(),
            end: "2024-03-01T10:00:00.000Z".to_string(),
        };
        assert_eq!(interval.start_value(), "2024-03-01T09:00:00.000Z");
        assert_eq!(interval.end_value().as_deref(), Some("2024-03-01T10:00:00.000Z"));
    }
}
