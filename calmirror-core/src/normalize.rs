//! Datetime normalization.
//!
//! The source emits two start/end encodings: date-only all-day events
//! (`2024-03-01`) and offset-suffixed instants (`2024-03-01T09:00:00+09:00`
//! or `...Z`). The sink's date field wants a sub-second component on
//! instants, so timed endpoints get a `.000` millisecond fraction inserted
//! right before the offset. Offsets pass through untouched; no timezone
//! conversion happens here.

use chrono::{DateTime, NaiveDate};

use crate::error::{MirrorError, MirrorResult};
use crate::record::Interval;

/// Convert a raw start/end pair into the canonical interval.
///
/// A date-only start makes the event all-day and the raw end is dropped.
/// Any other start makes the event timed, and both endpoints must then be
/// offset-suffixed instants.
pub fn normalize_interval(raw_start: &str, raw_end: &str) -> MirrorResult<Interval> {
    if let Some(date) = parse_date_only(raw_start) {
        return Ok(Interval::AllDay { date });
    }

    Ok(Interval::Timed {
        start: canonicalize_instant(raw_start)?,
        end: canonicalize_instant(raw_end)?,
    })
}

/// `YYYY-MM-DD`, nothing more.
fn parse_date_only(raw: &str) -> Option<NaiveDate> {
    if raw.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Rewrite an offset-suffixed instant to carry a millisecond fraction.
///
/// `2024-03-01T09:00:00+09:00` becomes `2024-03-01T09:00:00.000+09:00`,
/// `2024-03-01T09:00:00Z` becomes `2024-03-01T09:00:00.000Z`. An instant
/// that already carries a fraction is returned unchanged.
fn canonicalize_instant(raw: &str) -> MirrorResult<String> {
    if DateTime::parse_from_rfc3339(raw).is_err() {
        return Err(MirrorError::MalformedTimestamp(raw.to_string()));
    }

    // parse_from_rfc3339 only accepts Z or a +HH:MM/-HH:MM suffix, so the
    // offset is either the final byte or the final six.
    let offset_start = if raw.ends_with('Z') || raw.ends_with('z') {
        raw.len() - 1
    } else {
        raw.len() - 6
    };

    let (body, offset) = raw.split_at(offset_start);
    if body.contains('.') {
        return Ok(raw.to_string());
    }

    Ok(format!("{body}.000{offset}"))
}
