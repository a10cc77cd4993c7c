//! Versioned parser for external source records.
//!
//! The FlightDeck source has used several spellings for the same fields over
//! time (`name`/`point`/`point_name`, `time`/`timestamp`/`ts`). Every spelling
//! is declared in [`SourceRecordV1`], and [`SourceRecordV1::normalize`] is the
//! single place that picks one and converts it into a [`ParsedRow`].
//!
//! Each row is decoded on its own, so one malformed row is skipped without
//! affecting the rest of the page.

use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use tracing::debug;
use vitals_store::{SampleFlags, QUALITY_GOOD};

/// Version of the record schema understood by this parser.
pub const RECORD_SCHEMA_VERSION: u32 = 1;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A timestamp as the source sent it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTime {
    /// Integer epoch milliseconds.
    Millis(i64),
    /// Fractional epoch milliseconds.
    Fractional(f64),
    /// RFC 3339 or naive ISO-8601 text.
    Text(String),
}

/// A value as the source sent it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    /// JSON number.
    Number(f64),
    /// JSON boolean (digital points).
    Bool(bool),
    /// Numeric text.
    Text(String),
}

/// Schema version 1 of a source record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SourceRecordV1 {
    /// Point name.
    #[serde(default)]
    pub name: Option<String>,
    /// Point name (alternate spelling).
    #[serde(default)]
    pub point: Option<String>,
    /// Point name (alternate spelling).
    #[serde(default)]
    pub point_name: Option<String>,
    /// Sample time.
    #[serde(default)]
    pub time: Option<RawTime>,
    /// Sample time (alternate spelling).
    #[serde(default)]
    pub timestamp: Option<RawTime>,
    /// Sample time (alternate spelling).
    #[serde(default)]
    pub ts: Option<RawTime>,
    /// Sample value.
    #[serde(default)]
    pub value: Option<RawValue>,
    /// Quality code, when the source provides one.
    #[serde(default)]
    pub quality: Option<u8>,
    /// Status flags, when the source provides them.
    #[serde(default)]
    pub flags: Option<u8>,
}

/// A normalized row ready for point resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    /// Point name.
    pub point_name: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Finite value.
    pub value: f64,
    /// Quality code.
    pub quality: u8,
    /// Status flags.
    pub flags: SampleFlags,
}

/// Why a row was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The row is not an object of the expected shape.
    Malformed,
    /// No usable point name.
    MissingName,
    /// No timestamp field.
    MissingTime,
    /// The timestamp could not be parsed.
    BadTime,
    /// No value field.
    MissingValue,
    /// The value is not a finite number.
    BadValue,
}

impl SkipReason {
    /// Short label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::MissingName => "missing_name",
            Self::MissingTime => "missing_time",
            Self::BadTime => "bad_time",
            Self::MissingValue => "missing_value",
            Self::BadValue => "bad_value",
        }
    }
}

fn first_name(candidates: [Option<String>; 3]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|n| n.trim().to_string())
        .find(|n| !n.is_empty())
}

impl SourceRecordV1 {
    /// Picks one spelling of each field and converts it.
    ///
    /// # Errors
    ///
    /// Returns the reason the row cannot be used.
    pub fn normalize(self) -> Result<ParsedRow, SkipReason> {
        let point_name =
            first_name([self.name, self.point, self.point_name]).ok_or(SkipReason::MissingName)?;
        let time = self
            .time
            .or(self.timestamp)
            .or(self.ts)
            .ok_or(SkipReason::MissingTime)?;
        let timestamp = parse_time(&time).ok_or(SkipReason::BadTime)?;
        let value = self.value.ok_or(SkipReason::MissingValue)?;
        let value = parse_value(&value).ok_or(SkipReason::BadValue)?;

        Ok(ParsedRow {
            point_name,
            timestamp,
            value,
            quality: self.quality.unwrap_or(QUALITY_GOOD),
            flags: SampleFlags(self.flags.unwrap_or(0)),
        })
    }
}

/// Converts a source timestamp to epoch milliseconds.
#[must_use]
pub fn parse_time(raw: &RawTime) -> Option<i64> {
    match raw {
        RawTime::Millis(ms) => Some(*ms),
        RawTime::Fractional(ms) if ms.is_finite() => Some(ms.round() as i64),
        RawTime::Fractional(_) => None,
        RawTime::Text(text) => parse_time_text(text.trim()),
    }
}

fn parse_time_text(text: &str) -> Option<i64> {
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    text.parse::<i64>().ok()
}

/// Converts a source value to a finite float.
#[must_use]
pub fn parse_value(raw: &RawValue) -> Option<f64> {
    let value = match raw {
        RawValue::Number(v) => *v,
        RawValue::Bool(b) => f64::from(u8::from(*b)),
        RawValue::Text(text) => text.trim().parse::<f64>().ok()?,
    };
    value.is_finite().then_some(value)
}

/// Rows that survived parsing plus the number skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    /// Normalized rows, in source order.
    pub rows: Vec<ParsedRow>,
    /// Rows that could not be used.
    pub skipped: usize,
}

/// Parses one row.
///
/// # Errors
///
/// Returns the reason the row cannot be used.
pub fn parse_row(row: &serde_json::Value) -> Result<ParsedRow, SkipReason> {
    SourceRecordV1::deserialize(row)
        .map_err(|_| SkipReason::Malformed)?
        .normalize()
}

/// Parses a page of raw rows, skipping any that cannot be used.
#[must_use]
pub fn parse_rows(rows: &[serde_json::Value]) -> ParseOutcome {
    let mut outcome = ParseOutcome {
        rows: Vec::with_capacity(rows.len()),
        skipped: 0,
    };
    for (index, row) in rows.iter().enumerate() {
        match parse_row(row) {
            Ok(parsed) => outcome.rows.push(parsed),
            Err(reason) => {
                debug!(index, reason = reason.as_str(), "skipping source row");
                outcome.skipped += 1;
            }
        }
    }
    outcome
}
