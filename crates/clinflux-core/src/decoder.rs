use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

pub const DELIMITER: u8 = b',';

pub const PARTICIPANT_ID: &str = "participant_id";
pub const MEASUREMENT_TYPE: &str = "measurement_type";
pub const VALUE: &str = "value";
pub const TIMESTAMP: &str = "timestamp";
pub const UNIT: &str = "unit";
pub const SITE_ID: &str = "site_id";
pub const QUALITY_SCORE: &str = "quality_score";

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const OFFSET_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RowDecodeError {
    #[error("row could not be split: {0}")]
    Malformed(String),

    #[error("required field '{0}' is missing")]
    MissingField(&'static str),

    #[error("timestamp '{0}' is not ISO-8601")]
    InvalidTimestamp(String),
}

/// Column ordering taken from the first line of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    columns: Vec<String>,
}

impl Header {
    pub fn parse(line: &str) -> Result<Self, RowDecodeError> {
        let line = line.trim_start_matches('\u{feff}');
        Ok(Self {
            columns: split_fields(line)?,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Zips the fields of `line` against the header. Short rows lose trailing keys and
    /// surplus fields are ignored.
    pub fn decode(&self, line: &str) -> Result<DecodedRow, RowDecodeError> {
        let fields = split_fields(line)?;
        let map: HashMap<&str, String> = self
            .columns
            .iter()
            .map(String::as_str)
            .zip(fields)
            .filter(|(_, value)| !value.is_empty())
            .collect();

        let required = |name: &'static str| {
            map.get(name)
                .cloned()
                .ok_or(RowDecodeError::MissingField(name))
        };

        let participant_id = required(PARTICIPANT_ID)?;
        let measurement_type = required(MEASUREMENT_TYPE)?;
        let value = required(VALUE)?;
        let raw_timestamp = required(TIMESTAMP)?;
        let timestamp = parse_timestamp(&raw_timestamp)
            .ok_or(RowDecodeError::InvalidTimestamp(raw_timestamp))?;

        Ok(DecodedRow {
            participant_id,
            measurement_type,
            value,
            timestamp,
            unit: map.get(UNIT).cloned(),
            site_id: map.get(SITE_ID).cloned(),
            quality_score: map.get(QUALITY_SCORE).cloned(),
        })
    }
}

/// A row carrying all required fields with a parsed timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRow {
    pub participant_id: String,
    pub measurement_type: String,
    pub value: String,
    pub timestamp: DateTime<Utc>,
    pub unit: Option<String>,
    pub site_id: Option<String>,
    pub quality_score: Option<String>,
}

fn split_fields(line: &str) -> Result<Vec<String>, RowDecodeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(DELIMITER)
        .from_reader(line.as_bytes());

    match reader.records().next() {
        Some(record) => {
            let record = record.map_err(|err| RowDecodeError::Malformed(err.to_string()))?;
            Ok(record.iter().map(|field| field.trim().to_string()).collect())
        }
        None => Ok(Vec::new()),
    }
}

/// Accepts ISO-8601 timestamps with or without an offset; naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in OFFSET_TIMESTAMP_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(raw, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
