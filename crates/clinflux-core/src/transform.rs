//! Per-row branching into the raw and processed projections.

use serde::Serialize;
use uuid::Uuid;

use crate::config::QUALITY_THRESHOLD;
use crate::decoder::{DecodedRow, Header, RowDecodeError};
use crate::dimensions::DimensionResolver;
use crate::error::Result;
use crate::types::{MeasurementValue, ProcessedMeasurement, RawMeasurement};

/// Why a kept raw row produced no processed row.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessedSkip {
    /// Score absent (treated as 0.0) or below the threshold.
    BelowThreshold,
    /// Score present but not a number.
    QualityUnparseable,
    ValueUnparseable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    RawOnly {
        raw: RawMeasurement,
        reason: ProcessedSkip,
    },
    RawAndProcessed {
        raw: RawMeasurement,
        processed: ProcessedMeasurement,
    },
    Skipped(RowDecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QualityScore {
    Absent,
    Unparseable,
    Score(f64),
}

impl QualityScore {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim).filter(|value| !value.is_empty()) {
            None => QualityScore::Absent,
            Some(value) => value
                .parse::<f64>()
                .map(QualityScore::Score)
                .unwrap_or(QualityScore::Unparseable),
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            QualityScore::Score(score) => Some(*score),
            _ => None,
        }
    }

    /// Gate for the processed branch; an absent score counts as 0.0.
    fn gate(&self) -> std::result::Result<f64, ProcessedSkip> {
        let score = match self {
            QualityScore::Absent => 0.0,
            QualityScore::Unparseable => return Err(ProcessedSkip::QualityUnparseable),
            QualityScore::Score(score) => *score,
        };
        if score >= QUALITY_THRESHOLD {
            Ok(score)
        } else {
            Err(ProcessedSkip::BelowThreshold)
        }
    }
}

/// Reads a single decimal, or a `systolic/diastolic` pair split on the first `/`.
pub fn parse_value(raw: &str) -> Option<MeasurementValue> {
    match raw.split_once('/') {
        Some((systolic, diastolic)) => Some(MeasurementValue::Composite {
            systolic: systolic.trim().parse().ok()?,
            diastolic: diastolic.trim().parse().ok()?,
        }),
        None => raw
            .trim()
            .parse()
            .ok()
            .map(|value| MeasurementValue::Single { value }),
    }
}

pub struct TransformEngine<'a> {
    header: Header,
    study_id: Option<String>,
    resolver: DimensionResolver<'a>,
}

impl<'a> TransformEngine<'a> {
    pub fn new(header: Header, study_id: Option<String>, resolver: DimensionResolver<'a>) -> Self {
        Self {
            header,
            study_id,
            resolver,
        }
    }

    /// Row problems come back as outcomes; only dimension-store failures are errors.
    pub async fn transform_line(&mut self, line: &str) -> Result<RowOutcome> {
        let row = match self.header.decode(line) {
            Ok(row) => row,
            Err(err) => return Ok(RowOutcome::Skipped(err)),
        };
        self.transform_row(row).await
    }

    pub async fn transform_row(&mut self, row: DecodedRow) -> Result<RowOutcome> {
        let quality = QualityScore::parse(row.quality_score.as_deref());
        let raw = RawMeasurement {
            id: Uuid::new_v4(),
            study_id: self.study_id.clone(),
            participant_id: row.participant_id,
            measurement_type: row.measurement_type,
            value: row.value,
            unit: row.unit,
            timestamp: row.timestamp,
            site_id: row.site_id,
            quality_score: quality.value(),
        };

        let score = match quality.gate() {
            Ok(score) => score,
            Err(reason) => return Ok(RowOutcome::RawOnly { raw, reason }),
        };

        let Some(value) = parse_value(&raw.value) else {
            return Ok(RowOutcome::RawOnly {
                raw,
                reason: ProcessedSkip::ValueUnparseable,
            });
        };

        self.resolver
            .ensure_participant(&raw.participant_id, self.study_id.as_deref())
            .await?;
        let unit_id = self
            .resolver
            .resolve_unit(raw.unit.as_deref().unwrap_or(""))
            .await?;
        let measurement_type_id = self
            .resolver
            .resolve_type(&raw.measurement_type, unit_id)
            .await?;

        let processed = ProcessedMeasurement {
            study_id: self.study_id.clone(),
            participant_id: raw.participant_id.clone(),
            measurement_type_id,
            value,
            quality_score: score,
            recorded_at: raw.timestamp,
            raw_value: raw.value.clone(),
        };

        Ok(RowOutcome::RawAndProcessed { raw, processed })
    }
}
