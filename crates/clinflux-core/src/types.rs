use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UnitId = i32;
pub type MeasurementTypeId = i32;

/// Everything the pipeline needs to know about one submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub job_id: String,
    pub file_path: PathBuf,
    pub study_id: Option<String>,
}

impl JobDescriptor {
    /// File name recorded in the job state; falls back to the full path.
    pub fn filename(&self) -> String {
        self.file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_path.display().to_string())
    }
}

/// Unconditional audit capture of one input row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawMeasurement {
    pub id: Uuid,
    pub study_id: Option<String>,
    pub participant_id: String,
    pub measurement_type: String,
    pub value: String,
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub site_id: Option<String>,
    pub quality_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasurementValue {
    Single { value: f64 },
    Composite { systolic: f64, diastolic: f64 },
}

impl MeasurementValue {
    pub fn single(&self) -> Option<f64> {
        match self {
            MeasurementValue::Single { value } => Some(*value),
            MeasurementValue::Composite { .. } => None,
        }
    }

    pub fn systolic(&self) -> Option<f64> {
        match self {
            MeasurementValue::Composite { systolic, .. } => Some(*systolic),
            MeasurementValue::Single { .. } => None,
        }
    }

    pub fn diastolic(&self) -> Option<f64> {
        match self {
            MeasurementValue::Composite { diastolic, .. } => Some(*diastolic),
            MeasurementValue::Single { .. } => None,
        }
    }
}

/// Quality-gated, dimension-resolved view of a raw row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedMeasurement {
    pub study_id: Option<String>,
    pub participant_id: String,
    pub measurement_type_id: MeasurementTypeId,
    pub value: MeasurementValue,
    pub quality_score: f64,
    pub recorded_at: DateTime<Utc>,
    pub raw_value: String,
}
