use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use tracing::info;

use crate::db::DbPool;
use crate::error::{EtlError, Result};
use crate::types::JobDescriptor;

pub const FIELD_JOB_ID: &str = "jobId";
pub const FIELD_FILENAME: &str = "filename";
pub const FIELD_STUDY_ID: &str = "studyId";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_PROGRESS: &str = "progress";
pub const FIELD_MESSAGE: &str = "message";

/// Flat field map as held by the key-value job store.
pub type JobFields = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait JobStateSink: Send + Sync {
    /// Merges `fields` into whatever is stored for `job_id`.
    async fn set_fields(&self, job_id: &str, fields: JobFields) -> Result<()>;
    async fn get_fields(&self, job_id: &str) -> Result<Option<JobFields>>;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub job_id: String,
    pub filename: Option<String>,
    pub study_id: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    pub message: Option<String>,
}

impl JobState {
    pub fn from_fields(job_id: &str, fields: &JobFields) -> Result<Self> {
        let status_raw = fields.get(FIELD_STATUS).cloned().unwrap_or_default();
        let status = JobStatus::from_str(&status_raw).ok_or(EtlError::InvalidStatus(status_raw))?;
        let progress = fields
            .get(FIELD_PROGRESS)
            .and_then(|raw| raw.parse::<u8>().ok())
            .unwrap_or(0);

        Ok(Self {
            job_id: job_id.to_string(),
            filename: fields.get(FIELD_FILENAME).cloned(),
            study_id: fields
                .get(FIELD_STUDY_ID)
                .filter(|value| !value.is_empty())
                .cloned(),
            status,
            progress,
            message: fields.get(FIELD_MESSAGE).cloned(),
        })
    }
}

/// Reads a job's lifecycle state; unknown ids surface as [`EtlError::JobNotFound`].
pub async fn job_status(sink: &dyn JobStateSink, job_id: &str) -> Result<JobState> {
    let fields = job_details(sink, job_id).await?;
    JobState::from_fields(job_id, &fields)
}

pub async fn job_details(sink: &dyn JobStateSink, job_id: &str) -> Result<JobFields> {
    sink.get_fields(job_id)
        .await?
        .ok_or_else(|| EtlError::JobNotFound(job_id.to_string()))
}

/// One-way `running -> completed | failed` state machine for a single job.
pub struct JobTracker {
    sink: Arc<dyn JobStateSink>,
    job_id: String,
    status: JobStatus,
    progress: u8,
}

impl JobTracker {
    /// Records the initial `running` state.
    pub async fn start(sink: Arc<dyn JobStateSink>, descriptor: &JobDescriptor) -> Result<Self> {
        let mut fields = JobFields::new();
        fields.insert(FIELD_JOB_ID.into(), descriptor.job_id.clone());
        fields.insert(FIELD_FILENAME.into(), descriptor.filename());
        fields.insert(
            FIELD_STUDY_ID.into(),
            descriptor.study_id.clone().unwrap_or_default(),
        );
        fields.insert(FIELD_STATUS.into(), JobStatus::Running.as_str().into());
        fields.insert(FIELD_PROGRESS.into(), "0".into());
        fields.insert(FIELD_MESSAGE.into(), "Job started".into());

        sink.set_fields(&descriptor.job_id, fields).await?;
        info!(job_id = %descriptor.job_id, "Job started");

        Ok(Self {
            sink,
            job_id: descriptor.job_id.clone(),
            status: JobStatus::Running,
            progress: 0,
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub async fn report_progress(&mut self, progress: u8) -> Result<()> {
        self.ensure_running(JobStatus::Running)?;
        let mut fields = JobFields::new();
        fields.insert(FIELD_PROGRESS.into(), progress.to_string());
        self.sink.set_fields(&self.job_id, fields).await?;
        self.progress = progress;
        Ok(())
    }

    pub async fn complete(&mut self, message: impl Into<String>) -> Result<()> {
        self.finish(JobStatus::Completed, Some(100), message.into())
            .await
    }

    pub async fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.finish(JobStatus::Failed, None, message.into()).await
    }

    async fn finish(&mut self, status: JobStatus, progress: Option<u8>, message: String) -> Result<()> {
        self.ensure_running(status)?;

        let mut fields = JobFields::new();
        fields.insert(FIELD_STATUS.into(), status.as_str().into());
        if let Some(progress) = progress {
            fields.insert(FIELD_PROGRESS.into(), progress.to_string());
        }
        fields.insert(FIELD_MESSAGE.into(), message.clone());
        self.sink.set_fields(&self.job_id, fields).await?;

        self.status = status;
        if let Some(progress) = progress {
            self.progress = progress;
        }
        info!(job_id = %self.job_id, status = status.as_str(), message = %message, "Job finished");
        Ok(())
    }

    fn ensure_running(&self, to: JobStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(EtlError::InvalidTransition {
                job_id: self.job_id.clone(),
                from: self.status,
                to,
            });
        }
        Ok(())
    }
}

/// Job-state store kept as a JSONB field map per job in Postgres.
#[derive(Clone)]
pub struct PgJobStateStore {
    pool: DbPool,
}

impl PgJobStateStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStateSink for PgJobStateStore {
    async fn set_fields(&self, job_id: &str, fields: JobFields) -> Result<()> {
        sqlx::query(
            r#"
                INSERT INTO job_state (job_id, fields, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (job_id) DO UPDATE SET
                    fields = job_state.fields || EXCLUDED.fields,
                    updated_at = NOW()
            "#,
        )
        .bind(job_id)
        .bind(Json(fields))
        .execute(&self.pool)
        .await
        .map_err(|err| EtlError::StateSink(err.to_string()))?;
        Ok(())
    }

    async fn get_fields(&self, job_id: &str) -> Result<Option<JobFields>> {
        let fields = sqlx::query_scalar::<_, Json<JobFields>>(
            "SELECT fields FROM job_state WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| EtlError::StateSink(err.to_string()))?;
        Ok(fields.map(|Json(fields)| fields))
    }
}
