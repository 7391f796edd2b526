use std::path::PathBuf;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{info, Instrument};

use crate::error::{EtlError, Result};
use crate::job_state::JobTracker;
use crate::pipeline::{drive_job, JobReport, PipelineContext};
use crate::source::FileLineSource;
use crate::types::JobDescriptor;

pub type JobHandle = JoinHandle<Result<JobReport>>;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub job_id: String,
    pub filename: String,
    #[serde(default)]
    pub study_id: Option<String>,
}

/// Accepts job submissions against files in a data directory and runs each on its own task.
#[derive(Clone)]
pub struct JobRunner {
    ctx: PipelineContext,
    data_dir: PathBuf,
}

impl JobRunner {
    pub fn new(ctx: PipelineContext, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            ctx,
            data_dir: data_dir.into(),
        }
    }

    pub async fn resolve(&self, request: &JobRequest) -> Result<JobDescriptor> {
        let file_path = self.data_dir.join(&request.filename);
        let is_file = tokio::fs::metadata(&file_path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(EtlError::FileNotFound(file_path.display().to_string()));
        }

        Ok(JobDescriptor {
            job_id: request.job_id.clone(),
            file_path,
            study_id: request.study_id.clone(),
        })
    }

    /// Writes the initial `running` state before returning; processing continues on the
    /// returned task.
    pub async fn submit(&self, request: JobRequest) -> Result<JobHandle> {
        let descriptor = self.resolve(&request).await?;
        let tracker = JobTracker::start(self.ctx.state.clone(), &descriptor).await?;
        info!(job_id = %descriptor.job_id, file = %descriptor.file_path.display(), "Job submitted");

        let ctx = self.ctx.clone();
        let span = tracing::info_span!("etl_job", job_id = %descriptor.job_id);
        let handle = tokio::spawn(
            async move {
                let source = FileLineSource::new(descriptor.file_path.clone());
                drive_job(&ctx, &descriptor, &source, tracker).await
            }
            .instrument(span),
        );
        Ok(handle)
    }
}
