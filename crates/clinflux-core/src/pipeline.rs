use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::decoder::Header;
use crate::dimensions::{DimensionCache, DimensionResolver, DimensionStore};
use crate::error::{EtlError, Result};
use crate::job_state::{JobStateSink, JobTracker};
use crate::progress::ProgressTracker;
use crate::sink::BulkSink;
use crate::source::LineSource;
use crate::transform::{ProcessedSkip, RowOutcome, TransformEngine};
use crate::types::JobDescriptor;

/// Collaborators shared by every job. Each run still gets its own buffers and cache.
#[derive(Clone)]
pub struct PipelineContext {
    pub dimensions: Arc<dyn DimensionStore>,
    pub sink: Arc<dyn BulkSink>,
    pub state: Arc<dyn JobStateSink>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RowTally {
    pub decode_failures: usize,
    pub below_threshold: usize,
    pub quality_unparseable: usize,
    pub value_unparseable: usize,
}

impl RowTally {
    fn record_skip(&mut self, reason: ProcessedSkip) {
        match reason {
            ProcessedSkip::BelowThreshold => self.below_threshold += 1,
            ProcessedSkip::QualityUnparseable => self.quality_unparseable += 1,
            ProcessedSkip::ValueUnparseable => self.value_unparseable += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: String,
    pub total_rows: usize,
    pub raw_rows: usize,
    pub processed_rows: usize,
    pub skipped: RowTally,
}

impl JobReport {
    pub fn summary(&self) -> String {
        format!(
            "Job completed: {} rows read, {} raw, {} processed, {} dropped",
            self.total_rows, self.raw_rows, self.processed_rows, self.skipped.decode_failures
        )
    }
}

/// Records the `running` state, then processes the job to a terminal state.
pub async fn run_job(
    ctx: &PipelineContext,
    descriptor: &JobDescriptor,
    source: &dyn LineSource,
) -> Result<JobReport> {
    let tracker = JobTracker::start(ctx.state.clone(), descriptor).await?;
    drive_job(ctx, descriptor, source, tracker).await
}

/// Runs an already-started job and finalizes its state at most once.
///
/// The terminal write is best-effort. If the state store rejects it, the stored status stays
/// `running` even though this returns, so pollers should not treat `running` as proof of
/// liveness.
pub async fn drive_job(
    ctx: &PipelineContext,
    descriptor: &JobDescriptor,
    source: &dyn LineSource,
    mut tracker: JobTracker,
) -> Result<JobReport> {
    match execute(ctx, descriptor, source, &mut tracker).await {
        Ok(report) => {
            if let Err(err) = tracker.complete(report.summary()).await {
                error!(
                    job_id = %descriptor.job_id,
                    error = %err,
                    "Rows persisted but completion could not be recorded"
                );
                return Err(err);
            }
            Ok(report)
        }
        Err(err) => {
            if let Err(state_err) = tracker.fail(err.to_string()).await {
                warn!(
                    job_id = %descriptor.job_id,
                    error = %state_err,
                    "Failed to record job failure"
                );
            }
            Err(err)
        }
    }
}

async fn execute(
    ctx: &PipelineContext,
    descriptor: &JobDescriptor,
    source: &dyn LineSource,
    tracker: &mut JobTracker,
) -> Result<JobReport> {
    let job_id = descriptor.job_id.as_str();

    let total_rows = source.count_lines().await?.saturating_sub(1);
    if total_rows == 0 {
        return Err(EtlError::NoRecords);
    }

    let mut lines = source.lines().await?;
    let header = match lines.next().await {
        Some(line) => Header::parse(&line??)?,
        None => return Err(EtlError::NoRecords),
    };
    debug!(job_id, columns = ?header.columns(), total_rows, "Read header");

    let mut cache = DimensionCache::new();
    let resolver = DimensionResolver::new(ctx.dimensions.as_ref(), &mut cache);
    let mut engine = TransformEngine::new(header, descriptor.study_id.clone(), resolver);
    let mut progress = ProgressTracker::new(total_rows);

    let mut raw = Vec::new();
    let mut processed = Vec::new();
    let mut skipped = RowTally::default();

    while let Some(line) = lines.next().await {
        let outcome = match line? {
            Ok(text) => engine.transform_line(&text).await?,
            Err(err) => RowOutcome::Skipped(err),
        };
        match outcome {
            RowOutcome::RawAndProcessed {
                raw: raw_row,
                processed: processed_row,
            } => {
                raw.push(raw_row);
                processed.push(processed_row);
            }
            RowOutcome::RawOnly {
                raw: raw_row,
                reason,
            } => {
                skipped.record_skip(reason);
                raw.push(raw_row);
            }
            RowOutcome::Skipped(reason) => {
                debug!(job_id, row = progress.consumed() + 1, %reason, "Dropped row");
                skipped.decode_failures += 1;
            }
        }

        if let Some(percent) = progress.advance() {
            tracker.report_progress(percent).await?;
        }
    }
    drop(engine);

    info!(
        job_id,
        rows = progress.consumed(),
        raw_rows = raw.len(),
        processed_rows = processed.len(),
        units = cache.unit_count(),
        measurement_types = cache.type_count(),
        participants = cache.participant_count(),
        "Finished reading rows"
    );

    if raw.is_empty() {
        return Err(EtlError::NoRecords);
    }

    ctx.sink.write_batch(job_id, &raw, &processed).await?;

    Ok(JobReport {
        job_id: job_id.to_string(),
        total_rows: progress.consumed(),
        raw_rows: raw.len(),
        processed_rows: processed.len(),
        skipped,
    })
}
