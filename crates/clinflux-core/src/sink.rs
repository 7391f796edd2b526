use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use tracing::info;

use crate::db::DbPool;
use crate::error::{EtlError, Result};
use crate::types::{ProcessedMeasurement, RawMeasurement};

// Postgres caps a statement at 65535 bind parameters; both tables bind ten per row.
const INSERT_CHUNK_ROWS: usize = 1000;

/// End-of-stream writer for both projections. Either every row lands or none do.
#[async_trait]
pub trait BulkSink: Send + Sync {
    async fn write_batch(
        &self,
        job_id: &str,
        raw: &[RawMeasurement],
        processed: &[ProcessedMeasurement],
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct PgBulkSink {
    pool: DbPool,
}

impl PgBulkSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn write_in_transaction(
        &self,
        job_id: &str,
        raw: &[RawMeasurement],
        processed: &[ProcessedMeasurement],
    ) -> sqlx::Result<()> {
        let mut db_tx = self.pool.begin().await?;

        for chunk in raw.chunks(INSERT_CHUNK_ROWS) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO clinical_measurements \
                 (id, job_id, study_id, participant_id, measurement_type, value, unit, timestamp, site_id, quality_score) ",
            );
            builder.push_values(chunk, |mut row, measurement| {
                row.push_bind(measurement.id)
                    .push_bind(job_id)
                    .push_bind(&measurement.study_id)
                    .push_bind(&measurement.participant_id)
                    .push_bind(&measurement.measurement_type)
                    .push_bind(&measurement.value)
                    .push_bind(&measurement.unit)
                    .push_bind(measurement.timestamp)
                    .push_bind(&measurement.site_id)
                    .push_bind(measurement.quality_score);
            });
            builder.build().execute(&mut *db_tx).await?;
        }

        for chunk in processed.chunks(INSERT_CHUNK_ROWS) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO processed_measurements \
                 (job_id, study_id, participant_id, measurement_type_id, measurement_value, systolic, diastolic, raw_value, quality_score, recorded_at) ",
            );
            builder.push_values(chunk, |mut row, measurement| {
                row.push_bind(job_id)
                    .push_bind(&measurement.study_id)
                    .push_bind(&measurement.participant_id)
                    .push_bind(measurement.measurement_type_id)
                    .push_bind(measurement.value.single())
                    .push_bind(measurement.value.systolic())
                    .push_bind(measurement.value.diastolic())
                    .push_bind(&measurement.raw_value)
                    .push_bind(measurement.quality_score)
                    .push_bind(measurement.recorded_at);
            });
            builder.build().execute(&mut *db_tx).await?;
        }

        db_tx.commit().await
    }
}

#[async_trait]
impl BulkSink for PgBulkSink {
    async fn write_batch(
        &self,
        job_id: &str,
        raw: &[RawMeasurement],
        processed: &[ProcessedMeasurement],
    ) -> Result<()> {
        self.write_in_transaction(job_id, raw, processed)
            .await
            .map_err(|err| EtlError::Persistence(err.to_string()))?;
        info!(
            job_id,
            raw_rows = raw.len(),
            processed_rows = processed.len(),
            "Persisted measurement batch"
        );
        Ok(())
    }
}
