use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clinflux_core::{
    db,
    dimensions::{DimensionStore, PgDimensionStore},
    job_state::{job_status, JobStatus, PgJobStateStore},
    pipeline::{run_job, PipelineContext},
    queries::{query_measurements, MeasurementFilter},
    sink::PgBulkSink,
    source::MemoryLineSource,
    types::JobDescriptor,
};
use tokio::runtime::Runtime;
use uuid::Uuid;

fn database_url(test: &str) -> Option<String> {
    match env::var("CLINFLUX_TEST_DATABASE_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("Skipping {test} because CLINFLUX_TEST_DATABASE_URL is not set");
            None
        }
    }
}

#[test]
fn pipeline_roundtrip_against_postgres() -> Result<()> {
    let Some(database_url) = database_url("pipeline_roundtrip_against_postgres") else {
        return Ok(());
    };

    let rt = Runtime::new()?;
    rt.block_on(async move {
        let pool = db::connect(&database_url, 5).await?;
        db::run_migrations(&pool).await?;

        // Unique keys keep reruns and parallel tests from seeing each other's rows.
        let job_id = format!("pg-job-{}", Uuid::new_v4());
        let study_id = format!("study-{}", Uuid::new_v4());

        let ctx = PipelineContext {
            dimensions: Arc::new(PgDimensionStore::new(pool.clone())),
            sink: Arc::new(PgBulkSink::new(pool.clone())),
            state: Arc::new(PgJobStateStore::new(pool.clone())),
        };
        let descriptor = JobDescriptor {
            job_id: job_id.clone(),
            file_path: PathBuf::from("vitals.csv"),
            study_id: Some(study_id.clone()),
        };
        let source = MemoryLineSource::from_text(
            "participant_id,measurement_type,value,unit,timestamp,quality_score\n\
             p1,hr,72,bpm,2021-01-01T00:00:00,0.95\n\
             p1,bp,120/80,mmHg,2021-01-01T00:01:00,0.90\n\
             p2,hr,64,bpm,2021-01-01T00:02:00,0.50\n",
        );

        let report = run_job(&ctx, &descriptor, &source).await?;
        assert_eq!(report.raw_rows, 3);
        assert_eq!(report.processed_rows, 2);

        let state = job_status(ctx.state.as_ref(), &job_id).await?;
        assert_eq!(state.status, JobStatus::Completed);
        assert_eq!(state.progress, 100);

        let (processed_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM processed_measurements WHERE job_id = $1",
        )
        .bind(&job_id)
        .fetch_one(&pool)
        .await?;
        assert_eq!(processed_count, 2);

        let (systolic, diastolic, single): (Option<f64>, Option<f64>, Option<f64>) =
            sqlx::query_as(
                "SELECT systolic, diastolic, measurement_value FROM processed_measurements WHERE job_id = $1 AND raw_value = '120/80'",
            )
            .bind(&job_id)
            .fetch_one(&pool)
            .await?;
        assert_eq!(systolic, Some(120.0));
        assert_eq!(diastolic, Some(80.0));
        assert_eq!(single, None);

        let heart_rates = query_measurements(
            &pool,
            &MeasurementFilter {
                study_id: Some(study_id.clone()),
                measurement_type: Some("hr".into()),
                ..MeasurementFilter::default()
            },
        )
        .await?;
        assert_eq!(heart_rates.len(), 2);
        assert_eq!(heart_rates[0].participant_id, "p1");

        Ok(())
    })
}

#[test]
fn concurrent_unit_inserts_converge() -> Result<()> {
    let Some(database_url) = database_url("concurrent_unit_inserts_converge") else {
        return Ok(());
    };

    let rt = Runtime::new()?;
    rt.block_on(async move {
        let pool = db::connect(&database_url, 10).await?;
        db::run_migrations(&pool).await?;

        let unit = format!("mmol/L-{}", Uuid::new_v4());
        let store = Arc::new(PgDimensionStore::new(pool.clone()));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let unit = unit.clone();
            tasks.push(tokio::spawn(async move {
                let unit_id = store.get_or_create_unit(&unit).await?;
                store.get_or_create_type("glucose", unit_id).await
            }));
        }

        let mut type_ids = Vec::new();
        for task in tasks {
            type_ids.push(task.await??);
        }
        type_ids.dedup();
        assert_eq!(type_ids.len(), 1);

        let (units,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM measurement_units WHERE unit = $1")
                .bind(&unit)
                .fetch_one(&pool)
                .await?;
        assert_eq!(units, 1);
        Ok(())
    })
}
