use std::sync::Arc;

use clinflux_core::{
    job_state::{job_status, JobStatus, FIELD_STATUS},
    memory::{MemoryBulkSink, MemoryDimensionStore, MemoryJobStateStore},
    pipeline::PipelineContext,
    runner::{JobRequest, JobRunner},
    EtlError,
};

fn write_fixture(dir: &std::path::Path, name: &str, rows: &[&str]) {
    let mut text =
        String::from("participant_id,measurement_type,value,unit,timestamp,site_id,quality_score\n");
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    std::fs::write(dir.join(name), text).expect("write fixture");
}

fn request(job_id: &str, filename: &str) -> JobRequest {
    JobRequest {
        job_id: job_id.into(),
        filename: filename.into(),
        study_id: Some("study-xyz".into()),
    }
}

#[tokio::test]
async fn missing_file_is_rejected_before_any_state_is_written() {
    let dir = tempfile::tempdir().expect("temp dir");
    let state = Arc::new(MemoryJobStateStore::new());
    let runner = JobRunner::new(
        PipelineContext {
            dimensions: Arc::new(MemoryDimensionStore::new()),
            sink: Arc::new(MemoryBulkSink::new()),
            state: state.clone(),
        },
        dir.path(),
    );

    let err = runner
        .submit(request("job-404", "nonexistent.csv"))
        .await
        .unwrap_err();
    assert!(matches!(err, EtlError::FileNotFound(_)));
    assert_eq!(err.to_string(), "File not found");

    let lookup = job_status(state.as_ref(), "job-404").await.unwrap_err();
    assert!(matches!(lookup, EtlError::JobNotFound(_)));
}

#[tokio::test]
async fn submitted_job_starts_running_and_completes_from_disk() {
    let dir = tempfile::tempdir().expect("temp dir");
    write_fixture(
        dir.path(),
        "vitals.csv",
        &[
            "p1,hr,72,bpm,2021-01-01T00:00:00,site-1,0.95",
            "p1,bp,118/76,mmHg,2021-01-01T00:00:00,site-1,0.97",
        ],
    );

    let sink = Arc::new(MemoryBulkSink::new());
    let state = Arc::new(MemoryJobStateStore::new());
    let runner = JobRunner::new(
        PipelineContext {
            dimensions: Arc::new(MemoryDimensionStore::new()),
            sink: sink.clone(),
            state: state.clone(),
        },
        dir.path(),
    );

    let handle = runner
        .submit(request("job-123", "vitals.csv"))
        .await
        .expect("submit");

    let first = state.history("job-123").await;
    assert_eq!(
        first[0].get(FIELD_STATUS).map(String::as_str),
        Some("running")
    );

    let report = handle.await.expect("join").expect("job succeeds");
    assert_eq!(report.raw_rows, 2);
    assert_eq!(report.processed_rows, 2);

    let raw = sink.raw().await;
    assert!(raw.iter().all(|row| row.site_id.as_deref() == Some("site-1")));

    let status = job_status(state.as_ref(), "job-123").await.expect("status");
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.progress, 100);
    assert_eq!(status.filename.as_deref(), Some("vitals.csv"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_jobs_share_dimension_rows() {
    let dir = tempfile::tempdir().expect("temp dir");
    for i in 0..4 {
        let heart_rate = format!("p{i},hr,7{i},bpm,2021-01-0{}T00:00:00,site-{i},0.95", i + 1);
        let blood_pressure =
            format!("p{i},bp,12{i}/8{i},mmHg,2021-01-0{}T00:05:00,site-{i},0.93", i + 1);
        write_fixture(
            dir.path(),
            &format!("site-{i}.csv"),
            &[heart_rate.as_str(), blood_pressure.as_str()],
        );
    }

    let dimensions = Arc::new(MemoryDimensionStore::new());
    let sink = Arc::new(MemoryBulkSink::new());
    let state = Arc::new(MemoryJobStateStore::new());
    let runner = JobRunner::new(
        PipelineContext {
            dimensions: dimensions.clone(),
            sink: sink.clone(),
            state: state.clone(),
        },
        dir.path(),
    );

    let mut handles = Vec::new();
    for i in 0..4 {
        handles.push(
            runner
                .submit(request(&format!("job-{i}"), &format!("site-{i}.csv")))
                .await
                .expect("submit"),
        );
    }
    for handle in handles {
        handle.await.expect("join").expect("job succeeds");
    }

    assert_eq!(dimensions.unit_count().await, 2);
    assert_eq!(dimensions.type_count().await, 2);
    assert_eq!(dimensions.participant_count().await, 4);
    assert_eq!(sink.write_count().await, 4);
    assert_eq!(sink.processed().await.len(), 8);

    for i in 0..4 {
        let status = job_status(state.as_ref(), &format!("job-{i}"))
            .await
            .expect("status");
        assert_eq!(status.status, JobStatus::Completed);
    }
}

#[tokio::test]
async fn undecodable_row_is_dropped_and_neighbours_load() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut bytes =
        b"participant_id,measurement_type,value,unit,timestamp,site_id,quality_score\n".to_vec();
    bytes.extend_from_slice(b"p1,hr,72,bpm,2021-01-01T00:00:00,site-1,0.95\n");
    bytes.extend_from_slice(b"p2,hr,70,bpm,2021-01-01T00:01:00,site-\xff,0.95\n");
    bytes.extend_from_slice(b"p3,hr,68,bpm,2021-01-01T00:02:00,site-1,0.95\n");
    std::fs::write(dir.path().join("mixed.csv"), bytes).expect("write fixture");

    let sink = Arc::new(MemoryBulkSink::new());
    let state = Arc::new(MemoryJobStateStore::new());
    let runner = JobRunner::new(
        PipelineContext {
            dimensions: Arc::new(MemoryDimensionStore::new()),
            sink: sink.clone(),
            state: state.clone(),
        },
        dir.path(),
    );

    let report = runner
        .submit(request("job-utf8", "mixed.csv"))
        .await
        .expect("submit")
        .await
        .expect("join")
        .expect("job succeeds");
    assert_eq!(report.total_rows, 3);
    assert_eq!(report.raw_rows, 2);
    assert_eq!(report.skipped.decode_failures, 1);

    let participants: Vec<String> = sink
        .raw()
        .await
        .into_iter()
        .map(|row| row.participant_id)
        .collect();
    assert_eq!(participants, vec!["p1".to_string(), "p3".to_string()]);

    let status = job_status(state.as_ref(), "job-utf8").await.expect("status");
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.progress, 100);
}
