//! In-process implementations of the collaborator traits, used by tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::dimensions::DimensionStore;
use crate::error::{EtlError, Result};
use crate::job_state::{JobFields, JobStateSink};
use crate::sink::BulkSink;
use crate::types::{MeasurementTypeId, ProcessedMeasurement, RawMeasurement, UnitId};

#[derive(Debug, Default)]
struct DimensionTables {
    units: HashMap<String, UnitId>,
    types: HashMap<(String, UnitId), MeasurementTypeId>,
    participants: HashMap<String, Option<String>>,
    next_unit_id: UnitId,
    next_type_id: MeasurementTypeId,
    unit_calls: usize,
    type_calls: usize,
    participant_calls: usize,
}

/// Dimension tables behind a single mutex, so every get-or-create is one serialized writer.
#[derive(Debug, Default)]
pub struct MemoryDimensionStore {
    tables: Mutex<DimensionTables>,
}

impl MemoryDimensionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn unit_id(&self, unit: &str) -> Option<UnitId> {
        self.tables.lock().await.units.get(unit).copied()
    }

    pub async fn type_id(&self, name: &str, unit_id: UnitId) -> Option<MeasurementTypeId> {
        self.tables
            .lock()
            .await
            .types
            .get(&(name.to_string(), unit_id))
            .copied()
    }

    pub async fn participant_study(&self, participant_id: &str) -> Option<Option<String>> {
        self.tables
            .lock()
            .await
            .participants
            .get(participant_id)
            .cloned()
    }

    pub async fn unit_count(&self) -> usize {
        self.tables.lock().await.units.len()
    }

    pub async fn type_count(&self) -> usize {
        self.tables.lock().await.types.len()
    }

    pub async fn participant_count(&self) -> usize {
        self.tables.lock().await.participants.len()
    }

    /// Number of get-or-create calls that reached the store, across all dimensions.
    pub async fn store_calls(&self) -> usize {
        let tables = self.tables.lock().await;
        tables.unit_calls + tables.type_calls + tables.participant_calls
    }

    pub async fn type_calls(&self) -> usize {
        self.tables.lock().await.type_calls
    }
}

#[async_trait]
impl DimensionStore for MemoryDimensionStore {
    async fn get_or_create_unit(&self, unit: &str) -> Result<UnitId> {
        let mut tables = self.tables.lock().await;
        tables.unit_calls += 1;
        if let Some(id) = tables.units.get(unit) {
            return Ok(*id);
        }
        tables.next_unit_id += 1;
        let id = tables.next_unit_id;
        tables.units.insert(unit.to_string(), id);
        Ok(id)
    }

    async fn get_or_create_type(&self, name: &str, unit_id: UnitId) -> Result<MeasurementTypeId> {
        let mut tables = self.tables.lock().await;
        tables.type_calls += 1;
        if !tables.units.values().any(|id| *id == unit_id) {
            return Err(EtlError::Dimension(format!("unknown unit id {unit_id}")));
        }
        let key = (name.to_string(), unit_id);
        if let Some(id) = tables.types.get(&key) {
            return Ok(*id);
        }
        tables.next_type_id += 1;
        let id = tables.next_type_id;
        tables.types.insert(key, id);
        Ok(id)
    }

    async fn ensure_participant(&self, participant_id: &str, study_id: Option<&str>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.participant_calls += 1;
        tables
            .participants
            .entry(participant_id.to_string())
            .or_insert_with(|| study_id.map(str::to_string));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StoredBatches {
    raw: Vec<RawMeasurement>,
    processed: Vec<ProcessedMeasurement>,
    writes: usize,
    fail_with: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemoryBulkSink {
    batches: Mutex<StoredBatches>,
}

impl MemoryBulkSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every write fails with `message`, leaving nothing stored.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            batches: Mutex::new(StoredBatches {
                fail_with: Some(message.into()),
                ..StoredBatches::default()
            }),
        }
    }

    pub async fn raw(&self) -> Vec<RawMeasurement> {
        self.batches.lock().await.raw.clone()
    }

    pub async fn processed(&self) -> Vec<ProcessedMeasurement> {
        self.batches.lock().await.processed.clone()
    }

    pub async fn write_count(&self) -> usize {
        self.batches.lock().await.writes
    }
}

#[async_trait]
impl BulkSink for MemoryBulkSink {
    async fn write_batch(
        &self,
        _job_id: &str,
        raw: &[RawMeasurement],
        processed: &[ProcessedMeasurement],
    ) -> Result<()> {
        let mut batches = self.batches.lock().await;
        if let Some(message) = &batches.fail_with {
            return Err(EtlError::Persistence(message.clone()));
        }
        batches.raw.extend_from_slice(raw);
        batches.processed.extend_from_slice(processed);
        batches.writes += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StateEntries {
    jobs: HashMap<String, JobFields>,
    history: HashMap<String, Vec<JobFields>>,
    fail_after: Option<usize>,
    writes: usize,
}

/// Hash-per-job store with the merge semantics of a key-value `HSET`.
#[derive(Debug, Default)]
pub struct MemoryJobStateStore {
    entries: Mutex<StateEntries>,
}

impl MemoryJobStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that accepts `writes` set-field calls and rejects every later one.
    pub fn failing_after(writes: usize) -> Self {
        Self {
            entries: Mutex::new(StateEntries {
                fail_after: Some(writes),
                ..StateEntries::default()
            }),
        }
    }

    /// Every field map written for `job_id`, in order.
    pub async fn history(&self, job_id: &str) -> Vec<JobFields> {
        self.entries
            .lock()
            .await
            .history
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobStateSink for MemoryJobStateStore {
    async fn set_fields(&self, job_id: &str, fields: JobFields) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if matches!(entries.fail_after, Some(limit) if entries.writes >= limit) {
            return Err(EtlError::StateSink("job state store unavailable".into()));
        }
        entries.writes += 1;
        entries
            .history
            .entry(job_id.to_string())
            .or_default()
            .push(fields.clone());
        entries
            .jobs
            .entry(job_id.to_string())
            .or_default()
            .extend(fields);
        Ok(())
    }

    async fn get_fields(&self, job_id: &str) -> Result<Option<JobFields>> {
        Ok(self.entries.lock().await.jobs.get(job_id).cloned())
    }
}
