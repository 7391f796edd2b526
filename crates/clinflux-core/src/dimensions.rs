//! Get-or-create resolution for the shared dimension tables.
//!
//! Dimension rows outlive any single job, so the store is the source of truth for
//! deduplication. Each pipeline run owns a [`DimensionCache`] that only suppresses repeat
//! lookups within that run.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tracing::debug;

use crate::db::DbPool;
use crate::error::Result;
use crate::types::{MeasurementTypeId, UnitId};

#[async_trait]
pub trait DimensionStore: Send + Sync {
    async fn get_or_create_unit(&self, unit: &str) -> Result<UnitId>;
    async fn get_or_create_type(&self, name: &str, unit_id: UnitId) -> Result<MeasurementTypeId>;
    async fn ensure_participant(&self, participant_id: &str, study_id: Option<&str>) -> Result<()>;
}

/// Natural-key memo scoped to one pipeline run.
#[derive(Debug, Default)]
pub struct DimensionCache {
    units: HashMap<String, UnitId>,
    types: HashMap<(String, UnitId), MeasurementTypeId>,
    participants: HashSet<String>,
}

impl DimensionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }
}

pub struct DimensionResolver<'a> {
    store: &'a dyn DimensionStore,
    cache: &'a mut DimensionCache,
}

impl<'a> DimensionResolver<'a> {
    pub fn new(store: &'a dyn DimensionStore, cache: &'a mut DimensionCache) -> Self {
        Self { store, cache }
    }

    pub async fn resolve_unit(&mut self, unit: &str) -> Result<UnitId> {
        if let Some(id) = self.cache.units.get(unit) {
            return Ok(*id);
        }
        let id = self.store.get_or_create_unit(unit).await?;
        debug!(unit, unit_id = id, "Resolved measurement unit");
        self.cache.units.insert(unit.to_string(), id);
        Ok(id)
    }

    pub async fn resolve_type(&mut self, name: &str, unit_id: UnitId) -> Result<MeasurementTypeId> {
        let key = (name.to_string(), unit_id);
        if let Some(id) = self.cache.types.get(&key) {
            return Ok(*id);
        }
        let id = self.store.get_or_create_type(name, unit_id).await?;
        debug!(name, unit_id, measurement_type_id = id, "Resolved measurement type");
        self.cache.types.insert(key, id);
        Ok(id)
    }

    pub async fn ensure_participant(
        &mut self,
        participant_id: &str,
        study_id: Option<&str>,
    ) -> Result<()> {
        if self.cache.participants.contains(participant_id) {
            return Ok(());
        }
        self.store
            .ensure_participant(participant_id, study_id)
            .await?;
        self.cache.participants.insert(participant_id.to_string());
        Ok(())
    }
}

/// Postgres-backed dimension tables. Inserts use `ON CONFLICT DO NOTHING` and fall back to a
/// lookup, so concurrent jobs racing on the same natural key converge on one row.
#[derive(Clone)]
pub struct PgDimensionStore {
    pool: DbPool,
}

impl PgDimensionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DimensionStore for PgDimensionStore {
    async fn get_or_create_unit(&self, unit: &str) -> Result<UnitId> {
        let inserted = sqlx::query_scalar::<_, UnitId>(
            r#"
                INSERT INTO measurement_units (unit)
                VALUES ($1)
                ON CONFLICT (unit) DO NOTHING
                RETURNING unit_id
            "#,
        )
        .bind(unit)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(id);
        }

        let id = sqlx::query_scalar::<_, UnitId>(
            "SELECT unit_id FROM measurement_units WHERE unit = $1",
        )
        .bind(unit)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_or_create_type(&self, name: &str, unit_id: UnitId) -> Result<MeasurementTypeId> {
        let inserted = sqlx::query_scalar::<_, MeasurementTypeId>(
            r#"
                INSERT INTO measurement_types (name, unit_id)
                VALUES ($1, $2)
                ON CONFLICT (name, unit_id) DO NOTHING
                RETURNING measurement_type_id
            "#,
        )
        .bind(name)
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(id);
        }

        let id = sqlx::query_scalar::<_, MeasurementTypeId>(
            "SELECT measurement_type_id FROM measurement_types WHERE name = $1 AND unit_id = $2",
        )
        .bind(name)
        .bind(unit_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn ensure_participant(&self, participant_id: &str, study_id: Option<&str>) -> Result<()> {
        if let Some(study_id) = study_id {
            sqlx::query(
                "INSERT INTO studies (study_id) VALUES ($1) ON CONFLICT (study_id) DO NOTHING",
            )
            .bind(study_id)
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            r#"
                INSERT INTO participants (participant_id, study_id)
                VALUES ($1, $2)
                ON CONFLICT (participant_id) DO NOTHING
            "#,
        )
        .bind(participant_id)
        .bind(study_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
