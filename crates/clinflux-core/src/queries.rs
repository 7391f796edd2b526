use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Postgres, QueryBuilder, Row};

use crate::db::DbPool;
use crate::error::Result;
use crate::types::RawMeasurement;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasurementFilter {
    pub study_id: Option<String>,
    pub participant_id: Option<String>,
    pub measurement_type: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// Raw measurements matching every populated filter field, oldest first.
pub async fn query_measurements(
    pool: &DbPool,
    filter: &MeasurementFilter,
) -> Result<Vec<RawMeasurement>> {
    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT id, study_id, participant_id, measurement_type, value, unit, timestamp, site_id, quality_score \
         FROM clinical_measurements WHERE TRUE",
    );

    if let Some(study_id) = &filter.study_id {
        builder.push(" AND study_id = ").push_bind(study_id);
    }
    if let Some(participant_id) = &filter.participant_id {
        builder.push(" AND participant_id = ").push_bind(participant_id);
    }
    if let Some(measurement_type) = &filter.measurement_type {
        builder
            .push(" AND measurement_type = ")
            .push_bind(measurement_type);
    }
    if let Some(start) = filter.start {
        builder.push(" AND timestamp >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        builder.push(" AND timestamp <= ").push_bind(end);
    }

    builder.push(" ORDER BY timestamp, participant_id");
    if let Some(limit) = filter.limit {
        builder.push(" LIMIT ").push_bind(limit);
    }

    let rows = builder.build().fetch_all(pool).await?;
    let measurements = rows
        .iter()
        .map(raw_from_row)
        .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
    Ok(measurements)
}

fn raw_from_row(row: &PgRow) -> std::result::Result<RawMeasurement, sqlx::Error> {
    Ok(RawMeasurement {
        id: row.try_get("id")?,
        study_id: row.try_get("study_id")?,
        participant_id: row.try_get("participant_id")?,
        measurement_type: row.try_get("measurement_type")?,
        value: row.try_get("value")?,
        unit: row.try_get("unit")?,
        timestamp: row.try_get("timestamp")?,
        site_id: row.try_get("site_id")?,
        quality_score: row.try_get("quality_score")?,
    })
}
