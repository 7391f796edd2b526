// crates/clinflux-core/src/error.rs

use thiserror::Error;

use crate::decoder::RowDecodeError;
use crate::job_state::JobStatus;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("header could not be read: {0}")]
    Header(#[from] RowDecodeError),

    #[error("File not found")]
    FileNotFound(String),

    #[error("no records found")]
    NoRecords,

    #[error("job not found")]
    JobNotFound(String),

    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("invalid job status value '{0}'")]
    InvalidStatus(String),

    #[error("job state store error: {0}")]
    StateSink(String),

    #[error("dimension store error: {0}")]
    Dimension(String),

    #[error("persistence failed: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, EtlError>;
