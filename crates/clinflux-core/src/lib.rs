pub mod config;
pub mod db;
pub mod decoder;
pub mod dimensions;
pub mod error;
pub mod job_state;
pub mod memory;
pub mod pipeline;
pub mod progress;
pub mod queries;
pub mod runner;
pub mod sink;
pub mod source;
pub mod transform;
pub mod types;

pub use error::{EtlError, Result};
