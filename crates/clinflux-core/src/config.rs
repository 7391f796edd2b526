use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{EtlError, Result};

/// Processed rows require a quality score at or above this value.
pub const QUALITY_THRESHOLD: f64 = 0.90;

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EtlConfig {
    pub database_url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl EtlConfig {
    /// Reads configuration from the process environment, loading `.env` first.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .or_else(|_| env::var("CLINFLUX_DATABASE_URL"))
            .map_err(|_| {
                EtlError::Config("DATABASE_URL (or CLINFLUX_DATABASE_URL) must be set".into())
            })?;

        let data_dir = env::var("CLINFLUX_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let max_connections = match env::var("CLINFLUX_MAX_CONNECTIONS") {
            Ok(raw) => raw.parse().map_err(|_| {
                EtlError::Config(format!("CLINFLUX_MAX_CONNECTIONS '{raw}' is not a number"))
            })?,
            Err(_) => default_max_connections(),
        };

        Ok(Self {
            database_url,
            data_dir,
            max_connections,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| EtlError::Config(err.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}
