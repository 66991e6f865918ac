//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;

use declarant_core::domain::ConfidenceThresholds;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    /// Vector store holding the ТН ВЭД nomenclature; file search is skipped
    /// when unset.
    pub vector_store_id: Option<String>,
    pub classifier_model: String,
    /// Items classified concurrently per chunk.
    pub batch_size: usize,
    pub high_confidence_threshold: u8,
    pub medium_confidence_floor: u8,
    pub max_upload_bytes: usize,
    pub max_rows_per_file: usize,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://declarant_history.db".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load API Keys (as optional) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let vector_store_id = std::env::var("VECTOR_STORE_ID").ok();

        // --- Load Classification Settings ---
        let classifier_model =
            std::env::var("CLASSIFIER_MODEL").unwrap_or_else(|_| "gpt-4.1".to_string());

        let batch_size = parse_var("BATCH_SIZE", 10usize)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "BATCH_SIZE".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let high_confidence_threshold = parse_var("HIGH_CONFIDENCE_THRESHOLD", 80u8)?;
        let medium_confidence_floor = parse_var("MEDIUM_CONFIDENCE_FLOOR", 40u8)?;

        // --- Load Upload Limits ---
        let max_file_size_mb = parse_var("MAX_FILE_SIZE_MB", 50usize)?;
        let max_rows_per_file = parse_var("MAX_ROWS_PER_FILE", 1000usize)?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            vector_store_id,
            classifier_model,
            batch_size,
            high_confidence_threshold,
            medium_confidence_floor,
            max_upload_bytes: max_file_size_mb * 1024 * 1024,
            max_rows_per_file,
        })
    }

    pub fn thresholds(&self) -> ConfidenceThresholds {
        ConfidenceThresholds {
            high: self.high_confidence_threshold,
            medium: self.medium_confidence_floor,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
