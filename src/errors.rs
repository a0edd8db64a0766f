//! Errors for the AIS importer
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Serialization error")]
    SerdeError(#[from] serde_json::Error),

    #[error("Invalid vessel id: {0}")]
    InvalidVesselId(String),

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Database connection error: {0}")]
    DatabaseConnectionError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Concurrency gate closed")]
    GateClosed,
}
