//! Error types for the tdm_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tdm_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Transport-level failure talking to the evaluator
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Drug name not present in the catalog
    #[error("Unsupported drug: {0}")]
    UnsupportedDrug(String),

    /// Regimen could not be resolved from history and overrides
    #[error("Regimen error: {0}")]
    Regimen(String),

    /// Evaluator answered with a non-retryable error status
    #[error("Evaluator error [{status}]: {message}")]
    EvaluatorApi { status: u16, message: String },

    /// Evaluator stayed busy for every allowed attempt
    #[error("Evaluator busy after {attempts} attempts")]
    EvaluatorBusy { attempts: u32 },

    /// Evaluator answered but the payload is unusable
    #[error("Evaluator output error: {0}")]
    EvaluatorOutput(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
