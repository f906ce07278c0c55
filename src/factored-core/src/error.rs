//! Error types for the harness.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FactoredError {
    #[error("Model not found: '{name}'. Registered models: {available}")]
    NotFound { name: String, available: String },

    #[error("Missing template variable: {0}")]
    MissingVariable(String),

    #[error("PDF extraction failed: {0}")]
    ExtractionError(String),

    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
