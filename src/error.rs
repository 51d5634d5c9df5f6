use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum AppError {
    #[error("Catalog load failed: {0}")]
    CatalogError(String),

    #[error("Query set load failed: {0}")]
    DatasetError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Model inference failed: {0}")]
    ModelError(String),

    #[error("Tokenization failed: {0}")]
    TokenizationError(String),

    #[error("Invalid input: {0}")]
    ValidationError(String),

    #[error("Pairwise scorer failed: {0}")]
    ScorerError(String),

    #[error("Pairwise scorer timed out after {0:?}")]
    ScorerTimeout(Duration),

    #[error("Report output failed: {0}")]
    ReportError(String),
}

impl AppError {
    /// Whether this error affects a single query only and must not abort the batch.
    pub fn is_per_query(&self) -> bool {
        matches!(self, AppError::ScorerError(_) | AppError::ScorerTimeout(_))
    }
}

impl From<ort::Error> for AppError {
    fn from(err: ort::Error) -> Self {
        AppError::ModelError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::ReportError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
