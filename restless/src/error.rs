use crate::validation::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation failed: {}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("Record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Duplicate id in {collection}: {id}")]
    DuplicateId { collection: String, id: String },

    #[error("Referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Validation errors carried by this error, if it is a validation failure.
    pub fn validation_errors(&self) -> Option<&[ValidationError]> {
        match self {
            StoreError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, StoreError>;
