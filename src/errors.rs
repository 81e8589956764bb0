use thiserror::Error;

/// A single field-level validation message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur while storing, resolving, or repairing records.
#[derive(Error, Debug)]
pub enum RefKeeperError {
    #[error("validation failed for {collection}: {}", join_field_errors(.errors))]
    Validation {
        collection: String,
        errors: Vec<FieldError>,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("failed to resolve references at '{path}': {source}")]
    Resolution {
        path: String,
        #[source]
        source: Box<RefKeeperError>,
    },

    #[error("database error: {message} (operation: {operation})")]
    Database { message: String, operation: String },

    #[error("config error: {message}")]
    Config { message: String },

    #[error("background task failed: {message}")]
    Task { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RefKeeperError {
    /// Convenience constructor for a validation error with one field message.
    pub fn validation(collection: &str, field: &str, message: &str) -> Self {
        Self::Validation {
            collection: collection.to_string(),
            errors: vec![FieldError::new(field, message)],
        }
    }

    /// HTTP-style status code for this error class.
    ///
    /// Validation is 400, missing records 404, uniqueness clashes 409, and
    /// everything storage- or configuration-related is 500.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Resolution { .. }
            | Self::Database { .. }
            | Self::Config { .. }
            | Self::Task { .. }
            | Self::Io(_)
            | Self::Sqlite(_)
            | Self::Json(_) => 500,
        }
    }
}

/// Convenience alias for results using `RefKeeperError`.
pub type Result<T> = std::result::Result<T, RefKeeperError>;
