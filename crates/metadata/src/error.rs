//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid state transition: {from} -> {to} (allowed: {})", .allowed.join(", "))]
    InvalidStateTransition {
        from: String,
        to: String,
        allowed: Vec<String>,
    },

    #[error("operation not allowed: {0}")]
    NotAllowed(String),

    #[error("audit write failed ({}): {message}", .code.as_deref().unwrap_or("unknown"))]
    AuditWrite {
        code: Option<String>,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Wrap a failed audit insert, keeping the database error code for operators.
    pub fn audit_write(err: sqlx::Error) -> Self {
        let code = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.into_owned());
        let message = match err.as_database_error() {
            Some(db) => db.message().to_string(),
            None => err.to_string(),
        };
        Self::AuditWrite { code, message }
    }
}

impl From<custodian_core::Error> for MetadataError {
    fn from(err: custodian_core::Error) -> Self {
        use custodian_core::Error as CoreError;
        match err {
            CoreError::InvalidTransition { from, to, allowed } => {
                Self::InvalidStateTransition { from, to, allowed }
            }
            CoreError::NotAllowed(msg) => Self::NotAllowed(msg),
            CoreError::Validation(msg) => Self::Constraint(msg),
            // A stored value the domain does not recognise means the row is corrupt.
            other @ CoreError::UnknownVariant { .. } => Self::Internal(other.to_string()),
        }
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
