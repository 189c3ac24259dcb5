//! Application-wide error types.

use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Transaction phase at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TxStage {
    Acquire,
    Begin,
    Commit,
}

/// Coarse error classes used by outer layers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Maps to a 404-equivalent.
    NotFound,
    /// Caller supplied something unusable; maps to a 400-equivalent.
    Invalid,
    /// A constraint or state rule rejected the write; maps to a 400-equivalent.
    Conflict,
    /// Deadline exceeded or cancelled.
    Timeout,
    /// Anything else; maps to a 500-equivalent without detail.
    Internal,
}

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Database error during {operation}: {source}")]
    Query {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Constraint violation during {operation}: {message}")]
    ConstraintViolation {
        operation: &'static str,
        message: String,
    },

    #[error("Transaction {stage} failed: {source}")]
    Transaction {
        stage: TxStage,
        #[source]
        source: sqlx::Error,
    },

    #[error("Transaction rollback failed ({rollback}) after: {cause}")]
    RollbackFailed {
        #[source]
        cause: Box<Error>,
        rollback: sqlx::Error,
    },

    #[error("Operation timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Unit of work started inside another unit of work")]
    NestedUnitOfWork,

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Job {job_id} cannot be converted to an order: {reason}")]
    NotConvertible { job_id: String, reason: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn not_convertible(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotConvertible {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    /// Classify a store error raised by `operation`.
    ///
    /// Uniqueness, foreign-key, not-null and check failures become
    /// [`Error::ConstraintViolation`]; everything else keeps the driver error
    /// as its source.
    pub fn from_query(operation: &'static str, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            use sqlx::error::ErrorKind as DbKind;
            if matches!(
                db_err.kind(),
                DbKind::UniqueViolation
                    | DbKind::ForeignKeyViolation
                    | DbKind::NotNullViolation
                    | DbKind::CheckViolation
            ) {
                return Self::ConstraintViolation {
                    operation,
                    message: db_err.message().to_string(),
                };
            }
        }
        Self::Query {
            operation,
            source: err,
        }
    }

    /// Classify a failure of a transaction-control statement.
    ///
    /// A deferred foreign key that fails at `COMMIT` is still a constraint
    /// violation from the caller's point of view.
    pub fn from_tx(stage: TxStage, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if matches!(db_err.kind(), sqlx::error::ErrorKind::ForeignKeyViolation) {
                return Self::ConstraintViolation {
                    operation: "commit",
                    message: db_err.message().to_string(),
                };
            }
        }
        Self::Transaction { stage, source: err }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::RollbackFailed { cause, .. } => cause.is_not_found(),
            _ => false,
        }
    }

    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::ConstraintViolation { .. } => true,
            Self::RollbackFailed { cause, .. } => cause.is_constraint_violation(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled)
    }

    /// Transient failures a caller may choose to retry. Nothing in this crate
    /// retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Cancelled
                | Self::Transaction {
                    stage: TxStage::Acquire,
                    ..
                }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Invalid,
            Self::ConstraintViolation { .. }
            | Self::InvalidStateTransition { .. }
            | Self::NotConvertible { .. } => ErrorKind::Conflict,
            Self::Timeout { .. } | Self::Cancelled => ErrorKind::Timeout,
            Self::RollbackFailed { cause, .. } => cause.kind(),
            _ => ErrorKind::Internal,
        }
    }
}
