//! Database error types

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseErrorKind {
    /// Row does not exist
    NotFound { entity: String, id: String },
    /// Balance read inside the atomic scope is below the requested debit
    InsufficientFunds { available: String, required: String },
    /// Unique constraint rejected the write
    UniqueViolation { constraint: String },
    /// Pool or connection failure
    Connection { message: String },
    /// Query failed for another reason
    Query { message: String },
    /// Stored value could not be mapped to a domain type
    Serialization { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Connection { .. })
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => DatabaseErrorKind::Connection {
                message: err.to_string(),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseErrorKind::Serialization {
                    message: err.to_string(),
                }
            }
            _ => DatabaseErrorKind::Query {
                message: err.to_string(),
            },
        };
        Self::new(kind)
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::NotFound { entity, id } => write!(f, "{} {} not found", entity, id),
            DatabaseErrorKind::InsufficientFunds {
                available,
                required,
            } => write!(
                f,
                "insufficient funds: available {}, required {}",
                available, required
            ),
            DatabaseErrorKind::UniqueViolation { constraint } => {
                write!(f, "unique constraint violated: {}", constraint)
            }
            DatabaseErrorKind::Connection { message } => {
                write!(f, "database connection error: {}", message)
            }
            DatabaseErrorKind::Query { message } => write!(f, "database query error: {}", message),
            DatabaseErrorKind::Serialization { message } => {
                write!(f, "database mapping error: {}", message)
            }
            DatabaseErrorKind::Unknown { message } => write!(f, "database error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

        let message = err.to_string();
        let is_retryable = err.is_retryable();
        let kind = match err.kind {
            DatabaseErrorKind::InsufficientFunds {
                available,
                required,
            } => AppErrorKind::Domain(DomainError::InsufficientBalance {
                available,
                required,
            }),
            DatabaseErrorKind::NotFound { entity, id } if entity == "order" => {
                AppErrorKind::Domain(DomainError::OrderNotFound { order_id: id })
            }
            DatabaseErrorKind::NotFound { entity, id } if entity == "user" => {
                AppErrorKind::Domain(DomainError::UserNotFound { user_id: id })
            }
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message,
                is_retryable,
            }),
        };
        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, ErrorCode};

    #[test]
    fn insufficient_funds_maps_to_domain_error() {
        let err = DatabaseError::new(DatabaseErrorKind::InsufficientFunds {
            available: "100".to_string(),
            required: "300".to_string(),
        });
        let app: AppError = err.into();
        assert_eq!(app.error_code(), ErrorCode::InsufficientBalance);
        assert_eq!(app.status_code(), 402);
    }

    #[test]
    fn connection_errors_are_retryable() {
        let err = DatabaseError::new(DatabaseErrorKind::Connection {
            message: "reset".to_string(),
        });
        assert!(err.is_retryable());
        let app: AppError = err.into();
        assert!(app.is_retryable());
        assert_eq!(app.status_code(), 500);
    }
}
