//! Application error handling for the numbr backend
//!
//! One error type crosses the service boundary: [`AppError`]. Each layer keeps
//! its own error enum and converts into it, which gives every failure an HTTP
//! status, a machine-readable code and a message that is safe to show users.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable error codes for programmatic handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Domain errors (4xx)
    InsufficientBalance,
    NotCancellable,
    AlreadyFinal,
    OrderNotFound,
    UserNotFound,
    NoProviderAvailable,

    // Auth errors
    Unauthorized,
    Forbidden,

    // Infrastructure errors (5xx)
    DatabaseError,
    CacheError,
    ConfigurationError,

    // External errors (502, 504)
    NumberProviderError,
    PaymentProviderError,
    ExternalServiceTimeout,

    // Generic
    ValidationError,
    NotFound,
    InternalError,
}

/// Business rule violations
#[derive(Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Balance read inside the atomic unit is below the price
    InsufficientBalance { available: String, required: String },
    /// Order is no longer in a cancellable state
    NotCancellable { order_id: String, status: String },
    /// Order already reached a final state concurrently
    AlreadyFinal { order_id: String, status: String },
    OrderNotFound { order_id: String },
    UserNotFound { user_id: String },
    /// No active, healthy provider prices the requested service/country
    NoProviderAvailable { service_code: String, country: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Missing or invalid identity
    Unauthorized { reason: String },
    /// Identity is valid but lacks the required role or ownership
    Forbidden { reason: String },
}

/// Infrastructure-level errors (database, cache, configuration)
#[derive(Debug, Clone, PartialEq)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Cache { message: String },
    Configuration { message: String },
}

/// Upstream failures (number providers, payment gateways)
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalError {
    NumberProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    InvalidAmount { amount: String, reason: String },
    MissingField { field: String },
    InvalidField { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone, PartialEq)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppErrorKind {
    Domain(DomainError),
    Auth(AuthError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Auth(AuthError::Unauthorized {
            reason: reason.into(),
        }))
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Auth(AuthError::Forbidden {
            reason: reason.into(),
        }))
    }

    pub fn order_not_found(order_id: impl ToString) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::OrderNotFound {
            order_id: order_id.to_string(),
        }))
    }

    pub fn invalid_field(field: &str, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }))
    }

    pub fn invalid_amount(amount: impl ToString, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: amount.to_string(),
            reason: reason.into(),
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance { .. } => 402, // Payment Required
                DomainError::NotCancellable { .. } => 409,
                DomainError::AlreadyFinal { .. } => 409,
                DomainError::OrderNotFound { .. } => 404,
                DomainError::UserNotFound { .. } => 404,
                DomainError::NoProviderAvailable { .. } => 503,
            },
            AppErrorKind::Auth(err) => match err {
                AuthError::Unauthorized { .. } => 401,
                AuthError::Forbidden { .. } => 403,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::NumberProvider { .. } => 502, // Bad Gateway
                ExternalError::PaymentProvider { .. } => 502,
                ExternalError::Timeout { .. } => 504, // Gateway Timeout
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
                DomainError::NotCancellable { .. } => ErrorCode::NotCancellable,
                DomainError::AlreadyFinal { .. } => ErrorCode::AlreadyFinal,
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::UserNotFound { .. } => ErrorCode::UserNotFound,
                DomainError::NoProviderAvailable { .. } => ErrorCode::NoProviderAvailable,
            },
            AppErrorKind::Auth(err) => match err {
                AuthError::Unauthorized { .. } => ErrorCode::Unauthorized,
                AuthError::Forbidden { .. } => ErrorCode::Forbidden,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Cache { .. } => ErrorCode::CacheError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::NumberProvider { .. } => ErrorCode::NumberProviderError,
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance {
                    available,
                    required,
                } => format!(
                    "Insufficient balance. Available: {}, Required: {}",
                    available, required
                ),
                DomainError::NotCancellable { order_id, status } => format!(
                    "Order '{}' cannot be cancelled in status {}",
                    order_id, status
                ),
                DomainError::AlreadyFinal { order_id, status } => {
                    format!("Order '{}' is already final ({})", order_id, status)
                }
                DomainError::OrderNotFound { order_id } => {
                    format!("Order '{}' not found", order_id)
                }
                DomainError::UserNotFound { user_id } => format!("User '{}' not found", user_id),
                DomainError::NoProviderAvailable {
                    service_code,
                    country,
                } => format!(
                    "No provider currently offers {} numbers for {}",
                    service_code, country
                ),
            },
            AppErrorKind::Auth(err) => match err {
                AuthError::Unauthorized { .. } => "Authentication required".to_string(),
                AuthError::Forbidden { .. } => {
                    "You do not have permission to perform this action".to_string()
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::NumberProvider { is_retryable, .. } => {
                    if *is_retryable {
                        "Number provider is temporarily unavailable. Please try again".to_string()
                    } else {
                        "Number provider rejected the request".to_string()
                    }
                }
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::NumberProvider { is_retryable, .. } => *is_retryable,
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Domain(DomainError::NoProviderAvailable { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.user_message(), context),
            None => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError>, From<NumberProviderError> and From<PaymentError> live
// beside their error types.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::InsufficientBalance {
            available: "100".to_string(),
            required: "300".to_string(),
        }));

        assert_eq!(error.status_code(), 402);
        assert_eq!(error.error_code(), ErrorCode::InsufficientBalance);
        assert!(error.user_message().contains("Insufficient balance"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_state_conflicts_are_409() {
        let already_final = AppError::new(AppErrorKind::Domain(DomainError::AlreadyFinal {
            order_id: "o1".to_string(),
            status: "REFUNDED".to_string(),
        }));
        let not_cancellable = AppError::new(AppErrorKind::Domain(DomainError::NotCancellable {
            order_id: "o1".to_string(),
            status: "COMPLETED".to_string(),
        }));

        assert_eq!(already_final.status_code(), 409);
        assert_eq!(already_final.error_code(), ErrorCode::AlreadyFinal);
        assert_eq!(not_cancellable.status_code(), 409);
        assert_eq!(not_cancellable.error_code(), ErrorCode::NotCancellable);
    }

    #[test]
    fn test_no_provider_is_retryable_503() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::NoProviderAvailable {
            service_code: "wa".to_string(),
            country: "ng".to_string(),
        }));

        assert_eq!(error.status_code(), 503);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::NoProviderAvailable).unwrap();
        assert_eq!(json, "\"NO_PROVIDER_AVAILABLE\"");
    }

    #[test]
    fn test_context_is_kept_out_of_user_message() {
        let error = AppError::forbidden("not owner").with_context("cancel order");
        assert_eq!(error.status_code(), 403);
        assert!(!error.user_message().contains("cancel order"));
        assert!(error.to_string().contains("cancel order"));
    }
}
