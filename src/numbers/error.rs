use thiserror::Error;

pub type NumberResult<T> = Result<T, NumberProviderError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum NumberProviderError {
    /// Network failure, 5xx, or an upstream hiccup worth retrying
    #[error("Transient provider failure: provider={provider}, message={message}")]
    Transient { provider: String, message: String },

    /// Upstream said no (no inventory, bad service, bad key)
    #[error("Provider rejected request: provider={provider}, code={code}")]
    Terminal { provider: String, code: String },

    #[error("Provider call timed out: provider={provider}, after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    #[error("Unknown number provider: {provider}")]
    UnknownProvider { provider: String },
}

impl NumberProviderError {
    pub fn transient(provider: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn terminal(provider: &str, code: impl Into<String>) -> Self {
        Self::Terminal {
            provider: provider.to_string(),
            code: code.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NumberProviderError::Transient { .. } | NumberProviderError::Timeout { .. }
        )
    }

    /// Maps a reqwest failure: timeouts, connection errors and 5xx are transient.
    pub fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.is_client_error() => {
                Self::terminal(provider, format!("HTTP_{}", status.as_u16()))
            }
            _ => Self::transient(provider, err.to_string()),
        }
    }

    /// Short reason stored on a failed order.
    pub fn failure_reason(&self) -> String {
        match self {
            NumberProviderError::Transient { .. } => "provider unavailable".to_string(),
            NumberProviderError::Terminal { code, .. } => code.clone(),
            NumberProviderError::Timeout { .. } => "provider timeout".to_string(),
            NumberProviderError::UnknownProvider { .. } => "unknown provider".to_string(),
        }
    }
}

impl From<NumberProviderError> for crate::error::AppError {
    fn from(err: NumberProviderError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError};

        let kind = match &err {
            NumberProviderError::Timeout {
                provider,
                timeout_secs,
            } => ExternalError::Timeout {
                service: provider.clone(),
                timeout_secs: *timeout_secs,
            },
            NumberProviderError::Transient { provider, .. }
            | NumberProviderError::Terminal { provider, .. }
            | NumberProviderError::UnknownProvider { provider } => ExternalError::NumberProvider {
                provider: provider.clone(),
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            },
        };
        AppError::new(AppErrorKind::External(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn only_transient_and_timeout_retry() {
        assert!(NumberProviderError::transient("p", "reset").is_retryable());
        assert!(NumberProviderError::Timeout {
            provider: "p".to_string(),
            timeout_secs: 15
        }
        .is_retryable());
        assert!(!NumberProviderError::terminal("p", "NO_NUMBERS").is_retryable());
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let app: AppError = NumberProviderError::Timeout {
            provider: "p".to_string(),
            timeout_secs: 15,
        }
        .into();
        assert_eq!(app.status_code(), 504);
    }
}
