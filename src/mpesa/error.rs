use thiserror::Error;

pub type MpesaResult<T> = Result<T, MpesaError>;

#[derive(Debug, Clone, Error)]
pub enum MpesaError {
    #[error("Gateway authentication failed: {message}")]
    Auth { message: String },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Gateway request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Gateway rejected request: code={error_code:?}, message={error_message}")]
    GatewayRejected {
        error_code: Option<String>,
        error_message: String,
        customer_message: String,
    },

    #[error("Gateway HTTP error {status}: {body}")]
    GatewayHttp { status: u16, body: String },

    #[error("Malformed gateway response: {message}")]
    MalformedResponse { message: String },
}

impl MpesaError {
    /// Map a reqwest failure to the right variant. `timeout_secs` is the
    /// configured per-call budget, reported back to the caller.
    pub fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            MpesaError::Timeout {
                seconds: timeout_secs,
            }
        } else {
            MpesaError::Network {
                message: format!("gateway request failed: {}", err),
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            MpesaError::Auth { .. } => true,
            MpesaError::Validation { .. } => false,
            MpesaError::Network { .. } => true,
            MpesaError::Timeout { .. } => true,
            MpesaError::GatewayRejected { .. } => false,
            MpesaError::GatewayHttp { status, .. } => *status >= 500,
            MpesaError::MalformedResponse { .. } => false,
        }
    }

    /// Message safe to show to the paying customer. Raw gateway bodies and
    /// transport details stay out of this string.
    pub fn customer_message(&self) -> String {
        match self {
            MpesaError::GatewayRejected {
                customer_message, ..
            } => customer_message.clone(),
            MpesaError::GatewayHttp { .. } | MpesaError::Auth { .. } => {
                "Payment service temporarily unavailable. Please try again.".to_string()
            }
            MpesaError::Network { .. } | MpesaError::Timeout { .. } => {
                "Payment request failed. Please try again.".to_string()
            }
            MpesaError::Validation { message, .. } => message.clone(),
            MpesaError::MalformedResponse { .. } => {
                "Payment service temporarily unavailable. Please try again.".to_string()
            }
        }
    }
}

impl From<MpesaError> for crate::error::AppError {
    fn from(err: MpesaError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        let kind = match &err {
            MpesaError::Auth { message } => AppErrorKind::External(ExternalError::GatewayAuth {
                message: message.clone(),
            }),
            MpesaError::Validation { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidPhoneNumber {
                    phone: field.clone().unwrap_or_default(),
                    reason: message.clone(),
                })
            }
            MpesaError::Network { message } => {
                AppErrorKind::External(ExternalError::Transport {
                    message: message.clone(),
                })
            }
            MpesaError::Timeout { seconds } => {
                AppErrorKind::External(ExternalError::Timeout { seconds: *seconds })
            }
            MpesaError::GatewayRejected {
                error_code,
                error_message,
                customer_message,
            } => AppErrorKind::External(ExternalError::Gateway {
                message: error_message.clone(),
                gateway_code: error_code.clone(),
                customer_message: customer_message.clone(),
            }),
            // 5xx maps to Transport so the retryable flag survives the
            // conversion, matching is_retryable above.
            MpesaError::GatewayHttp { status, body } if *status >= 500 => {
                AppErrorKind::External(ExternalError::Transport {
                    message: format!("HTTP {}: {}", status, body),
                })
            }
            MpesaError::GatewayHttp { status, body } => {
                AppErrorKind::External(ExternalError::Gateway {
                    message: format!("HTTP {}: {}", status, body),
                    gateway_code: Some(status.to_string()),
                    customer_message: err.customer_message(),
                })
            }
            MpesaError::MalformedResponse { message } => {
                AppErrorKind::External(ExternalError::Gateway {
                    message: message.clone(),
                    gateway_code: None,
                    customer_message: err.customer_message(),
                })
            }
        };

        AppError::new(kind)
    }
}
