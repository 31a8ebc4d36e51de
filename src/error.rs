//! Comprehensive error handling for the Dukapay backend
//!
//! This module provides a unified error system with proper HTTP status mapping,
//! user-friendly messages, and structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "PAYMENT_IN_PROGRESS")]
    PaymentInProgress,
    #[serde(rename = "ORDER_ALREADY_PAID")]
    OrderAlreadyPaid,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 504)
    #[serde(rename = "GATEWAY_AUTH_ERROR")]
    GatewayAuthError,
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "GATEWAY_TIMEOUT")]
    GatewayTimeout,

    // Generic
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Order doesn't exist (or isn't open for payment)
    OrderNotFound { order_id: i64 },
    /// No transaction matches the checkout reference
    TransactionNotFound { checkout_request_id: String },
    /// A PENDING transaction already exists for the order
    PaymentInProgress {
        order_id: i64,
        checkout_request_id: String,
    },
    /// A SUCCESS transaction already exists for the order
    OrderAlreadyPaid { order_id: i64 },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External gateway errors (Daraja)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Credential exchange with the gateway failed
    GatewayAuth { message: String },
    /// The gateway rejected or errored the request; `message` holds the raw
    /// diagnostic for logs, `customer_message` is safe to show end users
    Gateway {
        message: String,
        gateway_code: Option<String>,
        customer_message: String,
    },
    /// Network-level failure reaching the gateway (retryable)
    Transport { message: String },
    /// Gateway call exceeded its deadline (retryable)
    Timeout { seconds: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Subscriber number not in an accepted Kenyan format
    InvalidPhoneNumber { phone: String, reason: String },
    /// Invalid amount (format or value)
    InvalidAmount { amount: String, reason: String },
    /// Required field missing
    MissingField { field: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => 404,
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::PaymentInProgress { .. } => 409, // Conflict
                DomainError::OrderAlreadyPaid { .. } => 409,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => 500,
                InfrastructureError::Configuration { .. } => 500,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayAuth { .. } => 502, // Bad Gateway
                ExternalError::Gateway { .. } => 502,
                ExternalError::Transport { .. } => 502,
                ExternalError::Timeout { .. } => 504, // Gateway Timeout
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::PaymentInProgress { .. } => ErrorCode::PaymentInProgress,
                DomainError::OrderAlreadyPaid { .. } => ErrorCode::OrderAlreadyPaid,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayAuth { .. } => ErrorCode::GatewayAuthError,
                ExternalError::Gateway { .. } => ErrorCode::GatewayError,
                ExternalError::Transport { .. } => ErrorCode::GatewayError,
                ExternalError::Timeout { .. } => ErrorCode::GatewayTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    ///
    /// Raw gateway responses never reach end users; they stay in the
    /// `message` fields that only appear in logs.
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { order_id } => {
                    format!("Order {} not found", order_id)
                }
                DomainError::TransactionNotFound {
                    checkout_request_id,
                } => {
                    format!("Transaction '{}' not found", checkout_request_id)
                }
                DomainError::PaymentInProgress { order_id, .. } => {
                    format!("Payment is already in progress for order {}", order_id)
                }
                DomainError::OrderAlreadyPaid { order_id } => {
                    format!("Order {} has already been paid for", order_id)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayAuth { .. } => {
                    "Payment service temporarily unavailable. Please try again.".to_string()
                }
                ExternalError::Gateway {
                    customer_message, ..
                } => customer_message.clone(),
                ExternalError::Transport { .. } => {
                    "Payment request failed. Please try again.".to_string()
                }
                ExternalError::Timeout { seconds } => {
                    format!(
                        "Payment gateway timed out after {} seconds. Please try again",
                        seconds
                    )
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidPhoneNumber { phone, reason } => {
                    format!("Invalid phone number '{}': {}", phone, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayAuth { .. } => true,
                ExternalError::Gateway { .. } => false,
                ExternalError::Transport { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// Conversions from specific error types
// Note: From<DatabaseError> is implemented in database/error.rs to avoid
// circular dependency; From<MpesaError> lives in mpesa/error.rs.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_in_progress_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::PaymentInProgress {
            order_id: 42,
            checkout_request_id: "ws_CO_191220191020363925".to_string(),
        }));

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::PaymentInProgress);
        assert!(error.user_message().contains("already in progress"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_gateway_error_hides_raw_detail() {
        let error = AppError::new(AppErrorKind::External(ExternalError::Gateway {
            message: "HTTP 500: upstream stacktrace".to_string(),
            gateway_code: Some("500.001".to_string()),
            customer_message: "Payment request failed".to_string(),
        }));

        assert_eq!(error.status_code(), 502);
        assert_eq!(error.user_message(), "Payment request failed");
        assert!(!error.user_message().contains("stacktrace"));
    }

    #[test]
    fn test_timeout_is_retryable() {
        let error = AppError::new(AppErrorKind::External(ExternalError::Timeout {
            seconds: 30,
        }));

        assert_eq!(error.status_code(), 504);
        assert_eq!(error.error_code(), ErrorCode::GatewayTimeout);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidPhoneNumber {
                phone: "12345".to_string(),
                reason: "Use format: 0712345678".to_string(),
            },
        ));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }
}
