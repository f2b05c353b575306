//!
//! # Error Classification
//!
//! Distinguishes retryable failures from terminal ones for activities, child
//! workflows and update handlers. [`ApplicationError`] is the failure value
//! that crosses every durable boundary and is what gets written into history.
//!

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Error category for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorCategory {
    /// Infrastructure error (network, timeout, storage)
    /// The runtime SHOULD retry automatically
    Infrastructure = 1,

    /// Validation error (invalid input)
    /// The runtime SHOULD NOT retry (would fail again)
    Validation = 2,

    /// Domain error (business rule violated)
    Domain = 3,

    /// Transient domain error (may succeed after delay)
    TransientDomain = 4,

    /// Fatal error (bugs, invalid states)
    Fatal = 5,
}

impl ErrorCategory {
    /// Whether errors in this category are worth another attempt
    #[inline]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Infrastructure | ErrorCategory::TransientDomain
        )
    }
}

/// Trait for classifying errors and determining retry behavior
pub trait ClassifiedError: Send + Sync + 'static {
    /// Get the error category
    #[inline]
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Fatal
    }

    /// Whether the runtime may retry the failed operation
    #[inline]
    fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Application-level failure with a type tag, a retryability flag and
/// optional structured details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationError {
    message: String,
    error_type: String,
    non_retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl ApplicationError {
    pub fn new(message: impl Into<String>, error_type: impl Into<String>, non_retryable: bool) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.into(),
            non_retryable,
            details: None,
        }
    }

    /// Failure the retry policy may attempt again
    pub fn retryable(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self::new(message, error_type, false)
    }

    /// Failure that ends retries regardless of the retry policy
    pub fn non_retryable(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self::new(message, error_type, true)
    }

    /// Attach structured details. Values that fail to serialize are dropped.
    pub fn with_details<T: Serialize>(mut self, details: &T) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error_type(&self) -> &str {
        &self.error_type
    }

    pub fn is_non_retryable(&self) -> bool {
        self.non_retryable
    }

    pub fn has_details(&self) -> bool {
        self.details.is_some()
    }

    pub fn details(&self) -> Option<&serde_json::Value> {
        self.details.as_ref()
    }

    /// Decode the details payload, if present and of the requested shape
    pub fn details_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.details
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// True when the error type is one of `types`
    pub fn has_type(&self, types: &[&str]) -> bool {
        types.contains(&self.error_type.as_str())
    }
}

impl std::fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (type: {}, retryable: {})",
            self.message, self.error_type, !self.non_retryable
        )
    }
}

impl std::error::Error for ApplicationError {}

impl ClassifiedError for ApplicationError {
    fn category(&self) -> ErrorCategory {
        if self.non_retryable {
            ErrorCategory::Domain
        } else {
            ErrorCategory::TransientDomain
        }
    }
}
