//!
//! # Error Types
//!
//! Central error type for the history service side of durable-engine, with
//! context attributes for debugging rejected requests.
//!

pub mod classification;

pub use classification::{ApplicationError, ClassifiedError, ErrorCategory};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

/// Central error type for execution creation and lease handling
#[derive(Debug)]
pub struct Error {
    /// Error message
    message: String,
    /// Error kind for classification
    kind: ErrorKind,
    /// Source error if any
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Timestamp when error occurred
    timestamp: SystemTime,
    /// Additional context attributes
    context: HashMap<String, String>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| &**e as &(dyn std::error::Error + 'static))
    }
}

impl Error {
    /// Create a new error with message
    pub fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
            source: None,
            timestamp: SystemTime::now(),
            context: HashMap::new(),
        }
    }

    /// Create from another error
    pub fn from_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        kind: ErrorKind,
        source: E,
    ) -> Self {
        Self {
            message: message.into(),
            kind,
            source: Some(Box::new(source)),
            timestamp: SystemTime::now(),
            context: HashMap::new(),
        }
    }

    /// Get error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Add context attribute
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Get context value
    pub fn get_context(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(|s| s.as_str())
    }

    /// Get all context
    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    /// Get timestamp
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// True for rejections caused by the caller's request rather than the service.
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::InvalidArgument | ErrorKind::BlobSizeExceeded | ErrorKind::MemoSizeExceeded
        )
    }

    /// Convert to structured format
    pub fn to_structured(&self) -> StructuredError {
        StructuredError {
            message: self.message.clone(),
            kind: self.kind,
            timestamp: chrono::DateTime::from(self.timestamp),
            context: self.context.clone(),
            source: self.source.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Structured error for serialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub message: String,
    pub kind: ErrorKind,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub context: HashMap<String, String>,
    pub source: Option<String>,
}

/// Kinds of errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or out-of-range request field
    #[serde(rename = "invalid_argument")]
    InvalidArgument,
    /// Input payload at or above the namespace error limit
    #[serde(rename = "blob_size_exceeded")]
    BlobSizeExceeded,
    /// Memo at or above the namespace error limit
    #[serde(rename = "memo_size_exceeded")]
    MemoSizeExceeded,
    /// Namespace is active in another cluster
    #[serde(rename = "namespace_not_active")]
    NamespaceNotActive,
    /// Mutable state transition not allowed from the current state
    #[serde(rename = "invalid_state")]
    InvalidState,
    /// Execution lock could not be obtained
    #[serde(rename = "lease")]
    Lease,
    /// History tree or persistence failure
    #[serde(rename = "history")]
    History,
    /// Configuration errors
    #[serde(rename = "configuration")]
    Configuration,
    /// Unknown errors
    #[serde(rename = "unknown")]
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidArgument => write!(f, "invalid_argument"),
            ErrorKind::BlobSizeExceeded => write!(f, "blob_size_exceeded"),
            ErrorKind::MemoSizeExceeded => write!(f, "memo_size_exceeded"),
            ErrorKind::NamespaceNotActive => write!(f, "namespace_not_active"),
            ErrorKind::InvalidState => write!(f, "invalid_state"),
            ErrorKind::Lease => write!(f, "lease"),
            ErrorKind::History => write!(f, "history"),
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result type with durable-engine error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Helper macro to create errors with context
#[macro_export]
macro_rules! ctx_error {
    ($kind:expr, $message:expr) => {
        $crate::Error::new($message.to_string(), $kind)
    };
    ($kind:expr, $message:expr, $($key:expr => $value:expr),+) => {
        {
            let mut error = $crate::Error::new($message.to_string(), $kind);
            $(
                error = error.with_context($key, $value);
            )+
            error
        }
    };
}

/// Helper functions for common error scenarios
impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::InvalidArgument)
    }

    /// Create an input blob size error
    pub fn blob_size_exceeded(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::BlobSizeExceeded)
    }

    /// Create a memo size error
    pub fn memo_size_exceeded(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::MemoSizeExceeded)
    }

    /// Create a namespace-not-active error naming both clusters
    pub fn namespace_not_active(
        namespace: &str,
        current_cluster: &str,
        active_cluster: &str,
    ) -> Self {
        Self::new(
            format!(
                "Namespace: {namespace} is active in cluster: {active_cluster}, while current cluster {current_cluster} is a standby cluster."
            ),
            ErrorKind::NamespaceNotActive,
        )
        .with_context("namespace", namespace)
        .with_context("current_cluster", current_cluster)
        .with_context("active_cluster", active_cluster)
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::InvalidState)
    }

    /// Create a lease error
    pub fn lease(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::Lease)
    }

    /// Create a history error
    pub fn history(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::History)
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::Configuration)
    }
}

impl From<crate::port::EventStoreError> for Error {
    fn from(err: crate::port::EventStoreError) -> Self {
        Self::from_source(err.to_string(), ErrorKind::History, err)
    }
}
