//! # Telemetry Module
//!
//! Tracing integration for durable-engine: subscriber initialization and
//! the spans the runtime wraps workflow and activity execution in.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use durable_engine_core::telemetry::{TelemetryConfig, init_telemetry};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default()).expect("telemetry");
//! ```

use serde::{Deserialize, Serialize};
use tracing::{Level, Span, span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::error::{Error, Result};

/// Configuration for telemetry initialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service name attached to the root span
    pub service_name: String,
    /// Log level filter, in `EnvFilter` syntax
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "durable-engine".to_string(),
            log_level: "info".to_string(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Telemetry guard - keep alive for the lifetime of the process
#[derive(Debug)]
pub struct TelemetryGuard {
    service_name: String,
}

impl TelemetryGuard {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

/// Install the global tracing subscriber.
///
/// Fails when the filter does not parse or a global subscriber is already set.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard> {
    let env_filter = EnvFilter::try_new(&config.log_level).map_err(|e| {
        Error::configuration(format!("invalid log level '{}': {e}", config.log_level))
    })?;

    let registry = Registry::default().with(env_filter);
    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    installed.map_err(|e| Error::configuration(format!("tracing already initialized: {e}")))?;

    Ok(TelemetryGuard {
        service_name: config.service_name.clone(),
    })
}

/// Span covering one run of a workflow instance.
pub fn workflow_span(workflow_type: &str, instance_id: &str) -> Span {
    span!(
        Level::INFO,
        "workflow",
        workflow.type_name = workflow_type,
        workflow.instance_id = instance_id,
    )
}

/// Span covering one activity invocation, all attempts included.
pub fn activity_span(activity_type: &str, seq: u64) -> Span {
    span!(
        Level::INFO,
        "workflow.activity",
        activity.type_name = activity_type,
        activity.seq = seq,
    )
}
