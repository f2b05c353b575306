//! Start request validation.
//!
//! Checks run in a fixed order and the first failure wins, so a request with
//! several problems always reports the same one.

use tracing::warn;

use super::config::HistoryConfig;
use super::namespace::NamespaceEntry;
use super::request::{
    RetryPolicy, StartWorkflowExecutionRequest, VersioningBehavior, VersioningOverride,
    WireDuration, duration_value,
};
use crate::error::{Error, Result};
use crate::port::MetricsHandler;
use crate::port::metrics::{names, tags};

/// Largest magnitude a protobuf duration may carry, in seconds (10,000 years).
const MAX_DURATION_SECONDS: i64 = 315_576_000_000;
const NANOS_PER_SECOND: i32 = 1_000_000_000;

/// Check that an optional protobuf duration is well formed and not negative.
pub fn validate_wire_duration(duration: Option<&WireDuration>) -> std::result::Result<(), String> {
    let Some(d) = duration else {
        return Ok(());
    };
    if !(-MAX_DURATION_SECONDS..=MAX_DURATION_SECONDS).contains(&d.seconds) {
        return Err(format!("duration ({}s) exceeds the representable range", d.seconds));
    }
    if d.nanos <= -NANOS_PER_SECOND || d.nanos >= NANOS_PER_SECOND {
        return Err(format!("duration ({}s, {}ns) has out-of-range nanos", d.seconds, d.nanos));
    }
    if (d.seconds < 0 && d.nanos > 0) || (d.seconds > 0 && d.nanos < 0) {
        return Err(format!("duration ({}s, {}ns) has seconds and nanos with different signs", d.seconds, d.nanos));
    }
    if d.seconds < 0 || d.nanos < 0 {
        return Err("negative duration".to_string());
    }
    Ok(())
}

/// Validate a versioning override: pinned requires a version, other behaviors forbid one.
pub fn validate_versioning_override(versioning: Option<&VersioningOverride>) -> Result<()> {
    let Some(versioning) = versioning else {
        return Ok(());
    };
    match (versioning.behavior, versioning.pinned_version.as_deref()) {
        (VersioningBehavior::Unspecified, _) => Err(Error::invalid_argument(
            "override behavior is required",
        )),
        (VersioningBehavior::Pinned, None) | (VersioningBehavior::Pinned, Some("")) => Err(
            Error::invalid_argument("must provide pinned version if behavior is Pinned"),
        ),
        (VersioningBehavior::AutoUpgrade, Some(_)) => Err(Error::invalid_argument(
            "only provide pinned version if behavior is Pinned",
        )),
        _ => Ok(()),
    }
}

/// Validate a caller retry policy.
pub fn validate_retry_policy(policy: Option<&RetryPolicy>) -> Result<()> {
    let Some(policy) = policy else {
        return Ok(());
    };
    validate_wire_duration(policy.initial_interval.as_ref())
        .map_err(|e| Error::invalid_argument(format!("invalid InitialInterval set on retry policy: {e}")))?;
    validate_wire_duration(policy.maximum_interval.as_ref())
        .map_err(|e| Error::invalid_argument(format!("invalid MaximumInterval set on retry policy: {e}")))?;
    if policy.backoff_coefficient != 0.0 && policy.backoff_coefficient < 1.0 {
        return Err(Error::invalid_argument(
            "BackoffCoefficient cannot be less than 1 on retry policy.",
        ));
    }
    if policy.maximum_attempts < 0 {
        return Err(Error::invalid_argument(
            "MaximumAttempts cannot be negative on retry policy.",
        ));
    }
    if policy.non_retryable_error_types.iter().any(String::is_empty) {
        return Err(Error::invalid_argument(
            "NonRetryableErrorTypes cannot have blank error type on retry policy.",
        ));
    }
    let initial = duration_value(policy.initial_interval.as_ref());
    let maximum = duration_value(policy.maximum_interval.as_ref());
    if !maximum.is_zero() && maximum < initial {
        return Err(Error::invalid_argument(
            "MaximumInterval cannot be less than InitialInterval on retry policy.",
        ));
    }
    Ok(())
}

/// A blob at or above its error limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobSizeViolation {
    pub actual_size: usize,
    pub limit: usize,
}

/// Record the size of a blob and compare it to the namespace limits.
///
/// Above `warn` a structured warning is logged; at or above `error` the
/// violation is counted and the blob is rejected.
pub fn check_event_blob_size_limit(
    actual_size: usize,
    warn_limit: usize,
    error_limit: usize,
    namespace: &str,
    workflow_id: &str,
    operation: &str,
    metrics: &dyn MetricsHandler,
) -> std::result::Result<(), BlobSizeViolation> {
    let metric_tags = [(tags::COMMAND_TYPE, operation)];
    metrics.record(names::EVENT_BLOB_SIZE, actual_size as i64, &metric_tags);

    if actual_size >= error_limit {
        warn!(
            namespace,
            workflow_id,
            operation,
            blob_size = actual_size,
            blob_size_limit = error_limit,
            "Blob data size exceeds the error limit."
        );
        metrics.counter(names::EVENT_BLOB_SIZE_EXCEEDS_LIMIT, 1, &metric_tags);
        return Err(BlobSizeViolation {
            actual_size,
            limit: error_limit,
        });
    }
    if actual_size > warn_limit {
        warn!(
            namespace,
            workflow_id,
            operation,
            blob_size = actual_size,
            blob_size_limit = warn_limit,
            "Blob data size exceeds the warning limit."
        );
    }
    Ok(())
}

/// Size checks shared by every start path: input blob first, then memo.
pub fn validate_start(
    namespace: &NamespaceEntry,
    workflow_id: &str,
    input_size: usize,
    memo_size: usize,
    operation: &str,
    config: &HistoryConfig,
    metrics: &dyn MetricsHandler,
) -> Result<()> {
    let namespace_name = namespace.name();

    check_event_blob_size_limit(
        input_size,
        config.blob_size_limit_warn(namespace_name),
        config.blob_size_limit_error(namespace_name),
        namespace_name,
        workflow_id,
        operation,
        metrics,
    )
    .map_err(|violation| {
        Error::blob_size_exceeded("Blob data size exceeds limit.")
            .with_context("namespace", namespace_name)
            .with_context("workflow_id", workflow_id)
            .with_context("blob_size", violation.actual_size.to_string())
    })?;

    metrics.record(names::MEMO_SIZE, memo_size as i64, &[(tags::COMMAND_TYPE, operation)]);
    check_event_blob_size_limit(
        memo_size,
        config.memo_size_limit_warn(namespace_name),
        config.memo_size_limit_error(namespace_name),
        namespace_name,
        workflow_id,
        operation,
        metrics,
    )
    .map_err(|violation| {
        metrics.counter(names::MEMO_SIZE_EXCEEDS_LIMIT, 1, &[(tags::COMMAND_TYPE, operation)]);
        Error::memo_size_exceeded("Memo size exceeds limit.")
            .with_context("namespace", namespace_name)
            .with_context("workflow_id", workflow_id)
            .with_context("memo_size", violation.actual_size.to_string())
    })
}

/// Validate a start request against the namespace-scoped limits.
pub fn validate_start_workflow_execution_request(
    request: &StartWorkflowExecutionRequest,
    namespace: &NamespaceEntry,
    operation: &str,
    config: &HistoryConfig,
    metrics: &dyn MetricsHandler,
) -> Result<()> {
    let max_id_length = config.max_id_length_limit;

    if request.request_id.is_empty() {
        return Err(Error::invalid_argument("Missing request ID."));
    }
    validate_wire_duration(request.workflow_execution_timeout.as_ref()).map_err(|e| {
        Error::invalid_argument(format!("invalid WorkflowExecutionTimeoutSeconds: {e}"))
    })?;
    validate_wire_duration(request.workflow_run_timeout.as_ref())
        .map_err(|e| Error::invalid_argument(format!("invalid WorkflowRunTimeoutSeconds: {e}")))?;
    validate_wire_duration(request.workflow_task_timeout.as_ref())
        .map_err(|e| Error::invalid_argument(format!("invalid WorkflowTaskTimeoutSeconds: {e}")))?;

    let task_queue = match request.task_queue.as_ref() {
        Some(task_queue) if !task_queue.name.is_empty() => task_queue,
        _ => return Err(Error::invalid_argument("Missing Taskqueue.")),
    };
    let workflow_type = match request.workflow_type.as_ref() {
        Some(workflow_type) if !workflow_type.name.is_empty() => workflow_type,
        _ => return Err(Error::invalid_argument("Missing WorkflowType.")),
    };

    if request.namespace.len() > max_id_length {
        return Err(Error::invalid_argument("Namespace exceeds length limit."));
    }
    if request.workflow_id.len() > max_id_length {
        return Err(Error::invalid_argument("WorkflowId exceeds length limit."));
    }
    if task_queue.name.len() > max_id_length {
        return Err(Error::invalid_argument("TaskQueue exceeds length limit."));
    }
    if workflow_type.name.len() > max_id_length {
        return Err(Error::invalid_argument("WorkflowType exceeds length limit."));
    }

    validate_versioning_override(request.versioning_override.as_ref())?;
    validate_retry_policy(request.retry_policy.as_ref())?;

    validate_start(
        namespace,
        &request.workflow_id,
        request.input.as_ref().map_or(0, |input| input.size()),
        request.memo.as_ref().map_or(0, |memo| memo.size()),
        operation,
        config,
        metrics,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::request::{Memo, Payload, Payloads, TaskQueue, WorkflowType};
    use crate::port::NoopMetricsHandler;
    use crate::error::ErrorKind;

    fn valid_request() -> StartWorkflowExecutionRequest {
        StartWorkflowExecutionRequest {
            namespace: "orders".to_string(),
            workflow_id: "wf-1".to_string(),
            workflow_type: Some(WorkflowType::new("checkout")),
            task_queue: Some(TaskQueue::new("default")),
            request_id: "req-1".to_string(),
            ..Default::default()
        }
    }

    fn validate(request: &StartWorkflowExecutionRequest, config: &HistoryConfig) -> Result<()> {
        validate_start_workflow_execution_request(
            request,
            &NamespaceEntry::local("ns-id", "orders"),
            "StartWorkflowExecution",
            config,
            &NoopMetricsHandler,
        )
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(validate(&valid_request(), &HistoryConfig::default()).is_ok());
    }

    #[test]
    fn test_request_id_checked_before_task_queue() {
        let mut request = valid_request();
        request.request_id.clear();
        request.task_queue = None;

        let err = validate(&request, &HistoryConfig::default()).unwrap_err();
        assert_eq!(err.message(), "Missing request ID.");
    }

    #[test]
    fn test_duration_errors_name_the_field() {
        let mut request = valid_request();
        request.workflow_run_timeout = Some(WireDuration {
            seconds: -1,
            nanos: 0,
        });
        request.workflow_type = None;

        let err = validate(&request, &HistoryConfig::default()).unwrap_err();
        assert!(err.message().starts_with("invalid WorkflowRunTimeoutSeconds"));
    }

    #[test]
    fn test_missing_task_queue_and_type() {
        let mut request = valid_request();
        request.task_queue = Some(TaskQueue::new(""));
        assert_eq!(
            validate(&request, &HistoryConfig::default()).unwrap_err().message(),
            "Missing Taskqueue."
        );

        let mut request = valid_request();
        request.workflow_type = None;
        assert_eq!(
            validate(&request, &HistoryConfig::default()).unwrap_err().message(),
            "Missing WorkflowType."
        );
    }

    #[test]
    fn test_length_limits_in_order() {
        let config = HistoryConfig::default().with_max_id_length(4);
        let mut request = valid_request();
        request.namespace = "namespace".to_string();
        request.workflow_id = "workflow".to_string();
        assert_eq!(
            validate(&request, &config).unwrap_err().message(),
            "Namespace exceeds length limit."
        );

        request.namespace = "ns".to_string();
        assert_eq!(
            validate(&request, &config).unwrap_err().message(),
            "WorkflowId exceeds length limit."
        );

        request.workflow_id = "wf".to_string();
        request.task_queue = Some(TaskQueue::new("q"));
        request.workflow_type = Some(WorkflowType::new("t"));
        assert!(validate(&request, &config).is_ok());

        request.task_queue = Some(TaskQueue::new("queue"));
        assert_eq!(
            validate(&request, &config).unwrap_err().message(),
            "TaskQueue exceeds length limit."
        );
    }

    #[test]
    fn test_versioning_override() {
        let mut request = valid_request();
        request.versioning_override = Some(VersioningOverride {
            behavior: VersioningBehavior::Pinned,
            pinned_version: None,
        });
        assert!(validate(&request, &HistoryConfig::default()).is_err());

        request.versioning_override = Some(VersioningOverride {
            behavior: VersioningBehavior::Pinned,
            pinned_version: Some("build-7".to_string()),
        });
        assert!(validate(&request, &HistoryConfig::default()).is_ok());

        request.versioning_override = Some(VersioningOverride {
            behavior: VersioningBehavior::AutoUpgrade,
            pinned_version: Some("build-7".to_string()),
        });
        assert!(validate(&request, &HistoryConfig::default()).is_err());
    }

    #[test]
    fn test_retry_policy() {
        let mut request = valid_request();
        request.retry_policy = Some(RetryPolicy {
            backoff_coefficient: 0.5,
            ..Default::default()
        });
        assert!(validate(&request, &HistoryConfig::default()).is_err());

        request.retry_policy = Some(RetryPolicy {
            initial_interval: Some(WireDuration { seconds: 10, nanos: 0 }),
            maximum_interval: Some(WireDuration { seconds: 5, nanos: 0 }),
            backoff_coefficient: 2.0,
            ..Default::default()
        });
        assert!(validate(&request, &HistoryConfig::default()).is_err());
    }

    #[test]
    fn test_retry_policy_rejects_blank_non_retryable_error_type() {
        let blank = RetryPolicy {
            non_retryable_error_types: vec!["Timeout".to_string(), String::new()],
            ..Default::default()
        };
        let err = validate_retry_policy(Some(&blank)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            err.message(),
            "NonRetryableErrorTypes cannot have blank error type on retry policy."
        );

        let named = RetryPolicy {
            non_retryable_error_types: vec!["Timeout".to_string()],
            ..Default::default()
        };
        assert!(validate_retry_policy(Some(&named)).is_ok());
    }

    #[test]
    fn test_start_delay_is_not_validated() {
        let mut request = valid_request();
        request.workflow_start_delay = Some(WireDuration { seconds: -5, nanos: 0 });
        assert!(validate(&request, &HistoryConfig::default()).is_ok());

        request.task_queue = None;
        let err = validate(&request, &HistoryConfig::default()).unwrap_err();
        assert_eq!(err.message(), "Missing Taskqueue.");
    }

    #[test]
    fn test_blob_thresholds() {
        let config = HistoryConfig::default().with_blob_size_limits(10, 20);
        let mut request = valid_request();

        for (size, expect_ok) in [(5, true), (15, true), (19, true), (20, false), (25, false)] {
            request.input = Some(Payloads::single(Payload::new(vec![0u8; size])));
            let result = validate(&request, &config);
            assert_eq!(result.is_ok(), expect_ok, "input of {size} bytes");
            if let Err(err) = result {
                assert_eq!(err.kind(), crate::error::ErrorKind::BlobSizeExceeded);
            }
        }
    }

    #[test]
    fn test_memo_limit() {
        let config = HistoryConfig::default().with_memo_size_limits(4, 8);
        let mut request = valid_request();
        let mut memo = Memo::default();
        memo.fields.insert("k".to_string(), Payload::new(vec![0u8; 16]));
        request.memo = Some(memo);

        let err = validate(&request, &config).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MemoSizeExceeded);
    }

    #[test]
    fn test_wire_duration_shapes() {
        assert!(validate_wire_duration(None).is_ok());
        assert!(validate_wire_duration(Some(&WireDuration { seconds: 1, nanos: 5 })).is_ok());
        assert!(validate_wire_duration(Some(&WireDuration { seconds: 1, nanos: -5 })).is_err());
        assert!(validate_wire_duration(Some(&WireDuration { seconds: 0, nanos: 1_000_000_000 })).is_err());
        assert!(validate_wire_duration(Some(&WireDuration { seconds: MAX_DURATION_SECONDS + 1, nanos: 0 })).is_err());
        assert_eq!(
            validate_wire_duration(Some(&WireDuration { seconds: 0, nanos: -1 })).unwrap_err(),
            "negative duration"
        );
    }
}
