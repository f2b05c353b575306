//! Guard against starting a run over history written in another cluster.

use serde::{Deserialize, Serialize};

use super::mutable_state::MutableState;
use super::namespace::ClusterMetadata;
use crate::error::{Error, Result};
use crate::event::EMPTY_VERSION;

/// Run id and last write version of the run being replaced, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRunId {
    pub run_id: String,
    pub last_write_version: i64,
}

/// Reject the new run when the previous run was last written under a newer
/// failover version than the new state's current version.
pub fn new_workflow_version_check(
    cluster_metadata: &ClusterMetadata,
    prev_last_write_version: i64,
    new_mutable_state: &MutableState,
) -> Result<()> {
    if prev_last_write_version == EMPTY_VERSION {
        return Ok(());
    }
    if prev_last_write_version <= new_mutable_state.current_version() {
        return Ok(());
    }

    let namespace = new_mutable_state.namespace_entry();
    let active_cluster = cluster_metadata
        .cluster_name_for_failover_version(namespace.is_global(), prev_last_write_version)
        .unwrap_or("unknown");
    Err(Error::namespace_not_active(
        namespace.name(),
        cluster_metadata.current_cluster_name(),
        active_cluster,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::history::namespace::{ClusterInfo, NamespaceEntry};
    use std::collections::HashMap;

    fn metadata() -> ClusterMetadata {
        let mut clusters = HashMap::new();
        clusters.insert("a".to_string(), ClusterInfo { initial_failover_version: 1, enabled: true });
        clusters.insert("b".to_string(), ClusterInfo { initial_failover_version: 2, enabled: true });
        ClusterMetadata::new("a", 10, clusters).unwrap()
    }

    fn state(version: i64) -> MutableState {
        MutableState::new(NamespaceEntry::global("ns", "orders", version), "wf", "run", chrono::Utc::now())
    }

    #[test]
    fn test_empty_version_always_passes() {
        assert!(new_workflow_version_check(&metadata(), EMPTY_VERSION, &state(11)).is_ok());
    }

    #[test]
    fn test_older_or_equal_version_passes() {
        assert!(new_workflow_version_check(&metadata(), 11, &state(11)).is_ok());
        assert!(new_workflow_version_check(&metadata(), 1, &state(11)).is_ok());
    }

    #[test]
    fn test_newer_version_names_active_cluster() {
        let err = new_workflow_version_check(&metadata(), 22, &state(11)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NamespaceNotActive);
        assert_eq!(err.get_context("active_cluster"), Some("b"));
        assert_eq!(err.get_context("current_cluster"), Some("a"));
        assert_eq!(err.get_context("namespace"), Some("orders"));
    }
}
