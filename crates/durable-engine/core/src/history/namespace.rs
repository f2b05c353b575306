//! Namespace registry entries and cluster metadata.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::event::EMPTY_VERSION;

/// Opaque namespace identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NamespaceId(pub String);

impl NamespaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry entry for one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceEntry {
    id: NamespaceId,
    name: String,
    is_global: bool,
    failover_version: i64,
}

impl NamespaceEntry {
    /// A namespace that only lives in the local cluster.
    pub fn local(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: NamespaceId::new(id),
            name: name.into(),
            is_global: false,
            failover_version: EMPTY_VERSION,
        }
    }

    /// A replicated namespace currently written under `failover_version`.
    pub fn global(id: impl Into<String>, name: impl Into<String>, failover_version: i64) -> Self {
        Self {
            id: NamespaceId::new(id),
            name: name.into(),
            is_global: true,
            failover_version,
        }
    }

    pub fn id(&self) -> &NamespaceId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_global(&self) -> bool {
        self.is_global
    }

    pub fn failover_version(&self) -> i64 {
        self.failover_version
    }

    /// Version new state in this namespace is written under.
    pub fn current_version(&self) -> i64 {
        if self.is_global {
            self.failover_version
        } else {
            EMPTY_VERSION
        }
    }
}

/// Static description of one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub initial_failover_version: i64,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// Multi-cluster topology as seen from this cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMetadata {
    current_cluster_name: String,
    failover_version_increment: i64,
    clusters: HashMap<String, ClusterInfo>,
}

impl ClusterMetadata {
    /// Single-cluster metadata with the given name.
    pub fn single(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut clusters = HashMap::new();
        clusters.insert(
            name.clone(),
            ClusterInfo {
                initial_failover_version: 1,
                enabled: true,
            },
        );
        Self {
            current_cluster_name: name,
            failover_version_increment: 10,
            clusters,
        }
    }

    pub fn new(
        current_cluster_name: impl Into<String>,
        failover_version_increment: i64,
        clusters: HashMap<String, ClusterInfo>,
    ) -> Result<Self> {
        let current_cluster_name = current_cluster_name.into();
        if failover_version_increment <= 0 {
            return Err(Error::configuration("failover_version_increment must be positive"));
        }
        if !clusters.contains_key(&current_cluster_name) {
            return Err(Error::configuration(format!(
                "current cluster {current_cluster_name} is missing from cluster metadata"
            )));
        }
        for (name, info) in &clusters {
            if info.initial_failover_version < 0
                || info.initial_failover_version >= failover_version_increment
            {
                return Err(Error::configuration(format!(
                    "cluster {name}: initial failover version must be in [0, {failover_version_increment})"
                )));
            }
        }
        Ok(Self {
            current_cluster_name,
            failover_version_increment,
            clusters,
        })
    }

    pub fn current_cluster_name(&self) -> &str {
        &self.current_cluster_name
    }

    pub fn failover_version_increment(&self) -> i64 {
        self.failover_version_increment
    }

    /// Cluster that owns `version`. Local namespaces always resolve to the
    /// current cluster; `None` means no cluster claims the version.
    pub fn cluster_name_for_failover_version(&self, is_global: bool, version: i64) -> Option<&str> {
        if !is_global {
            return Some(&self.current_cluster_name);
        }
        let initial = version.rem_euclid(self.failover_version_increment);
        self.clusters
            .iter()
            .find(|(_, info)| info.initial_failover_version == initial)
            .map(|(name, _)| name.as_str())
    }
}
