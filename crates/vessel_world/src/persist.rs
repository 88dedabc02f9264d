//! Policy persistence: versioned snapshots of the per-node policy map as
//! an ordered sequence of `(resource name, mode index)` pairs.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::distributor::NodeDistributor;
use crate::types::{DistributionMode, NodeId, ResourceName};

pub const POLICY_SNAPSHOT_VERSION: u32 = 1;

fn default_snapshot_version() -> u32 {
    POLICY_SNAPSHOT_VERSION
}

// ============================================================================
// Snapshot
// ============================================================================

/// One persisted policy entry. The mode is stored as its stable integer
/// encoding (`0..=3`) so external collaborators round-trip plain pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub resource_name: ResourceName,
    pub mode: u8,
}

/// Persisted form of a node's distribution policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    #[serde(default = "default_snapshot_version")]
    pub version: u32,
    pub node_id: NodeId,
    pub entries: Vec<PolicyEntry>,
}

impl PolicySnapshot {
    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(input: &str) -> Result<Self, PersistError> {
        let snapshot: Self = serde_json::from_str(input)?;
        snapshot.validate_version()?;
        Ok(snapshot)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let json = self.to_json()?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let input = fs::read_to_string(path.as_ref())?;
        Self::from_json(&input)
    }

    fn validate_version(&self) -> Result<(), PersistError> {
        if self.version == POLICY_SNAPSHOT_VERSION {
            Ok(())
        } else {
            Err(PersistError::UnsupportedVersion {
                version: self.version,
                expected: POLICY_SNAPSHOT_VERSION,
            })
        }
    }
}

impl NodeDistributor {
    /// Captures whatever is currently in the policy map, in map order.
    pub fn save_policy(&self) -> PolicySnapshot {
        PolicySnapshot {
            version: POLICY_SNAPSHOT_VERSION,
            node_id: self.node_id().to_string(),
            entries: self
                .policy()
                .iter()
                .map(|(resource_name, mode)| PolicyEntry {
                    resource_name: resource_name.clone(),
                    mode: mode.to_index(),
                })
                .collect(),
        }
    }

    /// Restores a persisted policy by inserting each pair, then rebuilds
    /// the derived caches. Entries already present are overwritten;
    /// entries for resources the node no longer holds stay in the map
    /// until the next consistency check rebuilds it.
    pub fn load_policy(&mut self, snapshot: &PolicySnapshot) -> Result<(), PersistError> {
        snapshot.validate_version()?;
        let mut restored = Vec::with_capacity(snapshot.entries.len());
        for entry in &snapshot.entries {
            let mode = DistributionMode::from_index(entry.mode).ok_or_else(|| {
                PersistError::InvalidMode {
                    resource_name: entry.resource_name.clone(),
                    mode: entry.mode,
                }
            })?;
            restored.push((entry.resource_name.clone(), mode));
        }
        for (resource_name, mode) in restored {
            self.insert_policy_entry(resource_name, mode);
        }
        self.rebuild_distribution_cache();
        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    UnsupportedVersion { version: u32, expected: u32 },
    InvalidMode { resource_name: ResourceName, mode: u8 },
    Io(String),
    Serde(String),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::UnsupportedVersion { version, expected } => {
                write!(
                    f,
                    "unsupported policy snapshot version {} (expected {})",
                    version, expected
                )
            }
            PersistError::InvalidMode {
                resource_name,
                mode,
            } => {
                write!(
                    f,
                    "invalid distribution mode {} for resource {}",
                    mode, resource_name
                )
            }
            PersistError::Io(reason) => write!(f, "policy snapshot io error: {}", reason),
            PersistError::Serde(reason) => write!(f, "policy snapshot codec error: {}", reason),
        }
    }
}

impl std::error::Error for PersistError {}

impl From<serde_json::Error> for PersistError {
    fn from(error: serde_json::Error) -> Self {
        PersistError::Serde(error.to_string())
    }
}

impl From<io::Error> for PersistError {
    fn from(error: io::Error) -> Self {
        PersistError::Io(error.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributor::DistributorConfig;
    use crate::types::ResourceStock;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn sample_distributor() -> NodeDistributor {
        let mut distributor = NodeDistributor::new("node-1", DistributorConfig::default());
        distributor.add_stock(ResourceStock::new("fuel", 10.0, 100.0));
        distributor.add_stock(ResourceStock::new("water", 5.0, 50.0));
        distributor.rebuild_distribution_list();
        distributor.set_resource_mode("fuel", DistributionMode::Share);
        distributor.set_resource_mode("water", DistributionMode::Required);
        distributor
    }

    #[test]
    fn policy_round_trip_is_lossless() {
        let distributor = sample_distributor();
        let snapshot = distributor.save_policy();
        assert_eq!(snapshot.node_id, "node-1");
        assert_eq!(snapshot.entries.len(), 2);

        let mut restored = NodeDistributor::new("node-1", DistributorConfig::default());
        restored.add_stock(ResourceStock::new("fuel", 10.0, 100.0));
        restored.add_stock(ResourceStock::new("water", 5.0, 50.0));
        restored.load_policy(&snapshot).unwrap();

        assert_eq!(restored.policy(), distributor.policy());
        assert_eq!(restored.save_policy(), snapshot);
    }

    #[test]
    fn json_round_trip() {
        let snapshot = sample_distributor().save_policy();
        let json = snapshot.to_json().unwrap();
        let decoded = PolicySnapshot::from_json(&json).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn load_rejects_unknown_mode() {
        let snapshot = PolicySnapshot {
            version: POLICY_SNAPSHOT_VERSION,
            node_id: "node-1".to_string(),
            entries: vec![PolicyEntry {
                resource_name: "fuel".to_string(),
                mode: 7,
            }],
        };
        let mut distributor = NodeDistributor::new("node-1", DistributorConfig::default());
        let err = distributor.load_policy(&snapshot).unwrap_err();
        assert!(matches!(err, PersistError::InvalidMode { mode: 7, .. }));
        // The policy map is untouched on a rejected load.
        assert!(distributor.policy().is_empty());
    }

    #[test]
    fn from_json_rejects_unsupported_version() {
        let json = r#"{"version": 99, "node_id": "node-1", "entries": []}"#;
        let err = PolicySnapshot::from_json(json).unwrap_err();
        assert!(matches!(err, PersistError::UnsupportedVersion { version: 99, .. }));
    }

    #[test]
    fn save_and_load_json_file() {
        let snapshot = sample_distributor().save_policy();
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("vessel_world_policy_{stamp}.json"));

        snapshot.save_json(&path).unwrap();
        let loaded = PolicySnapshot::load_json(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(loaded, snapshot);
    }
}
