//! Vessel-wide redistribution: scans participating nodes, pools their
//! shareable amounts per resource name, and apportions the pool to
//! requesters with remainder-carry semantics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::distributor::NodeDistributor;
use crate::types::ResourceName;

// ============================================================================
// Cycle State
// ============================================================================

/// Phase of the redistribution cycle. A cycle runs to completion without
/// yielding, so outside `run_cycle` the coordinator always reads `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    #[default]
    Idle,
    Scanning,
    Pooling,
    Allocating,
}

// ============================================================================
// Cycle Report
// ============================================================================

/// Outcome of one redistribution cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CycleReport {
    /// Number of nodes that participated in the cycle.
    pub participants: usize,
    /// Total shareable amount pooled per resource name.
    pub pooled: BTreeMap<ResourceName, f64>,
    /// Pool remainder that no requester could absorb. Left unapplied;
    /// sharers are never physically debited.
    pub leftover: BTreeMap<ResourceName, f64>,
}

// ============================================================================
// Coordinator
// ============================================================================

/// One coordinator per vessel. Owns its registered node distributors;
/// registration order is the deterministic scan and allocation order.
pub struct VesselDistributionCoordinator {
    nodes: Vec<NodeDistributor>,
    state: CycleState,
    is_dirty: bool,
}

impl VesselDistributionCoordinator {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            state: CycleState::Idle,
            is_dirty: false,
        }
    }

    /// Registers a node distributor and returns its scan-order index.
    pub fn register_node(&mut self, distributor: NodeDistributor) -> usize {
        self.nodes.push(distributor);
        self.is_dirty = true;
        self.nodes.len() - 1
    }

    pub fn node(&self, index: usize) -> Option<&NodeDistributor> {
        self.nodes.get(index)
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut NodeDistributor> {
        self.nodes.get_mut(index)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Dirty flag set by the external scheduler (or node registration)
    /// whenever participation, inventory, or policy may have changed.
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.is_dirty = dirty;
    }

    /// Runs one full Scan -> Pool -> Allocate pass and clears the dirty
    /// flag. A vessel with no participants or no pooled resources
    /// completes as a no-op.
    pub fn run_cycle(&mut self) -> CycleReport {
        // Scanning: collect each participant's shareable amounts and
        // required names as owned snapshots. Cache slices returned by the
        // distributors are only valid until the next rebuild, so nothing
        // borrowed crosses into the allocation phase.
        self.state = CycleState::Scanning;
        let mut scanned: Vec<ScannedNode> = Vec::new();
        for (index, node) in self.nodes.iter_mut().enumerate() {
            let Some((shareable, required)) = node.get_resources_to_distribute() else {
                continue;
            };
            let shareable_names: Vec<ResourceName> = shareable.to_vec();
            let required: Vec<ResourceName> = required.to_vec();
            let shareable = shareable_names
                .into_iter()
                .map(|name| {
                    let amount = node.stock(&name).map(|stock| stock.amount).unwrap_or(0.0);
                    (name, amount)
                })
                .collect();
            scanned.push(ScannedNode {
                index,
                shareable,
                required,
            });
        }

        // Pooling: running total per resource name across the vessel.
        // Source stocks are only read, never debited.
        self.state = CycleState::Pooling;
        let mut pooled: BTreeMap<ResourceName, f64> = BTreeMap::new();
        for node in &scanned {
            for (name, amount) in &node.shareable {
                *pooled.entry(name.clone()).or_insert(0.0) += amount;
            }
        }

        // Allocating: sequential fill in scan order, threading the
        // returned remainder into the next requester.
        self.state = CycleState::Allocating;
        let mut leftover: BTreeMap<ResourceName, f64> = BTreeMap::new();
        for (name, total) in &pooled {
            if *total <= 0.0 {
                continue;
            }
            let mut remaining = *total;
            for node in &scanned {
                if remaining <= 0.0 {
                    break;
                }
                if !node.required.iter().any(|required| required == name) {
                    continue;
                }
                remaining = self.nodes[node.index].fill_required_resource(name, remaining);
            }
            trace!(resource = %name, total, remaining, "allocated pooled resource");
            if remaining > 0.0 {
                leftover.insert(name.clone(), remaining);
            }
        }

        self.state = CycleState::Idle;
        self.is_dirty = false;

        let report = CycleReport {
            participants: scanned.len(),
            pooled,
            leftover,
        };
        if report.participants == 0 {
            debug!("distribution cycle ran with no participating nodes");
        }
        report
    }
}

impl Default for VesselDistributionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

struct ScannedNode {
    index: usize,
    shareable: Vec<(ResourceName, f64)>,
    required: Vec<ResourceName>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributor::DistributorConfig;
    use crate::types::{DistributionMode, ResourceStock};

    fn sharer(node_id: &str, name: &str, amount: f64, capacity: f64) -> NodeDistributor {
        let mut node = NodeDistributor::new(node_id, DistributorConfig::default());
        node.add_stock(ResourceStock::new(name, amount, capacity));
        node.rebuild_distribution_list();
        node.set_resource_mode(name, DistributionMode::Share);
        node.set_participating(true);
        node
    }

    fn requester(
        node_id: &str,
        name: &str,
        amount: f64,
        capacity: f64,
        mode: DistributionMode,
    ) -> NodeDistributor {
        let mut node = NodeDistributor::new(node_id, DistributorConfig::default());
        node.add_stock(ResourceStock::new(name, amount, capacity));
        node.rebuild_distribution_list();
        node.set_resource_mode(name, mode);
        node.set_participating(true);
        node
    }

    #[test]
    fn cycle_pools_full_shareable_amount() {
        let mut coordinator = VesselDistributionCoordinator::new();
        let a = coordinator.register_node(requester(
            "node-a",
            "fuel",
            0.0,
            100.0,
            DistributionMode::Required,
        ));
        coordinator.register_node(sharer("node-b", "fuel", 80.0, 100.0));

        let report = coordinator.run_cycle();

        assert_eq!(report.participants, 2);
        assert_eq!(report.pooled.get("fuel"), Some(&80.0));
        assert!(report.leftover.is_empty());
        assert_eq!(coordinator.node(a).unwrap().stock("fuel").unwrap().amount, 80.0);
    }

    #[test]
    fn cycle_leaves_unapplied_remainder_in_report() {
        let mut coordinator = VesselDistributionCoordinator::new();
        let a = coordinator.register_node(requester(
            "node-a",
            "fuel",
            0.0,
            50.0,
            DistributionMode::Required,
        ));
        let b = coordinator.register_node(sharer("node-b", "fuel", 80.0, 100.0));

        let report = coordinator.run_cycle();

        assert_eq!(coordinator.node(a).unwrap().stock("fuel").unwrap().amount, 50.0);
        assert_eq!(report.leftover.get("fuel"), Some(&30.0));
        // Sharers are only read, never debited.
        assert_eq!(coordinator.node(b).unwrap().stock("fuel").unwrap().amount, 80.0);
    }

    #[test]
    fn allocation_follows_registration_order() {
        let mut coordinator = VesselDistributionCoordinator::new();
        let first = coordinator.register_node(requester(
            "node-a",
            "fuel",
            0.0,
            60.0,
            DistributionMode::Consume,
        ));
        let second = coordinator.register_node(requester(
            "node-b",
            "fuel",
            0.0,
            60.0,
            DistributionMode::Consume,
        ));
        coordinator.register_node(sharer("node-c", "fuel", 80.0, 100.0));

        coordinator.run_cycle();

        assert_eq!(
            coordinator.node(first).unwrap().stock("fuel").unwrap().amount,
            60.0
        );
        assert_eq!(
            coordinator.node(second).unwrap().stock("fuel").unwrap().amount,
            20.0
        );
    }

    #[test]
    fn non_participants_are_skipped() {
        let mut coordinator = VesselDistributionCoordinator::new();
        let idle = coordinator.register_node({
            let mut node = requester("node-a", "fuel", 0.0, 100.0, DistributionMode::Required);
            node.set_participating(false);
            node
        });
        coordinator.register_node(sharer("node-b", "fuel", 80.0, 100.0));

        let report = coordinator.run_cycle();

        assert_eq!(report.participants, 1);
        assert_eq!(report.leftover.get("fuel"), Some(&80.0));
        assert_eq!(coordinator.node(idle).unwrap().stock("fuel").unwrap().amount, 0.0);
    }

    #[test]
    fn empty_vessel_cycle_is_a_no_op() {
        let mut coordinator = VesselDistributionCoordinator::new();
        let report = coordinator.run_cycle();
        assert_eq!(report.participants, 0);
        assert!(report.pooled.is_empty());
        assert!(report.leftover.is_empty());
        assert_eq!(coordinator.state(), CycleState::Idle);
    }

    #[test]
    fn cycle_clears_dirty_flag() {
        let mut coordinator = VesselDistributionCoordinator::new();
        coordinator.register_node(sharer("node-a", "fuel", 10.0, 100.0));
        assert!(coordinator.is_dirty());

        coordinator.run_cycle();
        assert!(!coordinator.is_dirty());

        coordinator.set_dirty(true);
        assert!(coordinator.is_dirty());
    }

    #[test]
    fn conservation_without_pass_through() {
        let mut coordinator = VesselDistributionCoordinator::new();
        coordinator.register_node(requester(
            "node-a",
            "fuel",
            5.0,
            40.0,
            DistributionMode::Consume,
        ));
        coordinator.register_node(sharer("node-b", "fuel", 30.0, 100.0));
        coordinator.register_node(requester(
            "node-c",
            "fuel",
            0.0,
            10.0,
            DistributionMode::Required,
        ));

        let total_before: f64 = (0..coordinator.node_count())
            .map(|i| coordinator.node(i).unwrap().stock("fuel").unwrap().amount)
            .sum();

        let report = coordinator.run_cycle();

        let total_after: f64 = (0..coordinator.node_count())
            .map(|i| coordinator.node(i).unwrap().stock("fuel").unwrap().amount)
            .sum();
        let leftover = report.leftover.get("fuel").copied().unwrap_or(0.0);

        // Pool amounts are advertised, not debited, so the vessel total
        // grows by exactly the applied portion of the pool.
        let applied = report.pooled.get("fuel").unwrap() - leftover;
        assert_eq!(total_after, total_before + applied);
    }
}
