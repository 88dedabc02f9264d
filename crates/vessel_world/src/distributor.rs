//! Per-node distribution state: the policy map, the derived
//! shareable/required caches, and the fill/share primitives the
//! coordinator calls back into.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::types::{ConverterInputs, DistributionMode, NodeId, ResourceName, ResourceStock};

/// Observer invoked synchronously whenever a distributor absorbs or
/// re-shares an amount. Receives `(resource_name, amount)`.
pub type DistributionObserver = Box<dyn FnMut(&str, f64)>;

/// Handle used to push an amount back into the vessel-wide pool when the
/// node is configured as a pass-through. Treated as always-succeeds.
pub type VesselRequestHandler = Box<dyn FnMut(&str, f64)>;

// ============================================================================
// Configuration
// ============================================================================

/// Fixed per-node distribution configuration, set at assembly time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DistributorConfig {
    /// Resource names excluded from distribution entirely.
    pub resource_blacklist: BTreeSet<ResourceName>,
    /// Consumer-only nodes run with every usable resource forced to
    /// `Consume` and expose no per-resource policy editing.
    pub consumer_only: bool,
}

// ============================================================================
// Node Distributor
// ============================================================================

/// One distributor per node. Owns the node's policy map, its stocks, and
/// the two derived caches the coordinator reads each cycle.
pub struct NodeDistributor {
    node_id: NodeId,
    config: DistributorConfig,
    stocks: Vec<ResourceStock>,
    converters: Vec<ConverterInputs>,
    policy: BTreeMap<ResourceName, DistributionMode>,
    shareable_cache: Vec<ResourceName>,
    required_cache: Vec<ResourceName>,
    is_participating: bool,
    shares_with_vessel: bool,
    template_name: Option<String>,
    observers: Vec<DistributionObserver>,
    vessel_request: Option<VesselRequestHandler>,
}

impl NodeDistributor {
    pub fn new(node_id: impl Into<NodeId>, config: DistributorConfig) -> Self {
        Self {
            node_id: node_id.into(),
            config,
            stocks: Vec::new(),
            converters: Vec::new(),
            policy: BTreeMap::new(),
            shareable_cache: Vec::new(),
            required_cache: Vec::new(),
            is_participating: false,
            shares_with_vessel: false,
            template_name: None,
            observers: Vec::new(),
            vessel_request: None,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &DistributorConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Inventory collaborator surface
    // ------------------------------------------------------------------

    pub fn stocks(&self) -> &[ResourceStock] {
        &self.stocks
    }

    pub fn stock(&self, resource_name: &str) -> Option<&ResourceStock> {
        self.stocks.iter().find(|stock| stock.name == resource_name)
    }

    pub fn stock_mut(&mut self, resource_name: &str) -> Option<&mut ResourceStock> {
        self.stocks
            .iter_mut()
            .find(|stock| stock.name == resource_name)
    }

    /// Adds a stock to the node's inventory. The policy map is not
    /// touched; `check_distribution_list` detects the drift and forces a
    /// rebuild before the policy is next exposed.
    pub fn add_stock(&mut self, stock: ResourceStock) {
        self.stocks.push(stock);
    }

    pub fn remove_stock(&mut self, resource_name: &str) -> Option<ResourceStock> {
        let index = self.stock_index(resource_name)?;
        Some(self.stocks.remove(index))
    }

    pub fn set_converters(&mut self, converters: Vec<ConverterInputs>) {
        self.converters = converters;
    }

    pub fn add_converter(&mut self, converter: ConverterInputs) {
        self.converters.push(converter);
    }

    // ------------------------------------------------------------------
    // Collaborator handles
    // ------------------------------------------------------------------

    /// Registers an observer for "resource distributed" notifications.
    /// Observers are invoked synchronously, in registration order.
    pub fn register_observer(&mut self, observer: impl FnMut(&str, f64) + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Wires in the vessel-wide pooled-withdrawal collaborator used when
    /// `shares_with_vessel` is set.
    pub fn set_vessel_request_handler(&mut self, handler: impl FnMut(&str, f64) + 'static) {
        self.vessel_request = Some(Box::new(handler));
    }

    // ------------------------------------------------------------------
    // Participation flags
    // ------------------------------------------------------------------

    pub fn is_participating(&self) -> bool {
        self.is_participating
    }

    pub fn set_participating(&mut self, enabled: bool) {
        self.is_participating = enabled;
    }

    pub fn shares_with_vessel(&self) -> bool {
        self.shares_with_vessel
    }

    pub fn set_shares_with_vessel(&mut self, enabled: bool) {
        self.shares_with_vessel = enabled;
    }

    // ------------------------------------------------------------------
    // Policy management
    // ------------------------------------------------------------------

    pub fn policy(&self) -> &BTreeMap<ResourceName, DistributionMode> {
        &self.policy
    }

    pub fn mode_of(&self, resource_name: &str) -> Option<DistributionMode> {
        self.policy.get(resource_name).copied()
    }

    pub(crate) fn insert_policy_entry(
        &mut self,
        resource_name: ResourceName,
        mode: DistributionMode,
    ) {
        self.policy.insert(resource_name, mode);
    }

    /// Activation bootstrap: builds a fresh policy when none exists yet,
    /// otherwise only refreshes the derived caches.
    pub fn initialize(&mut self) {
        if self.policy.is_empty() {
            self.rebuild_distribution_list();
        } else {
            self.rebuild_distribution_cache();
        }
    }

    /// Full policy reset. Clears the map, seeds every usable resource
    /// with `Off` (`Consume` on consumer-only nodes), pins every declared
    /// converter input to `Required`, then rebuilds the caches. Prior
    /// per-resource choices are forgotten.
    pub fn rebuild_distribution_list(&mut self) {
        debug!(node_id = %self.node_id, "rebuilding distribution list");
        self.policy.clear();

        let seed_mode = if self.config.consumer_only {
            DistributionMode::Consume
        } else {
            DistributionMode::Off
        };
        for stock in &self.stocks {
            if self.config.resource_blacklist.contains(&stock.name) {
                continue;
            }
            self.policy.insert(stock.name.clone(), seed_mode);
        }

        // Declared converter inputs are pinned so bulk reassignment and
        // the operator cannot starve an internal conversion process.
        for converter in &self.converters {
            for input in &converter.input_resources {
                if let Some(mode) = self.policy.get_mut(input) {
                    *mode = DistributionMode::Required;
                }
            }
        }

        self.rebuild_distribution_cache();
    }

    /// Derives the shareable/required caches from the current policy and
    /// stock amounts. Never touches the policy itself; safe to call every
    /// cycle.
    pub fn rebuild_distribution_cache(&mut self) {
        trace!(node_id = %self.node_id, "rebuilding distribution cache");
        self.shareable_cache.clear();
        self.required_cache.clear();

        for stock in &self.stocks {
            if self.config.resource_blacklist.contains(&stock.name) {
                trace!(
                    node_id = %self.node_id,
                    resource = %stock.name,
                    "skipping blacklisted resource"
                );
                continue;
            }
            let Some(mode) = self.policy.get(&stock.name) else {
                debug!(
                    node_id = %self.node_id,
                    resource = %stock.name,
                    "resource missing from distribution policy, skipping"
                );
                continue;
            };
            match mode {
                DistributionMode::Share => {
                    self.shareable_cache.push(stock.name.clone());
                }
                DistributionMode::Consume | DistributionMode::Required => {
                    // A full stock is never a requester.
                    if !stock.is_full() {
                        self.required_cache.push(stock.name.clone());
                    }
                }
                DistributionMode::Off => {}
            }
        }
    }

    /// Bulk reassignment: every policy entry not pinned to `Required` is
    /// overwritten with `mode`. Participation follows the new mode:
    /// enabled for `Consume`/`Share`, cleared otherwise.
    pub fn set_distribution_mode(&mut self, mode: DistributionMode) {
        self.is_participating = matches!(
            mode,
            DistributionMode::Consume | DistributionMode::Share
        );
        for entry in self.policy.values_mut() {
            if *entry != DistributionMode::Required {
                *entry = mode;
            }
        }
    }

    /// Per-resource policy edit, the surface behind the external policy
    /// editor. Returns false when the resource is unknown to the policy.
    pub fn set_resource_mode(&mut self, resource_name: &str, mode: DistributionMode) -> bool {
        let Some(entry) = self.policy.get_mut(resource_name) else {
            return false;
        };
        *entry = mode;
        self.rebuild_distribution_cache();
        true
    }

    /// Consistency guard invoked before the policy is exposed for
    /// editing. Declines (false) when the node has no usable resources;
    /// forces a full rebuild when the policy has drifted from the current
    /// resource set.
    pub fn check_distribution_list(&mut self) -> bool {
        let usable = self.usable_resource_count();
        if usable == 0 {
            debug!(node_id = %self.node_id, "nothing to distribute");
            return false;
        }
        if self.policy.len() != usable {
            debug!(
                node_id = %self.node_id,
                policy_len = self.policy.len(),
                usable,
                "distribution policy out of sync, rebuilding"
            );
            self.rebuild_distribution_list();
        }
        true
    }

    /// Reconfiguration hook: a changed layout template invalidates the
    /// whole policy.
    pub fn on_reconfigured(&mut self, template_name: &str) {
        if self.template_name.as_deref() == Some(template_name) {
            return;
        }
        self.rebuild_distribution_list();
        self.template_name = Some(template_name.to_string());
    }

    fn usable_resource_count(&self) -> usize {
        self.stocks
            .iter()
            .filter(|stock| !self.config.resource_blacklist.contains(&stock.name))
            .count()
    }

    // ------------------------------------------------------------------
    // Cycle interface
    // ------------------------------------------------------------------

    /// Returns the shareable and required resource lists for this cycle,
    /// or `None` when the node is not participating. The returned slices
    /// are overwritten on the next cache rebuild and must not be retained
    /// past the current cycle.
    pub fn get_resources_to_distribute(&mut self) -> Option<(&[ResourceName], &[ResourceName])> {
        if !self.is_participating {
            trace!(node_id = %self.node_id, "node is not participating in distribution");
            return None;
        }
        self.rebuild_distribution_cache();
        Some((self.shareable_cache.as_slice(), self.required_cache.as_slice()))
    }

    /// Apportions up to `grand_total` units of `resource_name` into this
    /// node's matching stock and returns the unabsorbed remainder.
    ///
    /// Fails closed (returns `grand_total` unchanged) for an empty name,
    /// an unknown resource, or a saturated stock. When the node shares
    /// with the vessel, the absorbed amount is withdrawn again and pushed
    /// back into the vessel-wide pool, making the node a pass-through.
    pub fn fill_required_resource(&mut self, resource_name: &str, grand_total: f64) -> f64 {
        if resource_name.is_empty() {
            return grand_total;
        }
        let Some(index) = self.stock_index(resource_name) else {
            trace!(
                node_id = %self.node_id,
                resource = resource_name,
                "fill requested for unknown resource"
            );
            return grand_total;
        };
        if self.stocks[index].is_full() {
            return grand_total;
        }

        let headroom = self.stocks[index].headroom();
        if grand_total <= headroom {
            // Everything fits.
            self.stocks[index].amount += grand_total;
            self.notify_distributed(resource_name, grand_total);
            self.pass_through_to_vessel(index);
            return 0.0;
        }

        // Partial absorb: top off to capacity, carry the rest back.
        let amount_remaining = grand_total - headroom;
        let capacity = self.stocks[index].capacity;
        self.stocks[index].amount = capacity;
        self.pass_through_to_vessel(index);
        let amount_now = self.stocks[index].amount;
        self.notify_distributed(resource_name, amount_now);
        amount_remaining
    }

    /// Sets the stock of `resource_name` to `capacity * share_percent`, a
    /// proportional allotment rather than an additive fill. Same guards,
    /// pass-through, and notification behavior as the fill path.
    pub fn take_share(&mut self, resource_name: &str, share_percent: f64) {
        if resource_name.is_empty() {
            return;
        }
        let Some(index) = self.stock_index(resource_name) else {
            trace!(
                node_id = %self.node_id,
                resource = resource_name,
                "share requested for unknown resource"
            );
            return;
        };

        let capacity = self.stocks[index].capacity.max(0.0);
        // Clamp so an out-of-range percent cannot break the capacity
        // invariant.
        self.stocks[index].amount = (capacity * share_percent).clamp(0.0, capacity);
        self.pass_through_to_vessel(index);
        let amount_now = self.stocks[index].amount;
        self.notify_distributed(resource_name, amount_now);
    }

    fn stock_index(&self, resource_name: &str) -> Option<usize> {
        self.stocks
            .iter()
            .position(|stock| stock.name == resource_name)
    }

    fn notify_distributed(&mut self, resource_name: &str, amount: f64) {
        for observer in &mut self.observers {
            observer(resource_name, amount);
        }
    }

    /// Withdraws the stock and re-requests the amount from the rest of
    /// the vessel, making this node a pass-through instead of a sink.
    fn pass_through_to_vessel(&mut self, index: usize) {
        if !self.shares_with_vessel {
            return;
        }
        let amount = self.stocks[index].amount;
        self.stocks[index].amount = 0.0;
        let name = self.stocks[index].name.clone();
        if let Some(handler) = self.vessel_request.as_mut() {
            handler(&name, amount);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
