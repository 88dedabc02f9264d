//! Core type definitions: IDs, distribution modes, and resource stocks.

use serde::{Deserialize, Serialize};

// ============================================================================
// Type Aliases
// ============================================================================

pub type NodeId = String;
pub type ResourceName = String;

// ============================================================================
// Distribution Mode
// ============================================================================

/// How a single resource on a node takes part in vessel-wide distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMode {
    /// Resource is excluded from all distribution.
    #[default]
    Off,
    /// Surplus is pooled for other nodes to draw from.
    Share,
    /// Node is a candidate requester; only tops up while below capacity.
    Consume,
    /// Requester behavior like `Consume`, but pinned: bulk mode
    /// reassignment never touches it.
    Required,
}

impl DistributionMode {
    /// Stable integer encoding used by the persistence collaborator.
    pub fn to_index(self) -> u8 {
        match self {
            DistributionMode::Off => 0,
            DistributionMode::Share => 1,
            DistributionMode::Consume => 2,
            DistributionMode::Required => 3,
        }
    }

    /// Inverse of [`to_index`](Self::to_index). Returns `None` for
    /// integers outside `0..=3`.
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(DistributionMode::Off),
            1 => Some(DistributionMode::Share),
            2 => Some(DistributionMode::Consume),
            3 => Some(DistributionMode::Required),
            _ => None,
        }
    }

    /// Returns true for the two modes that draw from the pool.
    pub fn is_requester(&self) -> bool {
        matches!(self, DistributionMode::Consume | DistributionMode::Required)
    }

    /// Mode label for display and logging.
    pub fn label(&self) -> &'static str {
        match self {
            DistributionMode::Off => "off",
            DistributionMode::Share => "share",
            DistributionMode::Consume => "consume",
            DistributionMode::Required => "required",
        }
    }
}

// ============================================================================
// Resource Stock
// ============================================================================

/// A named, capacity-bounded resource quantity owned by one node.
///
/// Stocks are created and destroyed by the node's inventory collaborator;
/// the distribution core only reads and writes `amount`. Distribution
/// operations maintain `0 <= amount <= capacity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStock {
    pub name: ResourceName,
    pub amount: f64,
    pub capacity: f64,
}

impl ResourceStock {
    pub fn new(name: impl Into<ResourceName>, amount: f64, capacity: f64) -> Self {
        Self {
            name: name.into(),
            amount,
            capacity,
        }
    }

    /// Remaining room before the stock saturates.
    pub fn headroom(&self) -> f64 {
        (self.capacity - self.amount).max(0.0)
    }

    /// A full stock is never a requester.
    pub fn is_full(&self) -> bool {
        self.amount >= self.capacity
    }
}

// ============================================================================
// Conversion Process Inputs
// ============================================================================

/// Input requirements declared by a resource-conversion process attached
/// to a node. Consumed read-only when rebuilding the distribution list:
/// every declared input resource is pinned to `Required`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConverterInputs {
    pub converter_name: String,
    pub input_resources: Vec<ResourceName>,
}

impl ConverterInputs {
    pub fn new(
        converter_name: impl Into<String>,
        input_resources: Vec<ResourceName>,
    ) -> Self {
        Self {
            converter_name: converter_name.into(),
            input_resources,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
