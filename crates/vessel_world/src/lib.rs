//! Resource distribution among storage-capable nodes on a shared vessel.
//!
//! Each node holds named, capacity-bounded stocks and carries a
//! per-resource distribution policy. On each cycle the coordinator scans
//! participating nodes, pools their shareable amounts per resource name,
//! and apportions the pool to requesters with remainder-carry semantics.
//! Unconsumed remainder is reported, never written back; sharers only
//! advertise their amounts and are not debited.

pub mod coordinator;
pub mod distributor;
pub mod persist;
pub mod types;

pub use coordinator::{CycleReport, CycleState, VesselDistributionCoordinator};
pub use distributor::{
    DistributionObserver, DistributorConfig, NodeDistributor, VesselRequestHandler,
};
pub use persist::{PersistError, PolicyEntry, PolicySnapshot, POLICY_SNAPSHOT_VERSION};
pub use types::{
    ConverterInputs, DistributionMode, NodeId, ResourceName, ResourceStock,
};
