//! Cluster mining: bounded flood fill, loot yield and resource costs.
//!
//! # Invariants
//! - The engine never mutates the world; `MiningEngine::apply` is the only
//!   mutation step and it isolates failures per block.
//! - A cluster never exceeds its size cap and never contains a block of a
//!   different material than its origin.
//! - Neighbour enumeration order is fixed, so a seeded RNG reproduces drops.

mod cluster;
mod cost;
mod engine;
mod policy;
mod world;
mod yields;

pub use cluster::{Cluster, find_cluster, find_cluster_matching};
pub use cost::{CostSettings, ResourceCostModel};
pub use engine::{ApplyReport, MiningEngine, MiningOutcome, MiningRequest};
pub use policy::MaterialPolicy;
pub use world::{BlockAccess, GridWorld, InventoryAccess, MemoryInventory, ToolWear, WorldError};
pub use yields::{DropRule, YieldResolver, YieldTable};

pub fn crate_info() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("mining"));
    }
}
