use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use veinmine_common::{ItemStack, Material, PlayerId, Position, ToolCategory};

use crate::cluster::find_cluster;
use crate::cost::{CostSettings, ResourceCostModel};
use crate::world::{BlockAccess, InventoryAccess, ToolWear, WorldError};
use crate::yields::YieldResolver;

/// One cluster-mining trigger, built by the caller from the break event.
#[derive(Debug, Clone)]
pub struct MiningRequest<'a> {
    pub origin: Position,
    pub material: Material,
    pub max_cluster_size: usize,
    pub allowed_materials: &'a BTreeSet<Material>,
    pub tool: ToolCategory,
    pub silk_touch: bool,
    pub fortune_level: u32,
    pub unbreaking_level: u32,
    pub costs: CostSettings,
}

/// Result of planning a cluster break. Nothing has been mutated yet.
#[derive(Debug, Clone, PartialEq)]
pub struct MiningOutcome {
    accepted: bool,
    origin: Position,
    material: Material,
    cleared: Vec<Position>,
    block_drops: Vec<(Position, Vec<ItemStack>)>,
    drops: BTreeMap<Material, u32>,
    tool_damage: u32,
    hunger_delta: f64,
    costs: CostSettings,
    unbreaking_level: u32,
}

impl MiningOutcome {
    fn rejected(origin: Position, material: Material) -> Self {
        Self {
            accepted: false,
            origin,
            material,
            cleared: Vec::new(),
            block_drops: Vec::new(),
            drops: BTreeMap::new(),
            tool_damage: 0,
            hunger_delta: 0.0,
            costs: CostSettings::default(),
            unbreaking_level: 0,
        }
    }

    pub fn accepted(&self) -> bool {
        self.accepted
    }

    pub fn origin(&self) -> Position {
        self.origin
    }

    pub fn material(&self) -> Material {
        self.material
    }

    /// Positions to clear, breadth-first, excluding the origin.
    pub fn cleared_positions(&self) -> &[Position] {
        &self.cleared
    }

    /// Drops of each cleared position, in clearing order.
    pub fn block_drops(&self) -> &[(Position, Vec<ItemStack>)] {
        &self.block_drops
    }

    /// Aggregated drops, one stack per item.
    pub fn dropped_items(&self) -> Vec<ItemStack> {
        self.drops
            .iter()
            .map(|(m, c)| ItemStack::new(*m, *c))
            .collect()
    }

    pub fn drop_units(&self) -> u32 {
        self.drops.values().sum()
    }

    pub fn tool_damage(&self) -> u32 {
        self.tool_damage
    }

    pub fn hunger_delta(&self) -> f64 {
        self.hunger_delta
    }

    pub fn blocks_destroyed(&self) -> u32 {
        self.cleared.len() as u32
    }

    /// Blocks credited to the player: the cluster plus the origin itself.
    pub fn blocks_mined(&self) -> u32 {
        if self.accepted {
            self.blocks_destroyed() + 1
        } else {
            0
        }
    }
}

/// What actually happened when an outcome was applied to the world.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub cleared: Vec<Position>,
    pub failed: u32,
    pub granted: Vec<ItemStack>,
    pub dropped_at_origin: Vec<ItemStack>,
    pub tool_damage: u32,
    pub tool_broken: bool,
    pub hunger_delta: f64,
}

impl ApplyReport {
    /// Blocks credited to the player, origin included.
    pub fn blocks_mined(&self) -> u32 {
        self.cleared.len() as u32 + 1
    }

    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }
}

/// Plans cluster breaks and applies them through the host traits.
#[derive(Debug, Clone, Default)]
pub struct MiningEngine {
    yields: YieldResolver,
}

impl MiningEngine {
    pub fn new(yields: YieldResolver) -> Self {
        Self { yields }
    }

    /// Plan a cluster break. Fails closed: anything unexpected yields a
    /// rejected, empty outcome.
    pub fn execute<A, R>(&self, req: &MiningRequest<'_>, blocks: &A, rng: &mut R) -> MiningOutcome
    where
        A: BlockAccess + ?Sized,
        R: Rng + ?Sized,
    {
        if !req.allowed_materials.contains(&req.material) {
            tracing::debug!(material = %req.material, tool = %req.tool, "material not allowed");
            return MiningOutcome::rejected(req.origin, req.material);
        }
        if blocks.material_at(req.origin) != Some(req.material) {
            tracing::debug!(origin = %req.origin, "origin no longer holds requested material");
            return MiningOutcome::rejected(req.origin, req.material);
        }

        let cluster = find_cluster(blocks, req.origin, req.allowed_materials, req.max_cluster_size);
        if cluster.is_empty() {
            return MiningOutcome::rejected(req.origin, req.material);
        }

        let mut drops: BTreeMap<Material, u32> = BTreeMap::new();
        let mut block_drops = Vec::with_capacity(cluster.len().saturating_sub(1));
        for &pos in cluster.without_origin() {
            let stacks = self
                .yields
                .resolve_drops(req.material, req.silk_touch, req.fortune_level, rng);
            for s in &stacks {
                *drops.entry(s.material).or_default() += s.count;
            }
            block_drops.push((pos, stacks));
        }

        let cleared = cluster.without_origin().to_vec();
        let destroyed = cleared.len() as u32;
        let outcome = MiningOutcome {
            accepted: true,
            origin: req.origin,
            material: req.material,
            tool_damage: ResourceCostModel::tool_damage(
                destroyed,
                req.costs.durability_multiplier,
                req.unbreaking_level,
            ),
            hunger_delta: ResourceCostModel::hunger_delta(destroyed, req.costs.hunger_multiplier),
            cleared,
            block_drops,
            drops,
            costs: req.costs,
            unbreaking_level: req.unbreaking_level,
        };
        tracing::debug!(
            origin = %req.origin,
            material = %req.material,
            blocks = destroyed,
            drops = outcome.drop_units(),
            "cluster planned"
        );
        outcome
    }

    /// Clear the planned blocks and charge the player.
    ///
    /// Each block is re-checked and cleared on its own; a failure skips that
    /// block only. Drops and costs cover exactly the blocks that were cleared.
    pub fn apply<B, I>(
        &self,
        outcome: &MiningOutcome,
        player: PlayerId,
        blocks: &mut B,
        inventory: &mut I,
    ) -> ApplyReport
    where
        B: BlockAccess + ?Sized,
        I: InventoryAccess + ?Sized,
    {
        let mut report = ApplyReport::default();
        if !outcome.accepted {
            return report;
        }

        let mut granted: BTreeMap<Material, u32> = BTreeMap::new();
        for (pos, stacks) in &outcome.block_drops {
            let result = if blocks.material_at(*pos) == Some(outcome.material) {
                blocks.clear_block(*pos)
            } else {
                Err(WorldError::BlockChanged(*pos))
            };
            match result {
                Ok(()) => {
                    report.cleared.push(*pos);
                    for s in stacks {
                        *granted.entry(s.material).or_default() += s.count;
                    }
                }
                Err(err) => {
                    tracing::debug!(pos = %pos, error = %err, "skipping block");
                    report.failed += 1;
                }
            }
        }

        for (material, count) in granted {
            let stack = ItemStack::new(material, count);
            report.granted.push(stack);
            for leftover in inventory.add_item(player, stack) {
                match inventory.drop_at_world(outcome.origin, leftover) {
                    Ok(()) => report.dropped_at_origin.push(leftover),
                    Err(err) => tracing::debug!(error = %err, item = %leftover, "could not drop leftover"),
                }
            }
        }

        let destroyed = report.cleared.len() as u32;
        let (damage, hunger) = if report.is_partial() {
            (
                ResourceCostModel::tool_damage(
                    destroyed,
                    outcome.costs.durability_multiplier,
                    outcome.unbreaking_level,
                ),
                ResourceCostModel::hunger_delta(destroyed, outcome.costs.hunger_multiplier),
            )
        } else {
            (outcome.tool_damage, outcome.hunger_delta)
        };

        if damage > 0 {
            match inventory.damage_held_tool(player, damage) {
                Ok(wear) => {
                    report.tool_damage = damage;
                    report.tool_broken = wear == ToolWear::Broken;
                }
                Err(err) => tracing::debug!(error = %err, "could not damage tool"),
            }
        }
        if hunger > 0.0 {
            let food = ResourceCostModel::food_after(inventory.food_level(player), hunger);
            match inventory.set_food_level(player, food) {
                Ok(()) => report.hunger_delta = hunger,
                Err(err) => tracing::debug!(error = %err, "could not update food level"),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{GridWorld, MemoryInventory};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn iron() -> BTreeSet<Material> {
        BTreeSet::from([Material::IronOre])
    }

    fn request(allowed: &BTreeSet<Material>, silk: bool) -> MiningRequest<'_> {
        MiningRequest {
            origin: Position::new(1, 1, 1),
            material: Material::IronOre,
            max_cluster_size: 64,
            allowed_materials: allowed,
            tool: ToolCategory::Pickaxe,
            silk_touch: silk,
            fortune_level: 0,
            unbreaking_level: 0,
            costs: CostSettings::new(Some(1.0), Some(0.1)),
        }
    }

    fn cube() -> GridWorld {
        let mut world = GridWorld::new();
        world.fill(Position::new(0, 0, 0), Position::new(2, 2, 2), Material::IronOre);
        world
    }

    #[test]
    fn cube_yields_twenty_six_units() {
        let allowed = iron();
        let world = cube();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let out = MiningEngine::default().execute(&request(&allowed, false), &world, &mut rng);
        assert!(out.accepted());
        assert_eq!(out.blocks_destroyed(), 26);
        assert_eq!(out.blocks_mined(), 27);
        assert_eq!(out.dropped_items(), vec![ItemStack::new(Material::RawIron, 26)]);
        assert_eq!(out.tool_damage(), 26);
        assert!((out.hunger_delta() - 2.6).abs() < 1e-9);
        assert!(!out.cleared_positions().contains(&Position::new(1, 1, 1)));
        // Planning leaves the world alone.
        assert_eq!(world.block_count(), 27);
    }

    #[test]
    fn silk_touch_gives_block_per_position() {
        let allowed = iron();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let out = MiningEngine::default().execute(&request(&allowed, true), &cube(), &mut rng);
        assert_eq!(out.dropped_items(), vec![ItemStack::new(Material::IronOre, 26)]);
        for (_, stacks) in out.block_drops() {
            assert_eq!(stacks, &vec![ItemStack::new(Material::IronOre, 1)]);
        }
    }

    #[test]
    fn fails_closed() {
        let allowed = BTreeSet::from([Material::CoalOre]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let engine = MiningEngine::default();
        let out = engine.execute(&request(&allowed, false), &cube(), &mut rng);
        assert!(!out.accepted());
        assert_eq!(out.blocks_mined(), 0);

        let allowed = iron();
        let mut world = cube();
        world.set(Position::new(1, 1, 1), Material::Stone);
        let out = engine.execute(&request(&allowed, false), &world, &mut rng);
        assert!(!out.accepted());
        assert!(out.dropped_items().is_empty());
    }

    #[test]
    fn apply_clears_and_charges() {
        let allowed = iron();
        let mut world = cube();
        let player = PlayerId::new();
        let mut inv = MemoryInventory::new(1000).with_tool_durability(100);
        let engine = MiningEngine::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let out = engine.execute(&request(&allowed, false), &world, &mut rng);
        let report = engine.apply(&out, player, &mut world, &mut inv);

        assert_eq!(report.cleared.len(), 26);
        assert_eq!(report.failed, 0);
        assert_eq!(report.blocks_mined(), 27);
        // The origin is left for the host's own break handling.
        assert_eq!(world.block_count(), 1);
        assert_eq!(inv.count(player, Material::RawIron), 26);
        assert_eq!(inv.tool_durability(player), 74);
        assert!((inv.food_level(player) - 17.4).abs() < 1e-9);
    }

    #[test]
    fn partial_apply_counts_only_cleared() {
        let allowed = iron();
        let mut world = cube();
        let player = PlayerId::new();
        let mut inv = MemoryInventory::new(1000);
        let engine = MiningEngine::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let out = engine.execute(&request(&allowed, false), &world, &mut rng);

        let protected = out.cleared_positions()[0];
        world.protect(protected);
        let changed = out.cleared_positions()[1];
        world.set(changed, Material::Stone);

        let report = engine.apply(&out, player, &mut world, &mut inv);
        assert_eq!(report.failed, 2);
        assert_eq!(report.cleared.len(), 24);
        assert_eq!(report.tool_damage, 24);
        assert_eq!(inv.count(player, Material::RawIron), 24);
        assert_eq!(world.material_at(changed), Some(Material::Stone));
        assert_eq!(world.material_at(protected), Some(Material::IronOre));
    }

    #[test]
    fn full_inventory_drops_at_origin() {
        let allowed = iron();
        let mut world = cube();
        let player = PlayerId::new();
        let mut inv = MemoryInventory::new(10);
        let engine = MiningEngine::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let out = engine.execute(&request(&allowed, false), &world, &mut rng);
        let report = engine.apply(&out, player, &mut world, &mut inv);
        assert_eq!(inv.count(player, Material::RawIron), 10);
        assert_eq!(report.dropped_at_origin, vec![ItemStack::new(Material::RawIron, 16)]);
        assert_eq!(inv.dropped()[0].0, Position::new(1, 1, 1));
    }

    #[test]
    fn rejected_outcome_applies_nothing() {
        let allowed = BTreeSet::new();
        let mut world = cube();
        let mut inv = MemoryInventory::new(10);
        let engine = MiningEngine::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let out = engine.execute(&request(&allowed, false), &world, &mut rng);
        let report = engine.apply(&out, PlayerId::new(), &mut world, &mut inv);
        assert_eq!(report, ApplyReport::default());
        assert_eq!(world.block_count(), 27);
    }
}
