use std::collections::{HashMap, HashSet};
use veinmine_common::{ItemStack, Material, PlayerId, Position};

/// Failures reported by the host world while applying an outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("block at {0} changed before it could be cleared")]
    BlockChanged(Position),
    #[error("block at {0} is protected")]
    Protected(Position),
    #[error("chunk containing {0} is not loaded")]
    Unloaded(Position),
    #[error("player {0} is not online")]
    PlayerOffline(PlayerId),
}

/// State of the held tool after damage was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolWear {
    Intact { remaining: u32 },
    Broken,
}

/// Read/clear access to the host world's blocks.
pub trait BlockAccess {
    /// Material at `pos`, `None` when unloaded or outside the world.
    fn material_at(&self, pos: Position) -> Option<Material>;

    /// Neighbouring position, `None` when it lies outside the world.
    fn neighbor(&self, pos: Position, dx: i32, dy: i32, dz: i32) -> Option<Position> {
        Some(pos.offset(dx, dy, dz))
    }

    fn clear_block(&mut self, pos: Position) -> Result<(), WorldError>;
}

/// Player inventory, held tool and food level in the host game.
pub trait InventoryAccess {
    /// Add a stack, returning whatever did not fit.
    fn add_item(&mut self, player: PlayerId, stack: ItemStack) -> Vec<ItemStack>;

    fn drop_at_world(&mut self, pos: Position, stack: ItemStack) -> Result<(), WorldError>;

    fn damage_held_tool(&mut self, player: PlayerId, amount: u32) -> Result<ToolWear, WorldError>;

    fn food_level(&self, player: PlayerId) -> f64;

    fn set_food_level(&mut self, player: PlayerId, level: f64) -> Result<(), WorldError>;
}

/// Sparse in-memory block grid, used by the CLI demo and by tests.
#[derive(Debug, Clone, Default)]
pub struct GridWorld {
    blocks: HashMap<Position, Material>,
    protected: HashSet<Position>,
    min_y: Option<i32>,
    max_y: Option<i32>,
}

impl GridWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the world to `min_y..=max_y`; neighbours outside do not exist.
    pub fn with_height_limits(mut self, min_y: i32, max_y: i32) -> Self {
        self.min_y = Some(min_y);
        self.max_y = Some(max_y);
        self
    }

    pub fn set(&mut self, pos: Position, material: Material) {
        if material == Material::Air {
            self.blocks.remove(&pos);
        } else {
            self.blocks.insert(pos, material);
        }
    }

    /// Fill the inclusive box between two corners.
    pub fn fill(&mut self, from: Position, to: Position, material: Material) {
        let lo = from.0.min(to.0);
        let hi = from.0.max(to.0);
        for x in lo.x..=hi.x {
            for y in lo.y..=hi.y {
                for z in lo.z..=hi.z {
                    self.set(Position::new(x, y, z), material);
                }
            }
        }
    }

    /// Mark a block as un-clearable, as a region-protection plugin would.
    pub fn protect(&mut self, pos: Position) {
        self.protected.insert(pos);
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn count_of(&self, material: Material) -> usize {
        self.blocks.values().filter(|m| **m == material).count()
    }
}

impl BlockAccess for GridWorld {
    fn material_at(&self, pos: Position) -> Option<Material> {
        Some(self.blocks.get(&pos).copied().unwrap_or(Material::Air))
    }

    fn neighbor(&self, pos: Position, dx: i32, dy: i32, dz: i32) -> Option<Position> {
        let n = pos.offset(dx, dy, dz);
        let below = self.min_y.is_some_and(|min| n.y() < min);
        let above = self.max_y.is_some_and(|max| n.y() > max);
        (!below && !above).then_some(n)
    }

    fn clear_block(&mut self, pos: Position) -> Result<(), WorldError> {
        if self.protected.contains(&pos) {
            return Err(WorldError::Protected(pos));
        }
        self.blocks.remove(&pos);
        Ok(())
    }
}

/// Per-player item counts with a unit capacity, a held tool and a food bar.
#[derive(Debug, Clone)]
pub struct MemoryInventory {
    capacity: u32,
    items: HashMap<PlayerId, HashMap<Material, u32>>,
    dropped: Vec<(Position, ItemStack)>,
    tool_durability: HashMap<PlayerId, u32>,
    food: HashMap<PlayerId, f64>,
    default_tool_durability: u32,
}

impl MemoryInventory {
    pub const FULL_FOOD: f64 = 20.0;

    /// `capacity` is the total number of item units each player can carry.
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            items: HashMap::new(),
            dropped: Vec::new(),
            tool_durability: HashMap::new(),
            food: HashMap::new(),
            default_tool_durability: 1561,
        }
    }

    pub fn with_tool_durability(mut self, durability: u32) -> Self {
        self.default_tool_durability = durability;
        self
    }

    pub fn count(&self, player: PlayerId, material: Material) -> u32 {
        self.items
            .get(&player)
            .and_then(|inv| inv.get(&material))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_units(&self, player: PlayerId) -> u32 {
        self.items
            .get(&player)
            .map(|inv| inv.values().sum())
            .unwrap_or(0)
    }

    pub fn dropped(&self) -> &[(Position, ItemStack)] {
        &self.dropped
    }

    pub fn tool_durability(&self, player: PlayerId) -> u32 {
        self.tool_durability
            .get(&player)
            .copied()
            .unwrap_or(self.default_tool_durability)
    }
}

impl InventoryAccess for MemoryInventory {
    fn add_item(&mut self, player: PlayerId, stack: ItemStack) -> Vec<ItemStack> {
        let used = self.total_units(player);
        let room = self.capacity.saturating_sub(used);
        let accepted = stack.count.min(room);
        if accepted > 0 {
            *self
                .items
                .entry(player)
                .or_default()
                .entry(stack.material)
                .or_default() += accepted;
        }
        let leftover = stack.count - accepted;
        if leftover > 0 {
            vec![ItemStack::new(stack.material, leftover)]
        } else {
            Vec::new()
        }
    }

    fn drop_at_world(&mut self, pos: Position, stack: ItemStack) -> Result<(), WorldError> {
        self.dropped.push((pos, stack));
        Ok(())
    }

    fn damage_held_tool(&mut self, player: PlayerId, amount: u32) -> Result<ToolWear, WorldError> {
        let current = self.tool_durability(player);
        let remaining = current.saturating_sub(amount);
        self.tool_durability.insert(player, remaining);
        Ok(if remaining == 0 {
            ToolWear::Broken
        } else {
            ToolWear::Intact { remaining }
        })
    }

    fn food_level(&self, player: PlayerId) -> f64 {
        self.food.get(&player).copied().unwrap_or(Self::FULL_FOOD)
    }

    fn set_food_level(&mut self, player: PlayerId, level: f64) -> Result<(), WorldError> {
        self.food.insert(player, level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_fill_and_query() {
        let mut world = GridWorld::new();
        world.fill(Position::new(0, 0, 0), Position::new(2, 2, 2), Material::IronOre);
        assert_eq!(world.block_count(), 27);
        assert_eq!(world.material_at(Position::new(1, 1, 1)), Some(Material::IronOre));
        assert_eq!(world.material_at(Position::new(5, 5, 5)), Some(Material::Air));
    }

    #[test]
    fn height_limits_hide_neighbours() {
        let world = GridWorld::new().with_height_limits(0, 10);
        let floor = Position::new(0, 0, 0);
        assert!(world.neighbor(floor, 0, -1, 0).is_none());
        assert!(world.neighbor(floor, 0, 1, 0).is_some());
    }

    #[test]
    fn protected_blocks_refuse_clearing() {
        let mut world = GridWorld::new();
        let pos = Position::new(1, 2, 3);
        world.set(pos, Material::Stone);
        world.protect(pos);
        assert_eq!(world.clear_block(pos), Err(WorldError::Protected(pos)));
        assert_eq!(world.material_at(pos), Some(Material::Stone));
    }

    #[test]
    fn inventory_returns_leftovers_when_full() {
        let player = PlayerId::new();
        let mut inv = MemoryInventory::new(10);
        assert!(inv.add_item(player, ItemStack::new(Material::Coal, 6)).is_empty());
        let leftover = inv.add_item(player, ItemStack::new(Material::Coal, 6));
        assert_eq!(leftover, vec![ItemStack::new(Material::Coal, 2)]);
        assert_eq!(inv.count(player, Material::Coal), 10);
    }

    #[test]
    fn tool_breaks_at_zero() {
        let player = PlayerId::new();
        let mut inv = MemoryInventory::new(64).with_tool_durability(5);
        assert_eq!(
            inv.damage_held_tool(player, 3),
            Ok(ToolWear::Intact { remaining: 2 })
        );
        assert_eq!(inv.damage_held_tool(player, 3), Ok(ToolWear::Broken));
    }
}
