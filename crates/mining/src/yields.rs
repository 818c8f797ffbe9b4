use rand::Rng;
use std::collections::HashMap;
use veinmine_common::{ItemStack, Material};

/// How an ore turns into items when mined without silk touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropRule {
    /// One item, fortune adds a random bonus on top of `base`.
    Single { item: Material, base: u32 },
    /// A random amount in `min..=max`; fortune may add one per unit.
    Multi { item: Material, min: u32, max: u32 },
    /// Always exactly `count`, fortune has no effect.
    Fixed { item: Material, count: u32 },
}

const STANDARD_RULES: &[(Material, DropRule)] = {
    use Material::*;
    &[
        (CoalOre, DropRule::Single { item: Coal, base: 1 }),
        (DeepslateCoalOre, DropRule::Single { item: Coal, base: 1 }),
        (IronOre, DropRule::Single { item: RawIron, base: 1 }),
        (DeepslateIronOre, DropRule::Single { item: RawIron, base: 1 }),
        (GoldOre, DropRule::Single { item: RawGold, base: 1 }),
        (DeepslateGoldOre, DropRule::Single { item: RawGold, base: 1 }),
        (DiamondOre, DropRule::Single { item: Diamond, base: 1 }),
        (DeepslateDiamondOre, DropRule::Single { item: Diamond, base: 1 }),
        (EmeraldOre, DropRule::Single { item: Emerald, base: 1 }),
        (DeepslateEmeraldOre, DropRule::Single { item: Emerald, base: 1 }),
        (NetherQuartzOre, DropRule::Single { item: Quartz, base: 1 }),
        (CopperOre, DropRule::Multi { item: RawCopper, min: 2, max: 5 }),
        (DeepslateCopperOre, DropRule::Multi { item: RawCopper, min: 2, max: 5 }),
        (LapisOre, DropRule::Multi { item: LapisLazuli, min: 4, max: 9 }),
        (DeepslateLapisOre, DropRule::Multi { item: LapisLazuli, min: 4, max: 9 }),
        (RedstoneOre, DropRule::Multi { item: Redstone, min: 4, max: 5 }),
        (DeepslateRedstoneOre, DropRule::Multi { item: Redstone, min: 4, max: 5 }),
        (NetherGoldOre, DropRule::Multi { item: GoldNugget, min: 2, max: 6 }),
        (AncientDebris, DropRule::Fixed { item: AncientDebris, count: 1 }),
    ]
};

/// Per-unit bonus chance for each fortune level on multi-drop ores.
const MULTI_FORTUNE_CHANCE: f64 = 0.30;

/// Material → drop rule lookup.
#[derive(Debug, Clone, Default)]
pub struct YieldTable {
    rules: HashMap<Material, DropRule>,
}

impl YieldTable {
    /// The vanilla ore table.
    pub fn standard() -> Self {
        Self {
            rules: STANDARD_RULES.iter().copied().collect(),
        }
    }

    pub fn with_rule(mut self, material: Material, rule: DropRule) -> Self {
        self.rules.insert(material, rule);
        self
    }

    pub fn rule(&self, material: Material) -> Option<DropRule> {
        self.rules.get(&material).copied()
    }
}

/// Turns a mined block into dropped items.
#[derive(Debug, Clone)]
pub struct YieldResolver {
    table: YieldTable,
}

impl Default for YieldResolver {
    fn default() -> Self {
        Self::new(YieldTable::standard())
    }
}

impl YieldResolver {
    pub fn new(table: YieldTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &YieldTable {
        &self.table
    }

    /// Items dropped by one block. Silk touch always yields the block itself.
    pub fn resolve_drops<R: Rng + ?Sized>(
        &self,
        material: Material,
        silk_touch: bool,
        fortune: u32,
        rng: &mut R,
    ) -> Vec<ItemStack> {
        if silk_touch {
            return vec![ItemStack::new(material, 1)];
        }
        let stack = match self.table.rule(material) {
            Some(DropRule::Single { item, base }) => {
                let bonus = rng.gen_range(0..fortune.saturating_add(2));
                let count = (base + bonus).saturating_sub(1).max(1);
                ItemStack::new(item, count)
            }
            Some(DropRule::Multi { item, min, max }) => {
                let base = rng.gen_range(min..=max.max(min));
                let chance = (MULTI_FORTUNE_CHANCE * f64::from(fortune)).min(1.0);
                let bonus = if fortune == 0 {
                    0
                } else {
                    (0..base).filter(|_| rng.gen_bool(chance)).count() as u32
                };
                ItemStack::new(item, base + bonus)
            }
            Some(DropRule::Fixed { item, count }) => ItemStack::new(item, count),
            None => match material.default_drop() {
                Some((item, count)) => ItemStack::new(item, count),
                None => return Vec::new(),
            },
        };
        if stack.is_empty() {
            Vec::new()
        } else {
            vec![stack]
        }
    }
}
