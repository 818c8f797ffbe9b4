use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tool family a block is harvested with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Pickaxe,
    Axe,
    Shovel,
    Hoe,
}

impl ToolCategory {
    pub const ALL: [ToolCategory; 4] = [Self::Pickaxe, Self::Axe, Self::Shovel, Self::Hoe];

    pub fn name(self) -> &'static str {
        match self {
            Self::Pickaxe => "pickaxe",
            Self::Axe => "axe",
            Self::Shovel => "shovel",
            Self::Hoe => "hoe",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ToolCategory {
    type Err = ParseMaterialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseMaterialError(s.to_string()))
    }
}

/// Unknown material or tool name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown material name: {0}")]
pub struct ParseMaterialError(pub String);

macro_rules! materials {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Block and item kinds known to the mining engine.
        ///
        /// Blocks and the items they drop share one namespace, as they do in
        /// the host game.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum Material {
            $($variant),*
        }

        impl Material {
            pub const ALL: &'static [Material] = &[$(Material::$variant),*];

            /// Canonical SCREAMING_SNAKE name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Material::$variant => $name),*
                }
            }
        }
    };
}

materials! {
    Air => "AIR",
    // Stone-like
    Stone => "STONE",
    Deepslate => "DEEPSLATE",
    Netherrack => "NETHERRACK",
    // Ores
    CoalOre => "COAL_ORE",
    DeepslateCoalOre => "DEEPSLATE_COAL_ORE",
    IronOre => "IRON_ORE",
    DeepslateIronOre => "DEEPSLATE_IRON_ORE",
    CopperOre => "COPPER_ORE",
    DeepslateCopperOre => "DEEPSLATE_COPPER_ORE",
    GoldOre => "GOLD_ORE",
    DeepslateGoldOre => "DEEPSLATE_GOLD_ORE",
    NetherGoldOre => "NETHER_GOLD_ORE",
    RedstoneOre => "REDSTONE_ORE",
    DeepslateRedstoneOre => "DEEPSLATE_REDSTONE_ORE",
    LapisOre => "LAPIS_ORE",
    DeepslateLapisOre => "DEEPSLATE_LAPIS_ORE",
    DiamondOre => "DIAMOND_ORE",
    DeepslateDiamondOre => "DEEPSLATE_DIAMOND_ORE",
    EmeraldOre => "EMERALD_ORE",
    DeepslateEmeraldOre => "DEEPSLATE_EMERALD_ORE",
    NetherQuartzOre => "NETHER_QUARTZ_ORE",
    AncientDebris => "ANCIENT_DEBRIS",
    // Wood
    OakLog => "OAK_LOG",
    SpruceLog => "SPRUCE_LOG",
    BirchLog => "BIRCH_LOG",
    JungleLog => "JUNGLE_LOG",
    AcaciaLog => "ACACIA_LOG",
    DarkOakLog => "DARK_OAK_LOG",
    MangroveLog => "MANGROVE_LOG",
    CherryLog => "CHERRY_LOG",
    CrimsonStem => "CRIMSON_STEM",
    WarpedStem => "WARPED_STEM",
    // Soil
    Dirt => "DIRT",
    GrassBlock => "GRASS_BLOCK",
    Gravel => "GRAVEL",
    Sand => "SAND",
    RedSand => "RED_SAND",
    Clay => "CLAY",
    SoulSand => "SOUL_SAND",
    Mud => "MUD",
    // Foliage and organic blocks
    OakLeaves => "OAK_LEAVES",
    SpruceLeaves => "SPRUCE_LEAVES",
    BirchLeaves => "BIRCH_LEAVES",
    JungleLeaves => "JUNGLE_LEAVES",
    HayBlock => "HAY_BLOCK",
    NetherWartBlock => "NETHER_WART_BLOCK",
    WarpedWartBlock => "WARPED_WART_BLOCK",
    Shroomlight => "SHROOMLIGHT",
    // Items
    Cobblestone => "COBBLESTONE",
    CobbledDeepslate => "COBBLED_DEEPSLATE",
    Coal => "COAL",
    RawIron => "RAW_IRON",
    RawCopper => "RAW_COPPER",
    RawGold => "RAW_GOLD",
    GoldNugget => "GOLD_NUGGET",
    Redstone => "REDSTONE",
    LapisLazuli => "LAPIS_LAZULI",
    Diamond => "DIAMOND",
    Emerald => "EMERALD",
    Quartz => "QUARTZ",
    ClayBall => "CLAY_BALL",
}

impl Material {
    /// Tool family that harvests this block, `None` for items and air.
    pub fn tool_category(self) -> Option<ToolCategory> {
        use Material::*;
        match self {
            Stone | Deepslate | Netherrack | CoalOre | DeepslateCoalOre | IronOre
            | DeepslateIronOre | CopperOre | DeepslateCopperOre | GoldOre | DeepslateGoldOre
            | NetherGoldOre | RedstoneOre | DeepslateRedstoneOre | LapisOre
            | DeepslateLapisOre | DiamondOre | DeepslateDiamondOre | EmeraldOre
            | DeepslateEmeraldOre | NetherQuartzOre | AncientDebris => Some(ToolCategory::Pickaxe),
            OakLog | SpruceLog | BirchLog | JungleLog | AcaciaLog | DarkOakLog | MangroveLog
            | CherryLog | CrimsonStem | WarpedStem => Some(ToolCategory::Axe),
            Dirt | GrassBlock | Gravel | Sand | RedSand | Clay | SoulSand | Mud => {
                Some(ToolCategory::Shovel)
            }
            OakLeaves | SpruceLeaves | BirchLeaves | JungleLeaves | HayBlock | NetherWartBlock
            | WarpedWartBlock | Shroomlight => Some(ToolCategory::Hoe),
            _ => None,
        }
    }

    /// Whether this material is a placeable block (as opposed to an item or air).
    pub fn is_block(self) -> bool {
        self.tool_category().is_some()
    }

    /// Whether this block is an ore.
    pub fn is_ore(self) -> bool {
        self.name().ends_with("_ORE") || self == Material::AncientDebris
    }

    /// Drop produced without silk touch when no special yield rule applies.
    ///
    /// Items drop themselves; leaves and air drop nothing.
    pub fn default_drop(self) -> Option<(Material, u32)> {
        use Material::*;
        match self {
            Air => None,
            Stone => Some((Cobblestone, 1)),
            Deepslate => Some((CobbledDeepslate, 1)),
            GrassBlock => Some((Dirt, 1)),
            Clay => Some((ClayBall, 4)),
            OakLeaves | SpruceLeaves | BirchLeaves | JungleLeaves => None,
            other => Some((other, 1)),
        }
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Material {
    type Err = ParseMaterialError;

    /// Case-insensitive, also accepts a `minecraft:` namespace prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bare = trimmed
            .strip_prefix("minecraft:")
            .unwrap_or(trimmed)
            .to_ascii_uppercase();
        Material::ALL
            .iter()
            .copied()
            .find(|m| m.name() == bare)
            .ok_or_else(|| ParseMaterialError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for m in Material::ALL {
            assert_eq!(m.name().parse::<Material>().unwrap(), *m);
        }
    }

    #[test]
    fn parse_accepts_namespace_and_case() {
        assert_eq!("minecraft:diamond_ore".parse::<Material>().unwrap(), Material::DiamondOre);
        assert_eq!(" Oak_Log ".parse::<Material>().unwrap(), Material::OakLog);
        assert!("UNOBTAINIUM_ORE".parse::<Material>().is_err());
    }

    #[test]
    fn serde_uses_screaming_names() {
        let json = serde_json::to_string(&Material::DeepslateLapisOre).unwrap();
        assert_eq!(json, "\"DEEPSLATE_LAPIS_ORE\"");
        let back: Material = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Material::DeepslateLapisOre);
    }

    #[test]
    fn tool_categories() {
        assert_eq!(Material::IronOre.tool_category(), Some(ToolCategory::Pickaxe));
        assert_eq!(Material::BirchLog.tool_category(), Some(ToolCategory::Axe));
        assert_eq!(Material::Gravel.tool_category(), Some(ToolCategory::Shovel));
        assert_eq!(Material::OakLeaves.tool_category(), Some(ToolCategory::Hoe));
        assert_eq!(Material::Diamond.tool_category(), None);
        assert!(!Material::Diamond.is_block());
    }

    #[test]
    fn ore_detection() {
        assert!(Material::DeepslateEmeraldOre.is_ore());
        assert!(Material::AncientDebris.is_ore());
        assert!(!Material::Stone.is_ore());
    }

    #[test]
    fn default_drops() {
        assert_eq!(Material::Stone.default_drop(), Some((Material::Cobblestone, 1)));
        assert_eq!(Material::OakLog.default_drop(), Some((Material::OakLog, 1)));
        assert_eq!(Material::OakLeaves.default_drop(), None);
        assert_eq!(Material::Clay.default_drop(), Some((Material::ClayBall, 4)));
    }

    #[test]
    fn tool_category_parse() {
        assert_eq!("Pickaxe".parse::<ToolCategory>().unwrap(), ToolCategory::Pickaxe);
        assert!("sword".parse::<ToolCategory>().is_err());
    }
}
