use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use veinmine_common::{ItemStack, Material, ServerId, ToolCategory};

use crate::achievement::{AchievementDefinition, AchievementKind, BlockFilter};

/// Errors that make a configuration file unusable as a whole.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A recoverable problem found while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    UnknownTool { name: String },
    UnknownMaterial { section: String, name: String },
    WrongTool { material: Material, tool: ToolCategory },
    InvalidAchievement { id: String, reason: String },
    InvalidReward { id: String, entry: String },
    InvalidSetting { key: String, reason: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTool { name } => write!(f, "unknown tool category '{name}'"),
            Self::UnknownMaterial { section, name } => {
                write!(f, "unknown material '{name}' in {section}")
            }
            Self::WrongTool { material, tool } => {
                write!(f, "{material} cannot be harvested with a {tool}")
            }
            Self::InvalidAchievement { id, reason } => {
                write!(f, "achievement '{id}' skipped: {reason}")
            }
            Self::InvalidReward { id, entry } => {
                write!(f, "achievement '{id}' has invalid item reward '{entry}'")
            }
            Self::InvalidSetting { key, reason } => write!(f, "setting '{key}': {reason}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct RawConfig {
    server_id: Option<String>,
    max_blocks: u32,
    use_durability: bool,
    durability_multiplier: f64,
    use_hunger: bool,
    hunger_multiplier: f64,
    leveling_enabled: bool,
    blocks_per_xp: u32,
    xp_per_level: BTreeMap<u32, u64>,
    max_blocks_per_level: BTreeMap<u32, u32>,
    skills: RawSkills,
    allowed_materials: BTreeMap<String, Vec<String>>,
    achievements: BTreeMap<String, RawAchievement>,
    auto_save_interval_minutes: u64,
    sync_poll_interval_seconds: u64,
    use_shared_store: bool,
    storage: RawStorage,
    rng_seed: Option<u64>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            server_id: None,
            max_blocks: 64,
            use_durability: true,
            durability_multiplier: 1.0,
            use_hunger: true,
            hunger_multiplier: 0.1,
            leveling_enabled: true,
            blocks_per_xp: 5,
            xp_per_level: default_xp_table(),
            max_blocks_per_level: default_max_blocks_table(),
            skills: RawSkills::default(),
            allowed_materials: default_allowed_materials(),
            achievements: default_achievements(),
            auto_save_interval_minutes: 5,
            sync_poll_interval_seconds: 3,
            use_shared_store: true,
            storage: RawStorage::default(),
            rng_seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct RawSkills {
    max_level: u32,
}

impl Default for RawSkills {
    fn default() -> Self {
        Self { max_level: 5 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct RawStorage {
    database_path: PathBuf,
    local_dir: PathBuf,
    validity_timeout_seconds: u64,
    retry_attempts: u32,
    retry_backoff_millis: u64,
}

impl Default for RawStorage {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("veinmine.db"),
            local_dir: PathBuf::from("veinmine-local"),
            validity_timeout_seconds: 3,
            retry_attempts: 3,
            retry_backoff_millis: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawAchievement {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    blocks: Vec<String>,
    amount: u64,
    #[serde(default)]
    money_reward: f64,
    #[serde(default)]
    item_rewards: Vec<String>,
}

/// Connection and retry parameters for the persistence layer.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    pub use_shared_store: bool,
    pub database_path: PathBuf,
    pub local_dir: PathBuf,
    pub validity_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let raw = RawStorage::default();
        Self {
            use_shared_store: true,
            database_path: raw.database_path,
            local_dir: raw.local_dir,
            validity_timeout: Duration::from_secs(raw.validity_timeout_seconds),
            retry_attempts: raw.retry_attempts,
            retry_backoff: Duration::from_millis(raw.retry_backoff_millis),
        }
    }
}

/// Validated plugin configuration.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub server_id: ServerId,
    /// Flat cluster cap, used when leveling is disabled and as table fallback.
    pub max_blocks: u32,
    /// `None` when tool wear is disabled.
    pub durability_multiplier: Option<f64>,
    /// `None` when hunger cost is disabled.
    pub hunger_multiplier: Option<f64>,
    pub leveling_enabled: bool,
    pub blocks_per_xp: u32,
    /// XP required to advance *into* the keyed level.
    pub xp_per_level: BTreeMap<u32, u64>,
    /// Cluster cap from the keyed level upward.
    pub max_blocks_per_level: BTreeMap<u32, u32>,
    pub skill_max_level: u32,
    pub allowed_materials: BTreeMap<ToolCategory, BTreeSet<Material>>,
    pub achievements: Vec<AchievementDefinition>,
    /// `None` disables periodic saving.
    pub auto_save_interval: Option<Duration>,
    pub sync_poll_interval: Duration,
    pub storage: StorageSettings,
    pub rng_seed: Option<u64>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        let (config, _) = Self::from_raw(RawConfig::default());
        config
    }
}

impl PluginConfig {
    /// Load and validate a YAML file. Warnings are logged and returned.
    pub fn load(path: impl AsRef<Path>) -> Result<(Self, Vec<ConfigWarning>), ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parse and validate YAML text. Missing keys take their defaults.
    pub fn from_yaml_str(text: &str) -> Result<(Self, Vec<ConfigWarning>), ConfigError> {
        let raw: RawConfig = if text.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(text)?
        };
        let (config, warnings) = Self::from_raw(raw);
        for w in &warnings {
            tracing::warn!(warning = %w, "configuration entry skipped");
        }
        Ok((config, warnings))
    }

    fn from_raw(raw: RawConfig) -> (Self, Vec<ConfigWarning>) {
        let mut warnings = Vec::new();

        let max_blocks = if raw.max_blocks == 0 {
            warnings.push(ConfigWarning::InvalidSetting {
                key: "max-blocks".into(),
                reason: "must be at least 1, using 1".into(),
            });
            1
        } else {
            raw.max_blocks
        };

        let blocks_per_xp = if raw.blocks_per_xp == 0 {
            warnings.push(ConfigWarning::InvalidSetting {
                key: "blocks-per-xp".into(),
                reason: "must be at least 1, using 1".into(),
            });
            1
        } else {
            raw.blocks_per_xp
        };

        let mut xp_per_level = raw.xp_per_level;
        let invalid_levels: Vec<u32> = xp_per_level
            .iter()
            .filter(|(level, xp)| **level < 2 || **xp == 0)
            .map(|(level, _)| *level)
            .collect();
        for level in invalid_levels {
            xp_per_level.remove(&level);
            warnings.push(ConfigWarning::InvalidSetting {
                key: format!("xp-per-level.{level}"),
                reason: "levels start at 2 and need a positive xp amount".into(),
            });
        }

        let allowed_materials = validate_allowed(raw.allowed_materials, &mut warnings);
        let achievements = validate_achievements(raw.achievements, &mut warnings);

        let config = Self {
            server_id: raw
                .server_id
                .filter(|s| !s.trim().is_empty())
                .map(ServerId::new)
                .unwrap_or_else(ServerId::random),
            max_blocks,
            durability_multiplier: raw
                .use_durability
                .then_some(raw.durability_multiplier.max(0.0)),
            hunger_multiplier: raw.use_hunger.then_some(raw.hunger_multiplier.max(0.0)),
            leveling_enabled: raw.leveling_enabled,
            blocks_per_xp,
            xp_per_level,
            max_blocks_per_level: raw.max_blocks_per_level,
            skill_max_level: raw.skills.max_level,
            allowed_materials,
            achievements,
            auto_save_interval: (raw.auto_save_interval_minutes > 0)
                .then(|| Duration::from_secs(raw.auto_save_interval_minutes * 60)),
            sync_poll_interval: Duration::from_secs(raw.sync_poll_interval_seconds.max(1)),
            storage: StorageSettings {
                use_shared_store: raw.use_shared_store,
                database_path: raw.storage.database_path,
                local_dir: raw.storage.local_dir,
                validity_timeout: Duration::from_secs(raw.storage.validity_timeout_seconds.max(1)),
                retry_attempts: raw.storage.retry_attempts.max(1),
                retry_backoff: Duration::from_millis(raw.storage.retry_backoff_millis),
            },
            rng_seed: raw.rng_seed,
        };
        (config, warnings)
    }

    /// Look up an achievement definition by id.
    pub fn achievement(&self, id: &str) -> Option<&AchievementDefinition> {
        self.achievements.iter().find(|a| a.id == id)
    }
}

fn validate_allowed(
    raw: BTreeMap<String, Vec<String>>,
    warnings: &mut Vec<ConfigWarning>,
) -> BTreeMap<ToolCategory, BTreeSet<Material>> {
    let mut allowed: BTreeMap<ToolCategory, BTreeSet<Material>> = BTreeMap::new();
    for (tool_name, names) in raw {
        let Ok(tool) = tool_name.parse::<ToolCategory>() else {
            warnings.push(ConfigWarning::UnknownTool { name: tool_name });
            continue;
        };
        let set = allowed.entry(tool).or_default();
        for name in names {
            match name.parse::<Material>() {
                Ok(material) if material.tool_category() == Some(tool) => {
                    set.insert(material);
                }
                Ok(material) => warnings.push(ConfigWarning::WrongTool { material, tool }),
                Err(_) => warnings.push(ConfigWarning::UnknownMaterial {
                    section: format!("allowed-materials.{tool}"),
                    name,
                }),
            }
        }
    }
    allowed
}

fn validate_achievements(
    raw: BTreeMap<String, RawAchievement>,
    warnings: &mut Vec<ConfigWarning>,
) -> Vec<AchievementDefinition> {
    let mut out = Vec::with_capacity(raw.len());
    for (id, entry) in raw {
        let kind = match entry.kind.trim().to_ascii_uppercase().as_str() {
            "BLOCK_MINE" => {
                let filter = BlockFilter::new(&entry.blocks);
                if filter.is_empty() {
                    warnings.push(ConfigWarning::InvalidAchievement {
                        id,
                        reason: "BLOCK_MINE needs at least one block pattern".into(),
                    });
                    continue;
                }
                AchievementKind::BlockMine(filter)
            }
            "TOTAL_BLOCKS" => AchievementKind::TotalBlocks,
            "LEVEL" => AchievementKind::Level,
            other => {
                warnings.push(ConfigWarning::InvalidAchievement {
                    id,
                    reason: format!("unknown type '{other}'"),
                });
                continue;
            }
        };
        if entry.amount == 0 {
            warnings.push(ConfigWarning::InvalidAchievement {
                id,
                reason: "amount must be positive".into(),
            });
            continue;
        }
        let mut item_rewards = Vec::new();
        for reward in &entry.item_rewards {
            match parse_item_reward(reward) {
                Some(stack) => item_rewards.push(stack),
                None => warnings.push(ConfigWarning::InvalidReward {
                    id: id.clone(),
                    entry: reward.clone(),
                }),
            }
        }
        out.push(AchievementDefinition {
            name: entry.name.unwrap_or_else(|| id.clone()),
            id,
            kind,
            target: entry.amount,
            money_reward: entry.money_reward.max(0.0),
            item_rewards,
        });
    }
    out
}

/// Parse `MATERIAL` or `MATERIAL:COUNT`.
fn parse_item_reward(entry: &str) -> Option<ItemStack> {
    let (name, count) = match entry.rsplit_once(':') {
        Some((name, count)) if !name.eq_ignore_ascii_case("minecraft") => {
            (name, count.trim().parse::<u32>().ok()?)
        }
        _ => (entry, 1),
    };
    if count == 0 {
        return None;
    }
    let material = name.parse::<Material>().ok()?;
    Some(ItemStack::new(material, count))
}

fn default_xp_table() -> BTreeMap<u32, u64> {
    (2..=30).map(|level| (level, 100 * u64::from(level - 1))).collect()
}

fn default_max_blocks_table() -> BTreeMap<u32, u32> {
    BTreeMap::from([(1, 16), (5, 32), (10, 48), (20, 64)])
}

fn default_allowed_materials() -> BTreeMap<String, Vec<String>> {
    let by_tool = |tool: ToolCategory, filter: fn(Material) -> bool| {
        let names = Material::ALL
            .iter()
            .copied()
            .filter(|m| m.tool_category() == Some(tool) && filter(*m))
            .map(|m| m.name().to_string())
            .collect();
        (tool.name().to_string(), names)
    };
    BTreeMap::from([
        by_tool(ToolCategory::Pickaxe, Material::is_ore),
        by_tool(ToolCategory::Axe, |_| true),
        by_tool(ToolCategory::Shovel, |m| {
            matches!(
                m,
                Material::Gravel | Material::Clay | Material::Sand | Material::RedSand | Material::SoulSand
            )
        }),
        by_tool(ToolCategory::Hoe, |_| true),
    ])
}

fn default_achievements() -> BTreeMap<String, RawAchievement> {
    BTreeMap::from([
        (
            "diamond-hunter".to_string(),
            RawAchievement {
                name: Some("Diamond Hunter".into()),
                kind: "BLOCK_MINE".into(),
                blocks: vec!["*DIAMOND_ORE".into()],
                amount: 64,
                money_reward: 500.0,
                item_rewards: vec!["DIAMOND:3".into()],
            },
        ),
        (
            "excavator".to_string(),
            RawAchievement {
                name: Some("Excavator".into()),
                kind: "TOTAL_BLOCKS".into(),
                blocks: Vec::new(),
                amount: 1000,
                money_reward: 250.0,
                item_rewards: Vec::new(),
            },
        ),
        (
            "veteran-miner".to_string(),
            RawAchievement {
                name: Some("Veteran Miner".into()),
                kind: "LEVEL".into(),
                blocks: Vec::new(),
                amount: 10,
                money_reward: 1000.0,
                item_rewards: vec!["EMERALD:8".into()],
            },
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PluginConfig::default();
        assert_eq!(config.max_blocks, 64);
        assert_eq!(config.durability_multiplier, Some(1.0));
        assert_eq!(config.hunger_multiplier, Some(0.1));
        assert_eq!(config.blocks_per_xp, 5);
        assert_eq!(config.auto_save_interval, Some(Duration::from_secs(300)));
        assert!(config.storage.use_shared_store);
        assert_eq!(config.storage.retry_attempts, 3);
        assert_eq!(config.xp_per_level.get(&2), Some(&100));
        assert!(config.allowed_materials[&ToolCategory::Pickaxe].contains(&Material::DiamondOre));
        assert!(!config.allowed_materials[&ToolCategory::Pickaxe].contains(&Material::Stone));
        assert_eq!(config.achievements.len(), 3);
    }

    #[test]
    fn empty_text_is_default() {
        let (config, warnings) = PluginConfig::from_yaml_str("").unwrap();
        assert!(warnings.is_empty());
        assert_eq!(config.max_blocks, 64);
    }

    #[test]
    fn parses_kebab_case_keys() {
        let yaml = r#"
server-id: survival-1
max-blocks: 32
use-durability: false
hunger-multiplier: 0.25
blocks-per-xp: 10
auto-save-interval-minutes: 0
use-shared-store: false
xp-per-level:
  2: 50
  3: 75
storage:
  database-path: /tmp/vm.db
  retry-attempts: 5
"#;
        let (config, warnings) = PluginConfig::from_yaml_str(yaml).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(config.server_id, ServerId::new("survival-1"));
        assert_eq!(config.max_blocks, 32);
        assert_eq!(config.durability_multiplier, None);
        assert_eq!(config.hunger_multiplier, Some(0.25));
        assert_eq!(config.blocks_per_xp, 10);
        assert_eq!(config.auto_save_interval, None);
        assert!(!config.storage.use_shared_store);
        assert_eq!(config.storage.database_path, PathBuf::from("/tmp/vm.db"));
        assert_eq!(config.storage.retry_attempts, 5);
        assert_eq!(config.xp_per_level.len(), 2);
    }

    #[test]
    fn invalid_materials_are_skipped_with_warnings() {
        let yaml = r#"
allowed-materials:
  pickaxe: [DIAMOND_ORE, NOT_A_BLOCK, OAK_LOG]
  sword: [DIAMOND_ORE]
"#;
        let (config, warnings) = PluginConfig::from_yaml_str(yaml).unwrap();
        let pick = &config.allowed_materials[&ToolCategory::Pickaxe];
        assert_eq!(pick.len(), 1);
        assert!(pick.contains(&Material::DiamondOre));
        assert!(warnings.contains(&ConfigWarning::UnknownMaterial {
            section: "allowed-materials.pickaxe".into(),
            name: "NOT_A_BLOCK".into(),
        }));
        assert!(warnings.contains(&ConfigWarning::WrongTool {
            material: Material::OakLog,
            tool: ToolCategory::Pickaxe,
        }));
        assert!(warnings.contains(&ConfigWarning::UnknownTool { name: "sword".into() }));
    }

    #[test]
    fn achievements_validate() {
        let yaml = r#"
achievements:
  ok:
    type: block_mine
    blocks: ["*_ORE"]
    amount: 10
    item-rewards: ["DIAMOND:2", "EMERALD", "BOGUS:1", "COAL:0"]
  no-blocks:
    type: BLOCK_MINE
    amount: 5
  bad-type:
    type: FISHING
    amount: 5
  zero:
    type: LEVEL
    amount: 0
"#;
        let (config, warnings) = PluginConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.achievements.len(), 1);
        let ok = config.achievement("ok").unwrap();
        assert_eq!(ok.name, "ok");
        assert_eq!(ok.target, 10);
        assert_eq!(
            ok.item_rewards,
            vec![
                ItemStack::new(Material::Diamond, 2),
                ItemStack::new(Material::Emerald, 1)
            ]
        );
        assert_eq!(
            warnings
                .iter()
                .filter(|w| matches!(w, ConfigWarning::InvalidAchievement { .. }))
                .count(),
            3
        );
        assert_eq!(
            warnings
                .iter()
                .filter(|w| matches!(w, ConfigWarning::InvalidReward { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn zero_limits_are_corrected() {
        let (config, warnings) =
            PluginConfig::from_yaml_str("max-blocks: 0\nblocks-per-xp: 0\nxp-per-level: {1: 10, 2: 0}")
                .unwrap();
        assert_eq!(config.max_blocks, 1);
        assert_eq!(config.blocks_per_xp, 1);
        assert!(config.xp_per_level.is_empty());
        assert_eq!(warnings.len(), 4);
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yml");
        std::fs::write(&path, "max-blocks: 12\n").unwrap();
        let (config, _) = PluginConfig::load(&path).unwrap();
        assert_eq!(config.max_blocks, 12);

        let missing = PluginConfig::load(tmp.path().join("missing.yml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn item_reward_parsing() {
        assert_eq!(
            parse_item_reward("minecraft:diamond"),
            Some(ItemStack::new(Material::Diamond, 1))
        );
        assert_eq!(
            parse_item_reward("minecraft:diamond:4"),
            Some(ItemStack::new(Material::Diamond, 4))
        );
        assert_eq!(parse_item_reward("DIAMOND:x"), None);
    }
}
