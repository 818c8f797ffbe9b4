use serde::{Deserialize, Serialize};
use veinmine_common::{ItemStack, Material};

/// Block-name filter for `BLOCK_MINE` achievements.
///
/// Each pattern is a material name that may contain `*` wildcards, e.g.
/// `*DIAMOND_ORE` matches both the stone and deepslate variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFilter {
    patterns: Vec<String>,
}

impl BlockFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_ascii_uppercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, material: Material) -> bool {
        self.patterns
            .iter()
            .any(|p| wildcard_match(p, material.name()))
    }
}

/// What an achievement counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AchievementKind {
    /// Blocks matching the filter, mined through clusters or single breaks.
    BlockMine(BlockFilter),
    /// Every block mined.
    TotalBlocks,
    /// Player level reached; progress is the level itself.
    Level,
}

impl AchievementKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::BlockMine(_) => "BLOCK_MINE",
            Self::TotalBlocks => "TOTAL_BLOCKS",
            Self::Level => "LEVEL",
        }
    }
}

/// A validated achievement definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementDefinition {
    pub id: String,
    pub name: String,
    pub kind: AchievementKind,
    pub target: u64,
    pub money_reward: f64,
    pub item_rewards: Vec<ItemStack>,
}

impl AchievementDefinition {
    /// Percentage of the target reached by `progress`, clamped to 100.
    pub fn percent(&self, progress: u64) -> u8 {
        if self.target == 0 {
            return 100;
        }
        (progress.min(self.target) * 100 / self.target) as u8
    }
}

/// Match `name` against a pattern where `*` matches any run of characters.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == name;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = name;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }
    true
}
