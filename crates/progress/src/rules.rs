use std::collections::BTreeMap;
use veinmine_config::{AchievementDefinition, PluginConfig};

/// Level thresholds and the cluster cap each level unlocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTable {
    enabled: bool,
    xp_per_level: BTreeMap<u32, u64>,
    max_blocks_per_level: BTreeMap<u32, u32>,
    flat_max_blocks: u32,
}

impl LevelTable {
    pub fn new(
        enabled: bool,
        xp_per_level: BTreeMap<u32, u64>,
        max_blocks_per_level: BTreeMap<u32, u32>,
        flat_max_blocks: u32,
    ) -> Self {
        Self {
            enabled,
            xp_per_level,
            max_blocks_per_level,
            flat_max_blocks,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Experience needed to go from `level` to `level + 1`, `None` at the cap.
    pub fn xp_to_advance(&self, level: u32) -> Option<u64> {
        self.xp_per_level.get(&level.checked_add(1)?).copied()
    }

    /// Highest reachable level.
    pub fn max_level(&self) -> u32 {
        self.xp_per_level.keys().next_back().copied().unwrap_or(1).max(1)
    }

    /// Cluster cap for a player at `level`: the entry for the highest listed
    /// level not above it, or the flat cap when leveling is off or no entry
    /// applies.
    pub fn max_blocks_for(&self, level: u32) -> u32 {
        if !self.enabled {
            return self.flat_max_blocks;
        }
        self.max_blocks_per_level
            .range(..=level)
            .next_back()
            .map(|(_, cap)| *cap)
            .unwrap_or(self.flat_max_blocks)
    }
}

/// Everything the progression store needs from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRules {
    pub levels: LevelTable,
    pub blocks_per_xp: u32,
    pub skill_max_level: u32,
    pub achievements: Vec<AchievementDefinition>,
}

impl ProgressRules {
    pub fn from_config(config: &PluginConfig) -> Self {
        Self {
            levels: LevelTable::new(
                config.leveling_enabled,
                config.xp_per_level.clone(),
                config.max_blocks_per_level.clone(),
                config.max_blocks,
            ),
            blocks_per_xp: config.blocks_per_xp.max(1),
            skill_max_level: config.skill_max_level,
            achievements: config.achievements.clone(),
        }
    }

    pub fn achievement(&self, id: &str) -> Option<&AchievementDefinition> {
        self.achievements.iter().find(|a| a.id == id)
    }

    pub fn achievement_ids(&self) -> impl Iterator<Item = &str> {
        self.achievements.iter().map(|a| a.id.as_str())
    }

    /// Experience earned going from `old` to `new` mined blocks.
    ///
    /// Computed from the totals so no partial block is lost between calls.
    pub fn xp_between(&self, old: u64, new: u64) -> u64 {
        let ratio = u64::from(self.blocks_per_xp.max(1));
        (new / ratio).saturating_sub(old / ratio)
    }
}

impl Default for ProgressRules {
    fn default() -> Self {
        Self::from_config(&PluginConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> LevelTable {
        LevelTable::new(
            true,
            BTreeMap::from([(2, 100), (3, 200)]),
            BTreeMap::from([(1, 16), (5, 32)]),
            64,
        )
    }

    #[test]
    fn thresholds() {
        let t = table();
        assert_eq!(t.xp_to_advance(1), Some(100));
        assert_eq!(t.xp_to_advance(2), Some(200));
        assert_eq!(t.xp_to_advance(3), None);
        assert_eq!(t.max_level(), 3);
    }

    #[test]
    fn cap_uses_highest_entry_at_or_below() {
        let t = table();
        assert_eq!(t.max_blocks_for(1), 16);
        assert_eq!(t.max_blocks_for(4), 16);
        assert_eq!(t.max_blocks_for(5), 32);
        assert_eq!(t.max_blocks_for(99), 32);
        assert_eq!(t.max_blocks_for(0), 64);
    }

    #[test]
    fn disabled_leveling_uses_flat_cap() {
        let t = LevelTable::new(false, BTreeMap::new(), BTreeMap::from([(1, 16)]), 40);
        assert_eq!(t.max_blocks_for(1), 40);
    }

    #[test]
    fn xp_keeps_remainders() {
        let rules = ProgressRules::default();
        assert_eq!(rules.blocks_per_xp, 5);
        assert_eq!(rules.xp_between(0, 4), 0);
        assert_eq!(rules.xp_between(4, 8), 1);
        assert_eq!(rules.xp_between(8, 10), 1);
        assert_eq!(rules.xp_between(0, 27), 5);
    }
}
