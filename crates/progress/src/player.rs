use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use veinmine_common::{PlayerId, ToolCategory};

/// Upgradeable skills bought with skill points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Skill {
    /// Less tool wear.
    Efficiency,
    /// Extra fortune levels on drops.
    Luck,
    /// Less hunger.
    Energy,
}

impl Skill {
    pub const ALL: [Skill; 3] = [Self::Efficiency, Self::Luck, Self::Energy];

    pub fn name(self) -> &'static str {
        match self {
            Self::Efficiency => "efficiency",
            Self::Luck => "luck",
            Self::Energy => "energy",
        }
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown skill: {0}")]
pub struct ParseSkillError(pub String);

impl FromStr for Skill {
    type Err = ParseSkillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseSkillError(s.to_string()))
    }
}

/// Current level of each skill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillLevels {
    pub efficiency: u32,
    pub luck: u32,
    pub energy: u32,
}

impl SkillLevels {
    pub fn get(&self, skill: Skill) -> u32 {
        match skill {
            Skill::Efficiency => self.efficiency,
            Skill::Luck => self.luck,
            Skill::Energy => self.energy,
        }
    }

    fn get_mut(&mut self, skill: Skill) -> &mut u32 {
        match skill {
            Skill::Efficiency => &mut self.efficiency,
            Skill::Luck => &mut self.luck,
            Skill::Energy => &mut self.energy,
        }
    }

    pub(crate) fn raise(&mut self, skill: Skill) -> u32 {
        let level = self.get_mut(skill);
        *level += 1;
        *level
    }

    /// Fraction cut from tool wear, 5% per efficiency level.
    pub fn durability_cut(&self) -> f64 {
        0.05 * f64::from(self.efficiency)
    }

    /// Fraction cut from hunger, 10% per energy level.
    pub fn hunger_cut(&self) -> f64 {
        0.10 * f64::from(self.energy)
    }

    /// Fortune levels added on top of the tool's enchantment.
    pub fn extra_fortune(&self) -> u32 {
        self.luck
    }
}

/// Progress towards one achievement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementProgress {
    pub progress: u64,
    pub claimed: bool,
}

/// Everything persisted about one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProgress {
    pub id: PlayerId,
    pub name: String,
    pub level: u32,
    pub experience: u64,
    pub blocks_mined: u64,
    pub tools: BTreeMap<ToolCategory, bool>,
    pub skills: SkillLevels,
    pub skill_points: u32,
    pub achievements: BTreeMap<String, AchievementProgress>,
}

impl PlayerProgress {
    /// A fresh player: level 1, every tool enabled, nothing earned.
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            level: 1,
            experience: 0,
            blocks_mined: 0,
            tools: ToolCategory::ALL.into_iter().map(|t| (t, true)).collect(),
            skills: SkillLevels::default(),
            skill_points: 0,
            achievements: BTreeMap::new(),
        }
    }

    /// Tools without an explicit flag count as enabled.
    pub fn is_tool_enabled(&self, tool: ToolCategory) -> bool {
        self.tools.get(&tool).copied().unwrap_or(true)
    }

    pub fn achievement(&self, id: &str) -> AchievementProgress {
        self.achievements.get(id).copied().unwrap_or_default()
    }

    /// Add zero-progress entries for ids this player has never seen.
    /// Returns how many were added.
    pub fn backfill<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> usize {
        let mut added = 0;
        for id in ids {
            if !self.achievements.contains_key(id) {
                self.achievements.insert(id.to_string(), AchievementProgress::default());
                added += 1;
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_player_defaults() {
        let p = PlayerProgress::new(PlayerId::new(), "Steve");
        assert_eq!(p.level, 1);
        assert_eq!(p.experience, 0);
        assert!(ToolCategory::ALL.iter().all(|t| p.is_tool_enabled(*t)));
        assert_eq!(p.achievement("missing"), AchievementProgress::default());
    }

    #[test]
    fn backfill_keeps_existing_entries() {
        let mut p = PlayerProgress::new(PlayerId::new(), "Alex");
        p.achievements.insert(
            "a".into(),
            AchievementProgress {
                progress: 5,
                claimed: false,
            },
        );
        assert_eq!(p.backfill(["a", "b", "c"]), 2);
        assert_eq!(p.achievement("a").progress, 5);
        assert_eq!(p.backfill(["a", "b"]), 0);
    }

    #[test]
    fn skill_effects() {
        let mut s = SkillLevels::default();
        s.raise(Skill::Efficiency);
        s.raise(Skill::Efficiency);
        s.raise(Skill::Energy);
        s.raise(Skill::Luck);
        assert!((s.durability_cut() - 0.10).abs() < 1e-9);
        assert!((s.hunger_cut() - 0.10).abs() < 1e-9);
        assert_eq!(s.extra_fortune(), 1);
        assert_eq!("LUCK".parse::<Skill>(), Ok(Skill::Luck));
        assert!("speed".parse::<Skill>().is_err());
    }
}
