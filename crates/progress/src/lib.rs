//! Player progression: experience, levels, skills and achievements.
//!
//! [`ProgressionStore`] owns the in-memory progress of connected players.
//! Every mutation bumps a per-player revision; persistence copies dirty
//! players out and later confirms the revision it wrote.
//!
//! # Invariants
//! - `level >= 1`; experience never goes negative.
//! - Achievement progress never exceeds the target and never decreases.
//! - A claimed achievement stays claimed and pays out once.
//! - Changes replayed from other servers never re-enter the outbox.

mod notify;
mod player;
mod rules;
mod store;

pub use notify::{CollectingSink, Notification, NotificationSink, RewardLedger, RewardSink, TracingSink};
pub use player::{AchievementProgress, ParseSkillError, PlayerProgress, Skill, SkillLevels};
pub use rules::{LevelTable, ProgressRules};
pub use store::{
    ClaimReceipt, DirtySnapshot, MiningProgress, PendingChange, ProgressChange, ProgressError,
    ProgressionStore, SessionToken,
};

pub fn crate_info() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("progress"));
    }
}
