use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use veinmine_common::{ItemStack, Material, PlayerId, ToolCategory};
use veinmine_config::{AchievementDefinition, AchievementKind};

use crate::notify::{Notification, NotificationSink};
use crate::player::{PlayerProgress, Skill};
use crate::rules::ProgressRules;

/// Rejected progression operations. State is unchanged when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    #[error("player {0} is not loaded")]
    UnknownPlayer(PlayerId),
    #[error("no achievement named '{0}'")]
    UnknownAchievement(String),
    #[error("achievement '{0}' is not completed")]
    NotCompleted(String),
    #[error("achievement '{0}' was already claimed")]
    AlreadyClaimed(String),
    #[error("level {0} is out of range")]
    InvalidLevel(u32),
    #[error("no skill points to spend")]
    NoSkillPoints,
    #[error("skill {0} is already at its maximum level")]
    SkillMaxed(Skill),
    #[error("session for player {0} ended before its data arrived")]
    StaleSession(PlayerId),
}

/// A state change other server processes should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressChange {
    AchievementProgress {
        id: String,
        progress: u64,
        claimed: bool,
    },
    Level {
        level: u32,
        experience: u64,
    },
    ToolToggle {
        tool: ToolCategory,
        enabled: bool,
    },
}

/// A change waiting to be appended to the shared change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub player: PlayerId,
    pub change: ProgressChange,
}

/// Rewards released by a successful claim.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimReceipt {
    pub player: PlayerId,
    pub achievement: String,
    pub money: f64,
    pub items: Vec<ItemStack>,
}

/// What a mining outcome did to a player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MiningProgress {
    pub blocks_mined: u64,
    pub xp_gained: u64,
    pub levels_gained: u32,
}

/// A dirty player and the revision the snapshot was taken at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtySnapshot {
    pub progress: PlayerProgress,
    pub revision: u64,
}

/// Proof that a load was started for the current session of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionToken {
    player: PlayerId,
    serial: u64,
}

impl SessionToken {
    pub fn player(&self) -> PlayerId {
        self.player
    }
}

#[derive(Debug)]
struct Slot {
    progress: PlayerProgress,
    revision: u64,
    saved_revision: u64,
}

impl Slot {
    fn is_dirty(&self) -> bool {
        self.revision != self.saved_revision
    }
}

/// Side effects gathered while a player's lock is held, emitted afterwards.
#[derive(Default)]
struct Effects {
    notifications: Vec<Notification>,
    changes: Vec<ProgressChange>,
}

/// In-memory authority over the progress of connected players.
///
/// One mutex per player guards its progress and revision counters. The map
/// lock is only held to find or insert a slot, never across a mutation.
pub struct ProgressionStore {
    rules: RwLock<Arc<ProgressRules>>,
    players: RwLock<HashMap<PlayerId, Arc<Mutex<Slot>>>>,
    sessions: Mutex<HashMap<PlayerId, u64>>,
    next_session: AtomicU64,
    outbox: Mutex<Vec<PendingChange>>,
    sink: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for ProgressionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressionStore")
            .field("players", &self.players.read().len())
            .field("outbox", &self.outbox.lock().len())
            .finish()
    }
}

impl ProgressionStore {
    pub fn new(rules: ProgressRules, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            players: RwLock::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            outbox: Mutex::new(Vec::new()),
            sink,
        }
    }

    pub fn rules(&self) -> Arc<ProgressRules> {
        Arc::clone(&self.rules.read())
    }

    // ---- session lifecycle ----

    /// Start a session; the returned token must accompany the loaded data.
    pub fn begin_session(&self, player: PlayerId) -> SessionToken {
        let serial = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.sessions.lock().insert(player, serial);
        SessionToken { player, serial }
    }

    pub fn is_online(&self, player: PlayerId) -> bool {
        self.sessions.lock().contains_key(&player)
    }

    /// Install data loaded for a session. Refused when the session has ended
    /// or been replaced, so a late load never resurrects a departed player.
    pub fn insert_loaded(
        &self,
        token: SessionToken,
        mut progress: PlayerProgress,
    ) -> Result<(), ProgressError> {
        let rules = self.rules();
        let sessions = self.sessions.lock();
        if sessions.get(&token.player) != Some(&token.serial) {
            tracing::debug!(player = %token.player, "discarding load for ended session");
            return Err(ProgressError::StaleSession(token.player));
        }
        progress.id = token.player;
        let added = progress.backfill(rules.achievement_ids());
        let revision = u64::from(added > 0);
        self.players.write().insert(
            token.player,
            Arc::new(Mutex::new(Slot {
                progress,
                revision,
                saved_revision: 0,
            })),
        );
        drop(sessions);
        Ok(())
    }

    /// End a session and hand back the final state for flushing.
    pub fn end_session(&self, player: PlayerId) -> Option<PlayerProgress> {
        let mut sessions = self.sessions.lock();
        sessions.remove(&player);
        let slot = self.players.write().remove(&player)?;
        drop(sessions);
        let progress = slot.lock().progress.clone();
        Some(progress)
    }

    pub fn get(&self, player: PlayerId) -> Option<PlayerProgress> {
        self.slot(player).map(|s| s.lock().progress.clone())
    }

    pub fn loaded_players(&self) -> Vec<PlayerId> {
        self.players.read().keys().copied().collect()
    }

    fn slot(&self, player: PlayerId) -> Option<Arc<Mutex<Slot>>> {
        self.players.read().get(&player).cloned()
    }

    fn require(&self, player: PlayerId) -> Result<Arc<Mutex<Slot>>, ProgressError> {
        self.slot(player).ok_or(ProgressError::UnknownPlayer(player))
    }

    /// Run `f` under the player's lock. Bumps the revision when `f` reports a
    /// change, then emits notifications and queues sync changes.
    fn mutate<T>(
        &self,
        player: PlayerId,
        f: impl FnOnce(&mut PlayerProgress, &ProgressRules, &mut Effects) -> Result<(T, bool), ProgressError>,
    ) -> Result<T, ProgressError> {
        let slot = self.require(player)?;
        let rules = self.rules();
        let mut effects = Effects::default();
        let value = {
            let mut guard = slot.lock();
            let (value, changed) = f(&mut guard.progress, &rules, &mut effects)?;
            if changed {
                guard.revision += 1;
            }
            value
        };
        self.publish(player, effects);
        Ok(value)
    }

    fn publish(&self, player: PlayerId, effects: Effects) {
        if !effects.changes.is_empty() {
            let mut outbox = self.outbox.lock();
            outbox.extend(
                effects
                    .changes
                    .into_iter()
                    .map(|change| PendingChange { player, change }),
            );
        }
        for n in effects.notifications {
            self.sink.notify(n);
        }
    }

    // ---- mining and achievements ----

    /// Credit `blocks` mined blocks of `material`.
    pub fn apply_mining_outcome(
        &self,
        player: PlayerId,
        material: Material,
        blocks: u32,
    ) -> Result<MiningProgress, ProgressError> {
        self.mutate(player, |p, rules, fx| {
            if blocks == 0 {
                return Ok((MiningProgress::default(), false));
            }
            let old = p.blocks_mined;
            p.blocks_mined = old.saturating_add(u64::from(blocks));
            let mut result = MiningProgress {
                blocks_mined: p.blocks_mined,
                ..MiningProgress::default()
            };

            if rules.levels.enabled() {
                result.xp_gained = rules.xp_between(old, p.blocks_mined);
                p.experience = p.experience.saturating_add(result.xp_gained);
                result.levels_gained = level_up(p, rules, fx);
            }

            for def in &rules.achievements {
                match &def.kind {
                    AchievementKind::BlockMine(filter) if filter.matches(material) => {
                        tick(p, def, u64::from(blocks), fx);
                    }
                    AchievementKind::TotalBlocks => {
                        tick(p, def, u64::from(blocks), fx);
                    }
                    _ => {}
                }
            }
            Ok((result, true))
        })
    }

    /// Advance one achievement by `delta`, capped at its target.
    pub fn apply_achievement_tick(
        &self,
        player: PlayerId,
        achievement: &str,
        delta: u64,
    ) -> Result<u64, ProgressError> {
        self.mutate(player, |p, rules, fx| {
            let def = rules
                .achievement(achievement)
                .ok_or_else(|| ProgressError::UnknownAchievement(achievement.to_string()))?;
            let changed = tick(p, def, delta, fx);
            Ok((p.achievement(achievement).progress, changed))
        })
    }

    /// Mark a completed achievement claimed and release its rewards.
    /// A second claim fails and releases nothing.
    pub fn claim_achievement(
        &self,
        player: PlayerId,
        achievement: &str,
    ) -> Result<ClaimReceipt, ProgressError> {
        self.mutate(player, |p, rules, fx| {
            let def = rules
                .achievement(achievement)
                .ok_or_else(|| ProgressError::UnknownAchievement(achievement.to_string()))?;
            let entry = p.achievements.entry(def.id.clone()).or_default();
            if entry.claimed {
                return Err(ProgressError::AlreadyClaimed(def.id.clone()));
            }
            if entry.progress < def.target {
                return Err(ProgressError::NotCompleted(def.id.clone()));
            }
            entry.claimed = true;
            fx.changes.push(ProgressChange::AchievementProgress {
                id: def.id.clone(),
                progress: entry.progress,
                claimed: true,
            });
            let receipt = ClaimReceipt {
                player: p.id,
                achievement: def.id.clone(),
                money: def.money_reward,
                items: def.item_rewards.clone(),
            };
            Ok((receipt, true))
        })
    }

    /// Admin override of a player's level. Experience restarts at zero.
    pub fn set_level(&self, player: PlayerId, level: u32) -> Result<(), ProgressError> {
        self.mutate(player, |p, rules, fx| {
            if level == 0 || level > rules.levels.max_level() {
                return Err(ProgressError::InvalidLevel(level));
            }
            let changed = set_level_inner(p, rules, level, 0, fx);
            Ok(((), changed))
        })
    }

    pub fn set_tool_enabled(
        &self,
        player: PlayerId,
        tool: ToolCategory,
        enabled: bool,
    ) -> Result<bool, ProgressError> {
        self.mutate(player, |p, _, fx| {
            let changed = p.is_tool_enabled(tool) != enabled;
            p.tools.insert(tool, enabled);
            if changed {
                fx.changes.push(ProgressChange::ToolToggle { tool, enabled });
            }
            Ok((changed, changed))
        })
    }

    /// Spend one skill point. Returns the new skill level.
    pub fn upgrade_skill(&self, player: PlayerId, skill: Skill) -> Result<u32, ProgressError> {
        self.mutate(player, |p, rules, _| {
            if p.skills.get(skill) >= rules.skill_max_level {
                return Err(ProgressError::SkillMaxed(skill));
            }
            if p.skill_points == 0 {
                return Err(ProgressError::NoSkillPoints);
            }
            p.skill_points -= 1;
            Ok((p.skills.raise(skill), true))
        })
    }

    /// Cluster cap for the player's current level.
    pub fn max_blocks_for(&self, player: PlayerId) -> Option<u32> {
        let level = self.slot(player)?.lock().progress.level;
        Some(self.rules().levels.max_blocks_for(level))
    }

    // ---- persistence bookkeeping ----

    pub fn is_dirty(&self, player: PlayerId) -> bool {
        self.slot(player).is_some_and(|s| s.lock().is_dirty())
    }

    /// Copies of every dirty player, each tagged with its revision.
    pub fn dirty_snapshots(&self) -> Vec<DirtySnapshot> {
        let slots: Vec<_> = self.players.read().values().cloned().collect();
        slots
            .iter()
            .filter_map(|slot| {
                let guard = slot.lock();
                guard.is_dirty().then(|| DirtySnapshot {
                    progress: guard.progress.clone(),
                    revision: guard.revision,
                })
            })
            .collect()
    }

    /// Record that `revision` reached storage. Later changes stay dirty.
    pub fn mark_saved(&self, player: PlayerId, revision: u64) {
        if let Some(slot) = self.slot(player) {
            let mut guard = slot.lock();
            if revision > guard.saved_revision && revision <= guard.revision {
                guard.saved_revision = revision;
            }
        }
    }

    /// Take every queued change for the shared change log.
    pub fn drain_outbox(&self) -> Vec<PendingChange> {
        std::mem::take(&mut *self.outbox.lock())
    }

    /// Put changes back after a failed append, ahead of newer ones.
    pub fn requeue(&self, mut changes: Vec<PendingChange>) {
        let mut outbox = self.outbox.lock();
        changes.append(&mut outbox);
        *outbox = changes;
    }

    // ---- replication ----

    /// Replay a change made by another server.
    ///
    /// Values are absolute so replaying twice equals replaying once. Nothing
    /// is re-queued, no notification fires and the dirty flag is untouched:
    /// the originating server already persisted the change. Returns whether
    /// anything changed; players not loaded here are ignored.
    pub fn apply_remote(&self, player: PlayerId, change: &ProgressChange) -> bool {
        let Some(slot) = self.slot(player) else {
            return false;
        };
        let rules = self.rules();
        let mut discard = Effects::default();
        let mut guard = slot.lock();
        let p = &mut guard.progress;
        match change {
            ProgressChange::AchievementProgress {
                id,
                progress,
                claimed,
            } => {
                let cap = rules.achievement(id).map_or(*progress, |d| d.target);
                let entry = p.achievements.entry(id.clone()).or_default();
                let before = *entry;
                entry.progress = entry.progress.max((*progress).min(cap));
                entry.claimed |= *claimed;
                *entry != before
            }
            ProgressChange::Level { level, experience } => {
                if *level == 0 {
                    tracing::warn!(%player, "ignoring remote level 0");
                    return false;
                }
                set_level_inner(p, &rules, *level, *experience, &mut discard)
            }
            ProgressChange::ToolToggle { tool, enabled } => {
                let changed = p.is_tool_enabled(*tool) != *enabled;
                p.tools.insert(*tool, *enabled);
                changed
            }
        }
    }

    /// Swap in new rules and backfill zero-progress entries for loaded
    /// players. Returns the ids of achievements that did not exist before.
    pub fn reload_rules(&self, rules: ProgressRules) -> Vec<String> {
        let old: BTreeSet<String> = self.rules().achievement_ids().map(str::to_string).collect();
        let added: Vec<String> = rules
            .achievement_ids()
            .filter(|id| !old.contains(*id))
            .map(str::to_string)
            .collect();
        let all: Vec<String> = rules.achievement_ids().map(str::to_string).collect();
        *self.rules.write() = Arc::new(rules);

        let slots: Vec<_> = self.players.read().values().cloned().collect();
        for slot in slots {
            let mut guard = slot.lock();
            if guard.progress.backfill(all.iter().map(String::as_str)) > 0 {
                guard.revision += 1;
            }
        }
        if !added.is_empty() {
            tracing::info!(added = ?added, "new achievements registered");
        }
        added
    }
}

/// Raise the level while experience covers the next threshold.
fn level_up(p: &mut PlayerProgress, rules: &ProgressRules, fx: &mut Effects) -> u32 {
    let start = p.level;
    while let Some(need) = rules.levels.xp_to_advance(p.level) {
        if p.experience < need {
            break;
        }
        p.experience -= need;
        p.level += 1;
        p.skill_points += 1;
        fx.notifications.push(Notification::LevelUp {
            player: p.id,
            level: p.level,
        });
    }
    let gained = p.level - start;
    if gained > 0 {
        fx.changes.push(ProgressChange::Level {
            level: p.level,
            experience: p.experience,
        });
        level_achievements(p, rules, fx);
    }
    gained
}

fn set_level_inner(
    p: &mut PlayerProgress,
    rules: &ProgressRules,
    level: u32,
    experience: u64,
    fx: &mut Effects,
) -> bool {
    if p.level == level && p.experience == experience {
        return false;
    }
    p.level = level;
    p.experience = experience;
    fx.changes.push(ProgressChange::Level { level, experience });
    level_achievements(p, rules, fx);
    true
}

/// Level achievements track the level itself.
fn level_achievements(p: &mut PlayerProgress, rules: &ProgressRules, fx: &mut Effects) {
    for def in &rules.achievements {
        if def.kind == AchievementKind::Level {
            let current = p.achievement(&def.id).progress;
            let level = u64::from(p.level);
            if level > current {
                tick(p, def, level - current, fx);
            }
        }
    }
}

/// Add `delta` to one achievement, capped at the target. Claimed and
/// completed entries do not move. Returns whether progress changed.
fn tick(p: &mut PlayerProgress, def: &AchievementDefinition, delta: u64, fx: &mut Effects) -> bool {
    let entry = p.achievements.entry(def.id.clone()).or_default();
    if entry.claimed || entry.progress >= def.target || delta == 0 {
        return false;
    }
    let old = entry.progress;
    entry.progress = old.saturating_add(delta).min(def.target);
    let new = entry.progress;

    if new == def.target {
        fx.notifications.push(Notification::AchievementCompleted {
            player: p.id,
            achievement: def.id.clone(),
            name: def.name.clone(),
        });
        fx.changes.push(ProgressChange::AchievementProgress {
            id: def.id.clone(),
            progress: new,
            claimed: false,
        });
    } else {
        let (before, after) = (def.percent(old), def.percent(new));
        if let Some(threshold) = [75u8, 50, 25].into_iter().find(|t| before < *t && after >= *t) {
            fx.notifications.push(Notification::AchievementProgress {
                player: p.id,
                achievement: def.id.clone(),
                name: def.name.clone(),
                percent: threshold,
            });
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::CollectingSink;
    use std::collections::BTreeMap;
    use veinmine_config::BlockFilter;

    fn def(id: &str, kind: AchievementKind, target: u64) -> AchievementDefinition {
        AchievementDefinition {
            id: id.into(),
            name: id.to_uppercase(),
            kind,
            target,
            money_reward: 100.0,
            item_rewards: vec![ItemStack::new(Material::Diamond, 2)],
        }
    }

    fn rules() -> ProgressRules {
        let mut rules = ProgressRules::default();
        rules.levels = crate::LevelTable::new(
            true,
            BTreeMap::from([(2, 3), (3, 5), (4, 100)]),
            BTreeMap::from([(1, 8), (3, 16)]),
            64,
        );
        rules.blocks_per_xp = 5;
        rules.achievements = vec![
            def("iron", AchievementKind::BlockMine(BlockFilter::new(["*IRON_ORE"])), 40),
            def("total", AchievementKind::TotalBlocks, 100),
            def("lvl3", AchievementKind::Level, 3),
        ];
        rules
    }

    fn store() -> (ProgressionStore, Arc<CollectingSink>, PlayerId) {
        let sink = Arc::new(CollectingSink::default());
        let store = ProgressionStore::new(rules(), sink.clone());
        let player = PlayerId::new();
        let token = store.begin_session(player);
        store
            .insert_loaded(token, PlayerProgress::new(player, "Steve"))
            .unwrap();
        (store, sink, player)
    }

    #[test]
    fn loaded_player_gets_backfilled_entries() {
        let (store, _, player) = store();
        let p = store.get(player).unwrap();
        assert_eq!(p.achievements.len(), 3);
        assert!(store.is_dirty(player));
    }

    #[test]
    fn mining_levels_up_and_grants_points() {
        let (store, sink, player) = store();
        // 27 blocks -> 5 xp: level 2 costs 3, leaving 2 (< 5 for level 3).
        let r = store.apply_mining_outcome(player, Material::IronOre, 27).unwrap();
        assert_eq!(r.xp_gained, 5);
        assert_eq!(r.levels_gained, 1);
        let p = store.get(player).unwrap();
        assert_eq!((p.level, p.experience, p.skill_points), (2, 2, 1));
        assert_eq!(p.blocks_mined, 27);
        assert_eq!(p.achievement("iron").progress, 27);
        assert_eq!(p.achievement("total").progress, 27);
        assert_eq!(p.achievement("lvl3").progress, 2);
        let notes = sink.take();
        assert!(notes.contains(&Notification::LevelUp { player, level: 2 }));
        // 27/40 crosses 25% and 50% at once; only the highest is reported.
        assert!(notes.iter().any(|n| matches!(
            n,
            Notification::AchievementProgress { achievement, percent: 50, .. } if achievement == "iron"
        )));
    }

    #[test]
    fn total_blocks_counts_every_material() {
        let (store, sink, player) = store();
        store.apply_mining_outcome(player, Material::Stone, 60).unwrap();
        store.apply_mining_outcome(player, Material::CoalOre, 50).unwrap();
        let p = store.get(player).unwrap();
        assert_eq!(p.achievement("total").progress, 100);
        assert_eq!(p.achievement("iron").progress, 0);
        let done: Vec<_> = sink
            .take()
            .into_iter()
            .filter(|n| matches!(n, Notification::AchievementCompleted { achievement, .. } if achievement == "total"))
            .collect();
        assert_eq!(done.len(), 1);
    }

    #[test]
    fn xp_remainder_carries_across_calls() {
        let (store, _, player) = store();
        for _ in 0..5 {
            store.apply_mining_outcome(player, Material::Stone, 1).unwrap();
        }
        let p = store.get(player).unwrap();
        assert_eq!(p.experience, 1);
        assert_eq!(p.achievement("iron").progress, 0);
    }

    #[test]
    fn ticks_are_monotone_and_capped() {
        let (store, sink, player) = store();
        let mut last = 0;
        for delta in [0, 7, 13, 0, 30, 50] {
            let now = store.apply_achievement_tick(player, "iron", delta).unwrap();
            assert!(now >= last && now <= 40);
            last = now;
        }
        assert_eq!(last, 40);
        let done = sink
            .take()
            .into_iter()
            .filter(|n| matches!(n, Notification::AchievementCompleted { .. }))
            .count();
        assert_eq!(done, 1);
        assert_eq!(
            store.apply_achievement_tick(player, "nope", 1),
            Err(ProgressError::UnknownAchievement("nope".into()))
        );
    }

    #[test]
    fn completion_queues_sync_change() {
        let (store, _, player) = store();
        store.apply_achievement_tick(player, "iron", 40).unwrap();
        let out = store.drain_outbox();
        assert_eq!(
            out,
            vec![PendingChange {
                player,
                change: ProgressChange::AchievementProgress {
                    id: "iron".into(),
                    progress: 40,
                    claimed: false
                }
            }]
        );
        assert!(store.drain_outbox().is_empty());
    }

    #[test]
    fn claim_once() {
        let (store, _, player) = store();
        assert_eq!(
            store.claim_achievement(player, "iron"),
            Err(ProgressError::NotCompleted("iron".into()))
        );
        store.apply_achievement_tick(player, "iron", 40).unwrap();
        let receipt = store.claim_achievement(player, "iron").unwrap();
        assert_eq!(receipt.money, 100.0);
        assert_eq!(receipt.items, vec![ItemStack::new(Material::Diamond, 2)]);
        assert_eq!(
            store.claim_achievement(player, "iron"),
            Err(ProgressError::AlreadyClaimed("iron".into()))
        );
        assert!(store.get(player).unwrap().achievement("iron").claimed);
    }

    #[test]
    fn revision_tracking() {
        let (store, _, player) = store();
        let snap = store.dirty_snapshots().pop().unwrap();
        store.apply_mining_outcome(player, Material::Stone, 1).unwrap();
        store.mark_saved(player, snap.revision);
        // A change made after the snapshot keeps the player dirty.
        assert!(store.is_dirty(player));
        let snap = store.dirty_snapshots().pop().unwrap();
        store.mark_saved(player, snap.revision);
        assert!(!store.is_dirty(player));
        assert!(store.dirty_snapshots().is_empty());
    }

    #[test]
    fn stale_load_does_not_resurrect() {
        let sink = Arc::new(CollectingSink::default());
        let store = ProgressionStore::new(rules(), sink);
        let player = PlayerId::new();
        let first = store.begin_session(player);
        assert_eq!(store.end_session(player), None);
        assert_eq!(
            store.insert_loaded(first, PlayerProgress::new(player, "x")),
            Err(ProgressError::StaleSession(player))
        );
        assert!(store.get(player).is_none());

        // A rejoin replaces the token; the older load is refused.
        let a = store.begin_session(player);
        let b = store.begin_session(player);
        assert!(store.insert_loaded(a, PlayerProgress::new(player, "x")).is_err());
        assert!(store.insert_loaded(b, PlayerProgress::new(player, "x")).is_ok());
    }

    #[test]
    fn remote_replay_is_idempotent_and_silent() {
        let (store, sink, player) = store();
        let snap = store.dirty_snapshots().pop().unwrap();
        store.mark_saved(player, snap.revision);
        sink.take();

        let change = ProgressChange::AchievementProgress {
            id: "total".into(),
            progress: 100,
            claimed: true,
        };
        assert!(store.apply_remote(player, &change));
        let once = store.get(player).unwrap();
        assert!(!store.apply_remote(player, &change));
        assert_eq!(store.get(player).unwrap(), once);

        let level = ProgressChange::Level {
            level: 3,
            experience: 1,
        };
        assert!(store.apply_remote(player, &level));
        assert!(!store.apply_remote(player, &level));
        let p = store.get(player).unwrap();
        assert_eq!((p.level, p.experience), (3, 1));
        assert_eq!(p.achievement("lvl3").progress, 3);

        assert!(sink.is_empty());
        assert!(store.drain_outbox().is_empty());
        assert!(!store.is_dirty(player));
        assert!(!store.apply_remote(PlayerId::new(), &level));
    }

    #[test]
    fn set_level_validates() {
        let (store, _, player) = store();
        assert_eq!(store.set_level(player, 0), Err(ProgressError::InvalidLevel(0)));
        assert_eq!(store.set_level(player, 9), Err(ProgressError::InvalidLevel(9)));
        store.set_level(player, 3).unwrap();
        assert_eq!(store.max_blocks_for(player), Some(16));
        assert!(store.drain_outbox().iter().any(|c| matches!(
            c.change,
            ProgressChange::Level { level: 3, experience: 0 }
        )));
    }

    #[test]
    fn skills_need_points_and_respect_cap() {
        let (store, _, player) = store();
        assert_eq!(
            store.upgrade_skill(player, Skill::Luck),
            Err(ProgressError::NoSkillPoints)
        );
        store.apply_mining_outcome(player, Material::Stone, 15).unwrap();
        assert_eq!(store.upgrade_skill(player, Skill::Luck), Ok(1));
        assert_eq!(store.get(player).unwrap().skill_points, 0);
    }

    #[test]
    fn tool_toggle_queues_only_real_changes() {
        let (store, _, player) = store();
        assert_eq!(store.set_tool_enabled(player, ToolCategory::Axe, true), Ok(false));
        assert_eq!(store.set_tool_enabled(player, ToolCategory::Axe, false), Ok(true));
        assert_eq!(store.drain_outbox().len(), 1);
        assert!(!store.get(player).unwrap().is_tool_enabled(ToolCategory::Axe));
    }

    #[test]
    fn reload_backfills_new_achievements() {
        let (store, _, player) = store();
        let mut next = rules();
        next.achievements.push(def("fresh", AchievementKind::TotalBlocks, 5));
        assert_eq!(store.reload_rules(next.clone()), vec!["fresh".to_string()]);
        assert_eq!(store.get(player).unwrap().achievement("fresh").progress, 0);
        assert!(store.get(player).unwrap().achievements.contains_key("fresh"));
        assert!(store.reload_rules(next).is_empty());
    }
}
