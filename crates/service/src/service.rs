use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use veinmine_common::{Material, PlayerId, Position, ToolCategory};
use veinmine_config::PluginConfig;
use veinmine_mining::{
    ApplyReport, BlockAccess, CostSettings, InventoryAccess, MaterialPolicy, MiningEngine,
    MiningRequest,
};
use veinmine_persist::{
    GatewayStatus, PersistenceGateway, ReconcileReport, SaveTarget, StoreError, SyncCursor,
    SyncRecord,
};
use veinmine_progress::{
    ClaimReceipt, MiningProgress, NotificationSink, PlayerProgress, ProgressChange, ProgressError,
    ProgressRules, ProgressionStore, RewardSink, Skill,
};

use crate::sync::{SyncReport, SyncWorker};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("final flush did not finish within {0:?}")]
    FlushTimeout(Duration),
    #[error("player {0} has no stored progress")]
    NotStored(PlayerId),
}

/// The tool in the player's hand when a block broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldTool {
    pub category: ToolCategory,
    pub silk_touch: bool,
    pub fortune: u32,
    pub unbreaking: u32,
}

impl HeldTool {
    pub fn plain(category: ToolCategory) -> Self {
        Self {
            category,
            silk_touch: false,
            fortune: 0,
            unbreaking: 0,
        }
    }
}

/// Why a break did not turn into a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ToolDisabled,
    NotAllowed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BreakResult {
    Skipped(SkipReason),
    Mined {
        report: ApplyReport,
        progress: MiningProgress,
    },
}

/// What a flush wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub players: usize,
    pub target: Option<SaveTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub gateway: GatewayStatus,
    pub loaded_players: usize,
    pub dirty_players: usize,
    pub cursor: Option<SyncCursor>,
}

struct Inner {
    config: RwLock<Arc<PluginConfig>>,
    policy: RwLock<Arc<MaterialPolicy>>,
    engine: MiningEngine,
    store: Arc<ProgressionStore>,
    gateway: Arc<PersistenceGateway>,
    sync: SyncWorker,
    rewards: Arc<dyn RewardSink>,
    rng: Mutex<ChaCha8Rng>,
    /// Held across every load and save of player rows, so a save taken from
    /// older state never lands after a newer one and a rejoin reads the
    /// row its quit wrote.
    save_lane: tokio::sync::Mutex<()>,
}

/// Front door for the host game: break events, sessions, admin commands.
///
/// Cheap to clone. Storage work runs on the blocking pool; break handling
/// touches only memory and is safe to call from the game thread.
#[derive(Clone)]
pub struct VeinService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for VeinService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VeinService")
            .field("gateway", &self.inner.gateway)
            .field("store", &self.inner.store)
            .finish()
    }
}

impl VeinService {
    /// Connect to storage and build the service.
    pub async fn start(
        config: PluginConfig,
        sink: Arc<dyn NotificationSink>,
        rewards: Arc<dyn RewardSink>,
    ) -> Result<Self, ServiceError> {
        let storage = config.storage.clone();
        let server = config.server_id.clone();
        let gateway = Arc::new(
            tokio::task::spawn_blocking(move || PersistenceGateway::connect(&storage, server))
                .await?,
        );
        let g = Arc::clone(&gateway);
        let head = tokio::task::spawn_blocking(move || g.sync_head()).await?;
        Ok(Self::assemble(config, gateway, head, sink, rewards))
    }

    /// Build around an already connected gateway. Blocks on the head query.
    pub fn with_gateway(
        config: PluginConfig,
        gateway: PersistenceGateway,
        sink: Arc<dyn NotificationSink>,
        rewards: Arc<dyn RewardSink>,
    ) -> Self {
        let head = gateway.sync_head();
        Self::assemble(config, Arc::new(gateway), head, sink, rewards)
    }

    fn assemble(
        config: PluginConfig,
        gateway: Arc<PersistenceGateway>,
        head: Option<SyncCursor>,
        sink: Arc<dyn NotificationSink>,
        rewards: Arc<dyn RewardSink>,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let policy = MaterialPolicy::new(config.allowed_materials.clone());
        let store = ProgressionStore::new(ProgressRules::from_config(&config), sink);
        tracing::info!(
            server = %config.server_id,
            mode = %gateway.mode(),
            achievements = config.achievements.len(),
            "veinmine service ready"
        );
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(Arc::new(config)),
                policy: RwLock::new(Arc::new(policy)),
                engine: MiningEngine::default(),
                store: Arc::new(store),
                gateway,
                sync: SyncWorker::new(head),
                rewards,
                rng: Mutex::new(rng),
                save_lane: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> Arc<PluginConfig> {
        Arc::clone(&*self.inner.config.read())
    }

    pub fn store(&self) -> &Arc<ProgressionStore> {
        &self.inner.store
    }

    pub fn gateway(&self) -> &Arc<PersistenceGateway> {
        &self.inner.gateway
    }

    pub fn status(&self) -> ServiceStatus {
        let store = &self.inner.store;
        ServiceStatus {
            gateway: self.inner.gateway.status(),
            loaded_players: store.loaded_players().len(),
            dirty_players: store
                .loaded_players()
                .into_iter()
                .filter(|p| store.is_dirty(*p))
                .count(),
            cursor: self.inner.sync.cursor(),
        }
    }

    // ---- sessions ----

    /// Load a joining player off the main thread. A quit that lands before
    /// the load finishes wins; the loaded data is then discarded.
    pub async fn player_joined(&self, player: PlayerId, name: &str) -> Result<(), ServiceError> {
        let token = self.inner.store.begin_session(player);
        let gateway = Arc::clone(&self.inner.gateway);
        let name = name.to_string();
        let _lane = self.inner.save_lane.lock().await;
        let progress = tokio::task::spawn_blocking(move || gateway.load(player, &name)).await?;
        match self.inner.store.insert_loaded(token, progress) {
            Ok(()) => Ok(()),
            Err(ProgressError::StaleSession(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// End the session and save its final state.
    pub async fn player_quit(&self, player: PlayerId) -> Result<Option<SaveTarget>, ServiceError> {
        let Some(progress) = self.inner.store.end_session(player) else {
            return Ok(None);
        };
        let _lane = self.inner.save_lane.lock().await;
        let gateway = Arc::clone(&self.inner.gateway);
        let target = tokio::task::spawn_blocking(move || gateway.save_batch(&[progress])).await??;
        tracing::debug!(%player, ?target, "saved on quit");
        Ok(Some(target))
    }

    // ---- mining ----

    /// Handle a block the player just broke at `origin`.
    ///
    /// The origin itself is cleared by the host; this clears the rest of the
    /// cluster, hands out drops and charges the player.
    pub fn handle_break<B, I>(
        &self,
        player: PlayerId,
        origin: Position,
        material: Material,
        tool: HeldTool,
        blocks: &mut B,
        inventory: &mut I,
    ) -> Result<BreakResult, ServiceError>
    where
        B: BlockAccess + ?Sized,
        I: InventoryAccess + ?Sized,
    {
        let store = &self.inner.store;
        let progress = store
            .get(player)
            .ok_or(ProgressError::UnknownPlayer(player))?;
        if !progress.is_tool_enabled(tool.category) {
            return Ok(BreakResult::Skipped(SkipReason::ToolDisabled));
        }
        let policy = Arc::clone(&*self.inner.policy.read());
        if !policy.is_allowed(material, tool.category) {
            return Ok(BreakResult::Skipped(SkipReason::NotAllowed));
        }
        let max_cluster_size = store
            .max_blocks_for(player)
            .ok_or(ProgressError::UnknownPlayer(player))? as usize;

        let config = self.config();
        let skills = &progress.skills;
        let costs = CostSettings::new(config.durability_multiplier, config.hunger_multiplier)
            .reduced(skills.durability_cut(), skills.hunger_cut());
        let req = MiningRequest {
            origin,
            material,
            max_cluster_size,
            allowed_materials: policy.allowed_for(tool.category),
            tool: tool.category,
            silk_touch: tool.silk_touch,
            fortune_level: tool.fortune + skills.extra_fortune(),
            unbreaking_level: tool.unbreaking,
            costs,
        };

        let outcome = {
            let mut rng = self.inner.rng.lock();
            self.inner.engine.execute(&req, &*blocks, &mut *rng)
        };
        if !outcome.accepted() {
            return Ok(BreakResult::Skipped(SkipReason::Rejected));
        }
        let report = self.inner.engine.apply(&outcome, player, blocks, inventory);
        let progress = store.apply_mining_outcome(player, material, report.blocks_mined())?;
        Ok(BreakResult::Mined { report, progress })
    }

    // ---- player commands ----

    /// Claim an achievement and pay out its rewards.
    pub fn claim(&self, player: PlayerId, achievement: &str) -> Result<ClaimReceipt, ServiceError> {
        let receipt = self.inner.store.claim_achievement(player, achievement)?;
        if receipt.money > 0.0 {
            self.inner.rewards.deposit(player, receipt.money);
        }
        if !receipt.items.is_empty() {
            self.inner.rewards.give_items(player, &receipt.items);
        }
        tracing::info!(%player, achievement = %receipt.achievement, money = receipt.money, "achievement claimed");
        Ok(receipt)
    }

    pub fn set_tool_enabled(
        &self,
        player: PlayerId,
        tool: ToolCategory,
        enabled: bool,
    ) -> Result<bool, ServiceError> {
        Ok(self.inner.store.set_tool_enabled(player, tool, enabled)?)
    }

    pub fn upgrade_skill(&self, player: PlayerId, skill: Skill) -> Result<u32, ServiceError> {
        Ok(self.inner.store.upgrade_skill(player, skill)?)
    }

    // ---- admin ----

    /// Allowed materials per tool, after validation.
    pub fn dump_allowed_materials(&self) -> BTreeMap<ToolCategory, BTreeSet<Material>> {
        self.inner.policy.read().allowed_materials().clone()
    }

    /// Set a player's level. Loaded players change in memory; anyone else is
    /// read from storage, changed and written straight back. An offline player
    /// whose row cannot be read is left alone.
    pub async fn set_player_level(&self, player: PlayerId, level: u32) -> Result<(), ServiceError> {
        let store = &self.inner.store;
        if store.get(player).is_some() {
            store.set_level(player, level)?;
            return Ok(());
        }
        let max = store.rules().levels.max_level();
        if level == 0 || level > max {
            return Err(ProgressError::InvalidLevel(level).into());
        }
        let gateway = Arc::clone(&self.inner.gateway);
        let _lane = self.inner.save_lane.lock().await;
        let found = tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
            let Some(mut progress) = gateway.try_load(player)? else {
                return Ok(false);
            };
            progress.level = level;
            progress.experience = 0;
            gateway.save_batch(&[progress])?;
            let change = ProgressChange::Level {
                level,
                experience: 0,
            };
            gateway.append_sync_events(&[SyncRecord::from_change(player, &change)])?;
            Ok(true)
        })
        .await??;
        if !found {
            return Err(ServiceError::NotStored(player));
        }
        tracing::info!(%player, level, "offline player level set");
        Ok(())
    }

    /// Swap in a new configuration. Returns achievement ids added by it.
    pub async fn reload(&self, config: PluginConfig) -> Result<Vec<String>, ServiceError> {
        let policy = MaterialPolicy::new(config.allowed_materials.clone());
        let added = self
            .inner
            .store
            .reload_rules(ProgressRules::from_config(&config));
        *self.inner.policy.write() = Arc::new(policy);
        *self.inner.config.write() = Arc::new(config);
        if !added.is_empty() {
            let gateway = Arc::clone(&self.inner.gateway);
            let ids = added.clone();
            let rows = tokio::task::spawn_blocking(move || gateway.backfill_achievements(&ids))
                .await??;
            tracing::info!(rows, "backfilled stored players");
        }
        Ok(added)
    }

    // ---- persistence ----

    /// Save every dirty player in one batch.
    pub async fn flush(&self) -> Result<FlushReport, ServiceError> {
        let _lane = self.inner.save_lane.lock().await;
        self.flush_in_lane().await
    }

    /// Snapshot and save; the caller holds the save lane.
    async fn flush_in_lane(&self) -> Result<FlushReport, ServiceError> {
        let dirty = self.inner.store.dirty_snapshots();
        if dirty.is_empty() {
            return Ok(FlushReport::default());
        }
        let players: Vec<PlayerProgress> = dirty.iter().map(|d| d.progress.clone()).collect();
        let gateway = Arc::clone(&self.inner.gateway);
        let target = tokio::task::spawn_blocking(move || {
            tracing::debug_span!("flush", players = players.len())
                .in_scope(|| gateway.save_batch(&players))
        })
        .await??;
        for d in &dirty {
            self.inner.store.mark_saved(d.progress.id, d.revision);
        }
        tracing::debug!(players = dirty.len(), ?target, "flushed dirty players");
        Ok(FlushReport {
            players: dirty.len(),
            target: Some(target),
        })
    }

    /// Push pending changes and replay what other servers wrote.
    pub async fn sync_now(&self) -> Result<SyncReport, ServiceError> {
        let inner = Arc::clone(&self.inner);
        let report =
            tokio::task::spawn_blocking(move || inner.sync.run_once(&inner.store, &inner.gateway))
                .await?;
        Ok(report)
    }

    /// Flush, then run a sync pass.
    pub async fn force_sync(&self) -> Result<(FlushReport, SyncReport), ServiceError> {
        let flushed = self.flush().await?;
        let synced = self.sync_now().await?;
        Ok((flushed, synced))
    }

    /// Retry the shared store and move fallback data back into it.
    pub async fn reconnect_store(&self) -> Result<ReconcileReport, ServiceError> {
        let gateway = Arc::clone(&self.inner.gateway);
        let _lane = self.inner.save_lane.lock().await;
        let report = tokio::task::spawn_blocking(move || gateway.reconnect()).await??;
        // Loaded players may hold changes that only reached the snapshot.
        self.flush_in_lane().await?;
        Ok(report)
    }

    /// Final flush, bounded by `limit`.
    pub async fn shutdown(&self, limit: Duration) -> Result<FlushReport, ServiceError> {
        match tokio::time::timeout(limit, self.force_sync()).await {
            Ok(result) => {
                let (flushed, _) = result?;
                tracing::info!(players = flushed.players, "final flush complete");
                Ok(flushed)
            }
            Err(_) => {
                tracing::error!(?limit, "final flush timed out");
                Err(ServiceError::FlushTimeout(limit))
            }
        }
    }
}
