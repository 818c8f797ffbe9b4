use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use veinmine_common::{PlayerId, ServerId};
use veinmine_config::StorageSettings;
use veinmine_progress::{PlayerProgress, SkillLevels};

use crate::error::StoreError;
use crate::local::{LocalEntry, LocalSnapshot};
use crate::sqlite::{Connector, SharedStore, SqliteConnector};
use crate::sync_log::{SyncBatch, SyncCursor, SyncRecord};

/// Where player data currently goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    /// Shared store reachable; sync is active.
    Shared,
    /// Shared store unreachable; data is kept in the local snapshot until a
    /// reconnect succeeds.
    Fallback,
    /// Shared store disabled by configuration.
    LocalOnly,
}

impl fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shared => "shared",
            Self::Fallback => "fallback",
            Self::LocalOnly => "local-only",
        })
    }
}

/// Where a batch ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTarget {
    Shared,
    Local,
}

/// Result of moving locally-saved players into the shared store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub players: usize,
}

/// Snapshot of the gateway for admin output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayStatus {
    pub mode: GatewayMode,
    pub server: ServerId,
    pub location: String,
    pub local_dir: String,
}

struct State {
    mode: GatewayMode,
    store: Option<Box<dyn SharedStore>>,
}

/// The only component that reads or writes persisted rows.
///
/// Every call is blocking and meant to run off the main thread. Connection
/// trouble never surfaces to callers: the gateway switches to the local
/// snapshot and logs the switch once.
pub struct PersistenceGateway {
    server: ServerId,
    connector: Box<dyn Connector>,
    local: LocalSnapshot,
    retry_attempts: u32,
    retry_backoff: Duration,
    state: Mutex<State>,
    fallback_logged: AtomicBool,
    /// Players handed out as fresh defaults because their row could not be
    /// read, with the mined blocks already credited to the shared row.
    provisional: Mutex<HashMap<PlayerId, u64>>,
}

impl fmt::Debug for PersistenceGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceGateway")
            .field("server", &self.server)
            .field("mode", &self.mode())
            .field("store", &self.connector.describe())
            .finish()
    }
}

impl PersistenceGateway {
    /// Connect to the configured SQLite store.
    pub fn connect(settings: &StorageSettings, server: ServerId) -> Self {
        let connector = SqliteConnector {
            path: settings.database_path.clone(),
            busy_timeout: settings.validity_timeout,
        };
        Self::with_connector(settings, server, Box::new(connector))
    }

    /// Connect through an arbitrary connector. Never fails: an unreachable
    /// store puts the gateway in fallback mode.
    pub fn with_connector(
        settings: &StorageSettings,
        server: ServerId,
        connector: Box<dyn Connector>,
    ) -> Self {
        let gateway = Self {
            server,
            connector,
            local: LocalSnapshot::new(settings.local_dir.clone()),
            retry_attempts: settings.retry_attempts.max(1),
            retry_backoff: settings.retry_backoff,
            state: Mutex::new(State {
                mode: if settings.use_shared_store {
                    GatewayMode::Fallback
                } else {
                    GatewayMode::LocalOnly
                },
                store: None,
            }),
            fallback_logged: AtomicBool::new(false),
            provisional: Mutex::new(HashMap::new()),
        };
        if !settings.use_shared_store {
            tracing::info!(dir = %gateway.local.root().display(), "shared store disabled, saving locally");
            return gateway;
        }
        match gateway.open_store() {
            Ok(store) => {
                {
                    let mut state = gateway.state.lock();
                    state.mode = GatewayMode::Shared;
                    state.store = Some(store);
                }
                tracing::info!(store = %gateway.connector.describe(), server = %gateway.server, "connected to shared store");
                if gateway.local.exists() {
                    if let Err(err) = gateway.reconcile() {
                        tracing::warn!(error = %err, "could not reconcile local snapshot");
                    }
                }
            }
            Err(err) => {
                let mut state = gateway.state.lock();
                gateway.enter_fallback(&mut state, &err);
            }
        }
        gateway
    }

    pub fn server(&self) -> &ServerId {
        &self.server
    }

    pub fn mode(&self) -> GatewayMode {
        self.state.lock().mode
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            mode: self.mode(),
            server: self.server.clone(),
            location: self.connector.describe(),
            local_dir: self.local.root().display().to_string(),
        }
    }

    fn open_store(&self) -> Result<Box<dyn SharedStore>, StoreError> {
        let mut store = self.connector.connect()?;
        store.validate()?;
        Ok(store)
    }

    fn enter_fallback(&self, state: &mut State, cause: &StoreError) {
        state.store = None;
        if state.mode == GatewayMode::LocalOnly {
            return;
        }
        state.mode = GatewayMode::Fallback;
        if !self.fallback_logged.swap(true, Ordering::SeqCst) {
            tracing::warn!(error = %cause, store = %self.connector.describe(), "shared store unreachable, falling back to local snapshot");
        }
    }

    /// Run `op` against the shared store. A connection error earns one
    /// reconnect and one retry; if that fails too the gateway falls back.
    /// `Ok(None)` means the store is not in use.
    fn with_store<T>(
        &self,
        mut op: impl FnMut(&mut dyn SharedStore) -> Result<T, StoreError>,
    ) -> Result<Option<T>, StoreError> {
        let mut state = self.state.lock();
        if state.mode != GatewayMode::Shared {
            return Ok(None);
        }
        let first = match state.store.as_mut() {
            Some(store) => op(store.as_mut()),
            None => Err(StoreError::Unavailable("no connection".into())),
        };
        let err = match first {
            Ok(v) => return Ok(Some(v)),
            Err(err) if !err.is_connection_error() => return Err(err),
            Err(err) => err,
        };
        tracing::debug!(error = %err, "shared store operation failed, reconnecting");
        let retried = self.open_store().and_then(|mut store| {
            let v = op(store.as_mut())?;
            Ok((store, v))
        });
        match retried {
            Ok((store, v)) => {
                state.store = Some(store);
                Ok(Some(v))
            }
            Err(err) => {
                self.enter_fallback(&mut state, &err);
                Ok(None)
            }
        }
    }

    /// Load a player, or a fresh one when the player is unknown or the store
    /// cannot be reached within the retry budget. Never fails.
    pub fn load(&self, player: PlayerId, name: &str) -> PlayerProgress {
        for attempt in 1..=self.retry_attempts {
            match self.with_store(|s| s.load_player(player)) {
                Ok(Some(found)) => {
                    self.provisional.lock().remove(&player);
                    return found.map_or_else(|| PlayerProgress::new(player, name), |p| renamed(p, name));
                }
                Ok(None) => return self.load_local(player, name),
                Err(err) => {
                    tracing::debug!(%player, attempt, error = %err, "load failed");
                    if attempt < self.retry_attempts {
                        std::thread::sleep(self.retry_backoff * attempt);
                    }
                }
            }
        }
        tracing::warn!(%player, attempts = self.retry_attempts, "giving up on load, starting fresh");
        self.load_local(player, name)
    }

    fn load_local(&self, player: PlayerId, name: &str) -> PlayerProgress {
        let shared_configured = self.mode() != GatewayMode::LocalOnly;
        let entry = self.local.load(player).unwrap_or_else(|err| {
            tracing::warn!(%player, error = %err, "local snapshot unreadable");
            None
        });
        match entry {
            Some(entry) => {
                if let Some(credited) = entry.credited {
                    self.provisional.lock().insert(player, credited);
                }
                renamed(entry.progress, name)
            }
            None => {
                if shared_configured {
                    tracing::debug!(%player, "row unreadable, starting from a provisional default");
                    self.provisional.lock().insert(player, 0);
                }
                PlayerProgress::new(player, name)
            }
        }
    }

    /// Read a player's row without inventing one. `Ok(None)` means the
    /// player has never been saved; an unreachable store is an error.
    pub fn try_load(&self, player: PlayerId) -> Result<Option<PlayerProgress>, StoreError> {
        if self.mode() == GatewayMode::LocalOnly {
            return Ok(self.local.load(player)?.map(|e| e.progress));
        }
        self.with_store(|s| s.load_player(player))?
            .ok_or_else(|| StoreError::Unavailable(format!("cannot read player {player}")))
    }

    /// Whether `player` started from a fresh default while the store was down.
    pub fn is_provisional(&self, player: PlayerId) -> bool {
        self.provisional.lock().contains_key(&player)
    }

    fn entries_for(&self, players: &[PlayerProgress]) -> Vec<LocalEntry> {
        let provisional = self.provisional.lock();
        players
            .iter()
            .map(|p| LocalEntry {
                progress: p.clone(),
                credited: provisional.get(&p.id).copied(),
            })
            .collect()
    }

    /// Upsert `entries`, folding provisional copies into their stored rows.
    /// Runs under the state lock, so a credit is never applied twice.
    fn write_merged(
        &self,
        store: &mut dyn SharedStore,
        entries: &[LocalEntry],
    ) -> Result<(), StoreError> {
        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            let row = match entry.credited {
                Some(credited) => match store.load_player(entry.progress.id)? {
                    Some(stored) => merge_provisional(stored, &entry.progress, credited),
                    None => entry.progress.clone(),
                },
                None => entry.progress.clone(),
            };
            rows.push(row);
        }
        store.save_players(&rows)?;

        let mut provisional = self.provisional.lock();
        for entry in entries.iter().filter(|e| e.credited.is_some()) {
            let credited = provisional.entry(entry.progress.id).or_insert(0);
            *credited = (*credited).max(entry.progress.blocks_mined);
        }
        Ok(())
    }

    /// Persist players as one batch. Falls back to the local snapshot when
    /// the shared store is unavailable; only a failing local write errors.
    pub fn save_batch(&self, players: &[PlayerProgress]) -> Result<SaveTarget, StoreError> {
        if players.is_empty() {
            return Ok(if self.mode() == GatewayMode::Shared {
                SaveTarget::Shared
            } else {
                SaveTarget::Local
            });
        }
        let shared = self.with_store(|s| {
            let entries = self.entries_for(players);
            self.write_merged(s, &entries)
        });
        match shared {
            Ok(Some(())) => {
                tracing::debug!(players = players.len(), "batch saved to shared store");
                return Ok(SaveTarget::Shared);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, players = players.len(), "shared save failed, saving locally");
            }
        }
        self.local.save(&self.entries_for(players))?;
        tracing::debug!(players = players.len(), "batch saved to local snapshot");
        Ok(SaveTarget::Local)
    }

    /// Append change records. A no-op outside shared mode.
    pub fn append_sync_events(&self, records: &[SyncRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let server = self.server.clone();
        Ok(self
            .with_store(|s| s.append_events(&server, records))?
            .map_or(0, |()| records.len()))
    }

    /// Read change records from other servers after `cursor`.
    pub fn poll_sync_events(&self, cursor: SyncCursor, limit: u32) -> Result<SyncBatch, StoreError> {
        let server = self.server.clone();
        let rows = self
            .with_store(|s| s.poll_events(cursor, &server, limit))?
            .unwrap_or_default();
        Ok(SyncBatch::decode(rows, cursor))
    }

    /// Cursor at the newest change record, `None` outside shared mode.
    pub fn sync_head(&self) -> Option<SyncCursor> {
        match self.with_store(|s| s.head()) {
            Ok(head) => head,
            Err(err) => {
                tracing::warn!(error = %err, "could not read sync log head");
                None
            }
        }
    }

    /// Insert zero-progress rows for every stored player.
    pub fn backfill_achievements(&self, ids: &[String]) -> Result<usize, StoreError> {
        Ok(self
            .with_store(|s| s.backfill_achievements(ids))?
            .unwrap_or(0))
    }

    /// Leave fallback mode, pushing every locally-saved player into the
    /// shared store before the snapshot is cleared.
    pub fn reconnect(&self) -> Result<ReconcileReport, StoreError> {
        {
            let mut state = self.state.lock();
            if state.mode == GatewayMode::LocalOnly {
                return Err(StoreError::LocalOnly);
            }
            let store = self.open_store()?;
            state.store = Some(store);
            state.mode = GatewayMode::Shared;
        }
        self.fallback_logged.store(false, Ordering::SeqCst);
        tracing::info!(store = %self.connector.describe(), "reconnected to shared store");
        self.reconcile()
    }

    fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let entries: Vec<LocalEntry> = match self.local.load_all() {
            Ok(all) => all.into_values().collect(),
            Err(err) => {
                tracing::warn!(error = %err, "local snapshot unreadable, nothing to reconcile");
                return Ok(ReconcileReport::default());
            }
        };
        if entries.is_empty() {
            self.local.clear()?;
            return Ok(ReconcileReport::default());
        }
        match self.with_store(|s| self.write_merged(s, &entries))? {
            Some(()) => {
                self.local.clear()?;
                let merged = entries.iter().filter(|e| e.credited.is_some()).count();
                tracing::info!(
                    players = entries.len(),
                    merged,
                    "local snapshot reconciled into shared store"
                );
                Ok(ReconcileReport {
                    players: entries.len(),
                })
            }
            None => Err(StoreError::Unavailable("lost connection while reconciling".into())),
        }
    }
}

/// Fold a copy that began from a fresh default into the stored row. Blocks
/// mined past `credited` are added; levels, skills and achievements keep the
/// higher value and a tool switched off locally stays off.
fn merge_provisional(
    mut stored: PlayerProgress,
    local: &PlayerProgress,
    credited: u64,
) -> PlayerProgress {
    stored.blocks_mined = stored
        .blocks_mined
        .saturating_add(local.blocks_mined.saturating_sub(credited));
    if (local.level, local.experience) > (stored.level, stored.experience) {
        stored.level = local.level;
        stored.experience = local.experience;
    }
    stored.skills = SkillLevels {
        efficiency: stored.skills.efficiency.max(local.skills.efficiency),
        luck: stored.skills.luck.max(local.skills.luck),
        energy: stored.skills.energy.max(local.skills.energy),
    };
    stored.skill_points = stored.skill_points.max(local.skill_points);
    for (tool, enabled) in &local.tools {
        if !enabled {
            stored.tools.insert(*tool, false);
        }
    }
    for (id, progress) in &local.achievements {
        let entry = stored.achievements.entry(id.clone()).or_default();
        entry.progress = entry.progress.max(progress.progress);
        entry.claimed |= progress.claimed;
    }
    if !local.name.is_empty() {
        stored.name = local.name.clone();
    }
    stored
}

fn renamed(mut p: PlayerProgress, name: &str) -> PlayerProgress {
    if !name.is_empty() {
        p.name = name.to_string();
    }
    p
}
