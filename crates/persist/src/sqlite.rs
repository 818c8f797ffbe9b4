use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use veinmine_common::{PlayerId, ServerId, ToolCategory};
use veinmine_progress::{AchievementProgress, PlayerProgress, SkillLevels};

use crate::error::StoreError;
use crate::schema;
use crate::sync_log::{RawSyncRow, SyncCursor, SyncRecord, now_millis};

/// Operations the gateway needs from a shared backing store.
pub trait SharedStore: Send {
    /// Cheap round trip proving the connection still works.
    fn validate(&mut self) -> Result<(), StoreError>;

    fn load_player(&mut self, player: PlayerId) -> Result<Option<PlayerProgress>, StoreError>;

    /// Upsert every player in one transaction.
    fn save_players(&mut self, players: &[PlayerProgress]) -> Result<(), StoreError>;

    fn append_events(&mut self, origin: &ServerId, records: &[SyncRecord]) -> Result<(), StoreError>;

    /// Rows after `cursor` written by anyone but `exclude`, oldest first.
    fn poll_events(
        &mut self,
        cursor: SyncCursor,
        exclude: &ServerId,
        limit: u32,
    ) -> Result<Vec<RawSyncRow>, StoreError>;

    /// Cursor pointing at the newest row.
    fn head(&mut self) -> Result<SyncCursor, StoreError>;

    fn roster(&mut self) -> Result<Vec<PlayerId>, StoreError>;

    /// Insert zero-progress rows for every roster player; existing rows are
    /// left alone. Returns how many rows were inserted.
    fn backfill_achievements(&mut self, ids: &[String]) -> Result<usize, StoreError>;
}

/// Opens connections to a shared store.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn SharedStore>, StoreError>;

    /// Human-readable location, for status output.
    fn describe(&self) -> String;
}

/// Connects to an SQLite database file shared between server processes.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    pub path: PathBuf,
    pub busy_timeout: Duration,
}

impl Connector for SqliteConnector {
    fn connect(&self) -> Result<Box<dyn SharedStore>, StoreError> {
        Ok(Box::new(SqliteStore::open(&self.path, self.busy_timeout)?))
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) and migrate the database at `path`.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        schema::migrate(&conn)?;
        tracing::debug!(path = %path.as_ref().display(), "shared store opened");
        Ok(Self { conn })
    }

    fn load_achievements(
        &self,
        player: PlayerId,
    ) -> Result<BTreeMap<String, AchievementProgress>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT achievement_id, progress, claimed FROM vm_achievements WHERE player_id = ?1",
        )?;
        let rows = stmt.query_map(params![player.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                AchievementProgress {
                    progress: row.get::<_, i64>(1)?.max(0) as u64,
                    claimed: row.get::<_, bool>(2)?,
                },
            ))
        })?;
        Ok(rows.collect::<Result<BTreeMap<_, _>, _>>()?)
    }
}

impl SharedStore for SqliteStore {
    fn validate(&mut self) -> Result<(), StoreError> {
        self.conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn load_player(&mut self, player: PlayerId) -> Result<Option<PlayerProgress>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT name, level, experience, blocks_mined,
                        pickaxe_enabled, axe_enabled, shovel_enabled, hoe_enabled,
                        skill_efficiency, skill_luck, skill_energy, skill_points
                 FROM vm_players WHERE player_id = ?1",
                params![player.to_string()],
                |row| {
                    let mut p = PlayerProgress::new(player, row.get::<_, String>(0)?);
                    p.level = row.get::<_, u32>(1)?.max(1);
                    p.experience = row.get::<_, i64>(2)?.max(0) as u64;
                    p.blocks_mined = row.get::<_, i64>(3)?.max(0) as u64;
                    for (i, tool) in ToolCategory::ALL.into_iter().enumerate() {
                        p.tools.insert(tool, row.get::<_, bool>(4 + i)?);
                    }
                    p.skills = SkillLevels {
                        efficiency: row.get(8)?,
                        luck: row.get(9)?,
                        energy: row.get(10)?,
                    };
                    p.skill_points = row.get(11)?;
                    Ok(p)
                },
            )
            .optional()?;
        let Some(mut progress) = row else {
            return Ok(None);
        };
        progress.achievements = self.load_achievements(player)?;
        Ok(Some(progress))
    }

    fn save_players(&mut self, players: &[PlayerProgress]) -> Result<(), StoreError> {
        if players.is_empty() {
            return Ok(());
        }
        let now = now_millis();
        let tx = self.conn.transaction()?;
        {
            let mut upsert_player = tx.prepare_cached(
                "INSERT INTO vm_players (
                    player_id, name, level, experience, blocks_mined, updated_at,
                    pickaxe_enabled, axe_enabled, shovel_enabled, hoe_enabled,
                    skill_efficiency, skill_luck, skill_energy, skill_points)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT (player_id) DO UPDATE SET
                    name = excluded.name,
                    level = excluded.level,
                    experience = excluded.experience,
                    blocks_mined = excluded.blocks_mined,
                    updated_at = excluded.updated_at,
                    pickaxe_enabled = excluded.pickaxe_enabled,
                    axe_enabled = excluded.axe_enabled,
                    shovel_enabled = excluded.shovel_enabled,
                    hoe_enabled = excluded.hoe_enabled,
                    skill_efficiency = excluded.skill_efficiency,
                    skill_luck = excluded.skill_luck,
                    skill_energy = excluded.skill_energy,
                    skill_points = excluded.skill_points",
            )?;
            // Progress only moves forward and a claim is never undone, even
            // when a server with an older copy saves later.
            let mut upsert_achievement = tx.prepare_cached(
                "INSERT INTO vm_achievements (player_id, achievement_id, progress, claimed)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (player_id, achievement_id) DO UPDATE SET
                    progress = MAX(progress, excluded.progress),
                    claimed = MAX(claimed, excluded.claimed)",
            )?;
            for p in players {
                let id = p.id.to_string();
                upsert_player.execute(params![
                    id,
                    p.name,
                    p.level,
                    p.experience as i64,
                    p.blocks_mined as i64,
                    now,
                    p.is_tool_enabled(ToolCategory::Pickaxe),
                    p.is_tool_enabled(ToolCategory::Axe),
                    p.is_tool_enabled(ToolCategory::Shovel),
                    p.is_tool_enabled(ToolCategory::Hoe),
                    p.skills.efficiency,
                    p.skills.luck,
                    p.skills.energy,
                    p.skill_points,
                ])?;
                for (achievement, a) in &p.achievements {
                    upsert_achievement.execute(params![
                        id,
                        achievement,
                        a.progress as i64,
                        a.claimed
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn append_events(&mut self, origin: &ServerId, records: &[SyncRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let now = now_millis();
        let tx = self.conn.transaction()?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO vm_sync_log
                    (timestamp, origin_server, player_id, data_type, data_key, data_value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for r in records {
                insert.execute(params![
                    now,
                    origin.as_str(),
                    r.player.to_string(),
                    r.data_type.as_str(),
                    r.key,
                    r.value
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn poll_events(
        &mut self,
        cursor: SyncCursor,
        exclude: &ServerId,
        limit: u32,
    ) -> Result<Vec<RawSyncRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, timestamp, origin_server, player_id, data_type, data_key, data_value
             FROM vm_sync_log
             WHERE id > ?1 AND origin_server <> ?2
             ORDER BY id
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![cursor.last_id, exclude.as_str(), limit], |row| {
            Ok(RawSyncRow {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                origin: row.get(2)?,
                player: row.get(3)?,
                data_type: row.get(4)?,
                key: row.get(5)?,
                value: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn head(&mut self) -> Result<SyncCursor, StoreError> {
        let (last_id, last_timestamp) = self.conn.query_row(
            "SELECT COALESCE(MAX(id), 0), COALESCE(MAX(timestamp), 0) FROM vm_sync_log",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(SyncCursor {
            last_id,
            last_timestamp,
        })
    }

    fn roster(&mut self) -> Result<Vec<PlayerId>, StoreError> {
        let mut stmt = self.conn.prepare_cached("SELECT player_id FROM vm_players")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut roster = Vec::with_capacity(ids.len());
        for id in ids {
            match id.parse::<PlayerId>() {
                Ok(p) => roster.push(p),
                Err(_) => tracing::warn!(player_id = %id, "skipping roster row with invalid id"),
            }
        }
        Ok(roster)
    }

    fn backfill_achievements(&mut self, ids: &[String]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut insert = tx.prepare_cached(
                "INSERT OR IGNORE INTO vm_achievements (player_id, achievement_id, progress, claimed)
                 SELECT player_id, ?1, 0, 0 FROM vm_players",
            )?;
            for id in ids {
                inserted += insert.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }
}
