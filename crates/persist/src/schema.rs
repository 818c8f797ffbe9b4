//! Table layout of the shared store.
//!
//! Evolution is additive: base tables are created if missing and every later
//! column is added only when `PRAGMA table_info` does not list it, so running
//! the migration any number of times is harmless.

use rusqlite::Connection;
use veinmine_common::ToolCategory;

use crate::error::StoreError;

pub const PLAYERS: &str = "vm_players";
pub const ACHIEVEMENTS: &str = "vm_achievements";
pub const SYNC_LOG: &str = "vm_sync_log";

const BASE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS vm_players (
    player_id     TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    level         INTEGER NOT NULL DEFAULT 1,
    experience    INTEGER NOT NULL DEFAULT 0,
    blocks_mined  INTEGER NOT NULL DEFAULT 0,
    updated_at    INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS vm_achievements (
    player_id       TEXT NOT NULL,
    achievement_id  TEXT NOT NULL,
    progress        INTEGER NOT NULL DEFAULT 0,
    claimed         INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (player_id, achievement_id)
);
CREATE TABLE IF NOT EXISTS vm_sync_log (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp      INTEGER NOT NULL,
    origin_server  TEXT NOT NULL,
    player_id      TEXT NOT NULL,
    data_type      TEXT NOT NULL,
    data_key       TEXT NOT NULL,
    data_value     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS vm_sync_log_timestamp ON vm_sync_log (timestamp);
";

/// Columns added after the first release, in the order they were introduced.
const ADDED_PLAYER_COLUMNS: &[(&str, &str)] = &[
    ("pickaxe_enabled", "INTEGER NOT NULL DEFAULT 1"),
    ("axe_enabled", "INTEGER NOT NULL DEFAULT 1"),
    ("shovel_enabled", "INTEGER NOT NULL DEFAULT 1"),
    ("hoe_enabled", "INTEGER NOT NULL DEFAULT 1"),
    ("skill_efficiency", "INTEGER NOT NULL DEFAULT 0"),
    ("skill_luck", "INTEGER NOT NULL DEFAULT 0"),
    ("skill_energy", "INTEGER NOT NULL DEFAULT 0"),
    ("skill_points", "INTEGER NOT NULL DEFAULT 0"),
];

/// Column holding the enabled flag of a tool.
pub fn tool_column(tool: ToolCategory) -> &'static str {
    match tool {
        ToolCategory::Pickaxe => "pickaxe_enabled",
        ToolCategory::Axe => "axe_enabled",
        ToolCategory::Shovel => "shovel_enabled",
        ToolCategory::Hoe => "hoe_enabled",
    }
}

/// Bring the schema up to date. Returns the columns that had to be added.
pub fn migrate(conn: &Connection) -> Result<Vec<&'static str>, StoreError> {
    conn.execute_batch(BASE_TABLES)?;
    let mut added = Vec::new();
    for (column, decl) in ADDED_PLAYER_COLUMNS {
        if ensure_column(conn, PLAYERS, column, decl)? {
            added.push(*column);
        }
    }
    if !added.is_empty() {
        tracing::info!(columns = ?added, "schema columns added");
    }
    Ok(added)
}

/// Add `column` to `table` unless it already exists. Returns whether it was added.
pub fn ensure_column(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<bool, StoreError> {
    if column_names(conn, table)?.iter().any(|c| c == column) {
        return Ok(false);
    }
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
    Ok(true)
}

pub fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>("name"))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}
