//! Cross-server change log.
//!
//! Each row carries one absolute value, encoded as text:
//!
//! | type          | key              | value              |
//! |---------------|------------------|--------------------|
//! | `ACHIEVEMENT` | achievement id   | `progress:claimed` |
//! | `LEVEL`       | `level`          | `level:experience` |
//! | `TOOL`        | tool name        | `true` / `false`   |

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use veinmine_common::{PlayerId, ServerId, ToolCategory};
use veinmine_progress::ProgressChange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncDataType {
    Achievement,
    Level,
    Tool,
}

impl SyncDataType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Achievement => "ACHIEVEMENT",
            Self::Level => "LEVEL",
            Self::Tool => "TOOL",
        }
    }
}

impl fmt::Display for SyncDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncDataType {
    type Err = SyncDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACHIEVEMENT" => Ok(Self::Achievement),
            "LEVEL" => Ok(Self::Level),
            "TOOL" => Ok(Self::Tool),
            other => Err(SyncDecodeError::UnknownType(other.to_string())),
        }
    }
}

/// Why a change-log row could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncDecodeError {
    #[error("invalid player id '{0}'")]
    BadPlayer(String),
    #[error("unknown data type '{0}'")]
    UnknownType(String),
    #[error("invalid {data_type} value '{value}'")]
    BadValue {
        data_type: SyncDataType,
        value: String,
    },
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
}

/// The payload of one change-log row, before the store stamps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    pub player: PlayerId,
    pub data_type: SyncDataType,
    pub key: String,
    pub value: String,
}

impl SyncRecord {
    pub fn from_change(player: PlayerId, change: &ProgressChange) -> Self {
        let (data_type, key, value) = match change {
            ProgressChange::AchievementProgress {
                id,
                progress,
                claimed,
            } => (
                SyncDataType::Achievement,
                id.clone(),
                format!("{progress}:{claimed}"),
            ),
            ProgressChange::Level { level, experience } => (
                SyncDataType::Level,
                "level".to_string(),
                format!("{level}:{experience}"),
            ),
            ProgressChange::ToolToggle { tool, enabled } => {
                (SyncDataType::Tool, tool.name().to_string(), enabled.to_string())
            }
        };
        Self {
            player,
            data_type,
            key,
            value,
        }
    }

    pub fn to_change(&self) -> Result<ProgressChange, SyncDecodeError> {
        let bad = || SyncDecodeError::BadValue {
            data_type: self.data_type,
            value: self.value.clone(),
        };
        match self.data_type {
            SyncDataType::Achievement => {
                let (progress, claimed) = self.value.split_once(':').ok_or_else(bad)?;
                Ok(ProgressChange::AchievementProgress {
                    id: self.key.clone(),
                    progress: progress.parse().map_err(|_| bad())?,
                    claimed: claimed.parse().map_err(|_| bad())?,
                })
            }
            SyncDataType::Level => {
                let (level, experience) = self.value.split_once(':').ok_or_else(bad)?;
                let level: u32 = level.parse().map_err(|_| bad())?;
                if level == 0 {
                    return Err(bad());
                }
                Ok(ProgressChange::Level {
                    level,
                    experience: experience.parse().map_err(|_| bad())?,
                })
            }
            SyncDataType::Tool => Ok(ProgressChange::ToolToggle {
                tool: self
                    .key
                    .parse::<ToolCategory>()
                    .map_err(|_| SyncDecodeError::UnknownTool(self.key.clone()))?,
                enabled: self.value.parse().map_err(|_| bad())?,
            }),
        }
    }
}

/// A row as it comes out of the store, still untyped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSyncRow {
    pub id: i64,
    pub timestamp: i64,
    pub origin: String,
    pub player: String,
    pub data_type: String,
    pub key: String,
    pub value: String,
}

/// One decoded row of the change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    pub id: i64,
    /// Milliseconds since the Unix epoch, as stamped by the writer.
    pub timestamp: i64,
    pub origin: ServerId,
    pub record: SyncRecord,
}

impl TryFrom<RawSyncRow> for SyncEvent {
    type Error = SyncDecodeError;

    fn try_from(row: RawSyncRow) -> Result<Self, Self::Error> {
        let player = row
            .player
            .parse::<PlayerId>()
            .map_err(|_| SyncDecodeError::BadPlayer(row.player.clone()))?;
        let data_type = row.data_type.parse::<SyncDataType>()?;
        Ok(Self {
            id: row.id,
            timestamp: row.timestamp,
            origin: ServerId::new(row.origin),
            record: SyncRecord {
                player,
                data_type,
                key: row.key,
                value: row.value,
            },
        })
    }
}

/// Position in the change log. Both fields only ever move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCursor {
    pub last_id: i64,
    pub last_timestamp: i64,
}

impl SyncCursor {
    pub fn advance(&mut self, id: i64, timestamp: i64) {
        self.last_id = self.last_id.max(id);
        self.last_timestamp = self.last_timestamp.max(timestamp);
    }
}

/// Rows read by one poll. The cursor covers skipped rows too.
#[derive(Debug, Clone, Default)]
pub struct SyncBatch {
    pub events: Vec<SyncEvent>,
    pub skipped: usize,
    pub cursor: SyncCursor,
}

impl SyncBatch {
    /// Decode raw rows, warning about and skipping malformed ones.
    pub fn decode(rows: Vec<RawSyncRow>, mut cursor: SyncCursor) -> Self {
        let mut events = Vec::with_capacity(rows.len());
        let mut skipped = 0;
        for row in rows {
            cursor.advance(row.id, row.timestamp);
            let id = row.id;
            match SyncEvent::try_from(row) {
                Ok(event) => match event.record.to_change() {
                    Ok(_) => events.push(event),
                    Err(err) => {
                        tracing::warn!(row = id, error = %err, "skipping malformed sync row");
                        skipped += 1;
                    }
                },
                Err(err) => {
                    tracing::warn!(row = id, error = %err, "skipping malformed sync row");
                    skipped += 1;
                }
            }
        }
        Self {
            events,
            skipped,
            cursor,
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, data_type: &str, key: &str, value: &str) -> RawSyncRow {
        RawSyncRow {
            id,
            timestamp: 1000 + id,
            origin: "other".into(),
            player: PlayerId::new().to_string(),
            data_type: data_type.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    #[test]
    fn encodes_each_change_kind() {
        let player = PlayerId::new();
        let cases = [
            (
                ProgressChange::AchievementProgress {
                    id: "miner".into(),
                    progress: 64,
                    claimed: true,
                },
                "ACHIEVEMENT",
                "miner",
                "64:true",
            ),
            (
                ProgressChange::Level {
                    level: 7,
                    experience: 12,
                },
                "LEVEL",
                "level",
                "7:12",
            ),
            (
                ProgressChange::ToolToggle {
                    tool: ToolCategory::Shovel,
                    enabled: false,
                },
                "TOOL",
                "shovel",
                "false",
            ),
        ];
        for (change, ty, key, value) in cases {
            let rec = SyncRecord::from_change(player, &change);
            assert_eq!(rec.data_type.as_str(), ty);
            assert_eq!(rec.key, key);
            assert_eq!(rec.value, value);
            assert_eq!(rec.to_change().unwrap(), change);
        }
    }

    #[test]
    fn malformed_rows_are_skipped_but_advance_cursor() {
        let rows = vec![
            row(3, "ACHIEVEMENT", "a", "10:false"),
            row(4, "ACHIEVEMENT", "a", "ten:false"),
            row(5, "MYSTERY", "x", "1"),
            row(6, "LEVEL", "level", "0:5"),
            row(7, "TOOL", "sword", "true"),
            RawSyncRow {
                player: "not-a-uuid".into(),
                ..row(8, "LEVEL", "level", "2:0")
            },
            row(9, "TOOL", "axe", "true"),
        ];
        let batch = SyncBatch::decode(rows, SyncCursor::default());
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.skipped, 5);
        assert_eq!(batch.cursor.last_id, 9);
        assert_eq!(batch.cursor.last_timestamp, 1009);
    }

    #[test]
    fn cursor_never_rewinds() {
        let mut c = SyncCursor::default();
        c.advance(10, 500);
        c.advance(8, 400);
        assert_eq!(c, SyncCursor { last_id: 10, last_timestamp: 500 });
    }
}
