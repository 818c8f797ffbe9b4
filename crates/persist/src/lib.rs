//! Persistence: shared SQLite store, cross-server change log, local fallback.
//!
//! # Invariants
//! - [`PersistenceGateway`] is the only reader and writer of persisted rows.
//! - The change log is append-only; no process updates or deletes a row.
//! - Schema changes are additive and safe to apply repeatedly.
//! - A local snapshot whose hash does not match its manifest is never loaded.
//! - Store trouble never reaches callers as an error on load; they get a
//!   fresh player and the gateway falls back to the local snapshot.

mod error;
mod gateway;
mod local;
pub mod schema;
mod sqlite;
mod sync_log;

pub use error::StoreError;
pub use gateway::{GatewayMode, GatewayStatus, PersistenceGateway, ReconcileReport, SaveTarget};
pub use local::{LocalEntry, LocalSnapshot};
pub use sqlite::{Connector, SharedStore, SqliteConnector, SqliteStore};
pub use sync_log::{
    RawSyncRow, SyncBatch, SyncCursor, SyncDataType, SyncDecodeError, SyncEvent, SyncRecord,
};

pub fn crate_info() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("persist"));
    }
}
