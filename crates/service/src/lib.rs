//! Runtime service tying mining, progression and persistence together.
//!
//! [`VeinService`] is what a host game calls: it turns break events into
//! cluster mining, keeps progress in memory, and moves it to storage on
//! quit, on autosave and at shutdown. [`BackgroundTasks`] drives the
//! periodic autosave and the cross-server sync poll.
//!
//! # Invariants
//! - Storage calls never run on the caller's thread; break handling never
//!   touches storage.
//! - A player is marked saved only for the revision that was written.
//! - Shutdown stops the periodic loops before the final flush.

mod service;
mod sync;
mod tasks;

pub use service::{
    BreakResult, FlushReport, HeldTool, ServiceError, ServiceStatus, SkipReason, VeinService,
};
pub use sync::{SyncReport, SyncWorker};
pub use tasks::BackgroundTasks;

pub fn crate_info() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("service"));
    }
}
