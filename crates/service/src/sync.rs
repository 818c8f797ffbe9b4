use parking_lot::Mutex;
use veinmine_persist::{GatewayMode, PersistenceGateway, SyncCursor, SyncRecord};
use veinmine_progress::ProgressionStore;

/// Rows fetched per poll query.
const POLL_BATCH: u32 = 256;

/// What one sync pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pushed: usize,
    pub received: usize,
    pub applied: usize,
    pub skipped: usize,
    pub cursor: Option<SyncCursor>,
}

/// Pushes local changes to the shared change log and replays remote ones.
///
/// The cursor starts at the head of the log when the service connects, so
/// history written before this process started is never replayed.
#[derive(Debug)]
pub struct SyncWorker {
    cursor: Mutex<Option<SyncCursor>>,
}

impl SyncWorker {
    pub fn new(start: Option<SyncCursor>) -> Self {
        Self {
            cursor: Mutex::new(start),
        }
    }

    pub fn cursor(&self) -> Option<SyncCursor> {
        *self.cursor.lock()
    }

    /// One blocking pass: append the outbox, then poll and replay.
    pub fn run_once(&self, store: &ProgressionStore, gateway: &PersistenceGateway) -> SyncReport {
        let _span = tracing::debug_span!("sync_pass", server = %gateway.server()).entered();
        let mut report = SyncReport {
            cursor: self.cursor(),
            ..SyncReport::default()
        };
        if gateway.mode() != GatewayMode::Shared {
            let dropped = store.drain_outbox().len();
            if dropped > 0 {
                tracing::debug!(dropped, mode = %gateway.mode(), "sync inactive, discarding outbox");
            }
            return report;
        }

        // Started or reconnected without a cursor: begin at the current head.
        let mut guard = self.cursor.lock();
        let mut cursor = match *guard {
            Some(c) => c,
            None => match gateway.sync_head() {
                Some(head) => head,
                None => return report,
            },
        };

        let pending = store.drain_outbox();
        if !pending.is_empty() {
            let records: Vec<SyncRecord> = pending
                .iter()
                .map(|p| SyncRecord::from_change(p.player, &p.change))
                .collect();
            match gateway.append_sync_events(&records) {
                Ok(n) => report.pushed = n,
                Err(err) => {
                    tracing::warn!(error = %err, changes = pending.len(), "append failed, will retry");
                    store.requeue(pending);
                }
            }
        }

        loop {
            let batch = match gateway.poll_sync_events(cursor, POLL_BATCH) {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::warn!(error = %err, "sync poll failed");
                    break;
                }
            };
            let rows = batch.events.len() + batch.skipped;
            report.received += batch.events.len();
            report.skipped += batch.skipped;
            for event in &batch.events {
                match event.record.to_change() {
                    Ok(change) => {
                        if store.apply_remote(event.record.player, &change) {
                            report.applied += 1;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(row = event.id, error = %err, "skipping malformed sync row");
                        report.skipped += 1;
                    }
                }
            }
            cursor.advance(batch.cursor.last_id, batch.cursor.last_timestamp);
            if rows < POLL_BATCH as usize {
                break;
            }
        }
        *guard = Some(cursor);
        report.cursor = Some(cursor);
        if report.received > 0 || report.pushed > 0 {
            tracing::debug!(
                pushed = report.pushed,
                received = report.received,
                applied = report.applied,
                last_id = cursor.last_id,
                "sync pass"
            );
        }
        report
    }
}
