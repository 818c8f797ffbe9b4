use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::service::VeinService;

/// Periodic autosave and sync polling for a running service.
#[derive(Debug)]
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Spawn the loops configured for `service`. Autosave is skipped when
    /// its interval is unset.
    pub fn spawn(service: &VeinService) -> Self {
        let config = service.config();
        let (shutdown, rx) = watch::channel(false);
        let mut handles = Vec::new();
        if let Some(period) = config.auto_save_interval {
            handles.push(tokio::spawn(autosave_loop(service.clone(), period, rx.clone())));
        }
        handles.push(tokio::spawn(sync_loop(
            service.clone(),
            config.sync_poll_interval,
            rx,
        )));
        tracing::debug!(tasks = handles.len(), "background tasks started");
        Self { shutdown, handles }
    }

    /// Signal every loop and wait for it to finish its current pass.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "background task ended abnormally");
            }
        }
    }
}

async fn autosave_loop(service: VeinService, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = service.flush().await {
                    tracing::warn!(error = %err, "autosave failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn sync_loop(service: VeinService, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period.max(Duration::from_millis(50)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = service.sync_now().await {
                    tracing::warn!(error = %err, "sync pass failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use veinmine_common::{PlayerId, ToolCategory};
    use veinmine_config::PluginConfig;
    use veinmine_progress::{CollectingSink, RewardLedger};

    async fn service(dir: &std::path::Path, server: &str) -> VeinService {
        let mut config = PluginConfig::default();
        config.server_id = veinmine_common::ServerId::new(server);
        config.storage.database_path = dir.join("shared.db");
        config.storage.local_dir = dir.join(format!("local-{server}"));
        config.auto_save_interval = Some(Duration::from_millis(20));
        config.sync_poll_interval = Duration::from_millis(20);
        VeinService::start(
            config,
            Arc::new(CollectingSink::default()),
            Arc::new(RewardLedger::default()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn loops_save_and_sync_until_stopped() {
        let tmp = tempfile::tempdir().unwrap();
        let a = service(tmp.path(), "a").await;
        let b = service(tmp.path(), "b").await;
        let player = PlayerId::new();
        a.player_joined(player, "steve").await.unwrap();
        b.player_joined(player, "steve").await.unwrap();

        let tasks_a = BackgroundTasks::spawn(&a);
        let tasks_b = BackgroundTasks::spawn(&b);
        a.set_tool_enabled(player, ToolCategory::Axe, false).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let saved = a.status().dirty_players == 0;
            let seen = !b.store().get(player).unwrap().is_tool_enabled(ToolCategory::Axe);
            if saved && seen {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "background loops made no progress");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tasks_a.stop().await;
        tasks_b.stop().await;
        // Nothing runs after stop.
        a.set_tool_enabled(player, ToolCategory::Axe, true).unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(a.status().dirty_players, 1);
    }

    #[tokio::test]
    async fn autosave_is_optional() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = PluginConfig::default();
        config.storage.database_path = tmp.path().join("shared.db");
        config.storage.local_dir = tmp.path().join("local");
        config.auto_save_interval = None;
        let service = VeinService::start(
            config,
            Arc::new(CollectingSink::default()),
            Arc::new(RewardLedger::default()),
        )
        .await
        .unwrap();
        let tasks = BackgroundTasks::spawn(&service);
        assert_eq!(tasks.handles.len(), 1);
        tasks.stop().await;
    }
}
