use parking_lot::Mutex;
use veinmine_common::{ItemStack, PlayerId};

/// Player-facing progression events. Formatting is left to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    LevelUp {
        player: PlayerId,
        level: u32,
    },
    AchievementProgress {
        player: PlayerId,
        achievement: String,
        name: String,
        percent: u8,
    },
    AchievementCompleted {
        player: PlayerId,
        achievement: String,
        name: String,
    },
}

impl Notification {
    /// Message template key used by the host's message bundle.
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::LevelUp { .. } => "level-up",
            Self::AchievementProgress { .. } => "achievement-progress",
            Self::AchievementCompleted { .. } => "achievement-completed",
        }
    }

    pub fn player(&self) -> PlayerId {
        match self {
            Self::LevelUp { player, .. }
            | Self::AchievementProgress { player, .. }
            | Self::AchievementCompleted { player, .. } => *player,
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) {
        match &notification {
            Notification::LevelUp { player, level } => {
                tracing::info!(key = notification.message_key(), %player, level, "level up");
            }
            Notification::AchievementProgress {
                player,
                achievement,
                percent,
                ..
            } => {
                tracing::info!(
                    key = notification.message_key(),
                    %player,
                    achievement = %achievement,
                    percent,
                    "achievement progress"
                );
            }
            Notification::AchievementCompleted {
                player, achievement, ..
            } => {
                tracing::info!(
                    key = notification.message_key(),
                    %player,
                    achievement = %achievement,
                    "achievement completed"
                );
            }
        }
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    seen: Mutex<Vec<Notification>>,
}

impl CollectingSink {
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.seen.lock())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

impl NotificationSink for CollectingSink {
    fn notify(&self, notification: Notification) {
        self.seen.lock().push(notification);
    }
}

/// Where claimed achievement rewards go (economy plugin, inventory).
pub trait RewardSink: Send + Sync {
    fn deposit(&self, player: PlayerId, amount: f64);
    fn give_items(&self, player: PlayerId, items: &[ItemStack]);
}

/// Records rewards instead of paying them out.
#[derive(Debug, Default)]
pub struct RewardLedger {
    deposits: Mutex<Vec<(PlayerId, f64)>>,
    items: Mutex<Vec<(PlayerId, ItemStack)>>,
}

impl RewardLedger {
    pub fn total_deposited(&self, player: PlayerId) -> f64 {
        self.deposits
            .lock()
            .iter()
            .filter(|(p, _)| *p == player)
            .map(|(_, a)| a)
            .sum()
    }

    pub fn items_given(&self, player: PlayerId) -> Vec<ItemStack> {
        self.items
            .lock()
            .iter()
            .filter(|(p, _)| *p == player)
            .map(|(_, s)| *s)
            .collect()
    }
}

impl RewardSink for RewardLedger {
    fn deposit(&self, player: PlayerId, amount: f64) {
        tracing::info!(%player, amount, "reward deposited");
        self.deposits.lock().push((player, amount));
    }

    fn give_items(&self, player: PlayerId, items: &[ItemStack]) {
        let mut given = self.items.lock();
        for stack in items {
            tracing::info!(%player, item = %stack, "reward item given");
            given.push((player, *stack));
        }
    }
}
