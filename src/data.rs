use std::{ops::Deref, sync::Arc};

use crate::config::BotConfig;
use crate::relocation::{Clock, DeferredTaskStore, ProtectionLedger, QuitCoordinator, VoicePlatform};
use poise::serenity_prelude as serenity;
use serenity::prelude::TypeMapKey;
use tokio::task::JoinHandle;

/// User data, which is stored and accessible in all command invocations
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .field("quits", &self.quits)
            .finish_non_exhaustive()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    /// Wire the ledger, task store and quit coordinator to one platform binding
    #[must_use]
    pub fn new(
        config: BotConfig,
        platform: Arc<dyn VoicePlatform>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self(DataInner::new(config, platform, clock).into())
    }

    /// Start the background sweep of expired protections
    #[must_use]
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        self.ledger
            .spawn_sweeper(self.config.protection.sweep_interval())
    }
}

pub struct DataInner {
    pub config: BotConfig,
    // Platform binding shared by every component below
    pub platform: Arc<dyn VoicePlatform>,
    pub ledger: ProtectionLedger,
    pub quits: QuitCoordinator,
}

impl DataInner {
    #[must_use]
    pub fn new(
        config: BotConfig,
        platform: Arc<dyn VoicePlatform>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = DeferredTaskStore::new(Arc::clone(&platform));
        Self {
            config,
            ledger: ProtectionLedger::new(Arc::clone(&clock)),
            quits: QuitCoordinator::new(Arc::clone(&platform), store, clock),
            platform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relocation::{ManualClock, MockVoicePlatform};
    use chrono::Utc;
    use poise::serenity_prelude::{GuildId, UserId};

    fn data_with(config: BotConfig) -> (Data, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let data = Data::new(config, Arc::new(MockVoicePlatform::new()), clock.clone());
        (data, clock)
    }

    #[test]
    fn test_data_starts_empty() {
        let (data, _) = data_with(BotConfig::default());
        assert!(data.ledger.is_empty());
        assert!(data.quits.store().is_empty());
        assert_eq!(data.config.base_command, "reloc");
    }

    #[test]
    fn test_clones_share_state() {
        let (data, _) = data_with(BotConfig::default());
        let other = data.clone();

        data.ledger.grant(GuildId::new(1), UserId::new(2), 3);
        assert_eq!(other.ledger.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_uses_configured_interval() {
        let mut config = BotConfig::default();
        config.protection.sweep_interval_ms = 50;
        let (data, clock) = data_with(config);

        data.ledger.grant(GuildId::new(1), UserId::new(2), 3);
        let sweeper = data.start_sweeper();

        clock.advance(chrono::Duration::hours(2));
        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        assert!(data.ledger.is_empty());

        sweeper.abort();
    }
}
