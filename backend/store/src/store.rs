use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tally_core::{ActivityCount, ChannelSet, LeafUpdate, TallyError};

/// Abstract interface to the durable per-guild activity documents.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Apply a batch of increment-or-upsert operations for one guild as a
    /// single bulk write: absent leaves are created, present leaves have
    /// `count` incremented and display metadata overwritten. The batch
    /// either applies completely or returns an error with nothing applied.
    async fn bulk_upsert_increment(
        &self,
        guild_id: &str,
        updates: &[LeafUpdate],
    ) -> Result<(), TallyError>;

    /// Fetch the guild's full document, or `None` if the guild has never
    /// been persisted.
    async fn find_one(&self, guild_id: &str) -> Result<Option<ChannelSet>, TallyError>;
}

/// In-memory store with the same increment-or-upsert semantics, for tests
/// and single-node development runs.
pub struct InMemoryActivityStore {
    guilds: Arc<Mutex<HashMap<String, ChannelSet>>>,
}

impl InMemoryActivityStore {
    pub fn new() -> Self {
        Self {
            guilds: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryActivityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn bulk_upsert_increment(
        &self,
        guild_id: &str,
        updates: &[LeafUpdate],
    ) -> Result<(), TallyError> {
        let mut guilds = self.guilds.lock().unwrap();
        let channels = guilds.entry(guild_id.to_string()).or_default();
        for update in updates {
            channels
                .channels
                .entry(update.channel_id.clone())
                .or_default()
                .dates
                .entry(update.day.clone())
                .or_default()
                .users
                .entry(update.user_id.clone())
                .or_default()
                .merge_from(ActivityCount {
                    count: update.count,
                    username: update.username.clone(),
                    avatar: update.avatar.clone(),
                });
        }
        Ok(())
    }

    async fn find_one(&self, guild_id: &str) -> Result<Option<ChannelSet>, TallyError> {
        let guilds = self.guilds.lock().unwrap();
        Ok(guilds.get(guild_id).cloned())
    }
}
