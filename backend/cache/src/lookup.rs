//! Point-read path: a read-through response cache layered on the durable
//! store.
//!
//! This path never touches the batch queue or the shared cache tier, so it
//! is eventually consistent with respect to increments still sitting in
//! those tiers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use tally_core::{ChannelSet, TallyError};
use tally_store::ActivityStore;

/// Result of a point read. The no-data case is cached explicitly so a
/// guild without history does not hit the durable store on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(ChannelSet),
    NoData,
}

/// guild_id → cached lookup result.
pub struct LookupCache {
    entries: RwLock<HashMap<String, Lookup>>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, guild_id: &str) -> Option<Lookup> {
        self.entries.read().await.get(guild_id).cloned()
    }

    pub async fn put(&self, guild_id: &str, lookup: Lookup) {
        self.entries
            .write()
            .await
            .insert(guild_id.to_string(), lookup);
    }

    /// Drop a guild's cached result. Called after an invalidation cycle
    /// persists fresh counts so the next read observes them.
    pub async fn invalidate(&self, guild_id: &str) {
        self.entries.write().await.remove(guild_id);
    }
}

impl Default for LookupCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-through point queries for the query surface.
pub struct QueryService {
    cache: Arc<LookupCache>,
    store: Arc<dyn ActivityStore>,
}

impl QueryService {
    pub fn new(cache: Arc<LookupCache>, store: Arc<dyn ActivityStore>) -> Self {
        Self { cache, store }
    }

    /// Fetch a guild's document, consulting the response cache first.
    pub async fn fetch(&self, guild_id: &str) -> Result<Lookup, TallyError> {
        if let Some(cached) = self.cache.get(guild_id).await {
            debug!(guild_id, "Lookup cache hit");
            return Ok(cached);
        }

        debug!(guild_id, "Fetching guild document from durable store");
        let lookup = match self.store.find_one(guild_id).await? {
            Some(channels) => Lookup::Found(channels),
            None => Lookup::NoData,
        };
        self.cache.put(guild_id, lookup.clone()).await;
        Ok(lookup)
    }
}
