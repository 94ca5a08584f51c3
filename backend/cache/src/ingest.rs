use std::sync::Arc;

use tracing::trace;

use tally_core::{current_day, ActivityEvent, DisplayMeta};

use crate::manager::CacheManager;

/// Boundary between the chat-gateway event dispatcher and the cache.
///
/// Events from service accounts, direct-message contexts, or with missing
/// ids are rejected here as no-ops rather than propagated inward.
pub struct EventIngest {
    manager: Arc<CacheManager>,
}

impl EventIngest {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    /// Absorb one qualifying activity event into the batch queue.
    pub fn on_activity_event(&self, event: &ActivityEvent) {
        if event.author_is_bot {
            return;
        }
        let Some(guild_id) = event.guild_id.as_deref() else {
            trace!("Ignoring direct-message activity event");
            return;
        };
        if guild_id.is_empty() || event.channel_id.is_empty() || event.author_id.is_empty() {
            trace!("Ignoring activity event with missing ids");
            return;
        }

        let day = current_day();
        let meta = DisplayMeta {
            username: event.username.clone(),
            avatar: event.avatar.clone(),
        };
        self.manager
            .record_increment(guild_id, &event.channel_id, &day, &event.author_id, &meta);
    }
}

#[cfg(test)]
mod tests {
    use tally_store::InMemoryActivityStore;

    use crate::lookup::LookupCache;
    use crate::manager::CacheSettings;
    use crate::queue::BatchQueue;
    use crate::tier::InMemoryCacheTier;

    use super::*;

    fn ingest_with_queue() -> (EventIngest, Arc<BatchQueue>) {
        let queue = Arc::new(BatchQueue::new());
        let manager = Arc::new(CacheManager::new(
            queue.clone(),
            Arc::new(InMemoryCacheTier::new()),
            Arc::new(InMemoryActivityStore::new()),
            Arc::new(LookupCache::new()),
            CacheSettings::default(),
        ));
        (EventIngest::new(manager), queue)
    }

    fn event() -> ActivityEvent {
        ActivityEvent {
            guild_id: Some("G1".into()),
            channel_id: "C1".into(),
            author_id: "U1".into(),
            author_is_bot: false,
            username: "alice".into(),
            avatar: "alice.png".into(),
        }
    }

    #[test]
    fn qualifying_event_lands_in_the_queue() {
        let (ingest, queue) = ingest_with_queue();
        ingest.on_activity_event(&event());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.detach("G1").unwrap().leaf_count(), 1);
    }

    #[test]
    fn service_account_events_are_ignored() {
        let (ingest, queue) = ingest_with_queue();
        let mut bot = event();
        bot.author_is_bot = true;
        ingest.on_activity_event(&bot);
        assert!(queue.is_empty());
    }

    #[test]
    fn direct_message_events_are_ignored() {
        let (ingest, queue) = ingest_with_queue();
        let mut dm = event();
        dm.guild_id = None;
        ingest.on_activity_event(&dm);
        assert!(queue.is_empty());
    }

    #[test]
    fn events_with_missing_ids_are_ignored() {
        let (ingest, queue) = ingest_with_queue();
        let mut bad = event();
        bad.channel_id.clear();
        ingest.on_activity_event(&bad);

        let mut bad = event();
        bad.author_id.clear();
        ingest.on_activity_event(&bad);

        assert!(queue.is_empty());
    }
}
