use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use tally_core::{ChannelSet, DisplayMeta, TallyError};
use tally_store::ActivityStore;

use crate::lookup::LookupCache;
use crate::queue::BatchQueue;
use crate::tier::{CacheTier, TierCommand};

/// Tuning for the two reconciliation cycles.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Namespace for cache tier keys: `<prefix>_<guild_id>`.
    pub key_prefix: String,
    /// How often the batch queue is merged into the cache tier.
    pub flush_interval: Duration,
    /// How often the cache tier is reconciled into the durable store.
    pub invalidate_interval: Duration,
    /// Guilds per bulk-persist batch during invalidation.
    pub persist_batch_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: "chat".to_string(),
            flush_interval: Duration::from_secs(15),
            invalidate_interval: Duration::from_secs(30),
            persist_batch_size: 50,
        }
    }
}

/// Outcome of a single cycle invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed { processed: usize, failed: usize },
    /// A previous run of the same cycle was still in flight; the tick was
    /// dropped, not queued.
    Skipped,
}

/// Owns the batch queue and mediates between it, the shared cache tier,
/// and the durable store.
///
/// Flush and invalidation are driven by two independent interval loops
/// (see [`CacheManager::spawn_cycles`]) but stay directly callable so tests
/// inject ticks manually. Per-guild async mutexes serialize flush-merge
/// against invalidate-read/persist/clear for the same guild; work for
/// different guilds interleaves freely.
pub struct CacheManager {
    queue: Arc<BatchQueue>,
    tier: Arc<dyn CacheTier>,
    store: Arc<dyn ActivityStore>,
    lookup: Arc<LookupCache>,
    settings: CacheSettings,
    /// Guilds with cache tier data not yet confirmed in the durable store.
    pending: Mutex<HashSet<String>>,
    guild_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    flush_busy: AtomicBool,
    invalidate_busy: AtomicBool,
}

impl CacheManager {
    pub fn new(
        queue: Arc<BatchQueue>,
        tier: Arc<dyn CacheTier>,
        store: Arc<dyn ActivityStore>,
        lookup: Arc<LookupCache>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            queue,
            tier,
            store,
            lookup,
            settings,
            pending: Mutex::new(HashSet::new()),
            guild_locks: Mutex::new(HashMap::new()),
            flush_busy: AtomicBool::new(false),
            invalidate_busy: AtomicBool::new(false),
        }
    }

    /// Absorb one increment into the batch queue. No I/O.
    pub fn record_increment(
        &self,
        guild_id: &str,
        channel_id: &str,
        day: &str,
        user_id: &str,
        meta: &DisplayMeta,
    ) {
        self.queue.record(guild_id, channel_id, day, user_id, meta);
    }

    fn tier_key(&self, guild_id: &str) -> String {
        format!("{}_{}", self.settings.key_prefix, guild_id)
    }

    fn key_prefix(&self) -> String {
        format!("{}_", self.settings.key_prefix)
    }

    fn guild_from_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.settings.key_prefix)
            .and_then(|rest| rest.strip_prefix('_'))
    }

    fn guild_lock(&self, guild_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.guild_locks.lock().unwrap();
        locks
            .entry(guild_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn mark_pending(&self, guild_id: &str) {
        self.pending.lock().unwrap().insert(guild_id.to_string());
    }

    fn clear_pending(&self, guild_id: &str) {
        self.pending.lock().unwrap().remove(guild_id);
    }

    fn has_pending(&self) -> bool {
        !self.pending.lock().unwrap().is_empty()
    }

    /// Merge every accumulated batch-queue branch into the shared cache
    /// tier. Guilds untouched since the last cycle are absent from the
    /// queue and therefore not re-flushed.
    pub async fn flush_cycle(&self) -> CycleOutcome {
        if self.flush_busy.swap(true, Ordering::SeqCst) {
            debug!("Flush cycle still running, dropping tick");
            return CycleOutcome::Skipped;
        }
        let outcome = self.run_flush().await;
        self.flush_busy.store(false, Ordering::SeqCst);
        outcome
    }

    async fn run_flush(&self) -> CycleOutcome {
        let guild_ids = self.queue.guild_ids();
        if guild_ids.is_empty() {
            return CycleOutcome::Completed {
                processed: 0,
                failed: 0,
            };
        }

        debug!(guilds = guild_ids.len(), "Processing batch queue");
        let mut processed = 0;
        let mut failed = 0;

        for guild_id in guild_ids {
            let lock = self.guild_lock(&guild_id);
            let _guard = lock.lock().await;

            let Some(delta) = self.queue.detach(&guild_id) else {
                continue;
            };

            match self.flush_guild(&guild_id, &delta).await {
                Ok(()) => {
                    self.mark_pending(&guild_id);
                    processed += 1;
                }
                Err(err) => {
                    warn!(
                        guild_id = %guild_id,
                        error = %err,
                        "Failed to flush guild to cache tier, re-queueing delta"
                    );
                    self.queue.restore(&guild_id, delta);
                    failed += 1;
                }
            }
        }

        info!(processed, failed, "Flush cycle finished");
        CycleOutcome::Completed { processed, failed }
    }

    async fn flush_guild(&self, guild_id: &str, delta: &ChannelSet) -> Result<(), TallyError> {
        let key = self.tier_key(guild_id);

        let mut merged = match self.tier.get(&key).await? {
            Some(raw) => match serde_json::from_str::<ChannelSet>(&raw) {
                Ok(existing) => existing,
                Err(err) => {
                    warn!(
                        guild_id,
                        error = %err,
                        "Malformed cache tier document, treating as empty"
                    );
                    ChannelSet::default()
                }
            },
            None => ChannelSet::default(),
        };
        merged.merge_from(delta.clone());

        let value =
            serde_json::to_string(&merged).map_err(|err| TallyError::Tier(err.to_string()))?;
        self.tier
            .batch(vec![TierCommand::Set { key, value }])
            .await
    }

    /// Drain pending cache tier documents into the durable store, then
    /// clear the corresponding tier entries.
    pub async fn invalidation_cycle(&self) -> CycleOutcome {
        if self.invalidate_busy.swap(true, Ordering::SeqCst) {
            debug!("Invalidation cycle still running, dropping tick");
            return CycleOutcome::Skipped;
        }
        let outcome = self.run_invalidation().await;
        self.invalidate_busy.store(false, Ordering::SeqCst);
        outcome
    }

    async fn run_invalidation(&self) -> CycleOutcome {
        if !self.has_pending() {
            return CycleOutcome::Completed {
                processed: 0,
                failed: 0,
            };
        }

        let keys = match self.tier.list_keys(&self.key_prefix()).await {
            Ok(keys) => keys,
            Err(err) => {
                error!(error = %err, "Failed to enumerate cache tier keys");
                return CycleOutcome::Completed {
                    processed: 0,
                    failed: 1,
                };
            }
        };
        if keys.is_empty() {
            return CycleOutcome::Completed {
                processed: 0,
                failed: 0,
            };
        }

        debug!(guilds = keys.len(), "Processing cache tier queue");
        let batches: Vec<Vec<String>> = keys
            .chunks(self.settings.persist_batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let results = join_all(batches.into_iter().map(|batch| self.persist_batch(batch))).await;

        let (mut processed, mut failed) = (0, 0);
        for (ok, err) in results {
            processed += ok;
            failed += err;
        }
        info!(processed, failed, "Invalidation cycle finished");
        CycleOutcome::Completed { processed, failed }
    }

    async fn persist_batch(&self, keys: Vec<String>) -> (usize, usize) {
        let mut processed = 0;
        let mut failed = 0;
        for key in keys {
            let Some(guild_id) = self.guild_from_key(&key) else {
                warn!(key = %key, "Unrecognized cache tier key, skipping");
                continue;
            };
            let guild_id = guild_id.to_string();

            match self.persist_guild(&guild_id, &key).await {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        guild_id = %guild_id,
                        error = %err,
                        "Failed to persist guild, will retry next cycle"
                    );
                    failed += 1;
                }
            }
        }
        (processed, failed)
    }

    /// Persist one guild's tier document, then clear it.
    ///
    /// The in-flight delta is exactly the document read here; the guild
    /// lock keeps flushes out, so increments arriving meanwhile accumulate
    /// only in the batch queue and never grow the delta mid-persist. A
    /// failed bulk write confirmed nothing, which makes a wholesale resend
    /// on the next cycle safe.
    ///
    /// Returns Ok(true) when a document was persisted and cleared, and
    /// Ok(false) when there was nothing to persist.
    async fn persist_guild(&self, guild_id: &str, key: &str) -> Result<bool, TallyError> {
        let lock = self.guild_lock(guild_id);
        let _guard = lock.lock().await;

        let Some(raw) = self.tier.get(key).await? else {
            // Entry vanished since enumeration; nothing pending anymore.
            self.clear_pending(guild_id);
            return Ok(false);
        };

        let channels = match serde_json::from_str::<ChannelSet>(&raw) {
            Ok(channels) => channels,
            Err(err) => {
                error!(
                    guild_id,
                    error = %err,
                    "Dropping malformed cache tier document"
                );
                self.tier.delete(key).await?;
                self.clear_pending(guild_id);
                return Ok(false);
            }
        };
        if channels.is_empty() {
            self.tier.delete(key).await?;
            self.clear_pending(guild_id);
            return Ok(false);
        }

        let updates = channels.leaf_updates();
        self.store.bulk_upsert_increment(guild_id, &updates).await?;

        // The write is confirmed. A clear that fails leaves the entry to be
        // re-delivered next cycle, so retry once before giving up.
        if let Err(first) = self.tier.delete(key).await {
            warn!(guild_id, error = %first, "Failed to clear cache tier entry, retrying");
            if let Err(second) = self.tier.delete(key).await {
                error!(
                    guild_id,
                    error = %second,
                    "Cache tier entry not cleared after confirmed write; counts may be re-delivered"
                );
                return Err(second);
            }
        }
        self.clear_pending(guild_id);
        self.lookup.invalidate(guild_id).await;

        debug!(
            guild_id,
            leaves = updates.len(),
            "Guild invalidated into durable store"
        );
        Ok(true)
    }

    /// Warm start: mark guilds whose cache tier entries survived a previous
    /// process so the first invalidation cycle persists them.
    pub async fn recover(&self) -> Result<usize, TallyError> {
        let keys = self.tier.list_keys(&self.key_prefix()).await?;
        let mut recovered = 0;
        for key in &keys {
            if let Some(guild_id) = self.guild_from_key(key) {
                self.mark_pending(guild_id);
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!(guilds = recovered, "Recovered pending cache tier entries");
        }
        Ok(recovered)
    }

    /// Start the two independent interval loops. Each tick that lands while
    /// the previous run of the same cycle is still in flight is skipped.
    pub fn spawn_cycles(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> (JoinHandle<()>, JoinHandle<()>) {
        let flush = {
            let manager = Arc::clone(self);
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let period = manager.settings.flush_interval;
                let mut ticker = time::interval_at(time::Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            manager.flush_cycle().await;
                        }
                        _ = shutdown.changed() => {
                            info!("Flush loop shutting down");
                            break;
                        }
                    }
                }
            })
        };

        let invalidate = {
            let manager = Arc::clone(self);
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let period = manager.settings.invalidate_interval;
                let mut ticker = time::interval_at(time::Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            manager.invalidation_cycle().await;
                        }
                        _ = shutdown.changed() => {
                            info!("Invalidation loop shutting down");
                            break;
                        }
                    }
                }
            })
        };

        (flush, invalidate)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tally_core::LeafUpdate;
    use tally_store::InMemoryActivityStore;

    use crate::lookup::{Lookup, QueryService};
    use crate::tier::InMemoryCacheTier;

    use super::*;

    fn meta(name: &str) -> DisplayMeta {
        DisplayMeta {
            username: name.to_string(),
            avatar: format!("{name}.png"),
        }
    }

    fn manager_with(
        tier: Arc<dyn CacheTier>,
        store: Arc<dyn ActivityStore>,
    ) -> (Arc<CacheManager>, Arc<LookupCache>) {
        let lookup = Arc::new(LookupCache::new());
        let manager = Arc::new(CacheManager::new(
            Arc::new(BatchQueue::new()),
            tier,
            store,
            lookup.clone(),
            CacheSettings::default(),
        ));
        (manager, lookup)
    }

    /// Tier that fails a configurable number of `batch` calls.
    struct FlakyTier {
        inner: InMemoryCacheTier,
        batch_failures: AtomicUsize,
    }

    impl FlakyTier {
        fn failing_batches(n: usize) -> Self {
            Self {
                inner: InMemoryCacheTier::new(),
                batch_failures: AtomicUsize::new(n),
            }
        }
    }

    #[async_trait]
    impl CacheTier for FlakyTier {
        async fn get(&self, key: &str) -> Result<Option<String>, TallyError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> Result<(), TallyError> {
            self.inner.set(key, value).await
        }
        async fn delete(&self, key: &str) -> Result<(), TallyError> {
            self.inner.delete(key).await
        }
        async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, TallyError> {
            self.inner.list_keys(prefix).await
        }
        async fn batch(&self, commands: Vec<TierCommand>) -> Result<(), TallyError> {
            if self
                .batch_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TallyError::Tier("injected batch failure".into()));
            }
            self.inner.batch(commands).await
        }
    }

    /// Store that fails a configurable number of bulk writes.
    struct FlakyStore {
        inner: InMemoryActivityStore,
        write_failures: AtomicUsize,
    }

    impl FlakyStore {
        fn failing_writes(n: usize) -> Self {
            Self {
                inner: InMemoryActivityStore::new(),
                write_failures: AtomicUsize::new(n),
            }
        }
    }

    #[async_trait]
    impl ActivityStore for FlakyStore {
        async fn bulk_upsert_increment(
            &self,
            guild_id: &str,
            updates: &[LeafUpdate],
        ) -> Result<(), TallyError> {
            if self
                .write_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TallyError::Store("injected write failure".into()));
            }
            self.inner.bulk_upsert_increment(guild_id, updates).await
        }

        async fn find_one(&self, guild_id: &str) -> Result<Option<ChannelSet>, TallyError> {
            self.inner.find_one(guild_id).await
        }
    }

    #[tokio::test]
    async fn increments_flow_through_both_cycles() {
        let tier = Arc::new(InMemoryCacheTier::new());
        let store = Arc::new(InMemoryActivityStore::new());
        let (manager, lookup) = manager_with(tier.clone(), store.clone());

        for _ in 0..3 {
            manager.record_increment("G1", "C1", "2024-01-01", "U1", &meta("alice"));
        }

        assert_eq!(
            manager.flush_cycle().await,
            CycleOutcome::Completed {
                processed: 1,
                failed: 0
            }
        );
        assert!(tier.get("chat_G1").await.unwrap().is_some());

        assert_eq!(
            manager.invalidation_cycle().await,
            CycleOutcome::Completed {
                processed: 1,
                failed: 0
            }
        );

        let doc = store.find_one("G1").await.unwrap().expect("persisted");
        assert_eq!(doc.channels["C1"].dates["2024-01-01"].users["U1"].count, 3);

        // Tier emptiness after a successful invalidation.
        assert_eq!(tier.get("chat_G1").await.unwrap(), None);
        assert!(tier.list_keys("chat_").await.unwrap().is_empty());

        let service = QueryService::new(lookup, store.clone());
        match service.fetch("G1").await.unwrap() {
            Lookup::Found(channels) => {
                assert_eq!(channels.channels["C1"].dates["2024-01-01"].users["U1"].count, 3)
            }
            Lookup::NoData => panic!("expected persisted document"),
        }
        assert_eq!(service.fetch("G2").await.unwrap(), Lookup::NoData);
    }

    #[tokio::test]
    async fn second_invalidation_is_a_no_op() {
        let tier = Arc::new(InMemoryCacheTier::new());
        let store = Arc::new(InMemoryActivityStore::new());
        let (manager, _) = manager_with(tier, store.clone());

        manager.record_increment("G1", "C1", "2024-01-01", "U1", &meta("alice"));
        manager.flush_cycle().await;
        manager.invalidation_cycle().await;

        assert_eq!(
            manager.invalidation_cycle().await,
            CycleOutcome::Completed {
                processed: 0,
                failed: 0
            }
        );
        let doc = store.find_one("G1").await.unwrap().unwrap();
        assert_eq!(doc.channels["C1"].dates["2024-01-01"].users["U1"].count, 1);
    }

    #[tokio::test]
    async fn flush_failure_requeues_the_delta() {
        let tier = Arc::new(FlakyTier::failing_batches(1));
        let store = Arc::new(InMemoryActivityStore::new());
        let (manager, _) = manager_with(tier, store.clone());

        for _ in 0..4 {
            manager.record_increment("G1", "C1", "2024-01-01", "U1", &meta("alice"));
        }

        assert_eq!(
            manager.flush_cycle().await,
            CycleOutcome::Completed {
                processed: 0,
                failed: 1
            }
        );

        // Another increment lands before the retry; nothing is lost.
        manager.record_increment("G1", "C1", "2024-01-01", "U1", &meta("alice"));
        assert_eq!(
            manager.flush_cycle().await,
            CycleOutcome::Completed {
                processed: 1,
                failed: 0
            }
        );
        manager.invalidation_cycle().await;

        let doc = store.find_one("G1").await.unwrap().expect("persisted");
        assert_eq!(doc.channels["C1"].dates["2024-01-01"].users["U1"].count, 5);
    }

    #[tokio::test]
    async fn persist_failure_is_retried_without_double_counting() {
        let tier = Arc::new(InMemoryCacheTier::new());
        let store = Arc::new(FlakyStore::failing_writes(1));
        let (manager, _) = manager_with(tier.clone(), store.clone());

        manager.record_increment("G1", "C1", "2024-01-01", "U1", &meta("alice"));
        manager.record_increment("G1", "C1", "2024-01-01", "U1", &meta("alice"));
        manager.flush_cycle().await;

        assert_eq!(
            manager.invalidation_cycle().await,
            CycleOutcome::Completed {
                processed: 0,
                failed: 1
            }
        );
        // Nothing confirmed: entry and marker intact, store untouched.
        assert!(tier.get("chat_G1").await.unwrap().is_some());
        assert!(store.find_one("G1").await.unwrap().is_none());

        assert_eq!(
            manager.invalidation_cycle().await,
            CycleOutcome::Completed {
                processed: 1,
                failed: 0
            }
        );
        let doc = store.find_one("G1").await.unwrap().expect("persisted");
        assert_eq!(doc.channels["C1"].dates["2024-01-01"].users["U1"].count, 2);
        assert_eq!(tier.get("chat_G1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn additivity_holds_across_interleaved_cycles() {
        let tier = Arc::new(InMemoryCacheTier::new());
        let store = Arc::new(InMemoryActivityStore::new());
        let (manager, _) = manager_with(tier, store.clone());

        let writer = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                for i in 0..100u32 {
                    manager.record_increment("G1", "C1", "2024-01-01", "U1", &meta("alice"));
                    if i % 10 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        for _ in 0..5 {
            manager.flush_cycle().await;
            manager.invalidation_cycle().await;
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        // Drain whatever the interleaved cycles did not pick up.
        manager.flush_cycle().await;
        manager.invalidation_cycle().await;

        let doc = store.find_one("G1").await.unwrap().expect("persisted");
        assert_eq!(doc.channels["C1"].dates["2024-01-01"].users["U1"].count, 100);
    }

    #[tokio::test]
    async fn display_metadata_stays_fresh_across_cycles() {
        let tier = Arc::new(InMemoryCacheTier::new());
        let store = Arc::new(InMemoryActivityStore::new());
        let (manager, _) = manager_with(tier, store.clone());

        for _ in 0..3 {
            manager.record_increment("G1", "C1", "2024-01-01", "U1", &meta("A"));
        }
        manager.flush_cycle().await;

        for _ in 0..2 {
            manager.record_increment("G1", "C1", "2024-01-01", "U1", &meta("B"));
        }
        manager.flush_cycle().await;
        manager.invalidation_cycle().await;

        let doc = store.find_one("G1").await.unwrap().expect("persisted");
        let leaf = &doc.channels["C1"].dates["2024-01-01"].users["U1"];
        assert_eq!(leaf.count, 5);
        assert_eq!(leaf.username, "B");
    }

    /// Tier whose reads suspend, so an in-flight cycle stays observable.
    struct SlowTier {
        inner: InMemoryCacheTier,
    }

    #[async_trait]
    impl CacheTier for SlowTier {
        async fn get(&self, key: &str) -> Result<Option<String>, TallyError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> Result<(), TallyError> {
            self.inner.set(key, value).await
        }
        async fn delete(&self, key: &str) -> Result<(), TallyError> {
            self.inner.delete(key).await
        }
        async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, TallyError> {
            self.inner.list_keys(prefix).await
        }
        async fn batch(&self, commands: Vec<TierCommand>) -> Result<(), TallyError> {
            self.inner.batch(commands).await
        }
    }

    #[tokio::test]
    async fn concurrent_flush_ticks_skip_instead_of_overlapping() {
        let tier = Arc::new(SlowTier {
            inner: InMemoryCacheTier::new(),
        });
        let store = Arc::new(InMemoryActivityStore::new());
        let (manager, _) = manager_with(tier, store);

        manager.record_increment("G1", "C1", "2024-01-01", "U1", &meta("alice"));
        let (a, b) = tokio::join!(manager.flush_cycle(), manager.flush_cycle());

        let outcomes = [a, b];
        let skipped = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, CycleOutcome::Skipped))
            .count();
        assert_eq!(skipped, 1);
        assert!(outcomes.contains(&CycleOutcome::Completed {
            processed: 1,
            failed: 0
        }));
    }

    #[tokio::test]
    async fn recover_marks_leftover_entries_for_persistence() {
        let tier = Arc::new(InMemoryCacheTier::new());
        let store = Arc::new(InMemoryActivityStore::new());

        // A previous process flushed but never invalidated.
        let mut leftover = ChannelSet::default();
        leftover.increment("C1", "2024-01-01", "U1", &meta("alice"));
        tier.set("chat_G1", &serde_json::to_string(&leftover).unwrap())
            .await
            .unwrap();

        let (manager, _) = manager_with(tier.clone(), store.clone());
        assert_eq!(manager.recover().await.unwrap(), 1);

        assert_eq!(
            manager.invalidation_cycle().await,
            CycleOutcome::Completed {
                processed: 1,
                failed: 0
            }
        );
        let doc = store.find_one("G1").await.unwrap().expect("persisted");
        assert_eq!(doc.channels["C1"].dates["2024-01-01"].users["U1"].count, 1);
        assert_eq!(tier.get("chat_G1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_tier_document_is_dropped_not_fatal() {
        let tier = Arc::new(InMemoryCacheTier::new());
        let store = Arc::new(InMemoryActivityStore::new());
        tier.set("chat_G1", "{not json").await.unwrap();

        let (manager, _) = manager_with(tier.clone(), store.clone());
        manager.recover().await.unwrap();

        assert_eq!(
            manager.invalidation_cycle().await,
            CycleOutcome::Completed {
                processed: 0,
                failed: 0
            }
        );
        assert_eq!(tier.get("chat_G1").await.unwrap(), None);
        assert!(store.find_one("G1").await.unwrap().is_none());
    }
}
