use std::collections::HashMap;
use std::sync::Mutex;

use tally_core::{ChannelSet, DisplayMeta};

/// Process-local accumulation tier: per-guild nested counters holding the
/// newest increments since the last flush.
///
/// `record` is a pure in-memory mutation and never fails. `detach` removes
/// a guild's whole branch atomically with respect to concurrent `record`s
/// for the same guild, so increments arriving mid-flush land in a fresh
/// branch instead of being lost or double-counted.
///
/// The queue is an explicitly owned instance handed to both the ingest
/// boundary and the cache manager; there is no module-level state.
pub struct BatchQueue {
    guilds: Mutex<HashMap<String, ChannelSet>>,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self {
            guilds: Mutex::new(HashMap::new()),
        }
    }

    /// Append one increment at the given path.
    pub fn record(
        &self,
        guild_id: &str,
        channel_id: &str,
        day: &str,
        user_id: &str,
        meta: &DisplayMeta,
    ) {
        let mut guilds = self.guilds.lock().unwrap();
        guilds
            .entry(guild_id.to_string())
            .or_default()
            .increment(channel_id, day, user_id, meta);
    }

    /// Atomically remove and return a guild's accumulated branch.
    pub fn detach(&self, guild_id: &str) -> Option<ChannelSet> {
        self.guilds.lock().unwrap().remove(guild_id)
    }

    /// Merge a previously detached branch back, preserving any increments
    /// recorded since the detach. Used when a flush write fails so the
    /// delta is retried on the next cycle instead of dropped.
    pub fn restore(&self, guild_id: &str, delta: ChannelSet) {
        let mut guilds = self.guilds.lock().unwrap();
        guilds
            .entry(guild_id.to_string())
            .or_default()
            .merge_from(delta);
    }

    /// Guilds that currently have accumulated increments.
    pub fn guild_ids(&self) -> Vec<String> {
        self.guilds.lock().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.guilds.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.lock().unwrap().is_empty()
    }
}

impl Default for BatchQueue {
    fn default() -> Self {
        Self::new()
    }
}
