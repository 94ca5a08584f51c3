use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-user activity for a single (channel, day) cell.
///
/// `count` is additive; `username` and `avatar` are denormalized display
/// metadata where the most recently observed value wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityCount {
    pub count: u64,
    pub username: String,
    pub avatar: String,
}

impl ActivityCount {
    /// Fold another observation for the same (guild, channel, day, user) key
    /// into this one: counts sum, display metadata is last-write-wins.
    pub fn merge_from(&mut self, other: ActivityCount) {
        self.count += other.count;
        self.username = other.username;
        self.avatar = other.avatar;
    }
}

/// Display metadata carried alongside each increment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayMeta {
    pub username: String,
    pub avatar: String,
}

/// user_id → ActivityCount for one day in one channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct UserBucket {
    pub users: BTreeMap<String, ActivityCount>,
}

impl UserBucket {
    pub fn merge_from(&mut self, other: UserBucket) {
        for (user_id, count) in other.users {
            self.users.entry(user_id).or_default().merge_from(count);
        }
    }
}

/// ISO date ("YYYY-MM-DD") → UserBucket for one channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct DateBucket {
    pub dates: BTreeMap<String, UserBucket>,
}

impl DateBucket {
    pub fn merge_from(&mut self, other: DateBucket) {
        for (day, users) in other.dates {
            self.dates.entry(day).or_default().merge_from(users);
        }
    }
}

/// The `channels` subtree for one guild: channel_id → DateBucket.
///
/// This is the unit serialized into the shared cache tier and the canonical
/// shape of the durable per-guild document. BTreeMaps keep the serialized
/// form stable regardless of insertion order, so two equal documents always
/// serialize byte-identically.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ChannelSet {
    pub channels: BTreeMap<String, DateBucket>,
}

impl ChannelSet {
    /// Record a single activity event at the given path.
    pub fn increment(&mut self, channel_id: &str, day: &str, user_id: &str, meta: &DisplayMeta) {
        let entry = self
            .channels
            .entry(channel_id.to_string())
            .or_default()
            .dates
            .entry(day.to_string())
            .or_default()
            .users
            .entry(user_id.to_string())
            .or_default();
        entry.count += 1;
        entry.username = meta.username.clone();
        entry.avatar = meta.avatar.clone();
    }

    /// Deep-merge another subtree into this one. Counts at matching leaves
    /// sum; display metadata from `other` wins.
    pub fn merge_from(&mut self, other: ChannelSet) {
        for (channel_id, dates) in other.channels {
            self.channels.entry(channel_id).or_default().merge_from(dates);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Number of (channel, day, user) leaves.
    pub fn leaf_count(&self) -> usize {
        self.channels
            .values()
            .flat_map(|dates| dates.dates.values())
            .map(|users| users.users.len())
            .sum()
    }

    /// Translate every leaf into one increment-or-upsert operation against
    /// the durable store.
    pub fn leaf_updates(&self) -> Vec<LeafUpdate> {
        let mut updates = Vec::with_capacity(self.leaf_count());
        for (channel_id, dates) in &self.channels {
            for (day, users) in &dates.dates {
                for (user_id, activity) in &users.users {
                    updates.push(LeafUpdate {
                        channel_id: channel_id.clone(),
                        day: day.clone(),
                        user_id: user_id.clone(),
                        count: activity.count,
                        username: activity.username.clone(),
                        avatar: activity.avatar.clone(),
                    });
                }
            }
        }
        updates
    }
}

/// The logical per-guild aggregate, also the wire shape of whole-guild
/// query responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GuildActivity {
    pub guild_id: String,
    pub channels: ChannelSet,
}

/// One increment-or-upsert operation for the durable store: create the
/// record if absent, add `count` to the stored count, overwrite the display
/// metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafUpdate {
    pub channel_id: String,
    pub day: String,
    pub user_id: String,
    pub count: u64,
    pub username: String,
    pub avatar: String,
}
