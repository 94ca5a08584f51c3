//! Pure projections over a guild's `ChannelSet` for the query surface.
//!
//! Narrowing never mutates the source document; an empty projection at any
//! level is `None`, which the gateway translates into its no-data sentinel.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::activity::{ActivityCount, ChannelSet};

/// One user's entry inside a filtered date cell.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FilteredUser {
    pub user_id: String,
    pub user_data: ActivityCount,
}

/// channel_id → day → matching user entries.
pub type FilteredChannels = BTreeMap<String, BTreeMap<String, Vec<FilteredUser>>>;

/// Narrow a guild document to a single channel and/or user.
///
/// Returns `None` when the projection is empty at any level: unknown
/// channel, unknown user, or a document with no surviving leaves.
pub fn filter_activity(
    channels: &ChannelSet,
    user_id: Option<&str>,
    channel_id: Option<&str>,
) -> Option<FilteredChannels> {
    let selected: Vec<_> = match channel_id {
        Some(cid) => channels.channels.get_key_value(cid).into_iter().collect(),
        None => channels.channels.iter().collect(),
    };
    if selected.is_empty() {
        return None;
    }

    let mut result = FilteredChannels::new();
    for (cid, dates) in selected {
        let mut per_day = BTreeMap::new();
        for (day, users) in &dates.dates {
            let entries: Vec<FilteredUser> = match user_id {
                Some(uid) => users
                    .users
                    .get_key_value(uid)
                    .map(|(id, data)| FilteredUser {
                        user_id: id.clone(),
                        user_data: data.clone(),
                    })
                    .into_iter()
                    .collect(),
                None => users
                    .users
                    .iter()
                    .map(|(id, data)| FilteredUser {
                        user_id: id.clone(),
                        user_data: data.clone(),
                    })
                    .collect(),
            };
            if !entries.is_empty() {
                per_day.insert(day.clone(), entries);
            }
        }
        if !per_day.is_empty() {
            result.insert(cid.clone(), per_day);
        }
    }

    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

/// Total count for one user, across all channels or a restricted set.
pub fn sum_counts(channels: &ChannelSet, user_id: &str, channel_ids: Option<&[&str]>) -> u64 {
    let selected: Vec<_> = match channel_ids {
        Some(ids) => ids
            .iter()
            .filter_map(|cid| channels.channels.get(*cid))
            .collect(),
        None => channels.channels.values().collect(),
    };

    selected
        .into_iter()
        .flat_map(|dates| dates.dates.values())
        .filter_map(|users| users.users.get(user_id))
        .map(|activity| activity.count)
        .sum()
}
