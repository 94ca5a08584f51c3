use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A qualifying activity event as delivered by the surrounding chat-gateway
/// dispatcher, once per message.
///
/// `guild_id` is absent for direct-message contexts, which the ingest
/// boundary rejects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub author_id: String,
    /// True for service accounts (bots, webhooks); their activity is not
    /// counted.
    #[serde(default)]
    pub author_is_bot: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub avatar: String,
}

/// Current UTC day in the "YYYY-MM-DD" form used as the date bucket key.
pub fn current_day() -> String {
    Utc::now().date_naive().to_string()
}
