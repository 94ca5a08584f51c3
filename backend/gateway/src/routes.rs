use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::error;

use tally_cache::Lookup;
use tally_core::{filter_activity, sum_counts, GuildActivity, TallyError};

use crate::server::GatewayState;

/// Sentinel body for any lookup that resolves to no data. Callers branch on
/// this rather than on empty payloads.
fn no_data() -> Json<Value> {
    Json(json!({ "error": "No data found" }))
}

fn internal_error(err: &TallyError) -> Response {
    error!(error = %err, "Query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal Server Error" })),
    )
        .into_response()
}

/// Index of available endpoints.
pub async fn index() -> Json<Value> {
    Json(json!({
        "endpoints": [
            {
                "method": "GET",
                "path": "/",
                "description": "API is up and running"
            },
            {
                "method": "GET",
                "path": "/guild/{guildId}",
                "description": "Retrieve data for a specific guild"
            },
            {
                "method": "GET",
                "path": "/guild/{guildId}/user/{userId}",
                "description": "Retrieve data for a specific user within a guild"
            },
            {
                "method": "GET",
                "path": "/guild/{guildId}/channel/{channelId}",
                "description": "Retrieve data for a specific channel within a guild"
            },
            {
                "method": "GET",
                "path": "/guild/{guildId}/channel/{channelId}/user/{userId}",
                "description": "Retrieve data for a specific user within a specific channel within a guild"
            }
        ]
    }))
}

pub async fn guild(
    State(state): State<GatewayState>,
    Path(guild_id): Path<String>,
) -> Response {
    match state.query.fetch(&guild_id).await {
        Ok(Lookup::Found(channels)) => Json(GuildActivity { guild_id, channels }).into_response(),
        Ok(Lookup::NoData) => no_data().into_response(),
        Err(err) => internal_error(&err),
    }
}

pub async fn guild_user(
    State(state): State<GatewayState>,
    Path((guild_id, user_id)): Path<(String, String)>,
) -> Response {
    scoped(state, guild_id, Some(user_id), None).await
}

pub async fn guild_channel(
    State(state): State<GatewayState>,
    Path((guild_id, channel_id)): Path<(String, String)>,
) -> Response {
    scoped(state, guild_id, None, Some(channel_id)).await
}

pub async fn guild_channel_user(
    State(state): State<GatewayState>,
    Path((guild_id, channel_id, user_id)): Path<(String, String, String)>,
) -> Response {
    scoped(state, guild_id, Some(user_id), Some(channel_id)).await
}

/// Shared narrowing for the scoped lookups. User-scoped responses also
/// carry the user's total across the selected channels.
async fn scoped(
    state: GatewayState,
    guild_id: String,
    user_id: Option<String>,
    channel_id: Option<String>,
) -> Response {
    let channels = match state.query.fetch(&guild_id).await {
        Ok(Lookup::Found(channels)) => channels,
        Ok(Lookup::NoData) => return no_data().into_response(),
        Err(err) => return internal_error(&err),
    };

    let Some(filtered) = filter_activity(&channels, user_id.as_deref(), channel_id.as_deref())
    else {
        return no_data().into_response();
    };

    let mut body = json!({ "guildId": guild_id, "channels": filtered });
    if let Some(uid) = user_id.as_deref() {
        let total = match channel_id.as_deref() {
            Some(cid) => sum_counts(&channels, uid, Some(&[cid])),
            None => sum_counts(&channels, uid, None),
        };
        body["total"] = json!(total);
    }
    Json(body).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::to_bytes;

    use tally_cache::{LookupCache, QueryService};
    use tally_core::LeafUpdate;
    use tally_store::{ActivityStore, InMemoryActivityStore};

    use crate::rate_limit::RateLimiter;

    use super::*;

    fn update(channel: &str, day: &str, user: &str, count: u64, name: &str) -> LeafUpdate {
        LeafUpdate {
            channel_id: channel.to_string(),
            day: day.to_string(),
            user_id: user.to_string(),
            count,
            username: name.to_string(),
            avatar: format!("{name}.png"),
        }
    }

    async fn seeded_state() -> GatewayState {
        let store = Arc::new(InMemoryActivityStore::new());
        store
            .bulk_upsert_increment(
                "G1",
                &[
                    update("C1", "2024-01-01", "U1", 3, "alice"),
                    update("C1", "2024-01-02", "U2", 2, "bob"),
                    update("C2", "2024-01-01", "U1", 1, "alice"),
                ],
            )
            .await
            .unwrap();
        GatewayState {
            query: Arc::new(QueryService::new(Arc::new(LookupCache::new()), store)),
            limiter: Arc::new(RateLimiter::default()),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn whole_guild_lookup_returns_the_document() {
        let state = seeded_state().await;
        let response = guild(State(state), Path("G1".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["guildId"], "G1");
        assert_eq!(body["channels"]["C1"]["2024-01-01"]["U1"]["count"], 3);
    }

    #[tokio::test]
    async fn unknown_guild_returns_the_sentinel() {
        let state = seeded_state().await;
        let response = guild(State(state), Path("G404".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["error"], "No data found");
    }

    #[tokio::test]
    async fn user_lookup_filters_and_totals_across_channels() {
        let state = seeded_state().await;
        let response = guild_user(
            State(state),
            Path(("G1".to_string(), "U1".to_string())),
        )
        .await;
        let body = body_json(response).await;

        assert_eq!(body["guildId"], "G1");
        assert_eq!(body["total"], 4);
        assert_eq!(body["channels"]["C1"]["2024-01-01"][0]["userId"], "U1");
        assert_eq!(
            body["channels"]["C1"]["2024-01-01"][0]["userData"]["count"],
            3
        );
        assert!(body["channels"]["C1"]["2024-01-02"].is_null());
    }

    #[tokio::test]
    async fn channel_scoped_user_lookup_restricts_the_total() {
        let state = seeded_state().await;
        let response = guild_channel_user(
            State(state),
            Path(("G1".to_string(), "C1".to_string(), "U1".to_string())),
        )
        .await;
        let body = body_json(response).await;

        assert_eq!(body["total"], 3);
        assert!(body["channels"]["C2"].is_null());
    }

    #[tokio::test]
    async fn channel_lookup_omits_total() {
        let state = seeded_state().await;
        let response = guild_channel(
            State(state),
            Path(("G1".to_string(), "C2".to_string())),
        )
        .await;
        let body = body_json(response).await;

        assert!(body["total"].is_null());
        assert_eq!(body["channels"]["C2"]["2024-01-01"][0]["userId"], "U1");
    }

    #[tokio::test]
    async fn empty_projection_returns_the_sentinel() {
        let state = seeded_state().await;
        let response = guild_user(
            State(state),
            Path(("G1".to_string(), "U404".to_string())),
        )
        .await;
        let body = body_json(response).await;
        assert_eq!(body["error"], "No data found");
    }
}
