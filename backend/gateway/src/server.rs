//! Main HTTP server for the query surface.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tracing::info;

use tally_cache::QueryService;

use crate::rate_limit::{self, RateLimiter};
use crate::routes;

/// Application state shared across routes.
#[derive(Clone)]
pub struct GatewayState {
    pub query: Arc<QueryService>,
    pub limiter: Arc<RateLimiter>,
}

/// Build the router with every lookup route behind the rate limiter.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/guild/:guild_id", get(routes::guild))
        .route("/guild/:guild_id/user/:user_id", get(routes::guild_user))
        .route(
            "/guild/:guild_id/channel/:channel_id",
            get(routes::guild_channel),
        )
        .route(
            "/guild/:guild_id/channel/:channel_id/user/:user_id",
            get(routes::guild_channel_user),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce,
        ))
        .with_state(state)
}

/// Bind and serve until the process shuts down.
pub async fn start_server(addr: SocketAddr, state: GatewayState) -> Result<()> {
    let app = router(state);
    info!("Query API listening on {}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
