//! Query surface rate limiting.
//!
//! A fixed window per client IP in front of every route: the first request
//! opens the window, requests past the cap are rejected until it expires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::net::SocketAddr;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::server::GatewayState;

#[derive(Clone)]
pub struct RateLimiter {
    // ip_address -> (request_count, window_start)
    limits: Arc<RwLock<HashMap<String, (u32, Instant)>>>,
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        // 15-minute window, matching the public API's published limit.
        Self::new(100, 15 * 60)
    }
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            limits: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Count a request against the given IP's current window. Returns false
    /// once the cap inside the window is spent.
    pub async fn check_limit(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut limits = self.limits.write().await;

        match limits.get_mut(ip) {
            Some(state) if now.duration_since(state.1) <= self.window => {
                state.0 += 1;
                if state.0 > self.max_requests {
                    warn!("Rate limit exceeded for IP {}", ip);
                    false
                } else {
                    debug!(
                        "Rate limit OK for IP {} ({}/{})",
                        ip, state.0, self.max_requests
                    );
                    true
                }
            }
            _ => {
                // First request opens a fresh window.
                limits.insert(ip.to_string(), (1, now));
                true
            }
        }
    }
}

/// Axum middleware enforcing the limiter for every route.
pub async fn enforce(
    State(state): State<GatewayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if state.limiter.check_limit(&addr.ip().to_string()).await {
        next.run(request).await
    } else {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Too many requests" })),
        )
            .into_response()
    }
}
