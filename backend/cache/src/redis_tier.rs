//! Redis-backed shared cache tier.
//!
//! One Redis key per guild with pending counts; `batch` maps onto an
//! atomic MULTI/EXEC pipeline.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::info;

use tally_core::TallyError;

use crate::tier::{CacheTier, TierCommand};

pub struct RedisCacheTier {
    conn: ConnectionManager,
}

impl RedisCacheTier {
    /// Connect and wrap the connection in a reconnecting manager.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).context("Invalid Redis URL")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("Failed to connect to Redis cache tier")?;
        info!("Connected to Redis cache tier");
        Ok(Self { conn })
    }
}

fn tier_err(err: impl std::fmt::Display) -> TallyError {
    TallyError::Tier(err.to_string())
}

#[async_trait]
impl CacheTier for RedisCacheTier {
    async fn get(&self, key: &str) -> Result<Option<String>, TallyError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(tier_err)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), TallyError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await.map_err(tier_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TallyError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(tier_err)?;
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, TallyError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(format!("{prefix}*"))
            .await
            .map_err(tier_err)?;
        Ok(keys)
    }

    async fn batch(&self, commands: Vec<TierCommand>) -> Result<(), TallyError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in commands {
            match command {
                TierCommand::Set { key, value } => {
                    pipe.set(key, value).ignore();
                }
                TierCommand::Delete { key } => {
                    pipe.del(key).ignore();
                }
            }
        }
        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(tier_err)?;
        Ok(())
    }
}
