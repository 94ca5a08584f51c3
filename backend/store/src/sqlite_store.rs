/// SQLite-backed durable activity store.
///
/// One row per (guild, channel, day, user) leaf. Bulk writes run inside a
/// single transaction, using `ON CONFLICT .. DO UPDATE` so that counts are
/// incremented in place and display metadata is overwritten, mirroring the
/// per-path increment semantics the cache manager relies on: the document
/// is the union of all historical invalidation cycles, never replaced.
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use tracing::{debug, info};

use tally_core::{ActivityCount, ChannelSet, LeafUpdate, TallyError};

use crate::store::ActivityStore;

pub struct SqliteActivityStore {
    conn: Mutex<Connection>,
}

impl SqliteActivityStore {
    /// Create or open a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .context("Failed to open SQLite activity database")?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS activity (
                 guild_id   TEXT NOT NULL,
                 channel_id TEXT NOT NULL,
                 day        TEXT NOT NULL,
                 user_id    TEXT NOT NULL,
                 count      INTEGER NOT NULL DEFAULT 0,
                 username   TEXT NOT NULL DEFAULT '',
                 avatar     TEXT NOT NULL DEFAULT '',
                 PRIMARY KEY (guild_id, channel_id, day, user_id)
             );
             CREATE INDEX IF NOT EXISTS idx_activity_guild ON activity(guild_id);",
        )
        .context("Failed to initialize activity schema")?;

        info!("SqliteActivityStore opened at {:?}", path.as_ref());
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS activity (
                 guild_id   TEXT NOT NULL,
                 channel_id TEXT NOT NULL,
                 day        TEXT NOT NULL,
                 user_id    TEXT NOT NULL,
                 count      INTEGER NOT NULL DEFAULT 0,
                 username   TEXT NOT NULL DEFAULT '',
                 avatar     TEXT NOT NULL DEFAULT '',
                 PRIMARY KEY (guild_id, channel_id, day, user_id)
             );",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn store_err(err: impl std::fmt::Display) -> TallyError {
    TallyError::Store(err.to_string())
}

#[async_trait]
impl ActivityStore for SqliteActivityStore {
    async fn bulk_upsert_increment(
        &self,
        guild_id: &str,
        updates: &[LeafUpdate],
    ) -> Result<(), TallyError> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(store_err)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO activity (guild_id, channel_id, day, user_id, count, username, avatar)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(guild_id, channel_id, day, user_id) DO UPDATE SET
                         count    = count + excluded.count,
                         username = excluded.username,
                         avatar   = excluded.avatar",
                )
                .map_err(store_err)?;

            for update in updates {
                stmt.execute(params![
                    guild_id,
                    update.channel_id,
                    update.day,
                    update.user_id,
                    update.count as i64,
                    update.username,
                    update.avatar,
                ])
                .map_err(store_err)?;
            }
        }
        tx.commit().map_err(store_err)?;

        debug!(guild_id, leaves = updates.len(), "Bulk upsert committed");
        Ok(())
    }

    async fn find_one(&self, guild_id: &str) -> Result<Option<ChannelSet>, TallyError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare_cached(
                "SELECT channel_id, day, user_id, count, username, avatar
                 FROM activity WHERE guild_id = ?1",
            )
            .map_err(store_err)?;

        let rows = stmt
            .query_map(params![guild_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(store_err)?;

        let mut channels = ChannelSet::default();
        let mut found = false;
        for row in rows {
            let (channel_id, day, user_id, count, username, avatar) = row.map_err(store_err)?;
            found = true;
            channels
                .channels
                .entry(channel_id)
                .or_default()
                .dates
                .entry(day)
                .or_default()
                .users
                .insert(
                    user_id,
                    ActivityCount {
                        count: count.max(0) as u64,
                        username,
                        avatar,
                    },
                );
        }

        Ok(if found { Some(channels) } else { None })
    }
}
