// src/store.rs
//! SQLite-backed channel configuration.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::models::{ChannelConfig, ChannelRow};

#[derive(Clone)]
pub struct ChannelStore {
    db: Pool<Sqlite>,
}

fn unavailable(e: impl std::fmt::Display) -> StoreError { StoreError::Unavailable(e.to_string()) }

impl ChannelStore {
    pub fn new(db: Pool<Sqlite>) -> Self { Self { db } }

    pub async fn channel_config(&self, name: &str) -> Result<Option<ChannelConfig>, StoreError> {
        let row = sqlx::query_as::<_, ChannelRow>("SELECT * FROM channels WHERE name=?")
            .bind(name)
            .fetch_optional(&self.db)
            .await
            .map_err(unavailable)?;
        let Some(row) = row else { return Ok(None) };
        serde_json::from_str(&row.config_json).map(Some).map_err(|e| {
            warn!("stored config for '{}' does not parse: {}", name, e);
            StoreError::Unavailable(format!("stored config for '{name}' is invalid: {e}"))
        })
    }

    pub async fn upsert(&self, name: &str, config: &ChannelConfig) -> Result<(), StoreError> {
        let json = serde_json::to_string(config).map_err(unavailable)?;
        sqlx::query(
            "INSERT INTO channels(name, config_json) VALUES(?, ?) \
             ON CONFLICT(name) DO UPDATE SET config_json=excluded.config_json, \
             updated_at=strftime('%Y-%m-%dT%H:%M:%fZ','now')",
        )
        .bind(name)
        .bind(json)
        .execute(&self.db)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ChannelRow>, StoreError> {
        sqlx::query_as::<_, ChannelRow>("SELECT * FROM channels ORDER BY name")
            .fetch_all(&self.db)
            .await
            .map_err(unavailable)
    }

    /// Upserts every channel in a `{ "<channel id>": <config>, ... }` file.
    pub async fn seed_from_file(&self, path: &Path) -> anyhow::Result<usize> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let channels: BTreeMap<String, ChannelConfig> =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        for (name, config) in &channels {
            self.upsert(name, config).await?;
        }
        info!("seeded {} channel(s) from {}", channels.len(), path.display());
        Ok(channels.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DefaultBehavior, Mode};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> ChannelStore {
        let db = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!().run(&db).await.unwrap();
        ChannelStore::new(db)
    }

    #[tokio::test]
    async fn upsert_then_fetch() {
        let store = store().await;
        assert_eq!(store.channel_config("ch1").await.unwrap(), None);

        let mut cfg: ChannelConfig = serde_json::from_str(r#"{"default_behavior":"noop"}"#).unwrap();
        store.upsert("ch1", &cfg).await.unwrap();
        cfg.mode = Mode::Stateful;
        cfg.default_behavior = DefaultBehavior::Delete;
        store.upsert("ch1", &cfg).await.unwrap();

        assert_eq!(store.channel_config("ch1").await.unwrap(), Some(cfg));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_row_reads_as_unavailable() {
        let store = store().await;
        sqlx::query("INSERT INTO channels(name, config_json) VALUES('bad', '{')")
            .execute(&store.db)
            .await
            .unwrap();
        assert!(matches!(store.channel_config("bad").await, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn seeds_channels_from_json_file() {
        let store = store().await;
        let path = std::env::temp_dir().join(format!("esam-channels-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{ "east": {"default_behavior":"noop"},
                 "west": {"default_behavior":"delete","mode":"stateful","rules":[]} }"#,
        )
        .unwrap();
        assert_eq!(store.seed_from_file(&path).await.unwrap(), 2);
        let west = store.channel_config("west").await.unwrap().unwrap();
        assert_eq!(west.mode, Mode::Stateful);
        std::fs::remove_file(&path).ok();
    }
}
