pub mod config;
pub mod janitor;
pub mod serve;

use std::sync::Arc;

use anyhow::{Context, Result};
use quill::{LocalObjectStorage, RedisStore, RetentionJanitor, StoreAccountDirectory};

use crate::context::ConfigContext;

/// Connect to the configured Redis store
pub async fn connect_store(ctx: &ConfigContext) -> Result<Arc<RedisStore>> {
    let url = ctx.redis_url()?;
    let store = RedisStore::connect(&url, ctx.config.store.prefix.clone())
        .await
        .with_context(|| format!("Failed to connect to store at {url}"))?;
    Ok(Arc::new(store))
}

/// Build the retention janitor from config
pub fn build_janitor(ctx: &ConfigContext, store: Arc<RedisStore>) -> Result<RetentionJanitor> {
    let policy = ctx.config.retention.policy()?;
    let accounts = Arc::new(StoreAccountDirectory::new(store.clone()));
    let storage = Arc::new(LocalObjectStorage::new(&ctx.config.storage.root));
    Ok(RetentionJanitor::new(store, accounts, storage).with_policy(policy))
}
