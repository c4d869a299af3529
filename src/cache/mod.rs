//! TTL'd index cache keyed by (repository, branch, commit)
//!
//! The cache is an explicitly constructed service: callers create it with a
//! [`CacheStore`], call [`IndexCache::init`] once, share it behind an `Arc`, and
//! call [`IndexCache::shutdown`] when done. Cached values are a pure function of
//! (repo, commit), so concurrent writers of the same key may overwrite each
//! other without harm.

pub mod codec;
pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use crate::config::CacheConfig;
use crate::error::{CacheError, IndexError};
use crate::git;
use crate::index::builder::WORKTREE_COMMIT;
use crate::index::{IndexBuilder, RepositoryIndex};
use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const COMMIT_PREFIX_LEN: usize = 12;

/// Key/value backend holding encoded indices.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn store(&self, key: &str, payload: String, ttl: Duration) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Start background maintenance, if the store has any.
    async fn init(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn shutdown(&self) {}

    /// Name of this store for logging
    fn name(&self) -> &'static str;
}

pub struct IndexCache {
    store: Arc<dyn CacheStore>,
    namespace: String,
    ttl: Duration,
}

impl IndexCache {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            namespace: config.namespace.clone(),
            ttl: config.ttl(),
        }
    }

    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    pub async fn init(&self) -> Result<(), CacheError> {
        self.store.init().await?;
        tracing::info!(
            "Index cache ready ({} store, ttl {}s)",
            self.store.name(),
            self.ttl.as_secs()
        );
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.store.shutdown().await;
        tracing::info!("Index cache ({} store) shut down", self.store.name());
    }

    /// `<namespace>:<repoUrl>[:<branch>][:<commitPrefix>]`
    pub fn key(&self, repo_url: &str, branch: Option<&str>, commit: Option<&str>) -> String {
        let mut key = format!("{}:{}", self.namespace, repo_url);
        if let Some(branch) = branch {
            key.push(':');
            key.push_str(branch);
        }
        if let Some(commit) = commit {
            key.push(':');
            key.extend(commit.chars().take(COMMIT_PREFIX_LEN));
        }
        key
    }

    /// Cached index, or `None` on a miss. Corrupt entries count as misses and
    /// are dropped so the next build replaces them.
    pub async fn get(
        &self,
        repo_url: &str,
        branch: Option<&str>,
        commit: Option<&str>,
    ) -> Option<RepositoryIndex> {
        let key = self.key(repo_url, branch, commit);

        let payload = match self.store.load(&key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                tracing::debug!("Index cache miss for {}", key);
                return None;
            }
            Err(e) => {
                tracing::warn!("Index cache lookup for {} failed: {}", key, e);
                return None;
            }
        };

        match codec::decode(&payload, Utc::now()) {
            Ok(Some(index)) => {
                tracing::debug!("Index cache hit for {}", key);
                Some(index)
            }
            Ok(None) => {
                tracing::debug!("Index cache entry {} expired", key);
                None
            }
            Err(e) => {
                tracing::warn!("Discarding unreadable index cache entry {}: {}", key, e);
                if let Err(e) = self.store.remove(&key).await {
                    tracing::warn!("Failed to remove cache entry {}: {}", key, e);
                }
                None
            }
        }
    }

    pub async fn put(&self, index: &RepositoryIndex) {
        let key = self.key(index.repo_url(), index.branch(), Some(index.commit_hash()));
        let expires_at = match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => Utc::now() + ttl,
            Err(_) => {
                tracing::warn!("Index cache ttl out of range, not caching {}", key);
                return;
            }
        };

        let payload = match codec::encode(index, expires_at) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Failed to encode index for {}: {}", key, e);
                return;
            }
        };

        if let Err(e) = self.store.store(&key, payload, self.ttl).await {
            tracing::warn!("Failed to cache index {}: {}", key, e);
        }
    }

    pub async fn invalidate(&self, repo_url: &str, branch: Option<&str>, commit: Option<&str>) {
        let key = self.key(repo_url, branch, commit);
        if let Err(e) = self.store.remove(&key).await {
            tracing::warn!("Failed to invalidate cache entry {}: {}", key, e);
        }
    }

    /// Cached index for the tree at `root`, building (and caching) it on a miss.
    ///
    /// Trees without a commit are always rebuilt: their content is not pinned
    /// by anything the key could capture. Partial indices and indices narrowed
    /// by file patterns bypass the cache in both directions.
    pub async fn get_or_build(
        &self,
        builder: &IndexBuilder,
        root: &Path,
        repo_url: &str,
    ) -> Result<RepositoryIndex, IndexError> {
        let branch = builder
            .options()
            .branch
            .clone()
            .or_else(|| git::current_branch(root));
        let commit = builder
            .options()
            .commit
            .clone()
            .or_else(|| git::head_commit(root))
            .filter(|c| c != WORKTREE_COMMIT)
            .filter(|_| builder.options().file_patterns.is_empty());

        if let Some(ref commit) = commit {
            if let Some(index) = self.get(repo_url, branch.as_deref(), Some(commit)).await {
                return Ok(index);
            }
        }

        let builder = builder.clone();
        let root = root.to_path_buf();
        let url = repo_url.to_string();
        let index = tokio::task::spawn_blocking(move || builder.build(&root, &url))
            .await
            .map_err(|e| IndexError::TaskFailed(e.to_string()))??;

        if commit.is_some() && !index.stats().partial {
            self.put(&index).await;
        }

        Ok(index)
    }
}
