use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::backend::{CacheBackend, CacheError};

/// Process-local cache backend with lazy expiry.
pub struct InMemoryCache {
    entries: DashMap<String, (String, Instant)>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Entries currently held, including ones that expired but weren't read yet
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|e| e.value().1 > Instant::now())
            .unwrap_or(false)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if entry.value().1 > now => Some(entry.value().0.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if value.is_none() {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        }
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        let expires = Instant::now()
            .checked_add(Duration::from_secs(ttl_secs.max(1)))
            .ok_or_else(|| CacheError::Backend(format!("ttl of {}s is out of range", ttl_secs)))?;
        self.entries.insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }
}
