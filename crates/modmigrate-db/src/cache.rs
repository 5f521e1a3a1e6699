use std::collections::HashSet;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use modmigrate_common::Result;
use serde_json::Value;
use tracing::debug;

/// Key-value cache with dependency tags.
///
/// Invalidating a tag drops every entry stored with it.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[&str]) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Drop all entries tagged with `tag`. Returns how many were dropped.
    fn invalidate_tag(&self, tag: &str) -> Result<usize>;
}

struct CachedValue {
    value: Value,
    expires_at: Instant,
    tags: HashSet<String>,
}

/// Process-local [`Cache`] backed by a concurrent map.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CachedValue>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let expired = match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[&str]) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CachedValue {
                value,
                expires_at: Instant::now() + ttl,
                tags: tags.iter().map(|t| t.to_string()).collect(),
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn invalidate_tag(&self, tag: &str) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.tags.contains(tag));
        let dropped = before - self.entries.len();
        debug!(tag, dropped, "cache tag invalidated");
        Ok(dropped)
    }
}
