//! In-process cache store, used when the primary store is unavailable

use super::CacheStore;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone)]
struct Slot {
    payload: String,
    expires_at: i64,
}

#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, Slot>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str, now: i64) -> Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(slot) if now < slot.expires_at => Ok(Some(slot.payload.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, payload: &str, expires_at: i64) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                Slot {
                    payload: payload.to_string(),
                    expires_at,
                },
            );
        Ok(())
    }

    async fn sweep(&self, now: i64) -> Result<usize> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, slot| now < slot.expires_at);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expired_entry_is_removed_on_read() {
        let store = MemoryCacheStore::new();
        store.put("k", "v", 1_000).await.unwrap();
        assert_eq!(store.get("k", 999).await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.get("k", 1_000).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_entries() {
        let store = MemoryCacheStore::new();
        store.put("old", "1", 10).await.unwrap();
        store.put("new", "2", 100).await.unwrap();
        assert_eq!(store.sweep(50).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }
}
