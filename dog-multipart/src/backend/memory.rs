use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{backend::RegistryBackend, MultipartResult};

#[derive(Debug, Clone)]
enum Value {
    List(Vec<String>),
    Plain(String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }

    fn holds(&self, value: &str) -> bool {
        matches!(&self.value, Value::Plain(current) if current.as_str() == value)
    }
}

/// In-memory backend for testing and development.
///
/// Clones share the same state, so several coordinators built over clones of
/// one `MemoryBackend` see each other's parts. Expired keys are evicted lazily
/// on access.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_entry<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl RegistryBackend for MemoryBackend {
    async fn append_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> MultipartResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match Self::live_entry(&mut entries, key, now) {
            Some(entry) => {
                if let Value::List(values) = &mut entry.value {
                    values.push(value);
                } else {
                    // Redis answers WRONGTYPE here
                    entry.value = Value::List(vec![value]);
                }
                entry.expires_at = Some(now + ttl);
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::List(vec![value]),
                        expires_at: Some(now + ttl),
                    },
                );
            }
        }
        Ok(())
    }

    async fn range_all(&self, key: &str) -> MultipartResult<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        Ok(match Self::live_entry(&mut entries, key, now) {
            Some(Entry { value: Value::List(values), .. }) => values.clone(),
            _ => Vec::new(),
        })
    }

    async fn delete(&self, key: &str) -> MultipartResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> MultipartResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if Self::live_entry(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Plain(value.to_string()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> MultipartResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let matches = Self::live_entry(&mut entries, key, now).is_some_and(|e| e.holds(value));
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn extend_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> MultipartResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match Self::live_entry(&mut entries, key, now) {
            Some(entry) if entry.holds(value) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
