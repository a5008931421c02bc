use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

const AUTH_SCOPE_HEX_CHARS: usize = 16;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

#[derive(Debug)]
/// Short-TTL cache for read results.
///
/// Expiry is lazy: stale entries are ignored on lookup and replaced on the next insert, never
/// swept. Writes do not invalidate anything, so a read cached before a write can be served
/// until the TTL lapses; use [`ReadCache::clear`] or an uncached read when that matters.
pub struct ReadCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ReadCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached value while `now - stored_at < ttl`.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        self.entries()
            .get(key)
            .filter(|entry| now.saturating_duration_since(entry.stored_at) < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: String, value: Value) {
        self.entries().insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deterministic key for `operation` with `params`. Object keys are sorted so equal
/// parameters always map to the same key; reads made under different credentials land in
/// different keys because row-level authorization may change what they see.
pub fn cache_key(operation: &str, params: &Value, auth_token: Option<&str>) -> String {
    let mut canonical = String::new();
    write_canonical(params, &mut canonical);
    match auth_token {
        Some(token) => format!("{operation}|{}|{canonical}", auth_scope(token)),
        None => format!("{operation}|-|{canonical}"),
    }
}

fn auth_scope(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>()
        .chars()
        .take(AUTH_SCOPE_HEX_CHARS)
        .collect()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
