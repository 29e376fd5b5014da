//! Tool cache (C4): TTL-expiring, server-scoped, with oldest-first eviction
//! once a server exceeds its per-server cap.
//!
//! Owned exclusively by the discovery engine (C5); nothing else mutates it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::discovery::DiscoveredTool;

#[derive(Debug, Clone)]
struct CachedToolEntry {
    tool: DiscoveredTool,
    expires_at: Instant,
    discovered_at: Instant,
    hit_count: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct ToolCache {
    entries: DashMap<String, CachedToolEntry>,
    by_server: DashMap<String, HashSet<String>>,
    default_ttl: Duration,
    per_server_cap: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl ToolCache {
    pub fn new(default_ttl: Duration, per_server_cap: usize) -> Self {
        Self {
            entries: DashMap::new(),
            by_server: DashMap::new(),
            default_ttl,
            per_server_cap,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    pub fn set(&self, key: &str, tool: DiscoveredTool, ttl: Option<Duration>) {
        let server_name = tool.server_name.clone();
        let now = Instant::now();
        self.evict_oldest_if_at_cap(&server_name, key);

        self.entries.insert(
            key.to_string(),
            CachedToolEntry {
                tool,
                expires_at: now + ttl.unwrap_or(self.default_ttl),
                discovered_at: now,
                hit_count: 0,
            },
        );
        self.by_server
            .entry(server_name)
            .or_default()
            .insert(key.to_string());
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    fn evict_oldest_if_at_cap(&self, server_name: &str, incoming_key: &str) {
        let Some(keys) = self.by_server.get(server_name) else {
            return;
        };
        if keys.len() < self.per_server_cap || keys.contains(incoming_key) {
            return;
        }
        let oldest_key = keys
            .iter()
            .filter_map(|k| self.entries.get(k).map(|e| (k.clone(), e.discovered_at)))
            .min_by_key(|(_, discovered_at)| *discovered_at)
            .map(|(k, _)| k);
        drop(keys);
        if let Some(oldest_key) = oldest_key {
            self.delete(&oldest_key);
        }
    }

    pub fn get(&self, key: &str) -> Option<DiscoveredTool> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) => entry.expires_at <= now,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if expired {
            self.delete(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let result = self.entries.get_mut(key).map(|mut entry| {
            entry.hit_count += 1;
            entry.tool.clone()
        });
        self.hits.fetch_add(1, Ordering::Relaxed);
        result
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|e| e.expires_at > Instant::now())
            .unwrap_or(false)
    }

    pub fn delete(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            if let Some(mut keys) = self.by_server.get_mut(&entry.tool.server_name) {
                keys.remove(key);
                if keys.is_empty() {
                    drop(keys);
                    self.by_server.remove(&entry.tool.server_name);
                }
            }
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn clear_server(&self, server_name: &str) {
        if let Some((_, keys)) = self.by_server.remove(server_name) {
            for key in keys {
                self.entries.remove(&key);
                self.deletes.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.by_server.clear();
    }

    pub fn get_tools_by_server(&self, server_name: &str) -> Vec<DiscoveredTool> {
        let Some(keys) = self.by_server.get(server_name) else {
            return Vec::new();
        };
        keys.iter()
            .filter_map(|k| self.get(k))
            .collect()
    }

    pub fn get_all_tools(&self) -> Vec<DiscoveredTool> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| e.expires_at > now)
            .map(|e| e.tool.clone())
            .collect()
    }

    /// Lazily-expiring `get`/`has` cover correctness; this removes anything
    /// already expired so long-idle servers don't accumulate dead entries.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.expires_at <= now)
            .map(|e| e.key().clone())
            .collect();
        let count = expired.len();
        for key in expired {
            self.delete(&key);
        }
        count
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::ToolAnnotations;
    use crate::discovery::ToolDefinition;
    use serde_json::Value;

    fn tool(server: &str, name: &str) -> DiscoveredTool {
        let definition = ToolDefinition {
            name: name.to_string(),
            description: None,
            input_schema: Value::Null,
            output_schema: None,
            annotations: ToolAnnotations::default(),
        };
        DiscoveredTool::new(server.to_string(), definition)
    }

    #[test]
    fn set_then_get_before_expiry_round_trips() {
        let cache = ToolCache::new(Duration::from_secs(60), 100);
        let t = tool("git", "status");
        cache.set(&t.namespaced_name.clone(), t.clone(), None);
        let got = cache.get(&t.namespaced_name).expect("present");
        assert_eq!(got.tool_hash, t.tool_hash);
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = ToolCache::new(Duration::from_millis(1), 100);
        let t = tool("git", "status");
        cache.set(&t.namespaced_name.clone(), t, None);
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("git.status").is_none());
    }

    #[test]
    fn per_server_cap_evicts_oldest_first() {
        let cache = ToolCache::new(Duration::from_secs(60), 2);
        let a = tool("git", "a");
        std::thread::sleep(Duration::from_millis(5));
        let b = tool("git", "b");
        std::thread::sleep(Duration::from_millis(5));
        let c = tool("git", "c");

        cache.set(&a.namespaced_name.clone(), a.clone(), None);
        cache.set(&b.namespaced_name.clone(), b.clone(), None);
        cache.set(&c.namespaced_name.clone(), c, None);

        assert!(cache.get(&a.namespaced_name).is_none());
        assert!(cache.get(&b.namespaced_name).is_some());
    }

    #[test]
    fn clear_server_removes_index_and_entries_together() {
        let cache = ToolCache::new(Duration::from_secs(60), 100);
        let a = tool("git", "a");
        cache.set(&a.namespaced_name.clone(), a, None);
        cache.clear_server("git");
        assert!(cache.get_tools_by_server("git").is_empty());
    }
}
