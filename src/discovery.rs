//! Discovery engine (C5): maintains the canonical tool catalog across all
//! connected servers, computes content hashes, detects changes, and
//! resolves tool references under a strict/relaxed security policy.
//!
//! Also implements the tool reference resolver (spec §4.5 folds C6 in
//! here, since resolution is purely a read over C5's own index).

use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::annotations::ToolAnnotations;
use crate::cache::ToolCache;
use crate::hashing::{self, tool_hash};

pub const SEP: &str = ".";
const HASH_HISTORY_CAP: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(default, rename = "outputSchema")]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub annotations: ToolAnnotations,
}

#[derive(Debug, Clone)]
pub struct DiscoveredTool {
    pub name: String,
    pub server_name: String,
    pub namespaced_name: String,
    pub definition: ToolDefinition,
    pub discovered_at: Instant,
    pub last_updated: Instant,
    pub server_connected: bool,
    pub tool_hash: String,
}

impl DiscoveredTool {
    pub fn new(server_name: String, definition: ToolDefinition) -> Self {
        let now = Instant::now();
        let namespaced_name = format!("{server_name}{SEP}{}", definition.name);
        let hash = tool_hash(
            &definition.name,
            &server_name,
            &definition.input_schema,
            definition.output_schema.as_ref().unwrap_or(&Value::Null),
            &definition.annotations,
        );
        Self {
            name: definition.name.clone(),
            server_name,
            namespaced_name,
            definition,
            discovered_at: now,
            last_updated: now,
            server_connected: true,
            tool_hash: hash,
        }
    }

    /// P1: recomputing the hash from the tool's own fields must equal the
    /// stored value.
    pub fn recompute_hash(&self) -> String {
        tool_hash(
            &self.definition.name,
            &self.server_name,
            &self.definition.input_schema,
            self.definition.output_schema.as_ref().unwrap_or(&Value::Null),
            &self.definition.annotations,
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolDiff {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ToolDiff {
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        (
            self.added.len(),
            self.updated.len(),
            self.removed.len(),
            self.unchanged.len(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct ServerToolState {
    pub server_name: String,
    pub is_connected: bool,
    pub tools: Vec<String>,
    pub tool_count: usize,
    pub last_discovery: Instant,
    pub last_error: Option<String>,
    pub server_tools_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolReference {
    #[serde(default, rename = "namespacedName")]
    pub namespaced_name: Option<String>,
    #[serde(default, rename = "toolHash")]
    pub tool_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectionStatusSnapshot {
    pub server_name: String,
    pub connected: bool,
}

#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub exists: bool,
    pub tool: Option<DiscoveredTool>,
    pub namespaced_name_match: bool,
    pub hash_match: bool,
    pub warning: Option<String>,
    pub error: Option<String>,
    pub connection_status: Option<ConnectionStatusSnapshot>,
}

impl ResolveOutcome {
    fn not_found() -> Self {
        Self {
            exists: false,
            tool: None,
            namespaced_name_match: false,
            hash_match: false,
            warning: None,
            error: None,
            connection_status: None,
        }
    }

    fn rejected(error: String) -> Self {
        Self {
            exists: false,
            tool: None,
            namespaced_name_match: false,
            hash_match: false,
            warning: None,
            error: Some(error),
            connection_status: None,
        }
    }

    fn error(message: &str) -> Self {
        Self::rejected(message.to_string())
    }

    fn matched(tool: DiscoveredTool, name_match: bool, hash_match: bool, warning: Option<String>) -> Self {
        Self {
            exists: true,
            tool: Some(tool),
            namespaced_name_match: name_match,
            hash_match,
            warning,
            error: None,
            connection_status: None,
        }
    }
}

/// Per-server serialization: discovery mutations for the same server never
/// interleave. A `tools/list_changed` that arrives mid-enumeration is
/// sequenced after the in-flight one rather than coalesced (see open
/// questions in the design notes).
pub struct DiscoveryEngine {
    by_namespaced: DashMap<String, DiscoveredTool>,
    by_hash: DashMap<String, String>,
    hash_history: DashMap<String, Vec<String>>,
    server_state: DashMap<String, ServerToolState>,
    server_locks: DashMap<String, Mutex<()>>,
    cache: ToolCache,
}

impl DiscoveryEngine {
    pub fn new(cache: ToolCache) -> Self {
        Self {
            by_namespaced: DashMap::new(),
            by_hash: DashMap::new(),
            hash_history: DashMap::new(),
            server_state: DashMap::new(),
            server_locks: DashMap::new(),
            cache,
        }
    }

    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }

    /// Replaces a server's catalog with a freshly enumerated tool list,
    /// computing the diff against what was previously known for that
    /// server. Used both for first discovery (everything is `added`) and
    /// for `tools/list_changed` re-enumeration.
    pub fn ingest_tools(&self, server_name: &str, definitions: Vec<ToolDefinition>) -> ToolDiff {
        let _serialize = self
            .server_locks
            .entry(server_name.to_string())
            .or_insert_with(|| Mutex::new(()));
        let _guard = _serialize.lock();

        let previous_names: Vec<String> = self
            .server_state
            .get(server_name)
            .map(|s| s.tools.clone())
            .unwrap_or_default();

        // Clear prior cache/index entries for this server before inserting
        // the new set, per §4.5's "atomically replace" instruction.
        self.cache.clear_server(server_name);
        for name in &previous_names {
            if let Some((_, old)) = self.by_namespaced.remove(name) {
                self.by_hash.remove(&old.tool_hash);
            }
        }

        let mut diff = ToolDiff::default();
        let mut new_names = Vec::with_capacity(definitions.len());
        let mut new_hashes = Vec::with_capacity(definitions.len());

        for def in definitions {
            let tool = DiscoveredTool::new(server_name.to_string(), def);
            new_names.push(tool.namespaced_name.clone());
            new_hashes.push(tool.tool_hash.clone());

            {
                let mut history = self.hash_history.entry(tool.namespaced_name.clone()).or_default();
                let was_present = !history.is_empty();
                let unchanged = history.last().map(|h| h == &tool.tool_hash).unwrap_or(false);

                if !was_present {
                    diff.added.push(tool.namespaced_name.clone());
                } else if unchanged {
                    diff.unchanged.push(tool.namespaced_name.clone());
                } else {
                    diff.updated.push(tool.namespaced_name.clone());
                }

                if !unchanged {
                    history.push(tool.tool_hash.clone());
                    if history.len() > HASH_HISTORY_CAP {
                        history.remove(0);
                    }
                }
            }

            self.by_hash.insert(tool.tool_hash.clone(), tool.namespaced_name.clone());
            self.cache.set(&tool.namespaced_name.clone(), tool.clone(), None);
            self.by_namespaced.insert(tool.namespaced_name.clone(), tool);
        }

        for name in &previous_names {
            if !new_names.contains(name) {
                diff.removed.push(name.clone());
            }
        }

        self.server_state.insert(
            server_name.to_string(),
            ServerToolState {
                server_name: server_name.to_string(),
                is_connected: true,
                tools: new_names,
                tool_count: new_hashes.len(),
                last_discovery: Instant::now(),
                last_error: None,
                server_tools_hash: hashing::server_tools_hash(&new_hashes),
            },
        );

        diff
    }

    /// A per-server `tools/list` failure: unlike a plain disconnect, the
    /// tools are cleared from the lookup index entirely (not just flagged
    /// unavailable), since we have no live definition to stand behind.
    pub fn mark_server_error(&self, server_name: &str, error: String) {
        let names: Vec<String> = self
            .by_namespaced
            .iter()
            .filter(|e| e.server_name == server_name)
            .map(|e| e.key().clone())
            .collect();
        for name in &names {
            if let Some((_, old)) = self.by_namespaced.remove(name) {
                self.by_hash.remove(&old.tool_hash);
            }
        }

        self.server_state
            .entry(server_name.to_string())
            .and_modify(|s| {
                s.is_connected = false;
                s.tools.clear();
                s.tool_count = 0;
                s.last_error = Some(error.clone());
            })
            .or_insert(ServerToolState {
                server_name: server_name.to_string(),
                is_connected: false,
                tools: Vec::new(),
                tool_count: 0,
                last_discovery: Instant::now(),
                last_error: Some(error),
                server_tools_hash: String::new(),
            });
    }

    /// DISCONNECTED handling: clears the live index for `server_name` but
    /// keeps cached `DiscoveredTool`s around (TTL or explicit clear still
    /// governs their lifetime) so a brief blip doesn't blank the catalog.
    pub fn mark_server_disconnected(&self, server_name: &str) {
        if let Some(mut state) = self.server_state.get_mut(server_name) {
            state.is_connected = false;
        }
        let names: Vec<String> = self
            .by_namespaced
            .iter()
            .filter(|e| e.server_name == server_name)
            .map(|e| e.key().clone())
            .collect();
        for name in names {
            if let Some(mut entry) = self.by_namespaced.get_mut(&name) {
                entry.server_connected = false;
            }
        }
    }

    pub fn get_tool(&self, namespaced_name: &str) -> Option<DiscoveredTool> {
        self.by_namespaced.get(namespaced_name).map(|e| e.clone())
    }

    pub fn get_by_hash(&self, hash: &str) -> Option<DiscoveredTool> {
        self.by_hash
            .get(hash)
            .and_then(|name| self.by_namespaced.get(name.as_str()).map(|e| e.clone()))
    }

    pub fn get_server_state(&self, server_name: &str) -> Option<ServerToolState> {
        self.server_state.get(server_name).map(|s| s.clone())
    }

    pub fn get_available_tools(&self, connected_only: bool) -> Vec<DiscoveredTool> {
        self.by_namespaced
            .iter()
            .map(|e| e.clone())
            .filter(|t| !connected_only || t.server_connected)
            .collect()
    }

    /// The core policy function described in spec §4.5: validates a tool
    /// reference against the live catalog under a strict/relaxed security
    /// policy. See DESIGN.md for how partially-specified references
    /// (only one of the two identifiers present in the reference itself)
    /// are treated.
    pub fn resolve_tool_reference(&self, reference: &ToolReference, allow_stale_refs: bool) -> ResolveOutcome {
        let has_name = reference.namespaced_name.is_some();
        let has_hash = reference.tool_hash.is_some();

        if !has_name && !has_hash {
            return ResolveOutcome::error("a tool reference must carry a namespacedName and/or a toolHash");
        }

        let name_hit = reference
            .namespaced_name
            .as_deref()
            .and_then(|n| self.get_tool(n));
        let hash_hit = reference.tool_hash.as_deref().and_then(|h| self.get_by_hash(h));

        let mut outcome = match (has_name, has_hash, name_hit, hash_hit) {
            (true, true, Some(n), Some(h)) if n.namespaced_name == h.namespaced_name && n.tool_hash == h.tool_hash => {
                ResolveOutcome::matched(n, true, true, None)
            }
            (true, true, Some(_), Some(h)) => {
                if allow_stale_refs {
                    ResolveOutcome::matched(
                        h,
                        false,
                        true,
                        Some("SECURITY: namespacedName and toolHash resolved to different tools; preferring toolHash".to_string()),
                    )
                } else {
                    ResolveOutcome::rejected(
                        "SECURITY: reference conflict: namespacedName and toolHash resolve to different tools".to_string(),
                    )
                }
            }
            // Both identifiers were supplied, the name resolved to nothing
            // (or didn't match), but the hash did: this is only a "stale
            // name" case when a name was actually claimed.
            (true, true, None, Some(h)) => {
                if allow_stale_refs {
                    ResolveOutcome::matched(h, false, true, Some("tool was renamed since this reference was saved".to_string()))
                } else {
                    ResolveOutcome::rejected(
                        "SECURITY: stale reference: namespacedName no longer present in the live catalog".to_string(),
                    )
                }
            }
            (true, true, Some(n), None) => {
                if allow_stale_refs {
                    ResolveOutcome::matched(n, true, false, Some("schema changed since this reference was saved".to_string()))
                } else {
                    ResolveOutcome::rejected(
                        "SECURITY: stale reference: toolHash no longer present in the live catalog".to_string(),
                    )
                }
            }
            // Only one identifier was actually present in the reference:
            // resolve on that identifier alone, nothing to conflict with.
            (true, false, Some(n), _) => ResolveOutcome::matched(n, true, false, None),
            (false, true, _, Some(h)) => ResolveOutcome::matched(h, false, true, None),
            _ => ResolveOutcome::not_found(),
        };

        if let Some(tool) = &outcome.tool {
            outcome.connection_status = self.get_server_state(&tool.server_name).map(|s| ConnectionStatusSnapshot {
                server_name: s.server_name,
                connected: s.is_connected,
            });
        }
        outcome
    }
}
