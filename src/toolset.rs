//! Toolset manager (C7): holds saved toolsets, applies the active one as a
//! filter over the live catalog, and flattens exposure names for the
//! upstream surface.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::discovery::{DiscoveredTool, DiscoveryEngine, ToolDiff, ToolReference};
use crate::error::{RelayError, RelayResult};
use crate::events::{ToolsetChangeType, ToolsetChangedEvent};

/// On-disk/wire format for a saved toolset. `created_at` is stamped by the
/// caller (management tool handler), never computed in here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsetConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub version: u32,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    pub tools: Vec<ToolReference>,
}

fn validate_name(name: &str) -> RelayResult<()> {
    let len_ok = (2..=50).contains(&name.chars().count());
    let chars_ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if len_ok && chars_ok {
        Ok(())
    } else {
        Err(RelayError::InvalidArguments(format!(
            "toolset name '{name}' must match ^[a-z0-9-]{{2,50}}$"
        )))
    }
}

/// A single entry of the currently exposed tool surface: the live tool plus
/// the flattened name the upstream client sees it under.
#[derive(Debug, Clone)]
pub struct ExposedTool {
    pub exposed_name: String,
    pub tool: DiscoveredTool,
}

impl ExposedTool {
    pub fn namespaced_name(&self) -> &str {
        &self.tool.namespaced_name
    }
}

struct Exposure {
    tools: Vec<ExposedTool>,
    /// exposed name -> namespaced name, for `getOriginalToolName`.
    name_map: HashMap<String, String>,
}

impl Exposure {
    fn empty() -> Self {
        Self {
            tools: Vec::new(),
            name_map: HashMap::new(),
        }
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|t| t.exposed_name.clone()).collect();
        names.sort();
        names
    }
}

/// Flattens a list of resolved tools into exposure names: the bare tool name
/// when unique within the set, disambiguated with the server name on
/// collision (e.g. two servers both exposing `status` become `git-status`
/// and `docker-status`).
fn flatten_names(tools: &[DiscoveredTool]) -> (Vec<ExposedTool>, HashMap<String, String>) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for t in tools {
        *counts.entry(t.name.as_str()).or_insert(0) += 1;
    }
    let mut exposed = Vec::with_capacity(tools.len());
    let mut name_map = HashMap::with_capacity(tools.len());
    for t in tools {
        let exposed_name = if counts[t.name.as_str()] > 1 {
            format!("{}-{}", t.server_name, t.name)
        } else {
            t.name.clone()
        };
        name_map.insert(exposed_name.clone(), t.namespaced_name.clone());
        exposed.push(ExposedTool {
            exposed_name,
            tool: t.clone(),
        });
    }
    (exposed, name_map)
}

pub struct ToolsetManager {
    discovery: std::sync::Arc<DiscoveryEngine>,
    toolsets_path: Option<PathBuf>,
    saved: DashMap<String, ToolsetConfig>,
    active_name: RwLock<Option<String>>,
    exposure: RwLock<Exposure>,
    allow_stale_refs: bool,
    events: mpsc::Sender<ToolsetChangedEvent>,
}

impl ToolsetManager {
    pub fn new(
        discovery: std::sync::Arc<DiscoveryEngine>,
        toolsets_path: Option<PathBuf>,
        allow_stale_refs: bool,
    ) -> (Self, mpsc::Receiver<ToolsetChangedEvent>) {
        let (events, rx) = mpsc::channel(256);
        (
            Self {
                discovery,
                toolsets_path,
                saved: DashMap::new(),
                active_name: RwLock::new(None),
                exposure: RwLock::new(Exposure::empty()),
                allow_stale_refs,
                events,
            },
            rx,
        )
    }

    /// Reads every `*.json` file under `toolsets_path` into the saved set.
    /// A single malformed file is logged and skipped rather than aborting
    /// startup.
    pub async fn load_from_disk(&self) -> RelayResult<()> {
        let Some(dir) = self.toolsets_path.clone() else {
            return Ok(());
        };
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(RelayError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read saved toolset");
                    continue;
                }
            };
            match serde_json::from_str::<ToolsetConfig>(&content) {
                Ok(config) => {
                    self.saved.insert(config.name.clone(), config);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to parse saved toolset, skipping");
                }
            }
        }
        Ok(())
    }

    fn path_for(&self, dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.json"))
    }

    /// Validates and stores a toolset, persisting it to `toolsets_path` if
    /// configured. Duplicate references within `tools` are tolerated (a
    /// warning is logged, not a rejection).
    pub async fn set_current_toolset(&self, config: ToolsetConfig) -> RelayResult<()> {
        validate_name(&config.name)?;
        if config.tools.is_empty() {
            return Err(RelayError::InvalidArguments("toolset must contain at least one tool reference".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for reference in &config.tools {
            if !seen.insert((reference.namespaced_name.clone(), reference.tool_hash.clone())) {
                tracing::warn!(toolset = %config.name, "duplicate tool reference in toolset");
            }
        }

        if let Some(dir) = &self.toolsets_path {
            tokio::fs::create_dir_all(dir).await?;
            let path = self.path_for(dir, &config.name);
            let body = serde_json::to_string_pretty(&config)?;
            tokio::fs::write(path, body).await?;
        }
        self.saved.insert(config.name.clone(), config);
        Ok(())
    }

    pub fn delete_toolset(&self, name: &str) -> RelayResult<()> {
        if self.active_name.read().as_deref() == Some(name) {
            return Err(RelayError::InvalidArguments(format!("cannot delete active toolset '{name}'")));
        }
        self.saved
            .remove(name)
            .ok_or_else(|| RelayError::InvalidArguments(format!("no saved toolset named '{name}'")))?;
        if let Some(dir) = &self.toolsets_path {
            let path = self.path_for(dir, name);
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }

    fn recompute_exposure(&self, config: &ToolsetConfig, allow_stale_refs: bool) -> Vec<DiscoveredTool> {
        config
            .tools
            .iter()
            .filter_map(|reference| {
                let outcome = self.discovery.resolve_tool_reference(reference, allow_stale_refs);
                outcome.tool
            })
            .collect()
    }

    fn emit(&self, previous_toolset: Option<String>, new_toolset: Option<String>, change_type: ToolsetChangeType) {
        let _ = self.events.try_send(ToolsetChangedEvent {
            previous_toolset,
            new_toolset,
            change_type,
        });
    }

    pub fn equip_toolset(&self, name: &str) -> RelayResult<()> {
        let config = self
            .saved
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| RelayError::InvalidArguments(format!("no saved toolset named '{name}'")))?;

        let resolved = self.recompute_exposure(&config, self.allow_stale_refs);
        let (tools, name_map) = flatten_names(&resolved);

        let previous = self.active_name.write().replace(name.to_string());
        *self.exposure.write() = Exposure { tools, name_map };
        self.emit(previous, Some(name.to_string()), ToolsetChangeType::Activated);
        Ok(())
    }

    pub fn unequip_toolset(&self) {
        let previous = self.active_name.write().take();
        *self.exposure.write() = Exposure::empty();
        if previous.is_some() {
            self.emit(previous, None, ToolsetChangeType::Deactivated);
        }
    }

    pub fn active_toolset_name(&self) -> Option<String> {
        self.active_name.read().clone()
    }

    /// Invariant: with no active toolset, this returns an empty surface.
    pub fn get_mcp_tools(&self) -> Vec<ExposedTool> {
        self.exposure.read().tools.clone()
    }

    pub fn get_original_tool_name(&self, exposed_name: &str) -> Option<String> {
        self.exposure.read().name_map.get(exposed_name).cloned()
    }

    pub fn saved_toolsets(&self) -> Vec<String> {
        self.saved.iter().map(|e| e.key().clone()).collect()
    }

    /// Re-walks the active toolset's references through discovery after a
    /// `toolsChanged` event. Always resolves under strict policy regardless
    /// of the configured `allow_stale_refs`: a reference that fails strict
    /// resolution is dropped from the exposure here even if interactive
    /// equip/resolve calls are configured to tolerate it. An `Updated` event
    /// fires only if the exposed name set actually changed.
    pub fn reconcile(&self, _diff: &ToolDiff) {
        let Some(name) = self.active_toolset_name() else {
            return;
        };
        let Some(config) = self.saved.get(&name).map(|e| e.value().clone()) else {
            return;
        };

        let before = self.exposure.read().names();
        let resolved = self.recompute_exposure(&config, false);
        let (tools, name_map) = flatten_names(&resolved);
        let after = {
            let mut names: Vec<String> = tools.iter().map(|t| t.exposed_name.clone()).collect();
            names.sort();
            names
        };

        *self.exposure.write() = Exposure { tools, name_map };
        if before != after {
            self.emit(Some(name.clone()), Some(name), ToolsetChangeType::Updated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::ToolAnnotations;
    use crate::cache::ToolCache;
    use crate::discovery::ToolDefinition;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: None,
            input_schema: Value::Object(Default::default()),
            output_schema: None,
            annotations: ToolAnnotations::default(),
        }
    }

    fn make_manager() -> (ToolsetManager, mpsc::Receiver<ToolsetChangedEvent>, Arc<DiscoveryEngine>) {
        let discovery = Arc::new(DiscoveryEngine::new(ToolCache::new(Duration::from_secs(300), 500)));
        discovery.ingest_tools("git", vec![def("status"), def("log")]);
        let (manager, rx) = ToolsetManager::new(Arc::clone(&discovery), None, false);
        (manager, rx, discovery)
    }

    fn config(name: &str, refs: Vec<ToolReference>) -> ToolsetConfig {
        ToolsetConfig {
            name: name.to_string(),
            description: None,
            version: 1,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            tools: refs,
        }
    }

    #[tokio::test]
    async fn rejects_invalid_name() {
        let (manager, _rx, _d) = make_manager();
        let result = manager
            .set_current_toolset(config("Bad Name!", vec![ToolReference {
                namespaced_name: Some("git.status".to_string()),
                tool_hash: None,
            }]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn equip_exposes_only_resolved_tools() {
        let (manager, _rx, _d) = make_manager();
        manager
            .set_current_toolset(config(
                "dev",
                vec![ToolReference {
                    namespaced_name: Some("git.status".to_string()),
                    tool_hash: None,
                }],
            ))
            .await
            .expect("saved");
        manager.equip_toolset("dev").expect("equipped");
        let exposed = manager.get_mcp_tools();
        assert_eq!(exposed.len(), 1);
        assert_eq!(exposed[0].exposed_name, "status");
        assert_eq!(manager.get_original_tool_name("status"), Some("git.status".to_string()));
    }

    #[tokio::test]
    async fn no_active_toolset_exposes_nothing() {
        let (manager, _rx, _d) = make_manager();
        assert!(manager.get_mcp_tools().is_empty());
    }

    #[tokio::test]
    async fn equip_unequip_equip_is_idempotent() {
        let (manager, _rx, _d) = make_manager();
        manager
            .set_current_toolset(config(
                "dev",
                vec![ToolReference {
                    namespaced_name: Some("git.status".to_string()),
                    tool_hash: None,
                }],
            ))
            .await
            .expect("saved");
        manager.equip_toolset("dev").expect("equipped");
        let first = manager.get_mcp_tools().iter().map(|t| t.exposed_name.clone()).collect::<Vec<_>>();
        manager.unequip_toolset();
        manager.equip_toolset("dev").expect("re-equipped");
        let second = manager.get_mcp_tools().iter().map(|t| t.exposed_name.clone()).collect::<Vec<_>>();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn reconcile_drops_tools_removed_from_catalog() {
        let (manager, _rx, discovery) = make_manager();
        manager
            .set_current_toolset(config(
                "dev",
                vec![
                    ToolReference {
                        namespaced_name: Some("git.status".to_string()),
                        tool_hash: None,
                    },
                    ToolReference {
                        namespaced_name: Some("git.log".to_string()),
                        tool_hash: None,
                    },
                ],
            ))
            .await
            .expect("saved");
        manager.equip_toolset("dev").expect("equipped");
        assert_eq!(manager.get_mcp_tools().len(), 2);

        let diff = discovery.ingest_tools("git", vec![def("status")]);
        manager.reconcile(&diff);
        assert_eq!(manager.get_mcp_tools().len(), 1);
    }

    /// `reconcile` must resolve strictly even when the manager is configured
    /// to tolerate stale references for interactive equip/resolve calls.
    #[tokio::test]
    async fn reconcile_applies_strict_resolution_regardless_of_configured_policy() {
        let discovery = Arc::new(DiscoveryEngine::new(ToolCache::new(Duration::from_secs(300), 500)));
        discovery.ingest_tools("git", vec![def("status")]);
        let (manager, _rx) = ToolsetManager::new(Arc::clone(&discovery), None, true);

        let original = discovery.get_tool("git.status").expect("tool resolved");
        manager
            .set_current_toolset(config(
                "dev",
                vec![ToolReference {
                    namespaced_name: Some("git.status".to_string()),
                    tool_hash: Some(original.tool_hash.clone()),
                }],
            ))
            .await
            .expect("saved");
        manager.equip_toolset("dev").expect("equipped");
        assert_eq!(manager.get_mcp_tools().len(), 1);

        // Changing the tool's input schema rotates its hash, making the
        // saved reference's hash stale while its name still resolves.
        let changed = ToolDefinition {
            name: "status".to_string(),
            description: None,
            input_schema: serde_json::json!({"type": "object", "properties": {"verbose": {"type": "boolean"}}}),
            output_schema: None,
            annotations: ToolAnnotations::default(),
        };
        let diff = discovery.ingest_tools("git", vec![changed]);
        manager.reconcile(&diff);

        assert!(
            manager.get_mcp_tools().is_empty(),
            "stale hash reference must be dropped on reconcile even though allow_stale_refs=true"
        );
    }
}
