//! Request router (C9): the upstream-facing `ServerHandler`. Exposes either
//! the active toolset's flattened surface (normal mode) or the toolset
//! management tools (configuration mode), and dispatches `tools/call` through
//! the connection pool with circuit-breaker protection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ListToolsResult, PaginatedRequestParam,
    ServerCapabilities, ServerInfo, Tool as McpTool, ToolAnnotations as RmcpToolAnnotations,
};
use rmcp::service::{Peer, RequestContext};
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use serde_json::Value;
use tokio::time::timeout;

use crate::config::{PoolConfig, RouterConfig};
use crate::discovery::{DiscoveredTool, DiscoveryEngine, ToolDiff, ToolReference};
use crate::error::{RelayError, RelayResult};
use crate::pool::ConnectionPool;
use crate::recovery::{CircuitBreakerRegistry, FallbackChain, FallbackStrategy, RetryManager};
use crate::toolset::{ExposedTool, ToolsetConfig, ToolsetManager};

const ENTER_CONFIGURATION_MODE: &str = "enter-configuration-mode";
const MANAGEMENT_TOOLS: &[&str] = &[
    "list-toolsets",
    "equip-toolset",
    "unequip-toolset",
    "build-toolset",
    "delete-toolset",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouterMode {
    Normal,
    Configuration,
}

fn object_schema(properties: Value, required: &[&str]) -> Arc<serde_json::Map<String, Value>> {
    let schema = serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    });
    Arc::new(schema.as_object().cloned().unwrap_or_default())
}

fn tool_error(message: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(message.into())])
}

fn tool_success(message: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(message.into())])
}

/// Fallback strategy for a single dispatched call: reconnects the
/// supervisor and resends the request once. Only registered for errors the
/// taxonomy already marks retryable (a dead connection, a transient
/// transport error); permanent failures like a bad-arguments rejection
/// propagate straight through.
struct ReconnectAndRetry {
    pool: Arc<ConnectionPool>,
    server_name: String,
    tool_name: String,
    arguments: Option<serde_json::Map<String, Value>>,
    request_timeout: Duration,
}

#[async_trait]
impl FallbackStrategy for ReconnectAndRetry {
    fn can_handle(&self, error: &RelayError) -> bool {
        error.is_retryable()
    }

    async fn execute(&self) -> RelayResult<Value> {
        self.pool.reconnect(&self.server_name).await?;
        let supervisor = self
            .pool
            .get(&self.server_name)
            .ok_or_else(|| RelayError::UnknownServer(self.server_name.clone()))?;
        let transport = supervisor.transport();
        let params = serde_json::json!({"name": self.tool_name, "arguments": self.arguments});
        match timeout(self.request_timeout, transport.send("tools/call", Some(params))).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout {
                server: self.server_name.clone(),
                millis: self.request_timeout.as_millis() as u64,
            }),
        }
    }
}

fn exposed_to_mcp_tool(exposed: &ExposedTool) -> McpTool {
    discovered_to_mcp_tool(&exposed.exposed_name, &exposed.tool)
}

fn discovered_to_mcp_tool(exposed_name: &str, tool: &DiscoveredTool) -> McpTool {
    let def = &tool.definition;
    let input_schema = Arc::new(def.input_schema.as_object().cloned().unwrap_or_default());
    let output_schema = def
        .output_schema
        .as_ref()
        .and_then(Value::as_object)
        .map(|m| Arc::new(m.clone()));
    McpTool {
        name: exposed_name.to_string().into(),
        description: def.description.clone().map(Into::into),
        input_schema,
        output_schema,
        annotations: Some(RmcpToolAnnotations {
            title: None,
            read_only_hint: Some(def.annotations.read_only),
            destructive_hint: Some(def.annotations.destructive),
            idempotent_hint: Some(def.annotations.idempotent),
            open_world_hint: Some(def.annotations.open_world),
        }),
    }
}

fn enter_configuration_tool() -> McpTool {
    McpTool {
        name: ENTER_CONFIGURATION_MODE.into(),
        description: Some("Switch to configuration mode to manage saved toolsets.".into()),
        input_schema: object_schema(serde_json::json!({}), &[]),
        output_schema: None,
        annotations: Some(RmcpToolAnnotations {
            title: Some("Enter configuration mode".to_string()),
            read_only_hint: Some(true),
            destructive_hint: Some(false),
            idempotent_hint: Some(true),
            open_world_hint: Some(false),
        }),
    }
}

fn management_tools() -> Vec<McpTool> {
    vec![
        McpTool {
            name: "list-toolsets".into(),
            description: Some("List every saved toolset by name.".into()),
            input_schema: object_schema(serde_json::json!({}), &[]),
            output_schema: None,
            annotations: Some(RmcpToolAnnotations {
                title: None,
                read_only_hint: Some(true),
                destructive_hint: Some(false),
                idempotent_hint: Some(true),
                open_world_hint: Some(false),
            }),
        },
        McpTool {
            name: "equip-toolset".into(),
            description: Some("Activate a saved toolset and exit configuration mode.".into()),
            input_schema: object_schema(
                serde_json::json!({"name": {"type": "string"}}),
                &["name"],
            ),
            output_schema: None,
            annotations: Some(RmcpToolAnnotations {
                title: None,
                read_only_hint: Some(false),
                destructive_hint: Some(false),
                idempotent_hint: Some(true),
                open_world_hint: Some(false),
            }),
        },
        McpTool {
            name: "unequip-toolset".into(),
            description: Some("Deactivate the current toolset; the exposed surface becomes empty.".into()),
            input_schema: object_schema(serde_json::json!({}), &[]),
            output_schema: None,
            annotations: Some(RmcpToolAnnotations {
                title: None,
                read_only_hint: Some(false),
                destructive_hint: Some(false),
                idempotent_hint: Some(true),
                open_world_hint: Some(false),
            }),
        },
        McpTool {
            name: "build-toolset".into(),
            description: Some(
                "Save a toolset from a list of tool references, optionally equipping it immediately."
                    .to_string()
                    .into(),
            ),
            input_schema: object_schema(
                serde_json::json!({
                    "name": {"type": "string"},
                    "description": {"type": "string"},
                    "tools": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "namespacedName": {"type": "string"},
                                "toolHash": {"type": "string"},
                            },
                        },
                    },
                    "autoEquip": {"type": "boolean"},
                }),
                &["name", "tools"],
            ),
            output_schema: None,
            annotations: Some(RmcpToolAnnotations {
                title: None,
                read_only_hint: Some(false),
                destructive_hint: Some(false),
                idempotent_hint: Some(false),
                open_world_hint: Some(false),
            }),
        },
        McpTool {
            name: "delete-toolset".into(),
            description: Some("Delete a saved toolset by name.".into()),
            input_schema: object_schema(
                serde_json::json!({"name": {"type": "string"}}),
                &["name"],
            ),
            output_schema: None,
            annotations: Some(RmcpToolAnnotations {
                title: None,
                read_only_hint: Some(false),
                destructive_hint: Some(true),
                idempotent_hint: Some(true),
                open_world_hint: Some(false),
            }),
        },
    ]
}

/// Checks that every name in `schema`'s `required` array is present in
/// `arguments`, and that present values match the declared primitive
/// `type` where one is given. This is a structural pre-flight, not a full
/// JSON Schema validator: it exists to reject obviously wrong calls before
/// they reach a downstream process, not to replace the downstream server's
/// own validation.
fn validate_against_schema(schema: &Value, arguments: &Value) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };
    let args = arguments.as_object();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required {
            let Some(name) = name.as_str() else { continue };
            let present = args.map(|a| a.contains_key(name)).unwrap_or(false);
            if !present {
                return Err(format!("missing required argument '{name}'"));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    let Some(args) = args else { return Ok(()) };
    for (name, value) in args {
        let Some(expected_type) = properties.get(name).and_then(|p| p.get("type")).and_then(Value::as_str) else {
            continue;
        };
        let matches = match expected_type {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            "null" => value.is_null(),
            _ => true,
        };
        if !matches {
            return Err(format!("argument '{name}' must be of type '{expected_type}'"));
        }
    }
    Ok(())
}

/// The upstream-facing MCP server surface. One instance per relay process,
/// shared across every upstream connection (stdio has exactly one; the
/// streamable-HTTP transport may accept several).
#[derive(Clone)]
pub struct RequestRouter {
    pool: Arc<ConnectionPool>,
    discovery: Arc<DiscoveryEngine>,
    toolset: Arc<ToolsetManager>,
    circuit_breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryManager,
    mode: Arc<SyncMutex<RouterMode>>,
    request_timeout: Duration,
    peer: Arc<SyncMutex<Option<Peer<RoleServer>>>>,
}

impl RequestRouter {
    pub fn new(
        pool: Arc<ConnectionPool>,
        discovery: Arc<DiscoveryEngine>,
        toolset: Arc<ToolsetManager>,
        circuit_breakers: Arc<CircuitBreakerRegistry>,
        pool_config: &PoolConfig,
        router_config: &RouterConfig,
    ) -> Self {
        Self {
            pool,
            discovery,
            toolset,
            circuit_breakers,
            retry: RetryManager::from_pool_config(pool_config),
            mode: Arc::new(SyncMutex::new(RouterMode::Normal)),
            request_timeout: Duration::from_secs(router_config.request_timeout_secs),
            peer: Arc::new(SyncMutex::new(None)),
        }
    }

    fn capture_peer(&self, context: &RequestContext<RoleServer>) {
        let mut slot = self.peer.lock();
        if slot.is_none() {
            *slot = Some(context.peer.clone());
        }
    }

    /// Best-effort push of `notifications/tools/list_changed`. Skipped
    /// silently until a request has been handled at least once (there is no
    /// peer to push to yet); failures are logged, not surfaced, since this
    /// is a courtesy notification and the client can always re-list.
    fn notify_list_changed(&self) {
        let Some(peer) = self.peer.lock().clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = peer.notify_tool_list_changed().await {
                tracing::warn!(error = %e, "failed to push tools/list_changed upstream");
            }
        });
    }

    /// Called by the runtime wiring whenever discovery reports a catalog
    /// change for `server_name`: reconciles the active toolset and notifies
    /// the upstream client if the exposed surface actually moved.
    pub fn on_tools_changed(&self, server_name: &str, diff: ToolDiff) {
        let (added, updated, removed, _unchanged) = diff.counts();
        self.toolset.reconcile(&diff);
        if added + updated + removed > 0 {
            self.notify_list_changed();
        }
        tracing::debug!(server = %server_name, added, updated, removed, "catalog change reconciled");
    }

    /// Called whenever the toolset manager emits a `toolsetChanged` event.
    pub fn on_toolset_changed(&self) {
        self.notify_list_changed();
    }

    /// Pure request-handling path, with no dependency on an upstream
    /// transport session. The `ServerHandler` impl below is a thin
    /// wrapper over this plus peer capture.
    pub async fn list_tools_internal(&self) -> Result<ListToolsResult, McpError> {
        let mode = *self.mode.lock();
        let tools = match mode {
            RouterMode::Normal => {
                let mut tools: Vec<McpTool> = self.toolset.get_mcp_tools().iter().map(exposed_to_mcp_tool).collect();
                tools.push(enter_configuration_tool());
                tools
            }
            RouterMode::Configuration => management_tools(),
        };
        Ok(ListToolsResult::with_all_items(tools))
    }

    pub async fn call_tool_internal(&self, request: CallToolRequestParam) -> Result<CallToolResult, McpError> {
        let name = request.name.to_string();
        let arguments = request.arguments.clone();
        let mode = *self.mode.lock();

        match mode {
            RouterMode::Normal => {
                if name == ENTER_CONFIGURATION_MODE {
                    *self.mode.lock() = RouterMode::Configuration;
                    return Ok(tool_success("entered configuration mode"));
                }
                Ok(self.dispatch_normal(&name, arguments).await)
            }
            RouterMode::Configuration => Ok(self.dispatch_configuration(&name, arguments).await),
        }
    }

    async fn dispatch_normal(&self, exposed_name: &str, arguments: Option<serde_json::Map<String, Value>>) -> CallToolResult {
        let Some(namespaced) = self.toolset.get_original_tool_name(exposed_name) else {
            return tool_error(format!("unknown tool '{exposed_name}'"));
        };
        let Some(tool) = self.discovery.get_tool(&namespaced) else {
            return tool_error(format!("tool '{namespaced}' is no longer in the catalog"));
        };
        if !tool.server_connected {
            return tool_error(format!("server '{}' not connected", tool.server_name));
        }
        let Some(supervisor) = self.pool.get(&tool.server_name) else {
            return tool_error(format!("server '{}' not connected", tool.server_name));
        };
        if !supervisor.is_connected() {
            return tool_error(format!("server '{}' not connected", tool.server_name));
        }

        let args_value = arguments.clone().map(Value::Object).unwrap_or(Value::Null);
        if let Err(detail) = validate_against_schema(&tool.definition.input_schema, &args_value) {
            return tool_error(format!("invalid parameters for '{exposed_name}': {detail}"));
        }

        let breaker = self.circuit_breakers.get(&tool.server_name);
        let transport = supervisor.transport();
        let tool_name = tool.name.clone();
        let server_name = tool.server_name.clone();
        let request_timeout = self.request_timeout;
        let arguments_for_fallback = arguments.clone();

        let outcome = self
            .retry
            .run(move || {
                let breaker = Arc::clone(&breaker);
                let transport = Arc::clone(&transport);
                let tool_name = tool_name.clone();
                let server_name = server_name.clone();
                let arguments = arguments.clone();
                async move {
                    breaker
                        .guard(move || {
                            let params = serde_json::json!({"name": tool_name, "arguments": arguments});
                            async move {
                                match timeout(request_timeout, transport.send("tools/call", Some(params))).await {
                                    Ok(result) => result,
                                    Err(_) => Err(RelayError::Timeout {
                                        server: server_name,
                                        millis: request_timeout.as_millis() as u64,
                                    }),
                                }
                            }
                        })
                        .await
                }
            })
            .await;

        let outcome = match outcome {
            Ok(value) => Ok(value),
            Err(e) if e.is_retryable() => {
                let fallback = FallbackChain::new(vec![Arc::new(ReconnectAndRetry {
                    pool: Arc::clone(&self.pool),
                    server_name: tool.server_name.clone(),
                    tool_name: tool.name.clone(),
                    arguments: arguments_for_fallback,
                    request_timeout,
                }) as Arc<dyn FallbackStrategy>]);
                fallback.recover(e).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(value) => value_to_call_result(value),
            Err(e) => tool_error(e.to_string()),
        }
    }

    async fn dispatch_configuration(&self, name: &str, arguments: Option<serde_json::Map<String, Value>>) -> CallToolResult {
        let args = arguments.map(Value::Object).unwrap_or(Value::Null);
        match name {
            "list-toolsets" => {
                let names = self.toolset.saved_toolsets();
                tool_success(serde_json::to_string(&names).unwrap_or_default())
            }
            "equip-toolset" => {
                let Some(toolset_name) = args.get("name").and_then(Value::as_str) else {
                    return tool_error("missing required argument 'name'");
                };
                match self.toolset.equip_toolset(toolset_name) {
                    Ok(()) => {
                        *self.mode.lock() = RouterMode::Normal;
                        self.notify_list_changed();
                        tool_success(format!("equipped toolset '{toolset_name}'"))
                    }
                    Err(e) => tool_error(e.to_string()),
                }
            }
            "unequip-toolset" => {
                self.toolset.unequip_toolset();
                self.notify_list_changed();
                tool_success("unequipped")
            }
            "build-toolset" => self.dispatch_build_toolset(&args).await,
            "delete-toolset" => {
                let Some(toolset_name) = args.get("name").and_then(Value::as_str) else {
                    return tool_error("missing required argument 'name'");
                };
                match self.toolset.delete_toolset(toolset_name) {
                    Ok(()) => tool_success(format!("deleted toolset '{toolset_name}'")),
                    Err(e) => tool_error(e.to_string()),
                }
            }
            other if MANAGEMENT_TOOLS.contains(&other) => {
                tool_error(format!("management tool '{other}' is not yet callable"))
            }
            other => tool_error(format!("unknown tool '{other}' (in configuration mode)")),
        }
    }

    async fn dispatch_build_toolset(&self, args: &Value) -> CallToolResult {
        let Some(name) = args.get("name").and_then(Value::as_str) else {
            return tool_error("missing required argument 'name'");
        };
        let Some(raw_tools) = args.get("tools").and_then(Value::as_array) else {
            return tool_error("missing required argument 'tools'");
        };
        let mut tools = Vec::with_capacity(raw_tools.len());
        for raw in raw_tools {
            match serde_json::from_value::<ToolReference>(raw.clone()) {
                Ok(reference) => tools.push(reference),
                Err(e) => return tool_error(format!("invalid tool reference: {e}")),
            }
        }
        let description = args.get("description").and_then(Value::as_str).map(str::to_string);
        let auto_equip = args.get("autoEquip").and_then(Value::as_bool).unwrap_or(false);

        let config = ToolsetConfig {
            name: name.to_string(),
            description,
            version: 1,
            created_at: chrono::Utc::now().to_rfc3339(),
            tools,
        };

        if let Err(e) = self.toolset.set_current_toolset(config).await {
            return tool_error(e.to_string());
        }

        if auto_equip {
            if let Err(e) = self.toolset.equip_toolset(name) {
                return tool_error(format!("saved but failed to equip: {e}"));
            }
            *self.mode.lock() = RouterMode::Normal;
        }
        self.notify_list_changed();
        tool_success(format!("saved toolset '{name}'{}", if auto_equip { " (equipped)" } else { "" }))
    }
}

/// Downstream `tools/call` responses already carry the MCP `CallToolResult`
/// shape (`{content, isError?}`); this re-parses it into the native type so
/// it can be returned to the upstream client untouched.
fn value_to_call_result(value: Value) -> CallToolResult {
    match serde_json::from_value::<CallToolResult>(value.clone()) {
        Ok(result) => result,
        Err(_) => match value.get("content").cloned() {
            Some(content) => tool_success(content.to_string()),
            None => tool_success(value.to_string()),
        },
    }
}

impl ServerHandler for RequestRouter {
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        self.capture_peer(&context);
        self.list_tools_internal().await
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.capture_peer(&context);
        self.call_tool_internal(request).await
    }

    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.server_info.name = env!("CARGO_PKG_NAME").to_string();
        info.server_info.version = env!("CARGO_PKG_VERSION").to_string();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::ToolAnnotations;
    use crate::cache::ToolCache;
    use crate::config::{CircuitBreakerConfig, RelayConfig, RouterConfig};
    use crate::discovery::ToolDefinition;
    use std::collections::HashMap as StdHashMap;
    use std::time::Duration as StdDuration;

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: None,
            input_schema: Value::Object(Default::default()),
            output_schema: None,
            annotations: ToolAnnotations::default(),
        }
    }

    fn setup() -> (RequestRouter, Arc<DiscoveryEngine>, Arc<ToolsetManager>) {
        let discovery = Arc::new(DiscoveryEngine::new(ToolCache::new(StdDuration::from_secs(300), 500)));
        discovery.ingest_tools("git", vec![def("status")]);
        let (toolset, _rx) = ToolsetManager::new(Arc::clone(&discovery), None, false);
        let toolset = Arc::new(toolset);
        let (pool, _rx) = ConnectionPool::new(&RelayConfig {
            servers: StdHashMap::new(),
            ..Default::default()
        })
        .expect("pool");
        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
        let router = RequestRouter::new(
            Arc::new(pool),
            Arc::clone(&discovery),
            Arc::clone(&toolset),
            breakers,
            &PoolConfig::default(),
            &RouterConfig::default(),
        );
        (router, discovery, toolset)
    }

    #[tokio::test]
    async fn normal_mode_lists_exposed_tools_plus_mode_switch() {
        let (router, _discovery, toolset) = setup();
        toolset
            .set_current_toolset(ToolsetConfig {
                name: "dev".to_string(),
                description: None,
                version: 1,
                created_at: "2026-01-01T00:00:00Z".to_string(),
                tools: vec![ToolReference {
                    namespaced_name: Some("git.status".to_string()),
                    tool_hash: None,
                }],
            })
            .await
            .expect("saved");
        toolset.equip_toolset("dev").expect("equipped");

        let result = router.list_tools_internal().await.expect("list ok");
        let names: Vec<String> = result.tools.iter().map(|t| t.name.to_string()).collect();
        assert!(names.contains(&"status".to_string()));
        assert!(names.contains(&ENTER_CONFIGURATION_MODE.to_string()));
    }

    #[tokio::test]
    async fn entering_configuration_mode_switches_the_listed_tools() {
        let (router, _discovery, _toolset) = setup();
        let result = router
            .call_tool_internal(CallToolRequestParam {
                name: ENTER_CONFIGURATION_MODE.into(),
                arguments: None,
            })
            .await
            .expect("switch ok");
        assert_eq!(result.is_error, Some(false));

        let listed = router.list_tools_internal().await.expect("list ok");
        let names: Vec<String> = listed.tools.iter().map(|t| t.name.to_string()).collect();
        assert!(names.contains(&"equip-toolset".to_string()));
        assert!(!names.contains(&"status".to_string()));
    }

    #[tokio::test]
    async fn calling_unknown_tool_in_normal_mode_is_a_tool_error_not_a_protocol_error() {
        let (router, _discovery, _toolset) = setup();
        let result = router
            .call_tool_internal(CallToolRequestParam {
                name: "nonexistent".into(),
                arguments: None,
            })
            .await
            .expect("no protocol error");
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn build_toolset_then_equip_round_trips_through_configuration_mode() {
        let (router, _discovery, toolset) = setup();
        *router.mode.lock() = RouterMode::Configuration;

        let args = serde_json::json!({
            "name": "dev",
            "tools": [{"namespacedName": "git.status"}],
            "autoEquip": true,
        })
        .as_object()
        .cloned();

        let result = router
            .call_tool_internal(CallToolRequestParam {
                name: "build-toolset".into(),
                arguments: args,
            })
            .await
            .expect("no protocol error");
        assert_eq!(result.is_error, Some(false));
        assert_eq!(toolset.active_toolset_name(), Some("dev".to_string()));
        assert_eq!(*router.mode.lock(), RouterMode::Normal);
    }

    #[tokio::test]
    async fn missing_required_argument_is_a_tool_error() {
        let (router, _discovery, _toolset) = setup();
        *router.mode.lock() = RouterMode::Configuration;
        let result = router
            .call_tool_internal(CallToolRequestParam {
                name: "equip-toolset".into(),
                arguments: None,
            })
            .await
            .expect("no protocol error");
        assert_eq!(result.is_error, Some(true));
    }
}
