//! End-to-end coverage across the connection pool, discovery engine,
//! toolset manager, and request router, against a pair of mock stdio
//! servers driven by tiny shell scripts (no network, no real downstream
//! tool server required).

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use mcp_relay::cache::ToolCache;
use mcp_relay::config::{PoolConfig, RelayConfig, RouterConfig, ServerConfig, Transport as TransportConfig};
use mcp_relay::discovery::DiscoveryEngine;
use mcp_relay::pool::ConnectionPool;
use mcp_relay::recovery::CircuitBreakerRegistry;
use mcp_relay::router::RequestRouter;
use mcp_relay::toolset::ToolsetManager;
use rmcp::model::CallToolRequestParam;
use serde_json::json;

/// Writes an executable shell script that speaks just enough of the
/// newline-delimited JSON-RPC framing to answer `tools/list` and
/// `tools/call`, optionally failing every call when `fail_calls` is set
/// (used to exercise the circuit breaker / error path).
fn write_mock_server(dir: &std::path::Path, file_name: &str, tool_name: &str, fail_calls: bool) -> std::path::PathBuf {
    let path = dir.join(file_name);
    let call_branch = if fail_calls {
        r#"
    *\"tools/call\"*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32000,"message":"boom"}}\n' "$id"
      ;;"#
        .to_string()
    } else {
        format!(
            r#"
    *\"tools/call\"*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"content":[{{"type":"text","text":"ok-from-{tool_name}"}}]}}}}\n' "$id"
      ;;"#
        )
    };

    let script = format!(
        r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id"[ ]*:[ ]*\([^,}}]*\).*/\1/p')
  case "$line" in
    *\"tools/list\"*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"tools":[{{"name":"{tool_name}","description":"a tool","inputSchema":{{"type":"object","properties":{{"value":{{"type":"string"}}}},"required":["value"]}}}}]}}}}\n' "$id"
      ;;{call_branch}
  esac
done
"#
    );
    fs::write(&path, script).expect("write mock script");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }

    path
}

fn stdio_server(command: std::path::PathBuf) -> ServerConfig {
    ServerConfig {
        transport: TransportConfig::Stdio {
            command: "sh".to_string(),
            args: vec![command.to_string_lossy().into_owned()],
            env: HashMap::new(),
        },
        enabled: true,
    }
}

struct Harness {
    pool: Arc<ConnectionPool>,
    discovery: Arc<DiscoveryEngine>,
    router: Arc<RequestRouter>,
}

async fn build_harness(servers: HashMap<String, ServerConfig>) -> Harness {
    let config = RelayConfig {
        servers,
        ..Default::default()
    };
    let (pool, _pool_events) = ConnectionPool::new(&config).expect("pool");
    let pool = Arc::new(pool);

    let cache = ToolCache::new(Duration::from_secs(300), 500);
    let discovery = Arc::new(DiscoveryEngine::new(cache));

    let (toolset, _toolset_events) = ToolsetManager::new(Arc::clone(&discovery), None, false);
    let toolset = Arc::new(toolset);

    let circuit_breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
    let router = Arc::new(RequestRouter::new(
        Arc::clone(&pool),
        Arc::clone(&discovery),
        Arc::clone(&toolset),
        circuit_breakers,
        &PoolConfig::default(),
        &RouterConfig {
            request_timeout_secs: 5,
        },
    ));

    Harness { pool, discovery, router }
}

/// After connecting, enumerates tools for every server exactly once,
/// mirroring the `main.rs` discovery bridge without needing the whole
/// binary's event-loop plumbing.
async fn discover_all(harness: &Harness) {
    for name in harness.pool.server_names() {
        let supervisor = harness.pool.get(&name).expect("supervisor");
        let transport = supervisor.transport();
        let value = transport.send("tools/list", None).await.expect("tools/list");
        let definitions = serde_json::from_value(value["tools"].clone()).expect("tool definitions");
        let diff = harness.discovery.ingest_tools(&name, definitions);
        harness.router.on_tools_changed(&name, diff);
    }
}

#[tokio::test]
async fn two_servers_connect_and_their_tools_are_discovered() {
    let temp = tempfile::tempdir().expect("tempdir");
    let git = stdio_server(write_mock_server(temp.path(), "git.sh", "git_status", false));
    let docs = stdio_server(write_mock_server(temp.path(), "docs.sh", "search_docs", false));

    let mut servers = HashMap::new();
    servers.insert("git".to_string(), git);
    servers.insert("docs".to_string(), docs);

    let harness = build_harness(servers).await;
    harness.pool.start().await;

    assert_eq!(harness.pool.connected_count(), 2);

    discover_all(&harness).await;

    let tools = harness.discovery.get_available_tools(true);
    let mut names: Vec<&str> = tools.iter().map(|t| t.namespaced_name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["docs.search_docs", "git.git_status"]);
}

#[tokio::test]
async fn equip_toolset_then_call_tool_round_trips_through_the_router() {
    let temp = tempfile::tempdir().expect("tempdir");
    let git = stdio_server(write_mock_server(temp.path(), "git.sh", "git_status", false));

    let mut servers = HashMap::new();
    servers.insert("git".to_string(), git);

    let harness = build_harness(servers).await;
    harness.pool.start().await;
    discover_all(&harness).await;

    // Enter configuration mode.
    let entered = harness
        .router
        .call_tool_internal(CallToolRequestParam {
            name: "enter-configuration-mode".into(),
            arguments: None,
        })
        .await
        .expect("enter configuration mode");
    assert_eq!(entered.is_error, Some(false));

    // Build and auto-equip a toolset exposing the one discovered tool.
    let build_args = json!({
        "name": "everyday",
        "tools": [{"namespacedName": "git.git_status"}],
        "autoEquip": true,
    });
    let built = harness
        .router
        .call_tool_internal(CallToolRequestParam {
            name: "build-toolset".into(),
            arguments: build_args.as_object().cloned(),
        })
        .await
        .expect("build toolset");
    assert_eq!(built.is_error, Some(false));

    // Auto-equip should have switched back to normal mode; the exposed
    // tool should now be directly callable by its flattened name.
    let call_args = json!({"value": "ping"});
    let result = harness
        .router
        .call_tool_internal(CallToolRequestParam {
            name: "git_status".into(),
            arguments: call_args.as_object().cloned(),
        })
        .await
        .expect("call tool");

    assert_eq!(result.is_error, Some(false));
    let text = result.content[0].as_text().map(|t| t.text.as_str());
    assert_eq!(text, Some("ok-from-git_status"));
}

#[tokio::test]
async fn downstream_call_failure_is_surfaced_as_a_tool_error_not_a_panic() {
    let temp = tempfile::tempdir().expect("tempdir");
    let flaky = stdio_server(write_mock_server(temp.path(), "flaky.sh", "explode", true));

    let mut servers = HashMap::new();
    servers.insert("flaky".to_string(), flaky);

    let harness = build_harness(servers).await;
    harness.pool.start().await;
    discover_all(&harness).await;

    let build_args = json!({
        "name": "risky",
        "tools": [{"namespacedName": "flaky.explode"}],
        "autoEquip": true,
    });
    harness
        .router
        .call_tool_internal(CallToolRequestParam {
            name: "enter-configuration-mode".into(),
            arguments: None,
        })
        .await
        .expect("enter configuration mode");
    harness
        .router
        .call_tool_internal(CallToolRequestParam {
            name: "build-toolset".into(),
            arguments: build_args.as_object().cloned(),
        })
        .await
        .expect("build toolset");

    let result = harness
        .router
        .call_tool_internal(CallToolRequestParam {
            name: "explode".into(),
            arguments: json!({"value": "anything"}).as_object().cloned(),
        })
        .await
        .expect("call tool");

    assert_eq!(result.is_error, Some(true));
}

#[tokio::test]
async fn disconnecting_a_server_marks_its_tools_unavailable() {
    let temp = tempfile::tempdir().expect("tempdir");
    let git = stdio_server(write_mock_server(temp.path(), "git.sh", "git_status", false));

    let mut servers = HashMap::new();
    servers.insert("git".to_string(), git);

    let harness = build_harness(servers).await;
    harness.pool.start().await;
    discover_all(&harness).await;

    harness.pool.disconnect("git").await.expect("disconnect");
    harness.discovery.mark_server_disconnected("git");

    let tools = harness.discovery.get_available_tools(true);
    assert!(tools.is_empty(), "disconnected server's tools must drop out of the connected-only view");

    let all_tools = harness.discovery.get_available_tools(false);
    assert_eq!(all_tools.len(), 1, "the tool definition itself is retained, just marked unavailable");
    assert!(!all_tools[0].server_connected);

    // Routing a call against it must fail cleanly rather than hang on a
    // dead child process, since the router checks `server_connected` and
    // the pool's own connection state before ever touching the transport.
    let build_args = json!({
        "name": "stale",
        "tools": [{"namespacedName": "git.git_status"}],
        "autoEquip": true,
    });
    harness
        .router
        .call_tool_internal(CallToolRequestParam {
            name: "enter-configuration-mode".into(),
            arguments: None,
        })
        .await
        .expect("enter configuration mode");
    harness
        .router
        .call_tool_internal(CallToolRequestParam {
            name: "build-toolset".into(),
            arguments: build_args.as_object().cloned(),
        })
        .await
        .expect("build toolset");

    let result = harness
        .router
        .call_tool_internal(CallToolRequestParam {
            name: "git_status".into(),
            arguments: json!({"value": "ping"}).as_object().cloned(),
        })
        .await
        .expect("call tool");
    assert_eq!(result.is_error, Some(true));
}
