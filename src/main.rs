//! `mcp-relay` binary: composition root. Parses CLI flags, loads the
//! configuration document, wires the core components together, and runs
//! the upstream transport loop until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use mcp_relay::cache::ToolCache;
use mcp_relay::config::RelayConfig;
use mcp_relay::discovery::DiscoveryEngine;
use mcp_relay::events::{LifecycleEvent, ToolsetChangeType};
use mcp_relay::pool::ConnectionPool;
use mcp_relay::recovery::CircuitBreakerRegistry;
use mcp_relay::router::RequestRouter;
use mcp_relay::toolset::ToolsetManager;
use rmcp::ServiceExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum UpstreamTransportArg {
    Stdio,
    Http,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

/// Aggregating proxy for the Model Context Protocol.
#[derive(Debug, Parser)]
#[command(name = "mcp-relay", version, about)]
struct Cli {
    /// Path to the relay's YAML configuration document.
    #[arg(long)]
    config: std::path::PathBuf,

    /// Which transport the upstream (client-facing) MCP surface is served
    /// over.
    #[arg(long, env = "MCP_RELAY_UPSTREAM", value_enum, default_value = "stdio")]
    upstream_transport: UpstreamTransportArg,

    /// Address to bind when `--upstream-transport http` is selected.
    /// Falls back to the configuration document's `upstream.bind_addr`.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Log rendering: human-readable or newline-delimited JSON.
    #[arg(long, env = "MCP_RELAY_LOG_FORMAT", value_enum, default_value = "pretty")]
    log_format: LogFormatArg,

    /// Overrides `RUST_LOG` when set explicitly.
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(cli: &Cli) {
    let filter = cli
        .log_level
        .as_deref()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match cli.log_format {
        LogFormatArg::Pretty => subscriber.init(),
        LogFormatArg::Json => subscriber.json().init(),
    }
}

/// Background task: drains pool events, feeds CONNECTED servers through
/// discovery, and pushes the resulting diff into the router so the
/// upstream client learns about newly available tools.
fn spawn_discovery_bridge(
    mut events: tokio::sync::mpsc::Receiver<mcp_relay::events::PoolEvent>,
    pool: Arc<ConnectionPool>,
    discovery: Arc<DiscoveryEngine>,
    router: Arc<RequestRouter>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event.event {
                LifecycleEvent::Connected | LifecycleEvent::ToolsListChanged => {
                    let Some(supervisor) = pool.get(&event.server_name) else {
                        continue;
                    };
                    let transport = supervisor.transport();
                    match transport.send("tools/list", None).await {
                        Ok(value) => match parse_tool_list(value) {
                            Ok(definitions) => {
                                let diff = discovery.ingest_tools(&event.server_name, definitions);
                                router.on_tools_changed(&event.server_name, diff);
                            }
                            Err(e) => {
                                tracing::warn!(server = %event.server_name, error = %e, "malformed tools/list response");
                                discovery.mark_server_error(&event.server_name, e);
                            }
                        },
                        Err(e) => {
                            tracing::warn!(server = %event.server_name, error = %e, "tools/list failed");
                            discovery.mark_server_error(&event.server_name, e.to_string());
                        }
                    }
                }
                LifecycleEvent::Disconnected | LifecycleEvent::Failed { .. } => {
                    discovery.mark_server_disconnected(&event.server_name);
                }
                LifecycleEvent::Connecting | LifecycleEvent::Reconnecting { .. } | LifecycleEvent::Error { .. } => {}
            }
        }
    });
}

fn parse_tool_list(value: serde_json::Value) -> Result<Vec<mcp_relay::discovery::ToolDefinition>, String> {
    let tools = value
        .get("tools")
        .cloned()
        .ok_or_else(|| "response missing 'tools' field".to_string())?;
    serde_json::from_value(tools).map_err(|e| e.to_string())
}

/// Background task: forwards toolset-manager events into the router's
/// upstream notification path. Only `Activated`/`Updated`/`Deactivated`
/// transitions that already changed the exposed surface get here; the
/// router decides whether a push is actually warranted.
fn spawn_toolset_bridge(
    mut events: tokio::sync::mpsc::Receiver<mcp_relay::events::ToolsetChangedEvent>,
    router: Arc<RequestRouter>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(
                previous = ?event.previous_toolset,
                new = ?event.new_toolset,
                change = ?event.change_type,
                "toolset changed"
            );
            if event.change_type != ToolsetChangeType::Deactivated || event.previous_toolset.is_some() {
                router.on_toolset_changed();
            }
        }
    });
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "fatal error, aborting");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> mcp_relay::RelayResult<()> {
    let config = RelayConfig::from_file(&cli.config).await?;
    tracing::info!(servers = config.servers.len(), "configuration loaded");

    let (pool, pool_events) = ConnectionPool::new(&config)?;
    let pool = Arc::new(pool);

    let cache = ToolCache::new(
        std::time::Duration::from_secs(config.cache.default_ttl_secs),
        config.cache.per_server_cap,
    );
    let discovery = Arc::new(DiscoveryEngine::new(cache));

    let (toolset, toolset_events) = ToolsetManager::new(
        Arc::clone(&discovery),
        config.toolsets_path.clone(),
        config.security.allow_stale_refs,
    );
    toolset.load_from_disk().await?;
    let toolset = Arc::new(toolset);

    let circuit_breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));

    let router = Arc::new(RequestRouter::new(
        Arc::clone(&pool),
        Arc::clone(&discovery),
        Arc::clone(&toolset),
        Arc::clone(&circuit_breakers),
        &config.pool,
        &config.router,
    ));

    spawn_discovery_bridge(pool_events, Arc::clone(&pool), Arc::clone(&discovery), Arc::clone(&router));
    spawn_toolset_bridge(toolset_events, Arc::clone(&router));

    pool.start().await;

    let upstream_transport = match cli.upstream_transport {
        UpstreamTransportArg::Stdio => mcp_relay::config::UpstreamConfig::Stdio,
        UpstreamTransportArg::Http => {
            let bind_addr = cli
                .bind
                .map(|a| a.to_string())
                .unwrap_or_else(|| match &config.upstream {
                    mcp_relay::config::UpstreamConfig::Http { bind_addr } => bind_addr.clone(),
                    mcp_relay::config::UpstreamConfig::Stdio => "127.0.0.1:7800".to_string(),
                });
            mcp_relay::config::UpstreamConfig::Http { bind_addr }
        }
    };

    let serve_result = match upstream_transport {
        mcp_relay::config::UpstreamConfig::Stdio => serve_stdio(router.as_ref().clone()).await,
        mcp_relay::config::UpstreamConfig::Http { bind_addr } => serve_http(router.as_ref().clone(), bind_addr).await,
    };

    pool.stop().await;
    serve_result
}

async fn serve_stdio(router: RequestRouter) -> mcp_relay::RelayResult<()> {
    let transport = rmcp::transport::io::stdio();
    let service = router
        .serve(transport)
        .await
        .map_err(|e| mcp_relay::RelayError::Transport {
            server: "upstream".to_string(),
            detail: e.to_string(),
        })?;

    tokio::select! {
        res = service.waiting() => {
            res.map_err(|e| mcp_relay::RelayError::Transport {
                server: "upstream".to_string(),
                detail: e.to_string(),
            })?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, closing upstream stdio session");
        }
    }
    Ok(())
}

/// Serves the upstream surface over the streamable-HTTP transport. One
/// `RequestRouter` clone (cheap: every mutable field is an `Arc`) is handed
/// to every session the HTTP layer spins up.
async fn serve_http(router: RequestRouter, bind_addr: String) -> mcp_relay::RelayResult<()> {
    use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
    use rmcp::transport::streamable_http_server::tower::{StreamableHttpServerConfig, StreamableHttpService};

    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| mcp_relay::RelayError::Config(format!("invalid --bind address '{bind_addr}': {e}")))?;

    let service = StreamableHttpService::new(
        move || Ok(router.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );
    let app = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(mcp_relay::RelayError::Io)?;
    tracing::info!(%addr, "upstream HTTP transport listening");

    tokio::select! {
        res = axum::serve(listener, app) => {
            res.map_err(mcp_relay::RelayError::Io)?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, closing upstream HTTP listener");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
