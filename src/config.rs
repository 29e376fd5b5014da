//! Relay configuration types.
//!
//! The whole runtime is configured by a single YAML document deserialized
//! into [`RelayConfig`]. Every knob carries a `serde(default)` so a minimal
//! document (just `servers`) is enough to boot.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,

    pub servers: HashMap<String, ServerConfig>,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub ping: PingConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolsets_path: Option<PathBuf>,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub router: RouterConfig,
}

impl RelayConfig {
    pub async fn from_file(path: impl AsRef<Path>) -> RelayResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RelayError::Config(format!("reading {}: {e}", path.display())))?;
        let mut config: Self = serde_yaml::from_str(&content)
            .map_err(|e| RelayError::Config(format!("parsing {}: {e}", path.display())))?;
        config.drop_self_referential_servers();
        config.validate()?;
        Ok(config)
    }

    /// Non-fatal, init-time filtering: a server whose stdio command would
    /// re-invoke this same relay binary under the same name is dropped from
    /// the pool with a warning instead of aborting startup. The process
    /// still starts normally afterward, even if this was the only entry.
    pub fn drop_self_referential_servers(&mut self) {
        let offenders: Vec<String> = self
            .servers
            .iter()
            .filter(|(name, server)| is_self_referential(name, server))
            .map(|(name, _)| name.clone())
            .collect();
        for name in offenders {
            tracing::warn!(server = %name, "server would create a self-referential loop, dropping from the pool");
            self.servers.remove(&name);
        }
    }

    /// Fatal, init-time validation: duplicate names are structurally
    /// impossible once parsed into a `HashMap`, so this only needs to catch
    /// per-transport field requirements that serde's tagged enum doesn't
    /// already enforce.
    pub fn validate(&self) -> RelayResult<()> {
        for (name, server) in &self.servers {
            if let Transport::Stdio { command, .. } = &server.transport {
                if command.trim().is_empty() {
                    return Err(RelayError::Config(format!(
                        "server '{name}': stdio transport requires a non-empty command"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A server is self-referential if its stdio command would re-invoke this
/// same relay binary under the same server name, which would recurse
/// forever on connect. We can't prove that in general, so we only guard the
/// literal case the upstream scenario describes: a command whose basename
/// matches our own binary name.
fn is_self_referential(_name: &str, server: &ServerConfig) -> bool {
    if let Transport::Stdio { command, .. } = &server.transport {
        let basename = Path::new(command)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(command);
        return basename == env!("CARGO_PKG_NAME");
    }
    false
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum UpstreamConfig {
    Stdio,
    Http {
        #[serde(default = "default_bind_addr")]
        bind_addr: String,
    },
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig::Stdio
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:7800".to_string()
}

/// One entry of the `serverName -> ServerConfig` map. `type` in the
/// external wire format maps to `protocol` internally to mirror the
/// tagged-enum pattern used for transports elsewhere in this crate.
#[derive(Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub transport: Transport,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("transport", &self.transport)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Transport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Stdio { command, args, env } => f
                .debug_struct("Stdio")
                .field("command", command)
                .field("args", args)
                .field("env", &format!("{} vars", env.len()))
                .finish(),
            Transport::Http { url, headers } => f
                .debug_struct("Http")
                .field("url", url)
                .field("headers", &redacted_headers(headers))
                .finish(),
            Transport::Sse { url, headers } => f
                .debug_struct("Sse")
                .field("url", url)
                .field("headers", &redacted_headers(headers))
                .finish(),
        }
    }
}

fn redacted_headers(headers: &HashMap<String, String>) -> String {
    format!("{} headers", headers.len())
}

impl Transport {
    pub fn kind(&self) -> &'static str {
        match self {
            Transport::Stdio { .. } => "stdio",
            Transport::Http { .. } => "http",
            Transport::Sse { .. } => "sse",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_concurrent_connections: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_connections: default_max_connections(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_per_server_cap")]
    pub per_server_cap: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            per_server_cap: default_per_server_cap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PingConfig {
    #[serde(default = "default_ping_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_ping_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_ping_interval_secs(),
            timeout_secs: default_ping_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub allow_stale_refs: bool,

    #[serde(default = "default_true")]
    pub validate_arguments: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_stale_refs: false,
            validate_arguments: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}
fn default_max_connections() -> usize {
    50
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_max_retry_delay_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_per_server_cap() -> usize {
    500
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_ping_timeout_secs() -> u64 {
    5
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    3
}
fn default_recovery_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let yaml = r#"
servers:
  git:
    type: stdio
    command: git-mcp
"#;
        let config: RelayConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(config.pool.max_retries, 5);
        assert_eq!(config.cache.default_ttl_secs, 300);
        let git = config.servers.get("git").expect("git server");
        assert_eq!(git.transport.kind(), "stdio");
    }

    #[test]
    fn full_transport_variants_parse() {
        let yaml = r#"
servers:
  git:
    type: stdio
    command: git-mcp
    args: ["--stdio"]
  docker:
    type: sse
    url: "https://d/sse"
    headers:
      X-Api-Key: secret
  web:
    type: http
    url: "https://w/mcp"
"#;
        let config: RelayConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(config.servers.len(), 3);
        assert_eq!(config.servers["docker"].transport.kind(), "sse");
        assert_eq!(config.servers["web"].transport.kind(), "http");
    }

    #[test]
    fn self_referential_server_is_dropped_not_rejected() {
        let yaml = format!(
            "servers:\n  loop:\n    type: stdio\n    command: {}\n",
            env!("CARGO_PKG_NAME")
        );
        let mut config: RelayConfig = serde_yaml::from_str(&yaml).expect("parse");
        config.drop_self_referential_servers();
        assert!(!config.servers.contains_key("loop"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn blank_stdio_command_is_rejected() {
        let yaml = r#"
servers:
  git:
    type: stdio
    command: ""
"#;
        let config: RelayConfig = serde_yaml::from_str(yaml).expect("parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn transport_debug_redacts_headers() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer xyz".to_string());
        let transport = Transport::Sse {
            url: "https://d/sse".to_string(),
            headers,
        };
        let rendered = format!("{transport:?}");
        assert!(!rendered.contains("xyz"));
    }
}
