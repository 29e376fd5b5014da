//! Recovery primitives (C8): a retry-with-jitter executor, a per-target
//! circuit breaker, and a fallback chain. Shared by the connection
//! supervisor (C2) and the request router (C9).

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::{CircuitBreakerConfig, PoolConfig};
use crate::error::{RelayError, RelayResult};

/// Runs an operation up to `max_attempts` times, retrying only errors the
/// taxonomy marks retryable, sleeping a backed-off/jittered delay between
/// attempts.
pub struct RetryManager {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl RetryManager {
    pub fn from_pool_config(cfg: &PoolConfig) -> Self {
        Self {
            max_attempts: cfg.max_retries.max(1),
            base_delay: Duration::from_millis(cfg.retry_delay_ms),
            max_delay: Duration::from_millis(cfg.max_retry_delay_ms),
            multiplier: cfg.backoff_multiplier,
        }
    }

    pub async fn run<F, Fut, T>(&self, mut operation: F) -> RelayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RelayResult<T>>,
    {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_max_interval(self.max_delay)
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && e.is_retryable() => {
                    let delay = backoff.next_backoff().unwrap_or(self.max_delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// One breaker per named downstream target (`spec.md` §5: "Circuit breakers
/// are keyed by a name; each is independent.").
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: cfg.failure_threshold,
            success_threshold: cfg.success_threshold,
            recovery_timeout: Duration::from_secs(cfg.recovery_timeout_secs),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether a call is allowed through right now. OPEN transitions itself
    /// to HALF_OPEN once `recoveryTimeoutMs` has elapsed and admits exactly
    /// one probing call; further calls are rejected until that probe
    /// resolves via [`Self::record_outcome`].
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed() >= self.recovery_timeout).unwrap_or(false);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_outcome(&self, success: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                if success {
                    inner.consecutive_failures = 0;
                } else {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.failure_threshold {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Instant::now());
                    }
                }
            }
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                if success {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.success_threshold {
                        inner.state = CircuitState::Closed;
                        inner.consecutive_failures = 0;
                    }
                } else {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.consecutive_successes = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Runs `operation` guarded by this breaker: rejects immediately while
    /// OPEN, otherwise runs it and records the outcome.
    pub async fn guard<F, Fut, T>(&self, operation: F) -> RelayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RelayResult<T>>,
    {
        if !self.can_execute() {
            return Err(RelayError::CircuitOpen(self.name.clone()));
        }
        let result = operation().await;
        self.record_outcome(result.is_ok());
        result
    }
}

/// Keeps one [`CircuitBreaker`] per name, created lazily on first access.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        Arc::clone(
            &self
                .breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, &self.config))),
        )
    }
}

#[async_trait]
pub trait FallbackStrategy: Send + Sync {
    fn can_handle(&self, error: &RelayError) -> bool;
    async fn execute(&self) -> RelayResult<serde_json::Value>;
}

/// Ordered list of strategies: on primary failure, the first matching
/// strategy runs; if it also fails, the next matching one is tried; if all
/// fail (or none match), the original error surfaces.
pub struct FallbackChain {
    strategies: Vec<Arc<dyn FallbackStrategy>>,
}

impl FallbackChain {
    pub fn new(strategies: Vec<Arc<dyn FallbackStrategy>>) -> Self {
        Self { strategies }
    }

    pub async fn recover(&self, original: RelayError) -> RelayResult<serde_json::Value> {
        for strategy in &self.strategies {
            if !strategy.can_handle(&original) {
                continue;
            }
            if let Ok(value) = strategy.execute().await {
                return Ok(value);
            }
        }
        Err(original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cfg() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout_secs: 0,
        }
    }

    #[test]
    fn five_consecutive_failures_open_the_circuit_scenario_6() {
        let breaker = CircuitBreaker::new("downstream", &cfg());
        for _ in 0..5 {
            assert!(breaker.can_execute());
            breaker.record_outcome(false);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn half_open_admits_one_probe_and_closes_after_three_successes() {
        let breaker = CircuitBreaker::new("downstream", &cfg());
        for _ in 0..5 {
            breaker.record_outcome(false);
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // recovery_timeout_secs = 0, so the next can_execute() immediately
        // transitions OPEN -> HALF_OPEN and admits exactly one probe.
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.can_execute(), "a second concurrent probe must be rejected");

        breaker.record_outcome(true);
        breaker.record_outcome(true);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_outcome(true);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn any_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("downstream", &cfg());
        for _ in 0..5 {
            breaker.record_outcome(false);
        }
        assert!(breaker.can_execute());
        breaker.record_outcome(false);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn registry_keys_breakers_independently() {
        let registry = CircuitBreakerRegistry::new(cfg());
        let a = registry.get("server-a");
        for _ in 0..5 {
            a.record_outcome(false);
        }
        let b = registry.get("server-b");
        assert_eq!(a.state(), CircuitState::Open);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn retry_manager_stops_on_non_retryable_error() {
        let pool_cfg = PoolConfig {
            max_concurrent_connections: 10,
            max_retries: 5,
            retry_delay_ms: 1,
            max_retry_delay_ms: 2,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let manager = RetryManager::from_pool_config(&pool_cfg);
        let attempts = AtomicU32::new(0);
        let result: RelayResult<()> = manager
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(RelayError::InvalidArguments("bad".to_string())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_manager_retries_up_to_max_attempts() {
        let pool_cfg = PoolConfig {
            max_concurrent_connections: 10,
            max_retries: 3,
            retry_delay_ms: 1,
            max_retry_delay_ms: 2,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let manager = RetryManager::from_pool_config(&pool_cfg);
        let attempts = AtomicU32::new(0);
        let result: RelayResult<()> = manager
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(RelayError::Transport {
                        server: "git".to_string(),
                        detail: "boom".to_string(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
