use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: BreakerState,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(rename = "cooldown_ms", with = "crate::config::duration_ms")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

#[derive(Debug)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { probe_in_flight: bool },
}

#[derive(Debug)]
struct State {
    consecutive_failures: u32,
    phase: Phase,
}

/// Consecutive-failure circuit breaker.
///
/// - Opens once `failure_threshold` retryable failures happen in a row
/// - While open, every call fails fast with `CircuitOpen`
/// - After the cooldown a single probe call is admitted (half-open);
///   its success closes the circuit, its failure reopens it
/// - Outcomes that say nothing about backend health (cancellation,
///   client-side errors) leave the counter untouched
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    provider: String,
    state: std::sync::Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig, provider: impl Into<String>) -> Self {
        Self {
            cfg,
            provider: provider.into(),
            state: std::sync::Mutex::new(State {
                consecutive_failures: 0,
                phase: Phase::Closed,
            }),
        }
    }

    fn ctx(&self) -> ErrorContext {
        ErrorContext::new()
            .with_provider(self.provider.clone())
            .with_source("circuit_breaker")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // State stays consistent across a panic: every transition is a single assignment.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Admit or reject a call. Rejection carries the remaining open time.
    pub fn allow(&self) -> Result<()> {
        let mut st = self.lock();
        match st.phase {
            Phase::Closed => Ok(()),
            Phase::Open { until } => {
                let now = Instant::now();
                if now < until {
                    return Err(Error::circuit_open(until - now, self.ctx()));
                }
                tracing::info!(provider = %self.provider, "circuit breaker half-open, admitting probe");
                st.phase = Phase::HalfOpen {
                    probe_in_flight: true,
                };
                Ok(())
            }
            Phase::HalfOpen { probe_in_flight } => {
                if probe_in_flight {
                    return Err(Error::circuit_open(Duration::ZERO, self.ctx()));
                }
                st.phase = Phase::HalfOpen {
                    probe_in_flight: true,
                };
                Ok(())
            }
        }
    }

    pub fn on_success(&self) {
        let mut st = self.lock();
        if !matches!(st.phase, Phase::Closed) {
            tracing::info!(provider = %self.provider, "circuit breaker closed");
        }
        st.consecutive_failures = 0;
        st.phase = Phase::Closed;
    }

    /// Count a backend failure. The cooldown is armed on Closed -> Open and
    /// when a half-open probe fails; late failures from calls admitted before
    /// the circuit opened leave it as is.
    pub fn on_failure(&self) {
        let mut st = self.lock();
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        let rearm = match st.phase {
            Phase::Open { .. } => false,
            Phase::HalfOpen { .. } => true,
            Phase::Closed => st.consecutive_failures >= self.cfg.failure_threshold,
        };
        if rearm {
            tracing::warn!(
                provider = %self.provider,
                consecutive_failures = st.consecutive_failures,
                cooldown_ms = self.cfg.cooldown.as_millis() as u64,
                "circuit breaker opened"
            );
            st.phase = Phase::Open {
                until: Instant::now() + self.cfg.cooldown,
            };
        }
    }

    /// Record an outcome that is neither a success nor a backend failure.
    pub fn on_neutral(&self) {
        let mut st = self.lock();
        if let Phase::HalfOpen { .. } = st.phase {
            st.phase = Phase::HalfOpen {
                probe_in_flight: false,
            };
        }
    }

    /// Route an operation result to the matching transition.
    pub fn record<T>(&self, outcome: &Result<T>) {
        match outcome {
            Ok(_) => self.on_success(),
            Err(e) if e.is_retryable() => self.on_failure(),
            Err(_) => self.on_neutral(),
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let st = self.lock();
        let (state, open_remaining_ms) = match st.phase {
            Phase::Closed => (BreakerState::Closed, None),
            Phase::Open { until } if until > now => {
                (BreakerState::Open, Some((until - now).as_millis() as u64))
            }
            // Cooldown elapsed; the next call becomes the probe.
            Phase::Open { .. } => (BreakerState::HalfOpen, None),
            Phase::HalfOpen { .. } => (BreakerState::HalfOpen, None),
        };
        CircuitBreakerSnapshot {
            state,
            failure_threshold: self.cfg.failure_threshold,
            cooldown_ms: self.cfg.cooldown.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            open_remaining_ms,
        }
    }
}
