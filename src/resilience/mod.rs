//! 弹性模块：熔断器、单次尝试超时与指数退避重试。
//!
//! # Resilience Module
//!
//! Every network call issued by the client passes through a
//! [`ResilienceEngine`](engine::ResilienceEngine), which composes:
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Consecutive-failure breaker with half-open probing |
//! | [`retry`] | Retry budget and exponential backoff schedule |
//! | [`engine`] | Composition of the above plus per-attempt timeout and cancellation |
//!
//! ## Circuit Breaker
//!
//! - **Closed**: calls pass through
//! - **Open**: the failure threshold was reached; calls fail fast with `CircuitOpen`
//! - **Half-Open**: the cooldown elapsed; one probe call decides whether to close
//!
//! ```rust
//! use localai_client::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig::new()
//!     .with_failure_threshold(5)
//!     .with_cooldown(Duration::from_secs(30));
//! let breaker = CircuitBreaker::new(config, "Ollama");
//! assert!(breaker.allow().is_ok());
//! ```

pub mod circuit_breaker;
pub mod engine;
pub mod retry;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
pub use engine::ResilienceEngine;
pub use retry::RetryPolicy;
