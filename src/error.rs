use std::time::Duration;
use thiserror::Error;

/// Structured context attached to every error: which backend produced it and
/// what the wire exchange looked like.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Provider name (e.g. "KoboldCpp", "Ollama").
    pub provider: Option<String>,
    /// HTTP status code returned by the backend, if any.
    pub status_code: Option<u16>,
    /// Raw response body, if one was read.
    pub response_body: Option<String>,
    /// Component that raised the error (e.g. "transport", "circuit_breaker").
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_response_body(mut self, body: impl Into<String>) -> Self {
        self.response_body = Some(body.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref provider) = ctx.provider {
        parts.push(format!("provider: {}", provider));
    }
    if let Some(status) = ctx.status_code {
        parts.push(format!("status: {}", status));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

/// Coarse classification of an [`Error`], convenient for matching without
/// destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Timeout,
    Protocol,
    CircuitOpen,
    Configuration,
    Cancelled,
}

/// Unified error type for every operation in the crate.
///
/// Backend adapters never leak `reqwest` or `serde_json` errors: they are
/// re-wrapped here with the provider name attached.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport error: {message}{}", format_context(.context))]
    Transport {
        message: String,
        context: ErrorContext,
    },

    #[error("Attempt timed out after {}ms{}", .after.as_millis(), format_context(.context))]
    Timeout {
        after: Duration,
        context: ErrorContext,
    },

    #[error("Protocol error: {message}{}", format_context(.context))]
    Protocol {
        message: String,
        context: ErrorContext,
    },

    #[error("Circuit breaker open, retry in {}ms{}", .remaining.as_millis(), format_context(.context))]
    CircuitOpen {
        remaining: Duration,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Operation cancelled{}", format_context(.context))]
    Cancelled { context: ErrorContext },
}

impl Error {
    pub fn transport(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Transport {
            message: msg.into(),
            context,
        }
    }

    pub fn timeout(after: Duration, context: ErrorContext) -> Self {
        Error::Timeout { after, context }
    }

    pub fn protocol(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Protocol {
            message: msg.into(),
            context,
        }
    }

    pub fn circuit_open(remaining: Duration, context: ErrorContext) -> Self {
        Error::CircuitOpen { remaining, context }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new().with_source("config"),
        }
    }

    pub fn cancelled(context: ErrorContext) -> Self {
        Error::Cancelled { context }
    }

    /// Wrap a `reqwest` failure, keeping timeouts distinguishable from
    /// connection-level failures.
    pub(crate) fn from_reqwest(err: reqwest::Error, provider: &str, after: Duration) -> Self {
        let ctx = ErrorContext::new()
            .with_provider(provider)
            .with_source("transport");
        if err.is_timeout() {
            return Error::timeout(after, ctx);
        }
        if let Some(status) = err.status() {
            return Error::protocol(err.to_string(), ctx.with_status_code(status.as_u16()));
        }
        if err.is_decode() {
            return Error::protocol(format!("Malformed response body: {}", err), ctx);
        }
        Error::transport(err.to_string(), ctx)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Protocol { .. } => ErrorKind::Protocol,
            Error::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Error::Transport { context, .. }
            | Error::Timeout { context, .. }
            | Error::Protocol { context, .. }
            | Error::CircuitOpen { context, .. }
            | Error::Configuration { context, .. }
            | Error::Cancelled { context } => context,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        self.context().provider.as_deref()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.context().status_code
    }

    pub fn response_body(&self) -> Option<&str> {
        self.context().response_body.as_deref()
    }

    /// Transport failures, timeouts and 5xx protocol errors are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { .. } | Error::Timeout { .. } => true,
            Error::Protocol { context, .. } => context.status_code.map_or(false, |s| s >= 500),
            Error::CircuitOpen { .. } | Error::Configuration { .. } | Error::Cancelled { .. } => {
                false
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Attach the provider name if the error does not carry one yet.
    pub(crate) fn with_provider(mut self, provider: &str) -> Self {
        let ctx = match &mut self {
            Error::Transport { context, .. }
            | Error::Timeout { context, .. }
            | Error::Protocol { context, .. }
            | Error::CircuitOpen { context, .. }
            | Error::Configuration { context, .. }
            | Error::Cancelled { context } => context,
        };
        if ctx.provider.is_none() {
            ctx.provider = Some(provider.to_string());
        }
        self
    }
}
