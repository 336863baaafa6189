//! 进度事件模块：观察者注册、事件广播与单次操作的状态跟踪。
//!
//! # Progress Reporting
//!
//! Observers implement [`ProgressSink`] (any `Fn(&ProgressEvent) + Send + Sync`
//! closure does) and register with the client. Each `complete`/`stream` call
//! drives one [`OperationProgress`] tracker which guarantees the event order
//! `Starting → {Processing | Streaming…} → {Complete | Failed}` with exactly
//! one terminal event.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ProgressSink`] | Observer trait |
//! | [`InMemoryProgressSink`] | Recording sink for tests and diagnostics |
//! | [`ProgressHub`] | Subscription registry and fan-out |
//! | [`OperationProgress`] | Per-operation state machine |

use crate::types::{ProgressEvent, ProgressState};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use tokio::time::Instant;

/// Receives progress events. Implementations must not block for long: events
/// are delivered inline on the task driving the operation.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// In-memory sink for testing.
#[derive(Default)]
pub struct InMemoryProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl InMemoryProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn states(&self) -> Vec<ProgressState> {
        self.events().iter().map(|e| e.state).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProgressSink for InMemoryProgressSink {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
    }
}

/// Handle returned by [`ProgressHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Publish/subscribe registry for progress observers.
#[derive(Default)]
pub struct ProgressHub {
    sinks: RwLock<Vec<(SubscriptionId, Arc<dyn ProgressSink>)>>,
    next_id: AtomicU64,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Arc<dyn ProgressSink>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sinks
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push((id, sink));
        id
    }

    /// Returns `false` if `id` was not (or no longer) registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut sinks = self.sinks.write().unwrap_or_else(|p| p.into_inner());
        let before = sinks.len();
        sinks.retain(|(sid, _)| *sid != id);
        sinks.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.sinks.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Deliver `event` to every observer. A panicking observer is logged and
    /// skipped; the rest still receive the event.
    pub fn emit(&self, event: &ProgressEvent) {
        // Snapshot so observers may (un)subscribe from inside a callback.
        let sinks: Vec<Arc<dyn ProgressSink>> = self
            .sinks
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for sink in sinks {
            if catch_unwind(AssertUnwindSafe(|| sink.on_progress(event))).is_err() {
                tracing::warn!(state = %event.state, "progress observer panicked");
            }
        }
    }
}

/// State machine for a single `complete` or `stream` operation.
///
/// Terminal emission is guarded so that at most one of `Complete`/`Failed`
/// is ever delivered, whichever path gets there first.
pub struct OperationProgress {
    hub: Arc<ProgressHub>,
    /// Set when `Starting` is emitted; elapsed times are measured from it.
    started_at: OnceLock<Instant>,
    started: AtomicBool,
    terminal: AtomicBool,
    attempts: Arc<AtomicU32>,
    max_attempts: u32,
}

impl OperationProgress {
    pub fn new(hub: Arc<ProgressHub>, max_attempts: u32) -> Self {
        Self {
            hub,
            started_at: OnceLock::new(),
            started: AtomicBool::new(false),
            terminal: AtomicBool::new(false),
            attempts: Arc::new(AtomicU32::new(0)),
            max_attempts,
        }
    }

    /// Counter incremented by the caller once per provider invocation.
    pub fn attempt_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.attempts)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire)
    }

    fn event(&self, state: ProgressState, message: String) -> ProgressEvent {
        let terminal = state.is_terminal();
        ProgressEvent {
            state,
            message,
            elapsed: self
                .started_at
                .get()
                .map(|t| t.elapsed())
                .unwrap_or_default(),
            attempt: terminal.then(|| self.attempts.load(Ordering::Acquire)),
            max_attempts: terminal.then_some(self.max_attempts),
            percent_complete: (state == ProgressState::Complete).then_some(100.0),
        }
    }

    pub fn start(&self, message: impl Into<String>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.started_at.set(Instant::now());
        self.hub
            .emit(&self.event(ProgressState::Starting, message.into()));
    }

    pub fn processing(&self, message: impl Into<String>) {
        if !self.is_terminal() {
            self.hub
                .emit(&self.event(ProgressState::Processing, message.into()));
        }
    }

    pub fn streaming(&self, message: impl Into<String>) {
        if !self.is_terminal() {
            self.hub
                .emit(&self.event(ProgressState::Streaming, message.into()));
        }
    }

    /// Emit `Complete` unless a terminal event was already sent.
    pub fn complete(&self, message: impl Into<String>) -> bool {
        self.finish(ProgressState::Complete, message.into())
    }

    /// Emit `Failed` unless a terminal event was already sent.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.finish(ProgressState::Failed, message.into())
    }

    fn finish(&self, state: ProgressState, message: String) -> bool {
        if self.terminal.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.hub.emit(&self.event(state, message));
        true
    }
}
