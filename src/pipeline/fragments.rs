use crate::progress::OperationProgress;
use crate::{BoxStream, Error, ErrorContext, Result};
use futures::future::BoxFuture;
use futures::{stream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;

/// Future that opens the provider's raw fragment sequence.
pub type OpenFuture = BoxFuture<'static, Result<BoxStream<'static, String>>>;

enum Stage {
    Pending(OpenFuture),
    Flowing(BoxStream<'static, String>),
    Finished,
}

struct Driver {
    stage: Stage,
    provider: String,
    progress: Arc<OperationProgress>,
    cancel: CancellationToken,
}

impl Driver {
    fn failed(mut self, err: Error) -> Option<(Result<String>, Driver)> {
        self.stage = Stage::Finished;
        self.progress.fail(format!("Streaming failed: {}", err));
        Some((Err(err), self))
    }

    fn cancelled(&self) -> Error {
        Error::cancelled(
            ErrorContext::new()
                .with_provider(self.provider.clone())
                .with_source("stream"),
        )
    }

    async fn step(mut self) -> Option<(Result<String>, Driver)> {
        loop {
            match std::mem::replace(&mut self.stage, Stage::Finished) {
                Stage::Finished => return None,
                Stage::Pending(open) => {
                    self.progress.start("Starting streaming completion...");
                    let opened = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => Err(self.cancelled()),
                        r = open => r,
                    };
                    match opened {
                        Ok(inner) => self.stage = Stage::Flowing(inner),
                        Err(e) => return self.failed(e),
                    }
                }
                Stage::Flowing(mut inner) => {
                    if self.cancel.is_cancelled() {
                        let err = self.cancelled();
                        return self.failed(err);
                    }
                    let next = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => Some(Err(self.cancelled())),
                        item = inner.next() => item,
                    };
                    return match next {
                        Some(Ok(fragment)) => {
                            self.progress.streaming("Receiving tokens...");
                            self.stage = Stage::Flowing(inner);
                            Some((Ok(fragment), self))
                        }
                        Some(Err(e)) => self.failed(e),
                        None => {
                            self.progress.complete("Streaming complete");
                            None
                        }
                    };
                }
            }
        }
    }
}

/// Lazily-started stream of text fragments with progress reporting and
/// cooperative cancellation.
///
/// Nothing happens until the first poll, which emits `Starting` and opens the
/// provider stream. Every fragment emits `Streaming`; a graceful end emits
/// `Complete`, and any error or cancellation yields one `Err` item, emits
/// `Failed` and ends the stream. Dropping a started stream before it finished
/// counts as a failure. The stream is single-use: call `stream()` again to
/// generate again.
pub struct FragmentStream {
    inner: BoxStream<'static, String>,
    progress: Arc<OperationProgress>,
}

impl FragmentStream {
    pub fn new(
        provider: impl Into<String>,
        open: OpenFuture,
        progress: Arc<OperationProgress>,
        cancel: CancellationToken,
    ) -> Self {
        let driver = Driver {
            stage: Stage::Pending(open),
            provider: provider.into(),
            progress: Arc::clone(&progress),
            cancel,
        };
        Self {
            inner: Box::pin(stream::unfold(driver, Driver::step).fuse()),
            progress,
        }
    }

    /// Whether a terminal progress event has been emitted.
    pub fn is_finished(&self) -> bool {
        self.progress.is_terminal()
    }
}

impl Stream for FragmentStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        if self.progress.is_started() && !self.progress.is_terminal() {
            self.progress
                .fail("Streaming failed: stream dropped before completion");
        }
    }
}
