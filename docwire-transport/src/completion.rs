//! One-shot completions for the async stream family.
//!
//! A [`Completion`] is consumed by the call that delivers its result, so it
//! fires at most once and nothing holds on to the callback afterwards. A
//! completion that is dropped unfired resolves its paired future with
//! [`TransportError::CompletionDropped`].

use crate::error::TransportError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type Callback<T> = Box<dyn FnOnce(Result<T, TransportError>) + Send + 'static>;

/// Receiver of a single asynchronous result.
pub struct Completion<T> {
    callback: Callback<T>,
}

impl<T: Send + 'static> Completion<T> {
    pub fn new(callback: impl FnOnce(Result<T, TransportError>) + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Creates a completion paired with a future resolving to its result.
    pub fn oneshot() -> (Self, CompletionFuture<T>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self::new(move |result| {
            // The waiter may have gone away; the result is then discarded.
            let _ = tx.send(result);
        });
        (completion, CompletionFuture { rx })
    }

    /// Delivers the result, consuming the completion.
    pub fn complete(self, result: Result<T, TransportError>) {
        (self.callback)(result)
    }

    pub fn succeed(self, value: T) {
        self.complete(Ok(value))
    }

    pub fn fail(self, error: TransportError) {
        self.complete(Err(error))
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

/// Future side of [`Completion::oneshot`].
pub struct CompletionFuture<T> {
    rx: oneshot::Receiver<Result<T, TransportError>>,
}

impl<T> CompletionFuture<T> {
    /// Blocks the current thread until the result arrives.
    ///
    /// Fails with [`TransportError::Unsupported`] on a thread inside a tokio
    /// runtime context; await the future there instead.
    pub fn wait(self) -> Result<T, TransportError> {
        ensure_outside_runtime()?;
        self.rx
            .blocking_recv()
            .unwrap_or(Err(TransportError::CompletionDropped))
    }
}

impl<T> Future for CompletionFuture<T> {
    type Output = Result<T, TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TransportError::CompletionDropped)))
    }
}

fn ensure_outside_runtime() -> Result<(), TransportError> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(TransportError::Unsupported {
            stream: "blocking adapter",
            family: "blocking (inside runtime)",
        });
    }
    Ok(())
}

/// Runs a completion-based operation and blocks until it finishes.
///
/// This is the synchronous facade shared by streams whose engine is
/// asynchronous. Inside a runtime context the operation is not started and
/// [`TransportError::Unsupported`] is returned.
pub fn block_on<T: Send + 'static>(
    start: impl FnOnce(Completion<T>),
) -> Result<T, TransportError> {
    ensure_outside_runtime()?;
    let (completion, future) = Completion::oneshot();
    start(completion);
    future.wait()
}
