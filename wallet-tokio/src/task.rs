//! Named task handles.

use std::{
    borrow::Cow,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, Instrument};

/// A thin wrapper around [`tokio::task::JoinHandle`] that
///
/// 1. carries a task name for debuggability,
/// 2. propagates panics to the joiner instead of swallowing them, and
/// 3. is `#[must_use]`, so spawned tasks are either joined or explicitly
///    [`detach`]ed.
///
/// Joining every spawned task keeps control flow structured and makes sure a
/// panicking background task takes the program down with a useful message
/// instead of dying silently.
///
/// [`detach`]: NamedTask::detach
#[must_use]
pub struct NamedTask<T> {
    handle: JoinHandle<T>,
    name: Cow<'static, str>,
}

impl<T> NamedTask<T> {
    /// Spawn a named task. The current [`tracing`] span propagates into the
    /// task.
    pub fn spawn<F>(name: impl Into<Cow<'static, str>>, future: F) -> NamedTask<F::Output>
    where
        F: Future<Output = T> + Send + 'static,
        F::Output: Send + 'static,
    {
        let name = name.into();
        debug!("spawning task: {name}");
        let span = tracing::Span::current();
        NamedTask {
            handle: tokio::spawn(future.instrument(span)),
            name,
        }
    }

    /// Drop the handle, letting the task run to completion in the background.
    /// Use sparingly; a detached task can no longer report panics.
    pub fn detach(self) {
        drop(self.handle);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl<T> Future for NamedTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(result) => result,
            Poll::Pending => return Poll::Pending,
        };

        let result = match result {
            Ok(value) => Ok(value),
            Err(join_err) => match join_err.try_into_panic() {
                Ok(panic_reason) => {
                    error!("task '{name}' panicked", name = self.name());
                    std::panic::resume_unwind(panic_reason)
                }
                Err(join_err) => Err(join_err),
            },
        };

        Poll::Ready(result)
    }
}
