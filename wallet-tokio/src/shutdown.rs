//! At-most-once shutdown signal.

use std::sync::Arc;

use tokio::sync::Semaphore;

/// Broadcast a single signal (usually "shut down") to any number of tasks.
///
/// - Clone to get another handle; every handle observes the signal at most
///   once, and handles cloned *after* the signal still observe it.
/// - Sending more than once is harmless.
///
/// Implementation rides on [`Semaphore::close`]: waiting on `acquire` with
/// zero permits only completes once the semaphore is closed, so closing is
/// sending and an [`AcquireError`] is receiving.
///
/// [`AcquireError`]: tokio::sync::AcquireError
#[derive(Debug)]
pub struct ShutdownSignal {
    sem: Arc<Semaphore>,
    seen: bool,
}

impl ShutdownSignal {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            sem: Arc::new(Semaphore::new(0)),
            seen: false,
        }
    }

    /// Fire the signal. All pending and future [`recv`](Self::recv) calls
    /// (one per handle) complete.
    pub fn send(&self) {
        self.sem.close();
    }

    /// Wait for the signal. If this handle has already observed it, the
    /// future never completes; tasks should fall out of their select loop the
    /// first time.
    pub async fn recv(&mut self) {
        if self.seen {
            std::future::pending::<()>().await;
        }
        let acquired = self.sem.acquire().await;
        debug_assert!(acquired.is_err(), "shutdown semaphore has no permits");
        self.seen = true;
    }

    /// Owned variant of [`recv`](Self::recv) for `'static` futures.
    pub async fn recv_owned(mut self) {
        self.recv().await
    }

    /// Whether the signal has fired, without consuming this handle's
    /// observation.
    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.sem.is_closed()
    }
}

impl Clone for ShutdownSignal {
    fn clone(&self) -> Self {
        Self {
            sem: self.sem.clone(),
            // A fresh handle gets its own chance to observe the signal.
            seen: false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn multiple_sends_are_fine() {
        let shutdown = ShutdownSignal::new();
        shutdown.send();
        shutdown.send();
        assert!(shutdown.is_sent());
    }

    #[test]
    fn each_handle_observes_once() {
        let shutdown = ShutdownSignal::new();
        let mut handle = shutdown.clone();

        let mut recv1 = tokio_test::task::spawn(handle.recv());
        tokio_test::assert_pending!(recv1.poll());
        shutdown.send();
        assert!(recv1.is_woken());
        tokio_test::assert_ready!(recv1.poll());
        drop(recv1);

        // Same handle again: never completes.
        let mut recv2 = tokio_test::task::spawn(handle.recv());
        tokio_test::assert_pending!(recv2.poll());
        drop(recv2);

        // A new clone still sees the signal.
        let mut late = shutdown.clone();
        let mut recv3 = tokio_test::task::spawn(late.recv());
        tokio_test::assert_ready!(recv3.poll());
    }
}
