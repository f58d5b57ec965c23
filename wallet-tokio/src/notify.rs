//! Edge-triggered wake-up channel.
//!
//! Wraps a capacity-1 [`tokio::sync::mpsc`] so that any number of `send`s
//! before the receiver gets around to `recv` collapse into a single wake-up.
//! Used to nudge background tasks (persisters, rebuilders) that only care
//! that *something* changed, not how many times.

use tokio::sync::mpsc;

/// Create a wake-up channel. The [`Sender`] is clonable.
pub fn channel() -> (Sender, Receiver) {
    let (tx, rx) = mpsc::channel(1);
    (Sender(tx), Receiver(rx))
}

#[derive(Clone)]
pub struct Sender(mpsc::Sender<()>);

pub struct Receiver(mpsc::Receiver<()>);

impl Sender {
    /// Wake the receiver. Coalesces with any not-yet-consumed wake-up.
    pub fn send(&self) {
        let _ = self.0.try_send(());
    }
}

impl Receiver {
    /// Wait for a wake-up. Completes immediately if one is already pending.
    /// If every [`Sender`] has been dropped this future never completes.
    pub async fn recv(&mut self) {
        match self.0.recv().await {
            Some(()) => (),
            None => std::future::pending().await,
        }
    }

    /// Returns whether a wake-up was pending, consuming it.
    #[must_use]
    pub fn try_recv(&mut self) -> bool {
        self.0.try_recv().is_ok()
    }
}
