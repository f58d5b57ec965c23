//! A clonable broadcast bus for fanning events out from one producer to any
//! number of listeners.

use tokio::sync::broadcast;
use tracing::trace;

/// Fan-out channel for events like connection state changes, new block
/// heights, or address status updates.
///
/// - Clone the [`Bus`] to get another handle.
/// - [`publish`] never blocks; with no listeners it is a no-op.
/// - [`subscribe`] only observes events published after the call.
///
/// Built on [`tokio::sync::broadcast`] because publishing must not block the
/// producer (usually the Electrum connection task) and because slow listeners
/// should lag rather than apply backpressure.
///
/// [`publish`]: Self::publish
/// [`subscribe`]: Self::subscribe
pub struct Bus<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> Bus<T> {
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(crate::DEFAULT_CHANNEL_SIZE).0,
        }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: T) {
        // Err just means there are no subscribers right now.
        let _ = self.tx.send(event);
    }

    /// Subscribe to all events published after this point.
    pub fn subscribe(&self) -> BusRx<T> {
        BusRx {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Bus<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Receiving end of a [`Bus`].
pub struct BusRx<T> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> BusRx<T> {
    /// Wait for the next event. Returns `None` once the bus is gone (all
    /// [`Bus`] handles dropped). Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<T> {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Closed) => return None,
                Err(RecvError::Lagged(n)) => {
                    trace!("bus subscriber lagged, skipped {n} events");
                }
            }
        }
    }

    /// Wait for the next event matching `filter`.
    pub async fn recv_filtered(&mut self, filter: impl Fn(&T) -> bool) -> Option<T> {
        loop {
            match self.recv().await {
                Some(event) if filter(&event) => return Some(event),
                Some(_) => continue,
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let bus = Bus::<u32>::new();
        bus.publish(1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_see_later_events_only() {
        let bus = Bus::new();
        bus.publish(1_u32);

        let mut rx = bus.subscribe();
        bus.publish(2);
        bus.publish(3);

        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn recv_returns_none_after_bus_dropped() {
        let bus = Bus::<u32>::new();
        let mut rx = bus.subscribe();
        drop(bus);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn recv_filtered_skips_non_matching() {
        let bus = Bus::new();
        let mut rx = bus.subscribe();
        for x in [1_u32, 2, 3, 4] {
            bus.publish(x);
        }
        assert_eq!(rx.recv_filtered(|x| x % 2 == 0).await, Some(2));
        assert_eq!(rx.recv_filtered(|x| x % 2 == 0).await, Some(4));
    }
}
