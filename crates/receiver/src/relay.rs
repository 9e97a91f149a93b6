//! Fixed-capacity hand-off between the receive loop and the worker pool.
//!
//! One producer, any number of consumers. A full relay suspends the producer
//! until a consumer takes an item; nothing is ever dropped to make room.
//! Closing the relay lets consumers drain what is buffered and then observe
//! end-of-sequence as `None`.

use std::{num::NonZeroUsize, sync::Arc};

use {
    tokio::sync::{
        Mutex,
        mpsc::{self, error::TrySendError},
    },
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::error::{Error, Result};

/// Create a relay holding at most `capacity` items.
#[must_use]
pub fn bounded_relay<T>(capacity: NonZeroUsize) -> (RelaySender<T>, RelayReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.get());
    (
        RelaySender {
            tx: Some(tx),
            capacity: capacity.get(),
        },
        RelayReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producer side of the relay.
pub struct RelaySender<T> {
    tx: Option<mpsc::Sender<T>>,
    capacity: usize,
}

impl<T> RelaySender<T> {
    /// Store `item`, waiting for space if the relay is full.
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires while waiting; the item
    /// is dropped in that case. Enqueueing after [`close`](Self::close)
    /// returns [`Error::RelayClosed`].
    pub async fn enqueue(&self, item: T, cancel: &CancellationToken) -> Result<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(Error::RelayClosed);
        };

        let item = match tx.try_send(item) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(item)) => item,
            Err(TrySendError::Closed(_)) => return Err(Error::RelayClosed),
        };

        debug!(capacity = self.capacity, "relay full, waiting for a consumer");
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            sent = tx.send(item) => sent.map_err(|_| Error::RelayClosed),
        }
    }

    /// Stop accepting items. Idempotent.
    pub fn close(&mut self) {
        if self.tx.take().is_some() {
            debug!("relay closed");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Items currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Consumer side of the relay. Clone it once per consumer.
pub struct RelayReceiver<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for RelayReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T> RelayReceiver<T> {
    /// Next item in FIFO order, or `None` once the relay is closed and
    /// drained.
    pub async fn dequeue(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{collections::HashSet, time::Duration};

    use {super::*, tokio::time::Instant};

    fn capacity(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn delivers_in_enqueue_order() {
        let cancel = CancellationToken::new();
        let (mut tx, rx) = bounded_relay(capacity(4));
        for i in 0..4 {
            tx.enqueue(i, &cancel).await.unwrap();
        }
        assert_eq!(tx.len(), 4);
        tx.close();

        let mut seen = Vec::new();
        while let Some(item) = rx.dequeue().await {
            seen.push(item);
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn full_relay_stalls_producer_until_dequeue() {
        let cancel = CancellationToken::new();
        let (tx, rx) = bounded_relay(capacity(1));
        tx.enqueue(1, &cancel).await.unwrap();

        let consumer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let first = rx.dequeue().await;
            (first, Instant::now(), rx)
        });

        let started = Instant::now();
        tx.enqueue(2, &cancel).await.unwrap();
        let unblocked_at = Instant::now();

        let (first, dequeued_at, rx) = consumer.await.unwrap();
        assert_eq!(first, Some(1));
        assert_eq!(unblocked_at - started, Duration::from_secs(5));
        assert_eq!(unblocked_at, dequeued_at);
        assert_eq!(rx.dequeue().await, Some(2));
    }

    #[tokio::test]
    async fn close_drains_then_signals_end() {
        let cancel = CancellationToken::new();
        let (mut tx, rx) = bounded_relay(capacity(2));
        tx.enqueue("a", &cancel).await.unwrap();
        tx.close();
        tx.close();

        assert_eq!(rx.dequeue().await, Some("a"));
        assert_eq!(rx.dequeue().await, None);
        assert_eq!(rx.dequeue().await, None);
    }

    #[tokio::test]
    async fn enqueue_after_close_is_rejected() {
        let cancel = CancellationToken::new();
        let (mut tx, _rx) = bounded_relay::<u32>(capacity(1));
        tx.close();
        assert!(tx.is_closed());
        assert!(matches!(
            tx.enqueue(1, &cancel).await,
            Err(Error::RelayClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_blocked_enqueue() {
        let cancel = CancellationToken::new();
        let (tx, rx) = bounded_relay(capacity(1));
        tx.enqueue(1, &cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        assert!(matches!(tx.enqueue(2, &cancel).await, Err(Error::Cancelled)));
        assert_eq!(rx.dequeue().await, Some(1));
        assert_eq!(tx.len(), 0);
    }

    #[tokio::test]
    async fn each_item_reaches_exactly_one_consumer() {
        let cancel = CancellationToken::new();
        let (mut tx, rx) = bounded_relay(capacity(3));

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    let mut got = Vec::new();
                    while let Some(item) = rx.dequeue().await {
                        got.push(item);
                        tokio::task::yield_now().await;
                    }
                    got
                })
            })
            .collect();

        for i in 0..100 {
            tx.enqueue(i, &cancel).await.unwrap();
        }
        tx.close();

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        assert_eq!(all.len(), 100);
        assert_eq!(all.iter().copied().collect::<HashSet<_>>().len(), 100);
    }
}
