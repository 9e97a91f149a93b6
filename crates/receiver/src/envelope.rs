//! Received message plus the capability to settle it.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use tracing::trace;

#[cfg(feature = "metrics")]
use inlet_metrics::{counter, labels, receiver as receiver_metrics};

use crate::{
    broker::ReceiverLink,
    error::{Error, Result},
};

const PENDING: u8 = 0;
const SETTLING: u8 = 1;
const ACCEPTED: u8 = 2;
const REDELIVERED: u8 = 3;

/// Final outcome recorded on an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    Redelivered,
}

/// One received message and the link it arrived on.
///
/// The link is shared, not owned: it outlives any single envelope. The
/// message resource is released when the envelope is dropped, which the
/// worker pool does only after the handler has returned.
pub struct Envelope<L: ReceiverLink> {
    message: L::Message,
    link: Arc<L>,
    state: AtomicU8,
}

impl<L: ReceiverLink> Envelope<L> {
    pub(crate) fn new(message: L::Message, link: Arc<L>) -> Self {
        Self {
            message,
            link,
            state: AtomicU8::new(PENDING),
        }
    }

    #[must_use]
    pub fn message(&self) -> &L::Message {
        &self.message
    }

    /// Settle the message: `accept = true` marks it processed, `false` asks
    /// the broker to redeliver it.
    ///
    /// Fails with [`Error::LinkClosed`] without contacting the broker when
    /// the link has already been closed; the broker will redeliver the
    /// message on its own once the link is replaced. A close racing with the
    /// call is reported the same way. Only the first successful call takes
    /// effect; later ones fail with [`Error::AlreadyAcknowledged`].
    pub async fn acknowledge(&self, accept: bool) -> Result<()> {
        if self.link.is_closed() {
            return Err(Error::LinkClosed);
        }
        if self
            .state
            .compare_exchange(PENDING, SETTLING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyAcknowledged);
        }

        let result = if accept {
            self.link.accept(&self.message).await
        } else {
            self.link.redeliver(&self.message).await
        };

        match result {
            Ok(()) => {
                let settled = if accept {
                    ACCEPTED
                } else {
                    REDELIVERED
                };
                self.state.store(settled, Ordering::Release);
                #[cfg(feature = "metrics")]
                {
                    let outcome = if accept {
                        "accept"
                    } else {
                        "redeliver"
                    };
                    counter!(receiver_metrics::ACKNOWLEDGEMENTS_TOTAL, labels::OUTCOME => outcome)
                        .increment(1);
                }
                Ok(())
            },
            Err(source) => {
                self.state.store(PENDING, Ordering::Release);
                if self.link.is_closed() {
                    Err(Error::LinkClosed)
                } else {
                    Err(Error::Acknowledge { source })
                }
            },
        }
    }

    pub async fn accept(&self) -> Result<()> {
        self.acknowledge(true).await
    }

    pub async fn redeliver(&self) -> Result<()> {
        self.acknowledge(false).await
    }

    #[must_use]
    pub fn disposition(&self) -> Option<Disposition> {
        match self.state.load(Ordering::Acquire) {
            ACCEPTED => Some(Disposition::Accepted),
            REDELIVERED => Some(Disposition::Redelivered),
            _ => None,
        }
    }

    /// Release the underlying message resource.
    pub fn release(self) {
        drop(self);
    }
}

impl<L: ReceiverLink> Drop for Envelope<L> {
    fn drop(&mut self) {
        trace!(disposition = ?self.disposition(), "releasing message");
        self.link.release(&self.message);
    }
}

impl<L: ReceiverLink> fmt::Debug for Envelope<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("disposition", &self.disposition())
            .field("link_closed", &self.link.is_closed())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        broker::BrokerClient,
        memory::{MemoryBroker, MemoryLink},
    };

    async fn receive_one(broker: &MemoryBroker) -> Envelope<MemoryLink> {
        let link = broker.create_receiver("r", "orders").await.unwrap();
        let message = link
            .receive(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        Envelope::new(message, link)
    }

    #[tokio::test]
    async fn accept_settles_on_the_link() {
        let broker = MemoryBroker::new();
        let id = broker.publish("orders", "payload");
        let envelope = receive_one(&broker).await;

        envelope.acknowledge(true).await.unwrap();
        assert_eq!(envelope.disposition(), Some(Disposition::Accepted));
        assert_eq!(broker.accepted(), vec![id]);
    }

    #[tokio::test]
    async fn redeliver_returns_message_to_queue() {
        let broker = MemoryBroker::new();
        let id = broker.publish("orders", "payload");
        let envelope = receive_one(&broker).await;

        envelope.acknowledge(false).await.unwrap();
        assert_eq!(envelope.disposition(), Some(Disposition::Redelivered));
        assert_eq!(broker.redelivered(), vec![id]);
        assert_eq!(broker.pending("orders"), 1);
    }

    #[tokio::test]
    async fn acknowledge_on_closed_link_makes_no_broker_call() {
        let broker = MemoryBroker::new();
        broker.publish("orders", "payload");
        let envelope = receive_one(&broker).await;
        envelope.link.close().await.unwrap();

        let err = envelope.acknowledge(true).await.unwrap_err();
        assert!(matches!(err, Error::LinkClosed));
        assert_eq!(broker.disposition_calls(), 0);
        assert_eq!(envelope.disposition(), None);
        // The close already handed the message back to the broker.
        assert_eq!(broker.pending("orders"), 1);
    }

    #[tokio::test]
    async fn second_acknowledge_is_rejected() {
        let broker = MemoryBroker::new();
        broker.publish("orders", "payload");
        let envelope = receive_one(&broker).await;

        envelope.accept().await.unwrap();
        let err = envelope.redeliver().await.unwrap_err();
        assert!(matches!(err, Error::AlreadyAcknowledged));
        assert_eq!(envelope.disposition(), Some(Disposition::Accepted));
        assert_eq!(broker.disposition_calls(), 1);
    }

    #[tokio::test]
    async fn release_happens_exactly_once() {
        let broker = MemoryBroker::new();
        let id = broker.publish("orders", "payload");
        let envelope = receive_one(&broker).await;

        assert!(broker.released().is_empty());
        envelope.release();
        assert_eq!(broker.released(), vec![id]);
    }
}
