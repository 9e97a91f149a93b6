//! Broker capability consumed by the pipeline.
//!
//! The broker protocol itself (connection setup, wire encoding, link
//! semantics) lives behind these traits. The pipeline only needs to open a
//! receiver link, pull messages from it with a timeout, settle them, and
//! close it again.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::error::BrokerError;

/// Opens receiver links against a broker.
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    type Link: ReceiverLink;

    /// Attach a receiver link named `name` to `address`.
    ///
    /// The receive loop drops this future when shutdown is requested while
    /// it is pending. A link the implementation opened before that point is
    /// then never handed out and never closed by the pipeline, so
    /// implementations should only open broker resources in a way that is
    /// released when the future is dropped, or accept that the broker
    /// reclaims them when the connection goes away.
    async fn create_receiver(
        &self,
        name: &str,
        address: &str,
    ) -> Result<Arc<Self::Link>, BrokerError>;
}

/// A conduit from which messages for one address are pulled.
///
/// The receive loop owns the link exclusively; consumers only reach it
/// through [`Envelope::acknowledge`](crate::Envelope::acknowledge), which may
/// run concurrently with [`close`](Self::close).
#[async_trait]
pub trait ReceiverLink: Send + Sync + 'static {
    type Message: Send + Sync + 'static;

    /// Wait up to `timeout` for the next message. `Ok(None)` means the wait
    /// timed out.
    ///
    /// The returned future may be dropped before it completes when shutdown
    /// wins the race against it. Implementations must only hand a message out
    /// when the future resolves, so a dropped receive never loses one.
    async fn receive(&self, timeout: Duration) -> Result<Option<Self::Message>, BrokerError>;

    /// Settle the message as processed. The broker will not redeliver it.
    async fn accept(&self, message: &Self::Message) -> Result<(), BrokerError>;

    /// Settle the message for redelivery, possibly to another consumer.
    async fn redeliver(&self, message: &Self::Message) -> Result<(), BrokerError>;

    /// Detach the link. Unsettled messages are redelivered by the broker.
    ///
    /// Must be idempotent: the pipeline also calls it on links that already
    /// report [`is_closed`](Self::is_closed), since a link the broker shut
    /// down may still hold local resources.
    async fn close(&self) -> Result<(), BrokerError>;

    fn is_closed(&self) -> bool;

    /// Called exactly once per received message, after its handler finished.
    fn release(&self, _message: &Self::Message) {}
}
