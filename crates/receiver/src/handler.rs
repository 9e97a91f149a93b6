use std::sync::Arc;

use async_trait::async_trait;

use crate::{broker::ReceiverLink, envelope::Envelope};

/// Application code invoked once per received message.
///
/// The handler decides the message's fate through
/// [`Envelope::acknowledge`]. Returning an error (or panicking) leaves the
/// message unacknowledged unless it was settled before the failure; the
/// broker redelivers it once its link is replaced.
#[async_trait]
pub trait MessageHandler<L: ReceiverLink>: Send + Sync + 'static {
    async fn handle(&self, envelope: &Envelope<L>) -> anyhow::Result<()>;
}

#[async_trait]
impl<L, H> MessageHandler<L> for Arc<H>
where
    L: ReceiverLink,
    H: MessageHandler<L> + ?Sized,
{
    async fn handle(&self, envelope: &Envelope<L>) -> anyhow::Result<()> {
        (**self).handle(envelope).await
    }
}
