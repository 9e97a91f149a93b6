//! Consumers draining the relay.
//!
//! Each worker loops over dequeue → handle → release until the relay signals
//! end-of-sequence. Handler errors and panics are captured per invocation so
//! one bad message never stops a worker, and the envelope is released on
//! every path once the handler is done with it.

use std::{any::Any, num::NonZeroUsize, panic::AssertUnwindSafe, sync::Arc};

use {
    futures::FutureExt,
    tokio::task::JoinHandle,
    tracing::{debug, error, info},
};

#[cfg(feature = "metrics")]
use inlet_metrics::{counter, histogram, receiver as receiver_metrics};

use crate::{
    broker::ReceiverLink,
    envelope::Envelope,
    error::Error,
    handler::MessageHandler,
    relay::RelayReceiver,
    stats::PipelineStats,
};

pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers sharing `relay` and `handler`.
    pub(crate) fn spawn<L, H>(
        count: NonZeroUsize,
        relay: RelayReceiver<Envelope<L>>,
        handler: Arc<H>,
        stats: Arc<PipelineStats>,
    ) -> Self
    where
        L: ReceiverLink,
        H: MessageHandler<L>,
    {
        let handles = (0..count.get())
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    relay.clone(),
                    Arc::clone(&handler),
                    Arc::clone(&stats),
                ))
            })
            .collect();
        info!(worker_count = count.get(), "message workers spawned");
        Self { handles }
    }

    /// Wait for every worker to finish draining the relay.
    pub(crate) async fn join(self) {
        for (worker_id, handle) in self.handles.into_iter().enumerate() {
            if let Err(join_error) = handle.await {
                error!(worker_id, error = %join_error, "message worker task failed");
            }
        }
        info!("all message workers stopped");
    }
}

async fn run_worker<L, H>(
    worker_id: usize,
    relay: RelayReceiver<Envelope<L>>,
    handler: Arc<H>,
    stats: Arc<PipelineStats>,
) where
    L: ReceiverLink,
    H: MessageHandler<L>,
{
    debug!(worker_id, "message worker starting");

    while let Some(envelope) = relay.dequeue().await {
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let outcome = AssertUnwindSafe(handler.handle(&envelope))
            .catch_unwind()
            .await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(source)) => Some(Error::handler(source)),
            Err(panic) => Some(Error::HandlerPanicked {
                message: panic_message(panic.as_ref()),
            }),
        };

        if let Some(ref err) = failure {
            error!(worker_id, error = %err, "failed to process message");
        }
        stats.message_handled(failure.is_some());

        #[cfg(feature = "metrics")]
        {
            histogram!(receiver_metrics::HANDLER_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            counter!(receiver_metrics::MESSAGES_HANDLED_TOTAL).increment(1);
            if failure.is_some() {
                counter!(receiver_metrics::HANDLER_ERRORS_TOTAL).increment(1);
            }
        }

        envelope.release();
    }

    debug!(worker_id, "message worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
