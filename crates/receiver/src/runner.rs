use std::sync::Arc;

use {
    inlet_config::ReceiverConfig,
    tokio::sync::watch,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use crate::{
    broker::BrokerClient,
    error::Result,
    handler::MessageHandler,
    options::ReceiverOptions,
    receive_loop::{ReceiveLoop, ReceiveState, close_link},
    relay::bounded_relay,
    stats::{PipelineStats, PipelineStatsSnapshot},
    worker_pool::WorkerPool,
};

/// Owns a broker client and runs the receive pipeline for one address.
///
/// One task keeps a link open and pushes every message into a relay bounded
/// by `max_concurrency`; that many workers drain it and invoke the handler.
/// When the cancellation token fires the producer stops, the workers finish
/// whatever is buffered, and only then is the link closed, so handlers can
/// still settle in-flight messages during shutdown.
pub struct PipelineRunner<B: BrokerClient> {
    client: Arc<B>,
    config: ReceiverConfig,
    state: watch::Sender<ReceiveState>,
    stats: Arc<PipelineStats>,
}

impl<B: BrokerClient> PipelineRunner<B> {
    pub fn new(client: Arc<B>, config: ReceiverConfig) -> Self {
        let (state, _) = watch::channel(ReceiveState::Connecting);
        Self {
            client,
            config,
            state,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Subscribe to receive-loop state transitions.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ReceiveState> {
        self.state.subscribe()
    }

    /// Live counters of the current run. The handle stays valid across
    /// runs; each run starts from zero.
    #[must_use]
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Run the pipeline until `cancel` fires and every buffered message has
    /// been handled.
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) before
    /// touching the broker when the receiver settings are invalid. Broker
    /// failures are retried internally and never surface here.
    pub async fn run<H>(&self, handler: H, cancel: CancellationToken) -> Result<PipelineStatsSnapshot>
    where
        H: MessageHandler<B::Link>,
    {
        let options = ReceiverOptions::from_config(&self.config)?;
        self.stats.reset();
        info!(
            receiver = %options.name,
            address = %options.address,
            max_concurrency = options.max_concurrency.get(),
            "starting receive pipeline"
        );

        let (relay_tx, relay_rx) = bounded_relay(options.max_concurrency);
        let workers = WorkerPool::spawn(
            options.max_concurrency,
            relay_rx,
            Arc::new(handler),
            Arc::clone(&self.stats),
        );

        let receive_loop = ReceiveLoop::new(
            Arc::clone(&self.client),
            options,
            relay_tx,
            cancel,
            self.state.clone(),
            Arc::clone(&self.stats),
        );
        let open_link = receive_loop.run().await;

        workers.join().await;
        if let Some(link) = open_link {
            close_link(link.as_ref()).await;
        }

        let snapshot = self.stats.snapshot();
        info!(
            received = snapshot.received,
            handled = snapshot.handled,
            handler_failures = snapshot.handler_failures,
            links_opened = snapshot.links_opened,
            peak_relay_depth = snapshot.peak_relay_depth,
            "receive pipeline stopped"
        );
        Ok(snapshot)
    }
}
