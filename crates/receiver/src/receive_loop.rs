//! Producer side of the pipeline: keeps a receiver link open and feeds the
//! relay, reconnecting with exponential backoff when the link fails.
//!
//! ```text
//!             ok                     message / idle timeout
//! Connecting ────▶ Receiving ◀──────────────────────┐
//!     ▲    │           │  └─────────────────────────┘
//!     │    │ error     │ error (link closed)
//!     │    ▼           ▼
//!     └── BackingOff ◀─┘
//!
//! any state ── cancellation ──▶ Stopped (relay closed)
//! ```
//!
//! The receive primitive has no native cancellation, so each wait races the
//! receive against the cancellation token and drops whichever loses. Links
//! must therefore only hand out a message when their receive future
//! completes.

use std::{sync::Arc, time::Duration};

use {
    tokio::sync::watch,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, trace, warn},
};

#[cfg(feature = "metrics")]
use inlet_metrics::{counter, gauge, receiver as receiver_metrics};

use crate::{
    backoff::Backoff,
    broker::{BrokerClient, ReceiverLink},
    envelope::Envelope,
    error::Error,
    options::ReceiverOptions,
    relay::RelaySender,
    stats::PipelineStats,
};

/// Observable state of the receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    Connecting,
    Receiving,
    BackingOff { delay: Duration },
    Stopped,
}

enum Step<L> {
    Connecting,
    Receiving(Arc<L>),
    BackingOff(Error),
    Stopped(Option<Arc<L>>),
}

pub(crate) struct ReceiveLoop<B: BrokerClient> {
    client: Arc<B>,
    options: ReceiverOptions,
    relay: RelaySender<Envelope<B::Link>>,
    backoff: Backoff,
    cancel: CancellationToken,
    state: watch::Sender<ReceiveState>,
    stats: Arc<PipelineStats>,
}

impl<B: BrokerClient> ReceiveLoop<B> {
    pub(crate) fn new(
        client: Arc<B>,
        options: ReceiverOptions,
        relay: RelaySender<Envelope<B::Link>>,
        cancel: CancellationToken,
        state: watch::Sender<ReceiveState>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let backoff = options.backoff();
        Self {
            client,
            options,
            relay,
            backoff,
            cancel,
            state,
            stats,
        }
    }

    /// Run until cancelled. Closes the relay on exit and hands back the link
    /// that was open at that moment, if any, so the caller can close it once
    /// buffered messages have been settled.
    pub(crate) async fn run(mut self) -> Option<Arc<B::Link>> {
        info!(
            receiver = %self.options.name,
            address = %self.options.address,
            "starting message receive loop"
        );

        let mut step = Step::Connecting;
        loop {
            step = match step {
                Step::Connecting => self.connect().await,
                Step::Receiving(link) => self.receive(link).await,
                Step::BackingOff(err) => self.back_off(err).await,
                Step::Stopped(link) => {
                    self.relay.close();
                    self.state.send_replace(ReceiveState::Stopped);
                    info!(receiver = %self.options.name, "message receive loop stopped");
                    return link;
                },
            };
        }
    }

    async fn connect(&mut self) -> Step<B::Link> {
        self.state.send_replace(ReceiveState::Connecting);
        let created = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Step::Stopped(None),
            created = self.client.create_receiver(&self.options.name, &self.options.address) => created,
        };

        match created {
            Ok(link) => {
                self.backoff.reset();
                self.stats.link_opened();
                self.state.send_replace(ReceiveState::Receiving);
                info!(
                    receiver = %self.options.name,
                    address = %self.options.address,
                    "receiver link established"
                );
                Step::Receiving(link)
            },
            Err(source) => {
                self.stats.connect_failed();
                #[cfg(feature = "metrics")]
                counter!(receiver_metrics::CONNECT_FAILURES_TOTAL).increment(1);
                Step::BackingOff(Error::connection(
                    self.options.name.clone(),
                    self.options.address.clone(),
                    source,
                ))
            },
        }
    }

    async fn receive(&mut self, link: Arc<B::Link>) -> Step<B::Link> {
        let received = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                warn!(receiver = %self.options.name, "message receiving was cancelled");
                return Step::Stopped(Some(link));
            },
            received = link.receive(self.options.receive_timeout) => received,
        };

        match received {
            Ok(Some(message)) => {
                let envelope = Envelope::new(message, Arc::clone(&link));
                match self.relay.enqueue(envelope, &self.cancel).await {
                    Ok(()) => {
                        let depth = self.relay.len();
                        self.stats.message_received();
                        self.stats.relay_depth(depth);
                        #[cfg(feature = "metrics")]
                        {
                            counter!(receiver_metrics::MESSAGES_RECEIVED_TOTAL).increment(1);
                            gauge!(receiver_metrics::RELAY_DEPTH).set(depth as f64);
                        }
                        debug!(depth, "message enqueued");
                        Step::Receiving(link)
                    },
                    Err(Error::Cancelled) => {
                        debug!("cancelled while waiting for relay space, message left for redelivery");
                        Step::Stopped(Some(link))
                    },
                    Err(err) => {
                        error!(error = %err, "cannot hand message to workers");
                        Step::Stopped(Some(link))
                    },
                }
            },
            Ok(None) => {
                trace!(
                    receiver = %self.options.name,
                    pause_ms = duration_ms(self.options.idle_pause),
                    "no messages received, pausing"
                );
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => Step::Stopped(Some(link)),
                    () = tokio::time::sleep(self.options.idle_pause) => Step::Receiving(link),
                }
            },
            Err(source) => {
                self.stats.link_failed();
                #[cfg(feature = "metrics")]
                counter!(receiver_metrics::LINK_FAILURES_TOTAL).increment(1);
                close_link(link.as_ref()).await;
                Step::BackingOff(Error::link(source))
            },
        }
    }

    async fn back_off(&mut self, err: Error) -> Step<B::Link> {
        let delay = self.backoff.next_delay();
        error!(
            receiver = %self.options.name,
            address = %self.options.address,
            error = %err,
            delay_ms = duration_ms(delay),
            "error in message receive loop, retrying after delay"
        );
        self.state.send_replace(ReceiveState::BackingOff { delay });
        #[cfg(feature = "metrics")]
        gauge!(receiver_metrics::BACKOFF_DELAY_SECONDS).set(delay.as_secs_f64());

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Step::Stopped(None),
            () = tokio::time::sleep(delay) => Step::Connecting,
        }
    }
}

/// Close `link`, logging and swallowing any failure.
///
/// Always calls [`ReceiverLink::close`], even when the link already reports
/// closed: a link the broker dropped may still hold a local channel.
pub(crate) async fn close_link<L: ReceiverLink>(link: &L) {
    match link.close().await {
        Ok(()) => debug!("receiver link closed"),
        Err(source) => warn!(error = %Error::close(source), "failed to close receiver"),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
