//! Resilient message receive pipeline.
//!
//! A single receive loop keeps one broker link open for an address and feeds
//! received messages into a bounded relay. A fixed pool of workers drains the
//! relay and invokes the application's [`MessageHandler`], which settles each
//! message through its [`Envelope`]. Link failures are retried with capped
//! exponential backoff; cancellation drains buffered messages before the link
//! is closed.

pub mod backoff;
pub mod broker;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod memory;
pub mod options;
#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;
pub mod receive_loop;
pub mod relay;
pub mod runner;
pub mod stats;
mod worker_pool;

pub use {
    backoff::Backoff,
    broker::{BrokerClient, ReceiverLink},
    envelope::{Disposition, Envelope},
    error::{BrokerError, Error, Result},
    handler::MessageHandler,
    options::ReceiverOptions,
    receive_loop::ReceiveState,
    relay::{RelayReceiver, RelaySender, bounded_relay},
    runner::PipelineRunner,
    stats::{PipelineStats, PipelineStatsSnapshot},
};
