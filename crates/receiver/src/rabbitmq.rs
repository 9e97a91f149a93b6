//! RabbitMQ broker client built on `lapin`.
//!
//! A receiver link maps to one AMQP channel consuming a queue:
//!
//! - receiver name → consumer tag
//! - address → queue name
//! - accept → `basic.ack`
//! - redeliver → `basic.nack` with `requeue`
//! - close → channel close, which requeues every unacknowledged delivery

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    futures::StreamExt,
    lapin::{
        Channel, Connection, ConnectionProperties, Consumer,
        acker::Acker,
        options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions},
        types::FieldTable,
    },
    secrecy::{ExposeSecret, Secret},
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{
    broker::{BrokerClient, ReceiverLink},
    error::BrokerError,
};

/// One AMQP delivery.
#[derive(Debug, Clone)]
pub struct RabbitMqMessage {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub body: Bytes,
    /// Set by the broker when this delivery was requeued at least once.
    pub redelivered: bool,
    acker: Acker,
}

/// Broker client holding one AMQP connection.
pub struct RabbitMqClient {
    connection: Connection,
    prefetch: u16,
}

impl RabbitMqClient {
    /// Connect to the broker at `uri`. A non-zero `prefetch` caps the number
    /// of unacknowledged deliveries per link.
    pub async fn connect(uri: &Secret<String>, prefetch: u16) -> Result<Self, BrokerError> {
        let connection = Connection::connect(uri.expose_secret(), ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::new("connect", e))?;
        info!(prefetch, "connected to rabbitmq");
        Ok(Self {
            connection,
            prefetch,
        })
    }

    async fn consume(
        &self,
        channel: &Channel,
        name: &str,
        address: &str,
    ) -> Result<Consumer, BrokerError> {
        if self.prefetch > 0 {
            channel
                .basic_qos(self.prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| BrokerError::new("basic.qos", e))?;
        }
        channel
            .basic_consume(
                address,
                name,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::new("basic.consume", e))
    }
}

#[async_trait]
impl BrokerClient for RabbitMqClient {
    type Link = RabbitMqLink;

    async fn create_receiver(
        &self,
        name: &str,
        address: &str,
    ) -> Result<Arc<RabbitMqLink>, BrokerError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::new("create channel", e))?;
        let consumer = match self.consume(&channel, name, address).await {
            Ok(consumer) => consumer,
            Err(err) => {
                if let Err(e) = channel.close(200, "consumer setup failed").await {
                    warn!(error = %e, "failed to close channel after consumer setup failed");
                }
                return Err(err);
            },
        };
        debug!(receiver = name, queue = address, "rabbitmq consumer attached");
        Ok(Arc::new(RabbitMqLink {
            channel,
            consumer: Mutex::new(consumer),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Consumer on a dedicated AMQP channel.
///
/// `closed` is set only by [`close`](ReceiverLink::close); a channel the
/// broker shut down reports closed through its status.
pub struct RabbitMqLink {
    channel: Channel,
    consumer: Mutex<Consumer>,
    closed: AtomicBool,
}

#[async_trait]
impl ReceiverLink for RabbitMqLink {
    type Message = RabbitMqMessage;

    async fn receive(&self, timeout: Duration) -> Result<Option<RabbitMqMessage>, BrokerError> {
        let mut consumer = self.consumer.lock().await;
        let next = match tokio::time::timeout(timeout, consumer.next()).await {
            Ok(next) => next,
            Err(_) => return Ok(None),
        };
        match next {
            Some(Ok(delivery)) => Ok(Some(RabbitMqMessage {
                delivery_tag: delivery.delivery_tag,
                routing_key: delivery.routing_key.as_str().to_string(),
                body: Bytes::from(delivery.data),
                redelivered: delivery.redelivered,
                acker: delivery.acker,
            })),
            // The channel may still be open; the receive loop closes the link
            // so unacked deliveries are requeued right away.
            Some(Err(e)) => Err(BrokerError::new("receive", e)),
            None => Err(BrokerError::message("receive", "consumer cancelled by broker")),
        }
    }

    async fn accept(&self, message: &RabbitMqMessage) -> Result<(), BrokerError> {
        message
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map(drop)
            .map_err(|e| BrokerError::new("basic.ack", e))
    }

    async fn redeliver(&self, message: &RabbitMqMessage) -> Result<(), BrokerError> {
        message
            .acker
            .nack(BasicNackOptions {
                requeue: true,
                ..BasicNackOptions::default()
            })
            .await
            .map(drop)
            .map_err(|e| BrokerError::new("basic.nack", e))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::Release);
        if !self.channel.status().connected() {
            return Ok(());
        }
        self.channel
            .close(200, "receiver closed")
            .await
            .map_err(|e| BrokerError::new("channel close", e))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || !self.channel.status().connected()
    }
}
