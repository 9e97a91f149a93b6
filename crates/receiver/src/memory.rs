//! In-memory broker for tests and local simulation.
//!
//! Behaves like a queueing broker with per-address FIFO queues. Messages
//! handed to a link stay in flight until they are accepted or redelivered;
//! closing the link returns every unsettled message to the front of its
//! queue, so nothing is lost when a link is replaced.
//!
//! Failures can be scripted (`fail_next_connects`, `fail_next_receives`,
//! `fail_next_closes`) to drive the receive loop through its recovery path.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    tokio::{sync::Notify, time::Instant},
    tracing::debug,
};

use crate::{
    broker::{BrokerClient, ReceiverLink},
    error::BrokerError,
};

/// A message held by the in-memory broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMessage {
    pub id: u64,
    pub address: String,
    pub body: Bytes,
    /// Number of times the message has been handed to a link.
    pub delivery_count: u32,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<MemoryMessage>>,
    next_id: u64,
    connect_failures: u32,
    receive_failures: u32,
    close_failures: u32,
    connect_attempts: Vec<Instant>,
    links_opened: u64,
    disposition_calls: u64,
    accepted: Vec<u64>,
    redelivered: Vec<u64>,
    released: Vec<u64>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cloneable handle to an in-memory broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the queue for `address` and return its id.
    pub fn publish(&self, address: &str, body: impl Into<Bytes>) -> u64 {
        let id = {
            let mut state = self.shared.lock();
            state.next_id += 1;
            let id = state.next_id;
            state
                .queues
                .entry(address.to_string())
                .or_default()
                .push_back(MemoryMessage {
                    id,
                    address: address.to_string(),
                    body: body.into(),
                    delivery_count: 0,
                });
            id
        };
        self.shared.notify.notify_waiters();
        id
    }

    /// Make the next `count` receiver creations fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.shared.lock().connect_failures = count;
    }

    /// Make the next `count` receive calls fail with a link error.
    pub fn fail_next_receives(&self, count: u32) {
        self.shared.lock().receive_failures = count;
        self.shared.notify.notify_waiters();
    }

    /// Make the next `count` link closes report an error. The link is still
    /// detached.
    pub fn fail_next_closes(&self, count: u32) {
        self.shared.lock().close_failures = count;
    }

    /// Messages waiting in the queue for `address`, excluding in-flight ones.
    #[must_use]
    pub fn pending(&self, address: &str) -> usize {
        self.shared
            .lock()
            .queues
            .get(address)
            .map_or(0, VecDeque::len)
    }

    /// Instants at which receiver creation was attempted.
    #[must_use]
    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.shared.lock().connect_attempts.clone()
    }

    #[must_use]
    pub fn links_opened(&self) -> u64 {
        self.shared.lock().links_opened
    }

    /// Number of accept/redeliver calls that reached the broker, successful
    /// or not.
    #[must_use]
    pub fn disposition_calls(&self) -> u64 {
        self.shared.lock().disposition_calls
    }

    #[must_use]
    pub fn accepted(&self) -> Vec<u64> {
        self.shared.lock().accepted.clone()
    }

    #[must_use]
    pub fn redelivered(&self) -> Vec<u64> {
        self.shared.lock().redelivered.clone()
    }

    #[must_use]
    pub fn released(&self) -> Vec<u64> {
        self.shared.lock().released.clone()
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    type Link = MemoryLink;

    async fn create_receiver(
        &self,
        name: &str,
        address: &str,
    ) -> Result<Arc<MemoryLink>, BrokerError> {
        let mut state = self.shared.lock();
        state.connect_attempts.push(Instant::now());
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(BrokerError::message("attach", "broker unavailable"));
        }
        state.links_opened += 1;
        debug!(receiver = name, address, "memory link attached");
        Ok(Arc::new(MemoryLink {
            shared: Arc::clone(&self.shared),
            name: name.to_string(),
            address: address.to_string(),
            closed: AtomicBool::new(false),
            in_flight: Mutex::new(HashMap::new()),
        }))
    }
}

/// Receiver link handed out by [`MemoryBroker`].
pub struct MemoryLink {
    shared: Arc<Shared>,
    name: String,
    address: String,
    closed: AtomicBool,
    in_flight: Mutex<HashMap<u64, MemoryMessage>>,
}

impl MemoryLink {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    fn take_in_flight(&self, id: u64) -> Option<MemoryMessage> {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
    }

    fn settle(&self, message: &MemoryMessage, requeue: bool) -> Result<(), BrokerError> {
        let op = if requeue {
            "redeliver"
        } else {
            "accept"
        };
        self.shared.lock().disposition_calls += 1;
        if self.is_closed() {
            return Err(BrokerError::message(op, "link detached"));
        }
        let Some(settled) = self.take_in_flight(message.id) else {
            return Err(BrokerError::message(
                op,
                format!("unknown delivery {}", message.id),
            ));
        };
        {
            let mut state = self.shared.lock();
            if requeue {
                state.redelivered.push(settled.id);
                state
                    .queues
                    .entry(settled.address.clone())
                    .or_default()
                    .push_front(settled);
            } else {
                state.accepted.push(settled.id);
            }
        }
        if requeue {
            self.shared.notify.notify_waiters();
        }
        Ok(())
    }
}

#[async_trait]
impl ReceiverLink for MemoryLink {
    type Message = MemoryMessage;

    async fn receive(&self, timeout: Duration) -> Result<Option<MemoryMessage>, BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_closed() {
                return Err(BrokerError::message("receive", "link detached"));
            }

            // Register interest before inspecting the queue so a publish in
            // between is not missed.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if state.receive_failures > 0 {
                    state.receive_failures -= 1;
                    return Err(BrokerError::message("receive", "connection reset"));
                }
                let next = state
                    .queues
                    .get_mut(&self.address)
                    .and_then(VecDeque::pop_front);
                if let Some(mut message) = next {
                    message.delivery_count += 1;
                    self.in_flight
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(message.id, message.clone());
                    return Ok(Some(message));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn accept(&self, message: &MemoryMessage) -> Result<(), BrokerError> {
        self.settle(message, false)
    }

    async fn redeliver(&self, message: &MemoryMessage) -> Result<(), BrokerError> {
        self.settle(message, true)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut unsettled: Vec<_> = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, message)| message)
            .collect();
        unsettled.sort_by_key(|message| std::cmp::Reverse(message.id));

        let fail = {
            let mut state = self.shared.lock();
            for message in unsettled {
                state
                    .queues
                    .entry(message.address.clone())
                    .or_default()
                    .push_front(message);
            }
            if state.close_failures > 0 {
                state.close_failures -= 1;
                true
            } else {
                false
            }
        };
        self.shared.notify.notify_waiters();
        debug!(receiver = %self.name, address = %self.address, "memory link detached");

        if fail {
            return Err(BrokerError::message("detach", "close frame not acknowledged"));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn release(&self, message: &MemoryMessage) {
        self.shared.lock().released.push(message.id);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receive_returns_messages_in_publish_order() {
        let broker = MemoryBroker::new();
        let first = broker.publish("orders", "a");
        let second = broker.publish("orders", "b");
        let link = broker.create_receiver("r", "orders").await.unwrap();

        let a = link.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        let b = link.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!((a.id, b.id), (first, second));
        assert_eq!(a.delivery_count, 1);
        assert_eq!(broker.pending("orders"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_times_out_when_queue_is_empty() {
        let broker = MemoryBroker::new();
        let link = broker.create_receiver("r", "orders").await.unwrap();

        let started = Instant::now();
        let received = link.receive(Duration::from_secs(10)).await.unwrap();
        assert!(received.is_none());
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn receive_wakes_on_publish() {
        let broker = MemoryBroker::new();
        let link = broker.create_receiver("r", "orders").await.unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            publisher.publish("orders", "late");
        });

        let message = link.receive(Duration::from_secs(10)).await.unwrap().unwrap();
        assert_eq!(message.body, Bytes::from("late"));
    }

    #[tokio::test]
    async fn close_requeues_unsettled_messages() {
        let broker = MemoryBroker::new();
        broker.publish("orders", "a");
        broker.publish("orders", "b");
        let link = broker.create_receiver("r", "orders").await.unwrap();

        let a = link.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        let b = link.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        link.accept(&a).await.unwrap();
        link.close().await.unwrap();

        assert!(link.is_closed());
        assert_eq!(broker.pending("orders"), 1);
        assert_eq!(broker.accepted(), vec![a.id]);

        let relink = broker.create_receiver("r", "orders").await.unwrap();
        let again = relink.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again.id, b.id);
        assert_eq!(again.delivery_count, 2);
    }

    #[tokio::test]
    async fn redeliver_puts_message_back_at_the_front() {
        let broker = MemoryBroker::new();
        broker.publish("orders", "a");
        broker.publish("orders", "b");
        let link = broker.create_receiver("r", "orders").await.unwrap();

        let a = link.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        link.redeliver(&a).await.unwrap();
        let again = link.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again.id, a.id);
        assert_eq!(broker.redelivered(), vec![a.id]);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_once() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(1);
        assert!(broker.create_receiver("r", "orders").await.is_err());
        let link = broker.create_receiver("r", "orders").await.unwrap();

        broker.fail_next_receives(1);
        assert!(link.receive(Duration::from_millis(10)).await.is_err());
        assert!(link.receive(Duration::from_millis(10)).await.unwrap().is_none());

        broker.fail_next_closes(1);
        assert!(link.close().await.is_err());
        assert!(link.is_closed());
        assert_eq!(broker.connect_attempts().len(), 2);
        assert_eq!(broker.links_opened(), 1);
    }
}
