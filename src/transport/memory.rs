//! In-process broker.
//!
//! Implements [`Transport`] without a network: queues are unbounded channels,
//! published replies, acks and rejects are recorded and broadcast as
//! [`BrokerEvent`]s. A consumer created after [`Transport::qos`] receives at
//! most `prefetch_count` unsettled deliveries, like a real broker.
//! Used by the integration tests and the demo.
//!
//! # Example
//!
//! ```
//! use queuerpc::transport::{MemoryBroker, Transport};
//!
//! # #[tokio::main] async fn main() {
//! let broker = MemoryBroker::new();
//! broker.declare_queue("ping").await.unwrap();
//! let tag = broker.deliver("ping", "{}", Some("c-1"), Some("replies")).unwrap();
//! assert_eq!(tag, 1);
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, Semaphore};

use super::{Deliveries, OutboundReply, Qos, RequestEnvelope, Transport};
use crate::error::{Result, RpcError};

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 1024;

/// A reply as recorded by the memory broker.
pub type PublishedReply = OutboundReply;

/// A rejected delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub delivery_tag: u64,
    pub requeue: bool,
}

/// Something that happened on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Published(PublishedReply),
    Acked(u64),
    Rejected(Rejection),
}

struct MemoryQueue {
    tx: mpsc::UnboundedSender<RequestEnvelope>,
    rx: Option<mpsc::UnboundedReceiver<RequestEnvelope>>,
    consumer_tag: Option<String>,
    qos: Option<Qos>,
    /// Prefetch credit of the consumer; `None` means unlimited.
    credit: Option<Arc<Semaphore>>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, MemoryQueue>,
    current_qos: Option<Qos>,
    declared: Vec<String>,
    published: Vec<PublishedReply>,
    acked: Vec<u64>,
    rejected: Vec<Rejection>,
    /// Deliveries not yet acked or rejected, by tag.
    unsettled: HashMap<u64, RequestEnvelope>,
}

impl BrokerState {
    /// Forget an unsettled delivery and hand its prefetch slot back.
    fn settle(&mut self, delivery_tag: u64) -> Option<RequestEnvelope> {
        let envelope = self.unsettled.remove(&delivery_tag)?;
        if let Some(credit) = self
            .queues
            .get(&envelope.queue)
            .and_then(|q| q.credit.as_ref())
        {
            credit.add_permits(1);
        }
        Some(envelope)
    }
}

/// In-process [`Transport`] implementation.
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    next_tag: AtomicU64,
    open: AtomicBool,
    events: broadcast::Sender<BrokerEvent>,
}

impl MemoryBroker {
    /// Create an open broker with no queues.
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            state: Mutex::new(BrokerState::default()),
            next_tag: AtomicU64::new(1),
            open: AtomicBool::new(true),
            events,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        // A poisoned lock only means a test panicked mid-update; the state is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a request on a declared queue. Returns its delivery tag.
    pub fn deliver(
        &self,
        queue: &str,
        body: impl Into<Bytes>,
        correlation_id: Option<&str>,
        reply_to: Option<&str>,
    ) -> Result<u64> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let entry = state.queues.get(queue).ok_or_else(|| {
            RpcError::TransportUnavailable(format!("queue '{}' not declared", queue))
        })?;

        let delivery_tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let envelope = RequestEnvelope {
            body: body.into(),
            correlation_id: correlation_id.map(str::to_string),
            reply_to: reply_to.map(str::to_string),
            delivery_tag,
            redelivered: false,
            queue: queue.to_string(),
            consumer_tag: entry.consumer_tag.clone().unwrap_or_default(),
        };

        state.unsettled.insert(delivery_tag, envelope.clone());
        entry
            .tx
            .send(envelope)
            .map_err(|_| RpcError::ConnectionClosed)?;
        Ok(delivery_tag)
    }

    /// Subscribe to publish, ack and reject events.
    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }

    /// Mark the channel closed.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Queues declared so far, in declaration order (repeats included).
    pub fn declared(&self) -> Vec<String> {
        self.lock().declared.clone()
    }

    /// Prefetch settings the queue's consumer was created with.
    pub fn qos_for(&self, queue: &str) -> Option<Qos> {
        self.lock().queues.get(queue).and_then(|q| q.qos)
    }

    /// Replies published so far.
    pub fn published(&self) -> Vec<PublishedReply> {
        self.lock().published.clone()
    }

    /// Delivery tags acknowledged so far.
    pub fn acked(&self) -> Vec<u64> {
        self.lock().acked.clone()
    }

    /// Deliveries rejected so far.
    pub fn rejected(&self) -> Vec<Rejection> {
        self.lock().rejected.clone()
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        let mut state = self.lock();
        state.declared.push(queue.to_string());
        state.queues.entry(queue.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            MemoryQueue {
                tx,
                rx: Some(rx),
                consumer_tag: None,
                qos: None,
                credit: None,
            }
        });
        Ok(())
    }

    async fn qos(&self, qos: Qos) -> Result<()> {
        self.lock().current_qos = Some(qos);
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Deliveries> {
        let mut state = self.lock();
        let qos = state.current_qos;
        let entry = state.queues.get_mut(queue).ok_or_else(|| {
            RpcError::TransportUnavailable(format!("queue '{}' not declared", queue))
        })?;

        let rx = entry.rx.take().ok_or_else(|| {
            RpcError::TransportUnavailable(format!("queue '{}' already has a consumer", queue))
        })?;
        entry.consumer_tag = Some(consumer_tag.to_string());
        entry.qos = qos;
        entry.credit = qos
            .filter(|qos| qos.prefetch_count > 0)
            .map(|qos| Arc::new(Semaphore::new(usize::from(qos.prefetch_count))));

        let credit = entry.credit.clone();
        let deliveries = futures::stream::unfold((rx, credit), |(mut rx, credit)| async move {
            if let Some(slots) = &credit {
                match slots.acquire().await {
                    Ok(permit) => permit.forget(),
                    Err(_) => return None,
                }
            }
            rx.recv()
                .await
                .map(|envelope| (Ok(envelope), (rx, credit)))
        });
        Ok(deliveries.boxed())
    }

    async fn publish(&self, reply: OutboundReply) -> Result<()> {
        if !self.is_open() {
            return Err(RpcError::ConnectionClosed);
        }
        self.lock().published.push(reply.clone());
        let _ = self.events.send(BrokerEvent::Published(reply));
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        if !self.is_open() {
            return Err(RpcError::ConnectionClosed);
        }
        {
            let mut state = self.lock();
            state.settle(delivery_tag);
            state.acked.push(delivery_tag);
        }
        let _ = self.events.send(BrokerEvent::Acked(delivery_tag));
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        if !self.is_open() {
            return Err(RpcError::ConnectionClosed);
        }
        let rejection = Rejection {
            delivery_tag,
            requeue,
        };
        {
            let mut state = self.lock();
            let envelope = state.settle(delivery_tag);
            state.rejected.push(rejection);

            if let Some(mut envelope) = envelope.filter(|_| requeue) {
                envelope.redelivered = true;
                state.unsettled.insert(delivery_tag, envelope.clone());
                if let Some(entry) = state.queues.get(&envelope.queue) {
                    let _ = entry.tx.send(envelope);
                }
            }
        }
        let _ = self.events.send(BrokerEvent::Rejected(rejection));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
