//! Transport module - the broker seam.
//!
//! [`Transport`] is the small set of channel operations the dispatcher needs:
//! declare a queue, set prefetch, consume, publish a reply, acknowledge or
//! reject a delivery.
//!
//! - [`AmqpTransport`] - AMQP 0.9.1 over `lapin` (one connection, one channel)
//! - [`MemoryBroker`] - in-process broker for tests and demos

mod amqp;
mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Result;

pub use amqp::AmqpTransport;
pub use memory::{BrokerEvent, MemoryBroker, PublishedReply, Rejection};

/// Stream of deliveries for one consumer.
pub type Deliveries = BoxStream<'static, Result<RequestEnvelope>>;

/// A request delivered from a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    /// Raw message body.
    pub body: Bytes,
    /// Correlation ID set by the caller.
    pub correlation_id: Option<String>,
    /// Queue the caller listens on for the reply.
    pub reply_to: Option<String>,
    /// Broker delivery tag, used for the ack.
    pub delivery_tag: u64,
    /// Whether the broker delivered this message before.
    pub redelivered: bool,
    /// Queue the message was consumed from.
    pub queue: String,
    /// Tag of the consumer that received the message.
    pub consumer_tag: String,
}

/// A reply ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    /// Routing key on the default exchange (the request's `reply_to`).
    pub routing_key: String,
    /// Correlation ID copied from the request.
    pub correlation_id: Option<String>,
    /// Encoded result, empty when the handler produced nothing.
    pub body: Bytes,
}

/// Prefetch settings for subsequently created consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Qos {
    /// Maximum unacknowledged messages per consumer.
    pub prefetch_count: u16,
    /// Apply to the whole channel instead of per consumer.
    pub global: bool,
}

impl Qos {
    /// One message in flight per consumer.
    pub const SEQUENTIAL: Qos = Qos {
        prefetch_count: 1,
        global: false,
    };
}

/// Channel operations used by the dispatcher.
///
/// Implementations must be safe to call from several tasks; the writer task
/// still funnels publish, ack and reject through a single caller.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Declare a non-durable, non-exclusive, non-auto-delete queue.
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Set prefetch for consumers created after this call.
    async fn qos(&self, qos: Qos) -> Result<()>;

    /// Start consuming a queue with manual acknowledgment.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Deliveries>;

    /// Publish a reply to the default exchange with `mandatory` set.
    async fn publish(&self, reply: OutboundReply) -> Result<()>;

    /// Acknowledge a single delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Reject a single delivery, releasing its prefetch slot.
    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()>;

    /// Whether the channel is still open.
    fn is_open(&self) -> bool;
}
