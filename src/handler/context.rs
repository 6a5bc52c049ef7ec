//! Request context for handlers.
//!
//! Carries the per-delivery data a handler may want besides its bound
//! arguments: the raw body, the correlation ID, where the reply goes, and
//! which consumer received the message.
//!
//! # Example
//!
//! ```ignore
//! async fn audit(self, ctx: RequestContext, (): ()) -> HandlerResult<()> {
//!     tracing::info!(queue = ctx.queue(), correlation_id = ?ctx.correlation_id(), "audited");
//!     Ok(())
//! }
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::codec::JsonCodec;
use crate::error::Result;
use crate::transport::RequestEnvelope;

/// Context passed to request handlers.
///
/// Built fresh for every delivery and never shared between messages.
#[derive(Debug, Clone)]
pub struct RequestContext {
    queue: String,
    consumer_tag: String,
    correlation_id: Option<String>,
    reply_to: Option<String>,
    delivery_tag: u64,
    redelivered: bool,
    body: Bytes,
}

impl RequestContext {
    /// Create a context for a queue and body (for testing without a broker).
    pub fn new(queue: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            queue: queue.into(),
            consumer_tag: String::new(),
            correlation_id: None,
            reply_to: None,
            delivery_tag: 0,
            redelivered: false,
            body: body.into(),
        }
    }

    /// Create a context from a delivered envelope.
    pub fn from_envelope(envelope: &RequestEnvelope) -> Self {
        Self {
            queue: envelope.queue.clone(),
            consumer_tag: envelope.consumer_tag.clone(),
            correlation_id: envelope.correlation_id.clone(),
            reply_to: envelope.reply_to.clone(),
            delivery_tag: envelope.delivery_tag,
            redelivered: envelope.redelivered,
            body: envelope.body.clone(),
        }
    }

    /// Queue the request arrived on.
    #[inline]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Tag of the consumer that received the request.
    #[inline]
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    #[inline]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    #[inline]
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    #[inline]
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    #[inline]
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Raw request body.
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decode the whole body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        JsonCodec::decode(&self.body)
    }
}
