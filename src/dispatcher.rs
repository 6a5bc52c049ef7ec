//! Per-queue consumer loop.
//!
//! A [`QueueDispatcher`] owns one [`HandlerDescriptor`]. It declares the queue,
//! limits prefetch to one message, and then runs every delivery through a
//! single cycle:
//!
//! ```text
//! delivery ─► bind + invoke ─► RpcResult ─► publish(reply_to) ─► ack
//! ```
//!
//! The loop awaits the whole cycle, ack included, before it polls the next
//! delivery, so messages of one queue never overlap.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::{FutureExt, StreamExt};
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};
use crate::handler::{HandlerDescriptor, RequestContext};
use crate::result::{Response, RpcResult};
use crate::transport::{Deliveries, OutboundReply, Qos, RequestEnvelope};
use crate::writer::ChannelHandle;

/// How a delivery left the dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The delivery was acknowledged. `replied` is false when nothing was
    /// published (no `reply_to`, or the publish failed).
    Acknowledged { replied: bool },
    /// The channel was closed; the delivery stays unacknowledged.
    ChannelClosed,
    /// The controller could not be built or its binding is inconsistent.
    /// No reply was sent and the delivery was rejected without requeue.
    Misconfigured,
}

/// Build the consumer tag for a queue.
pub fn consumer_tag(prefix: &str, queue: &str, index: usize) -> String {
    format!("{}.{}.{}", prefix, queue, index)
}

/// Consumer loop for one queue binding.
pub struct QueueDispatcher {
    descriptor: HandlerDescriptor,
    channel: ChannelHandle,
    consumer_tag: String,
}

impl QueueDispatcher {
    pub fn new(
        descriptor: HandlerDescriptor,
        channel: ChannelHandle,
        consumer_tag: impl Into<String>,
    ) -> Self {
        Self {
            descriptor,
            channel,
            consumer_tag: consumer_tag.into(),
        }
    }

    pub fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Declare the queue, set prefetch and attach the consumer.
    pub async fn setup(&self) -> Result<Deliveries> {
        let transport = self.channel.transport();
        let queue = self.descriptor.queue_name();

        transport.declare_queue(queue).await?;
        transport.qos(Qos::SEQUENTIAL).await?;
        let deliveries = transport.consume(queue, &self.consumer_tag).await?;

        tracing::info!(
            queue,
            handler = self.descriptor.handler_type(),
            consumer_tag = %self.consumer_tag,
            "Queue mapped"
        );
        Ok(deliveries)
    }

    /// Run the consumer loop on its own task.
    pub fn spawn(self, deliveries: Deliveries) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(deliveries).await })
    }

    /// Process deliveries one at a time until the stream ends.
    pub async fn run(&self, mut deliveries: Deliveries) {
        while let Some(item) = deliveries.next().await {
            match item {
                Ok(envelope) => {
                    let delivery_tag = envelope.delivery_tag;
                    let outcome = self.dispatch(envelope).await;
                    tracing::trace!(
                        queue = self.descriptor.queue_name(),
                        delivery_tag,
                        ?outcome,
                        "Delivery handled"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        queue = self.descriptor.queue_name(),
                        "Consumer error: {}",
                        e
                    );
                    break;
                }
            }
        }

        tracing::info!(queue = self.descriptor.queue_name(), "Consumer stopped");
    }

    /// Run a single delivery through bind, invoke, reply and ack.
    pub async fn dispatch(&self, envelope: RequestEnvelope) -> DispatchOutcome {
        let queue = self.descriptor.queue_name();
        let ctx = RequestContext::from_envelope(&envelope);

        // The async block defers invoke() into poll, so panics in binding or in
        // building the handler future are caught too.
        let invocation = AssertUnwindSafe(async { self.descriptor.invoke(ctx).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(RpcError::Panic(panic_message(payload.as_ref())))
            });

        let result = match invocation {
            Ok(result) => result,
            Err(e) if e.is_configuration() => {
                tracing::error!(
                    queue,
                    handler = self.descriptor.handler_type(),
                    delivery_tag = envelope.delivery_tag,
                    "Cannot dispatch: {}",
                    e
                );
                if let Err(e) = self.channel.reject(envelope.delivery_tag, false).await {
                    tracing::warn!(
                        queue,
                        delivery_tag = envelope.delivery_tag,
                        "Reject failed: {}",
                        e
                    );
                }
                return DispatchOutcome::Misconfigured;
            }
            Err(e) => {
                tracing::error!(
                    queue,
                    handler = self.descriptor.handler_type(),
                    kind = e.kind(),
                    correlation_id = ?envelope.correlation_id,
                    "Invocation failed: {}",
                    e.message()
                );
                Some(RpcResult::from(&e))
            }
        };

        if !self.channel.is_open() {
            tracing::warn!(
                queue,
                delivery_tag = envelope.delivery_tag,
                "Channel closed, leaving delivery unacknowledged"
            );
            return DispatchOutcome::ChannelClosed;
        }

        let replied = self.reply(&envelope, result).await;

        match self.channel.ack(envelope.delivery_tag).await {
            Ok(()) => DispatchOutcome::Acknowledged { replied },
            Err(e) => {
                tracing::warn!(
                    queue,
                    delivery_tag = envelope.delivery_tag,
                    "Ack failed: {}",
                    e
                );
                DispatchOutcome::ChannelClosed
            }
        }
    }

    /// Publish the result to the request's reply queue. Returns whether a
    /// reply went out.
    async fn reply(&self, envelope: &RequestEnvelope, result: Option<RpcResult>) -> bool {
        let queue = self.descriptor.queue_name();

        let routing_key = match envelope.reply_to.as_deref() {
            Some(reply_to) if !reply_to.is_empty() => reply_to.to_string(),
            _ => {
                tracing::warn!(
                    queue,
                    correlation_id = ?envelope.correlation_id,
                    "Request has no reply_to, result dropped"
                );
                return false;
            }
        };

        let response = match result {
            Some(result) => encode_or_report(&result),
            None => Response::empty(),
        };

        let reply = OutboundReply {
            routing_key,
            correlation_id: envelope.correlation_id.clone(),
            body: response.into_bytes(),
        };

        match self.channel.publish(reply).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    queue,
                    correlation_id = ?envelope.correlation_id,
                    "Publish failed: {}",
                    e
                );
                false
            }
        }
    }
}

fn encode_or_report(result: &RpcResult) -> Response {
    match Response::encode(result) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Cannot encode result: {}", e);
            Response::encode(&RpcResult::internal_error("Serialization", e.to_string()))
                .unwrap_or_else(|_| Response::empty())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::{Controller, HandlerRegistry, HandlerResult, QueueTable};
    use crate::transport::{MemoryBroker, Rejection, Transport};
    use crate::writer::spawn_channel_writer_default;
    use serde_json::{json, Value};
    use std::sync::Arc;

    #[derive(Default)]
    struct Calc;

    impl Calc {
        async fn add(self, _ctx: RequestContext, (a, b): (i64, i64)) -> HandlerResult<i64> {
            Ok(a + b)
        }

        async fn boom(self, _ctx: RequestContext, (): ()) -> HandlerResult<i64> {
            panic!("kaboom")
        }

        async fn reject(self, _ctx: RequestContext, (): ()) -> HandlerResult<()> {
            Err(HandlerError::new("Rejected", "not today"))
        }

        async fn quiet(self, _ctx: RequestContext, (): ()) -> HandlerResult<()> {
            Ok(())
        }
    }

    impl Controller for Calc {
        fn queues(table: &mut QueueTable<Self>) {
            table
                .bind("calc.add", &["a", "b"], Calc::add)
                .bind("calc.boom", &[], Calc::boom)
                .bind("calc.reject", &[], Calc::reject)
                .bind("calc.quiet", &[], Calc::quiet)
                .bind("calc.mismatch", &["a"], Calc::add);
        }
    }

    fn dispatcher(broker: &Arc<MemoryBroker>, queue: &str) -> QueueDispatcher {
        let mut registry = HandlerRegistry::new();
        registry.register::<Calc>();
        let descriptor = registry.get(queue).unwrap().clone();
        let (channel, _task) = spawn_channel_writer_default(broker.clone());
        QueueDispatcher::new(descriptor, channel, consumer_tag("test", queue, 0))
    }

    fn envelope(queue: &str, body: &str, reply_to: Option<&str>) -> RequestEnvelope {
        RequestEnvelope {
            body: body.to_string().into(),
            correlation_id: Some("corr-1".to_string()),
            reply_to: reply_to.map(str::to_string),
            delivery_tag: 42,
            redelivered: false,
            queue: queue.to_string(),
            consumer_tag: "test".to_string(),
        }
    }

    fn body_json(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_consumer_tag_format() {
        let tag = consumer_tag("queuerpc", "math.add", 3);
        assert_eq!(tag, "queuerpc.math.add.3");
    }

    #[tokio::test]
    async fn test_setup_declares_and_limits_prefetch() {
        let broker = MemoryBroker::new();
        let d = dispatcher(&broker, "calc.add");
        let _deliveries = d.setup().await.unwrap();

        assert_eq!(broker.declared(), vec!["calc.add".to_string()]);
        assert_eq!(broker.qos_for("calc.add"), Some(Qos::SEQUENTIAL));
    }

    #[tokio::test]
    async fn test_dispatch_success_replies_then_acks() {
        let broker = MemoryBroker::new();
        let d = dispatcher(&broker, "calc.add");

        let request = envelope("calc.add", r#"{"a": 2, "b": 40}"#, Some("replies"));
        let outcome = d.dispatch(request).await;

        assert_eq!(outcome, DispatchOutcome::Acknowledged { replied: true });
        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, "replies");
        assert_eq!(published[0].correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(
            body_json(&published[0].body),
            json!({"ok": true, "value": 42})
        );
        assert_eq!(broker.acked(), vec![42]);
    }

    #[tokio::test]
    async fn test_dispatch_handler_error_becomes_failure_reply() {
        let broker = MemoryBroker::new();
        let d = dispatcher(&broker, "calc.reject");

        let request = envelope("calc.reject", "", Some("replies"));
        let outcome = d.dispatch(request).await;

        assert_eq!(outcome, DispatchOutcome::Acknowledged { replied: true });
        assert_eq!(
            body_json(&broker.published()[0].body),
            json!({"ok": false, "error": "Rejected", "message": "not today", "statusCode": 500})
        );
    }

    #[tokio::test]
    async fn test_dispatch_panic_becomes_failure_reply() {
        let broker = MemoryBroker::new();
        let d = dispatcher(&broker, "calc.boom");

        let request = envelope("calc.boom", "", Some("replies"));
        let outcome = d.dispatch(request).await;

        assert_eq!(outcome, DispatchOutcome::Acknowledged { replied: true });
        let body = body_json(&broker.published()[0].body);
        assert_eq!(body["ok"], json!(false));
        assert_eq!(body["error"], json!("Panic"));
        assert!(body["message"].as_str().unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_dispatch_unit_result_publishes_empty_body() {
        let broker = MemoryBroker::new();
        let d = dispatcher(&broker, "calc.quiet");

        let request = envelope("calc.quiet", "", Some("replies"));
        let outcome = d.dispatch(request).await;

        assert_eq!(outcome, DispatchOutcome::Acknowledged { replied: true });
        assert!(broker.published()[0].body.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_without_reply_to_still_acks() {
        let broker = MemoryBroker::new();
        let d = dispatcher(&broker, "calc.add");

        let outcome = d.dispatch(envelope("calc.add", "[]", None)).await;

        assert_eq!(outcome, DispatchOutcome::Acknowledged { replied: false });
        assert!(broker.published().is_empty());
        assert_eq!(broker.acked(), vec![42]);
    }

    #[tokio::test]
    async fn test_dispatch_on_closed_channel_leaves_unacked() {
        let broker = MemoryBroker::new();
        let d = dispatcher(&broker, "calc.add");
        broker.close();

        let request = envelope("calc.add", r#"{"a": 1, "b": 1}"#, Some("replies"));
        let outcome = d.dispatch(request).await;

        assert_eq!(outcome, DispatchOutcome::ChannelClosed);
        assert!(broker.published().is_empty());
        assert!(broker.acked().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_misconfigured_rejects_without_reply() {
        let broker = MemoryBroker::new();
        let d = dispatcher(&broker, "calc.mismatch");

        let request = envelope("calc.mismatch", "1", Some("replies"));
        let outcome = d.dispatch(request).await;

        assert_eq!(outcome, DispatchOutcome::Misconfigured);
        assert!(broker.published().is_empty());
        assert!(broker.acked().is_empty());
        assert_eq!(
            broker.rejected(),
            vec![Rejection {
                delivery_tag: 42,
                requeue: false
            }]
        );
    }

    #[tokio::test]
    async fn test_run_stops_when_stream_ends() {
        let broker = MemoryBroker::new();
        let d = dispatcher(&broker, "calc.add");
        let deliveries = futures::stream::iter(vec![
            Ok(envelope("calc.add", r#"{"a": 1, "b": 2}"#, Some("r"))),
            Err(RpcError::ConnectionClosed),
            Ok(envelope("calc.add", r#"{"a": 3, "b": 4}"#, Some("r"))),
        ])
        .boxed();

        d.run(deliveries).await;

        assert_eq!(broker.published().len(), 1);
        assert_eq!(broker.acked().len(), 1);
        // Keep the transport alive until the assertions ran.
        assert!(broker.is_open());
    }
}
