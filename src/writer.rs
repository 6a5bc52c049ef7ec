//! Dedicated writer task for outbound channel operations.
//!
//! Every dispatcher shares one broker channel. Instead of locking the channel,
//! publishes, acks and rejects are sent over an mpsc channel to a single writer task,
//! which performs them one at a time in arrival order. Each operation carries
//! a oneshot so the dispatcher can await its outcome before moving on.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher q1 ─┐
//! Dispatcher q2 ─┼─► mpsc::Sender<WriteOp> ─► Writer Task ─► Transport
//! Dispatcher qN ─┘
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};
use crate::transport::{OutboundReply, Transport};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// An outbound channel operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Publish(OutboundReply),
    Ack(u64),
    Reject { delivery_tag: u64, requeue: bool },
}

struct Pending {
    op: WriteOp,
    done: oneshot::Sender<Result<()>>,
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for queued operations.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle to the shared channel.
///
/// Cheaply cloneable; every dispatcher holds one. Outbound operations go
/// through the writer task, setup operations use [`ChannelHandle::transport`].
#[derive(Clone)]
pub struct ChannelHandle {
    tx: mpsc::Sender<Pending>,
    pending: Arc<AtomicUsize>,
    transport: Arc<dyn Transport>,
}

impl ChannelHandle {
    /// Publish a reply and wait until the transport has handled it.
    pub async fn publish(&self, reply: OutboundReply) -> Result<()> {
        self.submit(WriteOp::Publish(reply)).await
    }

    /// Acknowledge a delivery and wait until the transport has handled it.
    pub async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.submit(WriteOp::Ack(delivery_tag)).await
    }

    /// Reject a delivery and wait until the transport has handled it.
    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.submit(WriteOp::Reject {
            delivery_tag,
            requeue,
        })
        .await
    }

    async fn submit(&self, op: WriteOp) -> Result<()> {
        let (done, result) = oneshot::channel();

        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(Pending { op, done }).await.is_err() {
            self.pending.fetch_sub(1, Ordering::Release);
            return Err(RpcError::ConnectionClosed);
        }

        result.await.map_err(|_| RpcError::ConnectionClosed)?
    }

    /// Whether the underlying channel is open.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Operations queued or in progress.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// The transport, for queue setup.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

/// Spawn the writer task and return a handle for submitting operations.
///
/// The task ends when every [`ChannelHandle`] has been dropped.
pub fn spawn_channel_writer(
    transport: Arc<dyn Transport>,
    config: WriterConfig,
) -> (ChannelHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = ChannelHandle {
        tx,
        pending: pending.clone(),
        transport: transport.clone(),
    };

    let task = tokio::spawn(writer_loop(rx, transport, pending));

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_channel_writer_default(
    transport: Arc<dyn Transport>,
) -> (ChannelHandle, JoinHandle<()>) {
    spawn_channel_writer(transport, WriterConfig::default())
}

async fn writer_loop(
    mut rx: mpsc::Receiver<Pending>,
    transport: Arc<dyn Transport>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(Pending { op, done }) = rx.recv().await {
        let result = match op {
            WriteOp::Publish(reply) => transport.publish(reply).await,
            WriteOp::Ack(delivery_tag) => transport.ack(delivery_tag).await,
            WriteOp::Reject {
                delivery_tag,
                requeue,
            } => transport.reject(delivery_tag, requeue).await,
        };

        pending.fetch_sub(1, Ordering::Release);
        // The submitter may have gone away; the operation happened regardless.
        let _ = done.send(result);
    }

    tracing::debug!("Channel writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BrokerEvent, MemoryBroker, Rejection};
    use bytes::Bytes;

    fn reply(correlation_id: &str) -> OutboundReply {
        OutboundReply {
            routing_key: "replies".to_string(),
            correlation_id: Some(correlation_id.to_string()),
            body: Bytes::from_static(b"{}"),
        }
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn test_publish_then_ack_in_order() {
        let broker = MemoryBroker::new();
        let mut events = broker.subscribe();
        let (handle, _task) = spawn_channel_writer_default(broker.clone());

        handle.publish(reply("a")).await.unwrap();
        handle.ack(1).await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            BrokerEvent::Published(reply("a"))
        );
        assert_eq!(events.recv().await.unwrap(), BrokerEvent::Acked(1));
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_reject_reaches_transport() {
        let broker = MemoryBroker::new();
        let (handle, _task) = spawn_channel_writer_default(broker.clone());

        handle.reject(9, false).await.unwrap();

        assert_eq!(
            broker.rejected(),
            vec![Rejection {
                delivery_tag: 9,
                requeue: false
            }]
        );
        assert!(broker.acked().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_submitters() {
        let broker = MemoryBroker::new();
        let config = WriterConfig {
            channel_capacity: 2,
        };
        let (handle, _task) = spawn_channel_writer(broker.clone(), config);

        let tasks: Vec<_> = (0..20u64)
            .map(|tag| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.ack(tag).await })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut acked = broker.acked();
        acked.sort_unstable();
        assert_eq!(acked, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_transport_error_is_returned() {
        let broker = MemoryBroker::new();
        let (handle, _task) = spawn_channel_writer_default(broker.clone());

        broker.close();
        assert!(!handle.is_open());
        assert!(matches!(
            handle.ack(1).await,
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_handle_drop() {
        let broker = MemoryBroker::new();
        let (handle, task) = spawn_channel_writer_default(broker);

        drop(handle);

        task.await.unwrap();
    }
}
