//! AMQP 0.9.1 transport over `lapin`.
//!
//! One connection and one channel are shared by every consumer. `lapin`
//! channels are internally synchronized, so setup calls go straight to the
//! channel while publish, ack and reject arrive from the writer task.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

use super::{Deliveries, OutboundReply, Qos, RequestEnvelope, Transport};
use crate::config::RabbitMqOptions;
use crate::error::{Result, RpcError};

/// Connection name announced to the broker.
const CONNECTION_NAME: &str = "queuerpc";

/// `lapin`-backed transport.
pub struct AmqpTransport {
    connection: Connection,
    channel: Channel,
}

impl AmqpTransport {
    /// Connect to the broker and open the shared channel.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Amqp`] if the connection or channel cannot be established.
    pub async fn connect(options: &RabbitMqOptions) -> Result<Self> {
        tracing::info!(
            host = %options.host_name,
            port = options.port,
            ssl = options.ssl,
            vhost = %options.virtual_host,
            "Connecting to broker"
        );

        let properties = ConnectionProperties::default()
            .with_connection_name(CONNECTION_NAME.into());
        let connection = Connection::connect_uri(options.amqp_uri(), properties).await?;

        let channel = connection.create_channel().await?;

        Ok(Self {
            connection,
            channel,
        })
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

fn envelope_from_delivery(
    delivery: Delivery,
    queue: &str,
    consumer_tag: &str,
) -> RequestEnvelope {
    let properties = &delivery.properties;
    RequestEnvelope {
        correlation_id: properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_string()),
        reply_to: properties
            .reply_to()
            .as_ref()
            .map(|to| to.as_str().to_string()),
        delivery_tag: delivery.delivery_tag,
        redelivered: delivery.redelivered,
        queue: queue.to_string(),
        consumer_tag: consumer_tag.to_string(),
        body: Bytes::from(delivery.data),
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: false,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn qos(&self, qos: Qos) -> Result<()> {
        self.channel
            .basic_qos(
                qos.prefetch_count,
                BasicQosOptions {
                    global: qos.global,
                },
            )
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Deliveries> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let queue = queue.to_string();
        let consumer_tag = consumer_tag.to_string();
        let deliveries = consumer.map(move |item| {
            item.map(|delivery| envelope_from_delivery(delivery, &queue, &consumer_tag))
                .map_err(RpcError::from)
        });

        Ok(deliveries.boxed())
    }

    async fn publish(&self, reply: OutboundReply) -> Result<()> {
        let mut properties = BasicProperties::default();
        if let Some(correlation_id) = reply.correlation_id {
            properties = properties.with_correlation_id(correlation_id.into());
        }

        let confirm = self
            .channel
            .basic_publish(
                "",
                &reply.routing_key,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                &reply.body,
                properties,
            )
            .await?;
        confirm.await?;
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await?;
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }
}
