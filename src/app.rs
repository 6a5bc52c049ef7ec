//! App builder and lifecycle.
//!
//! The [`AppBuilder`] provides a fluent API for registering controllers and
//! tuning the runtime. [`AppBuilder::start`] then:
//! 1. Connects to the broker and opens the shared channel
//! 2. Spawns the channel writer task
//! 3. For every queue binding: declares the queue, sets prefetch, attaches a consumer
//! 4. Spawns one consumer loop per queue
//!
//! # Example
//!
//! ```ignore
//! use queuerpc::App;
//!
//! #[tokio::main]
//! async fn main() -> queuerpc::Result<()> {
//!     queuerpc::logging::init();
//!
//!     App::builder()
//!         .controller::<MathController>()
//!         .controller_with(|| Ok(OrdersController::new(pool.clone())))
//!         .run()
//!         .await
//! }
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::RabbitMqOptions;
use crate::dispatcher::{consumer_tag, QueueDispatcher};
use crate::error::Result;
use crate::handler::{BoxError, Controller, HandlerRegistry};
use crate::transport::{AmqpTransport, Transport};
use crate::writer::{spawn_channel_writer, ChannelHandle, WriterConfig};

/// Default prefix for consumer tags.
pub const DEFAULT_CONSUMER_TAG_PREFIX: &str = "queuerpc";

/// Builder for configuring and starting an [`App`].
pub struct AppBuilder {
    registry: HandlerRegistry,
    options: RabbitMqOptions,
    writer_config: WriterConfig,
    consumer_tag_prefix: String,
}

impl AppBuilder {
    /// Create a builder with default broker options.
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            options: RabbitMqOptions::default(),
            writer_config: WriterConfig::default(),
            consumer_tag_prefix: DEFAULT_CONSUMER_TAG_PREFIX.to_string(),
        }
    }

    /// Create a builder with broker options read from the settings files and
    /// environment (see [`crate::config`]).
    pub fn from_config() -> Result<Self> {
        Ok(Self::new().options(RabbitMqOptions::load()?))
    }

    /// Register a controller built with `Default` per delivery.
    pub fn controller<C: Controller + Default>(mut self) -> Self {
        self.registry.register::<C>();
        self
    }

    /// Register a controller built by `factory` per delivery.
    ///
    /// A factory error leaves the delivery unanswered; it is rejected without
    /// requeue.
    pub fn controller_with<C, F>(mut self, factory: F) -> Self
    where
        C: Controller,
        F: Fn() -> std::result::Result<C, BoxError> + Send + Sync + 'static,
    {
        self.registry.register_with(factory);
        self
    }

    /// Set the broker options.
    pub fn options(mut self, options: RabbitMqOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Set the consumer tag prefix.
    ///
    /// Default: `queuerpc`
    pub fn consumer_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.consumer_tag_prefix = prefix.into();
        self
    }

    /// The registry built so far.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Connect to the broker and start every consumer.
    ///
    /// # Errors
    ///
    /// Fails if the broker is unreachable or a queue cannot be set up.
    pub async fn start(self) -> Result<App> {
        let transport = AmqpTransport::connect(&self.options).await?;
        self.start_with(Arc::new(transport)).await
    }

    /// Start every consumer on an already open transport.
    pub async fn start_with(self, transport: Arc<dyn Transport>) -> Result<App> {
        App::start(
            self.registry,
            transport,
            self.writer_config,
            self.consumer_tag_prefix,
        )
        .await
    }

    /// Start and run until ctrl-c.
    pub async fn run(self) -> Result<()> {
        self.start().await?.wait_for_shutdown().await
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running RPC responder.
pub struct App {
    /// Mapped queues, in registration order.
    queues: Vec<String>,
    /// Shared channel handle.
    channel: ChannelHandle,
    /// One consumer loop per queue.
    consumers: Vec<JoinHandle<()>>,
    /// Writer task handle.
    _writer_task: JoinHandle<()>,
}

impl App {
    /// Create a new app builder.
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    async fn start(
        registry: HandlerRegistry,
        transport: Arc<dyn Transport>,
        writer_config: WriterConfig,
        prefix: String,
    ) -> Result<Self> {
        let (channel, writer_task) = spawn_channel_writer(transport, writer_config);

        let mut queues = Vec::new();
        let mut consumers: Vec<JoinHandle<()>> = Vec::new();

        for (index, descriptor) in registry.discover().into_iter().enumerate() {
            let tag = consumer_tag(&prefix, descriptor.queue_name(), index);
            let dispatcher = QueueDispatcher::new(descriptor, channel.clone(), tag);

            let deliveries = match dispatcher.setup().await {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    tracing::error!(
                        queue = dispatcher.descriptor().queue_name(),
                        "Queue setup failed: {}",
                        e
                    );
                    consumers.iter().for_each(JoinHandle::abort);
                    writer_task.abort();
                    return Err(e);
                }
            };

            let queue = dispatcher.descriptor().queue_name().to_string();
            queues.push(queue);
            consumers.push(dispatcher.spawn(deliveries));
        }

        tracing::info!(
            queues = queues.len(),
            controllers = registry.controllers().len(),
            "App started"
        );

        Ok(App {
            queues,
            channel,
            consumers,
            _writer_task: writer_task,
        })
    }

    /// Mapped queue names.
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// Whether the shared channel is open.
    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Replies and acks queued on the writer.
    pub fn pending_operations(&self) -> usize {
        self.channel.pending_count()
    }

    /// Wait for ctrl-c, then shut down.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown signal received");
        self.shutdown();
        Ok(())
    }

    /// Stop every consumer loop.
    ///
    /// Handlers in flight are dropped; their deliveries were never acked and
    /// the broker requeues them.
    pub fn shutdown(self) {
        for consumer in &self.consumers {
            consumer.abort();
        }
        tracing::info!(queues = self.queues.len(), "App stopped");
    }
}
