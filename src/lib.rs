//! # queuerpc
//!
//! RPC responder over an AMQP 0.9.1 broker.
//!
//! Controllers bind their methods to named queues. At startup every queue is
//! declared and consumed; each message body is bound to the method's
//! parameters, the method runs, and its result is published back to the
//! caller's `reply_to` queue with the request's correlation ID.
//!
//! ## Architecture
//!
//! - **Registry**: controllers declare `(queue, parameters, handler)` bindings
//! - **Binder**: JSON body to typed arguments (named fields, bare scalars, composites)
//! - **Dispatcher**: one consumer loop per queue, strictly sequential within a queue
//! - **Writer**: a single task owns publish and ack on the shared channel
//!
//! ## Example
//!
//! ```ignore
//! use queuerpc::{App, Controller, HandlerError, HandlerResult, QueueTable, RequestContext};
//!
//! #[derive(Default)]
//! struct Math;
//!
//! impl Math {
//!     async fn div(self, _ctx: RequestContext, (a, b): (f64, f64)) -> HandlerResult<f64> {
//!         if b == 0.0 {
//!             return Err(HandlerError::new("DivideByZero", "b must not be zero"));
//!         }
//!         Ok(a / b)
//!     }
//! }
//!
//! impl Controller for Math {
//!     fn queues(table: &mut QueueTable<Self>) {
//!         table.bind("math.div", &["a", "b"], Math::div);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> queuerpc::Result<()> {
//!     queuerpc::logging::init();
//!     App::builder().controller::<Math>().run().await
//! }
//! ```

pub mod binder;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod logging;
pub mod result;
pub mod transport;
pub mod writer;

mod app;

pub use app::{App, AppBuilder};
pub use binder::{Enum, SymbolicEnum};
pub use config::RabbitMqOptions;
pub use error::{HandlerError, Result, RpcError};
pub use handler::{
    Controller, HandlerDescriptor, HandlerRegistry, HandlerResult, QueueTable, RequestContext,
};
pub use result::{IntoReply, Json, Response, RpcResult};
