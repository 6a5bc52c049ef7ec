//! Handler module - controllers, their queue bindings and invocation.
//!
//! Provides:
//! - [`Controller`] and [`QueueTable`] - declare which methods serve which queues
//! - [`HandlerRegistry`] - turns registered controllers into [`HandlerDescriptor`]s
//! - [`RequestContext`] - per-delivery metadata available to handlers
//!
//! # Example
//!
//! ```ignore
//! use queuerpc::handler::{Controller, HandlerRegistry, HandlerResult, QueueTable, RequestContext};
//!
//! #[derive(Default)]
//! struct Echo;
//!
//! impl Controller for Echo {
//!     fn queues(table: &mut QueueTable<Self>) {
//!         table.bind("echo", &["text"], |_this: Self, _ctx, (text,): (String,)| async move {
//!             Ok(text)
//!         });
//!     }
//! }
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register::<Echo>();
//! ```

mod context;
mod controller;
mod registry;

pub use context::RequestContext;
pub use controller::{Controller, HandlerResult, QueueTable};
pub use registry::{
    BoxError, BoxFuture, ControllerFactory, HandlerDescriptor, HandlerRegistry, Method, TypedMethod,
};
