//! Handler registry - the table of queue-bound methods.
//!
//! Controllers are registered once with a factory that builds a fresh value per
//! delivery. Registration expands each controller's [`QueueTable`] into
//! [`HandlerDescriptor`]s; [`HandlerRegistry::discover`] hands them to the
//! dispatchers.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = HandlerRegistry::new();
//! registry.register::<MathController>();
//!
//! for descriptor in registry.discover() {
//!     println!("{} -> {}", descriptor.queue_name(), descriptor.handler_type());
//! }
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use super::controller::{Controller, HandlerResult, QueueTable};
use super::RequestContext;
use crate::binder::{bind, BoundArgs, FromArgs, ParamKind, ParamSpec};
use crate::error::{Result, RpcError};
use crate::result::{IntoReply, RpcResult};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error a controller factory may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Builds a fresh controller for each delivery.
pub type ControllerFactory<C> = Arc<dyn Fn() -> std::result::Result<C, BoxError> + Send + Sync>;

/// Trait for controller methods.
pub trait Method<C>: Send + Sync + 'static {
    /// Parameter kinds, in declaration order.
    fn kinds(&self) -> Vec<ParamKind>;

    /// Invoke with a fresh controller and bound arguments.
    fn call(
        &self,
        controller: C,
        ctx: RequestContext,
        args: BoundArgs,
    ) -> BoxFuture<'static, Result<Option<RpcResult>>>;
}

/// Wrapper that extracts typed arguments before calling the handler.
pub struct TypedMethod<C, F, A, Fut> {
    handler: F,
    _phantom: PhantomData<fn(C, A) -> Fut>,
}

impl<C, F, A, Fut> TypedMethod<C, F, A, Fut> {
    /// Create a new typed method.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<C, F, A, Fut, R> Method<C> for TypedMethod<C, F, A, Fut>
where
    C: Send + 'static,
    F: Fn(C, RequestContext, A) -> Fut + Send + Sync + 'static,
    A: FromArgs,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    R: IntoReply + 'static,
{
    fn kinds(&self) -> Vec<ParamKind> {
        A::kinds()
    }

    fn call(
        &self,
        controller: C,
        ctx: RequestContext,
        args: BoundArgs,
    ) -> BoxFuture<'static, Result<Option<RpcResult>>> {
        let parsed = match A::from_args(args) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        let fut = (self.handler)(controller, ctx, parsed);
        Box::pin(async move { fut.await.map_err(RpcError::Handler)?.into_reply() })
    }
}

/// Type-erased entry point: resolve controller, bind, call.
trait Invoke: Send + Sync {
    fn invoke(&self, ctx: RequestContext) -> BoxFuture<'static, Result<Option<RpcResult>>>;
}

struct ControllerMethod<C> {
    factory: ControllerFactory<C>,
    method: Arc<dyn Method<C>>,
    signature: Vec<ParamSpec>,
    arity_error: Option<String>,
}

impl<C: Controller> Invoke for ControllerMethod<C> {
    fn invoke(&self, ctx: RequestContext) -> BoxFuture<'static, Result<Option<RpcResult>>> {
        if let Some(reason) = &self.arity_error {
            let err = RpcError::InvalidConfiguration(reason.clone());
            return Box::pin(async move { Err(err) });
        }

        let controller = match (self.factory)() {
            Ok(c) => c,
            Err(e) => {
                let err = RpcError::InvalidConfiguration(format!(
                    "Controller {} could not be created: {}",
                    C::name(),
                    e
                ));
                return Box::pin(async move { Err(err) });
            }
        };

        let args = match bind(ctx.body(), &self.signature) {
            Ok(args) => args,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        self.method.call(controller, ctx, args)
    }
}

/// A queue bound to a controller method.
///
/// Cheap to clone; built once at registration and never mutated.
#[derive(Clone)]
pub struct HandlerDescriptor {
    queue_name: String,
    handler_type: &'static str,
    signature: Vec<ParamSpec>,
    invoker: Arc<dyn Invoke>,
}

impl HandlerDescriptor {
    /// Queue name (trimmed, non-empty).
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Name of the controller type.
    pub fn handler_type(&self) -> &'static str {
        self.handler_type
    }

    /// Declared parameters.
    pub fn signature(&self) -> &[ParamSpec] {
        &self.signature
    }

    /// Resolve a fresh controller, bind the body and run the method.
    ///
    /// `Ok(None)` means the handler produced nothing to report.
    pub fn invoke(&self, ctx: RequestContext) -> BoxFuture<'static, Result<Option<RpcResult>>> {
        self.invoker.invoke(ctx)
    }
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("queue_name", &self.queue_name)
            .field("handler_type", &self.handler_type)
            .field("signature", &self.signature)
            .finish()
    }
}

/// Registry of controllers and their queue bindings.
pub struct HandlerRegistry {
    /// Descriptors in registration order.
    descriptors: Vec<HandlerDescriptor>,
    /// Registered controller names.
    controllers: Vec<&'static str>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            controllers: Vec::new(),
        }
    }

    /// Register a controller built with `Default` for every delivery.
    pub fn register<C: Controller + Default>(&mut self) -> &mut Self {
        self.register_with(|| Ok::<C, BoxError>(C::default()))
    }

    /// Register a controller with a factory.
    ///
    /// The factory is called once per delivery. If it fails, that delivery is
    /// treated as a configuration failure: it gets no reply and is rejected.
    pub fn register_with<C, F>(&mut self, factory: F) -> &mut Self
    where
        C: Controller,
        F: Fn() -> std::result::Result<C, BoxError> + Send + Sync + 'static,
    {
        let factory: ControllerFactory<C> = Arc::new(factory);

        let mut table = QueueTable::<C>::new();
        C::queues(&mut table);

        for binding in table.into_bindings() {
            let queue = binding.queue.trim();
            if queue.is_empty() {
                tracing::debug!(
                    controller = C::name(),
                    "Skipping binding with blank queue name"
                );
                continue;
            }

            let kinds = binding.method.kinds();
            let arity_error = (kinds.len() != binding.params.len()).then(|| {
                format!(
                    "Queue '{}' on {} names {} parameters but the handler takes {}",
                    queue,
                    C::name(),
                    binding.params.len(),
                    kinds.len()
                )
            });

            let signature: Vec<ParamSpec> = binding
                .params
                .iter()
                .zip(kinds)
                .map(|(name, kind)| ParamSpec::new(name.clone(), kind))
                .collect();

            self.descriptors.push(HandlerDescriptor {
                queue_name: queue.to_string(),
                handler_type: C::name(),
                signature: signature.clone(),
                invoker: Arc::new(ControllerMethod {
                    factory: factory.clone(),
                    method: binding.method,
                    signature,
                    arity_error,
                }),
            });
        }

        self.controllers.push(C::name());
        self
    }

    /// All descriptors, in registration order.
    pub fn discover(&self) -> Vec<HandlerDescriptor> {
        self.descriptors.clone()
    }

    /// Descriptor for a queue, if bound.
    pub fn get(&self, queue: &str) -> Option<&HandlerDescriptor> {
        self.descriptors.iter().find(|d| d.queue_name == queue)
    }

    /// Registered controller names.
    pub fn controllers(&self) -> &[&'static str] {
        &self.controllers
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
