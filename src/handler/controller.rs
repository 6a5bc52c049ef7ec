//! Controllers and their queue bindings.
//!
//! A controller is a type whose methods are exposed over queues. It declares
//! its bindings explicitly in [`Controller::queues`]; each binding pairs a
//! queue name and parameter names with a handler function.

use std::future::Future;
use std::sync::Arc;

use super::registry::{Method, TypedMethod};
use super::RequestContext;
use crate::binder::FromArgs;
use crate::error::{short_type_name, HandlerError};
use crate::result::IntoReply;

/// Result type for handler functions.
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// A type whose methods are bound to queues.
///
/// A fresh value is built for every delivery, so handlers take `self` by value.
///
/// # Example
///
/// ```
/// use queuerpc::{Controller, HandlerError, HandlerResult, QueueTable, RequestContext};
///
/// #[derive(Default)]
/// struct Math;
///
/// impl Math {
///     async fn add(self, _ctx: RequestContext, (a, b): (i64, i64)) -> HandlerResult<i64> {
///         Ok(a + b)
///     }
///
///     async fn div(self, _ctx: RequestContext, (a, b): (i64, i64)) -> HandlerResult<i64> {
///         if b == 0 {
///             return Err(HandlerError::new("DivideByZero", "b must not be zero"));
///         }
///         Ok(a / b)
///     }
/// }
///
/// impl Controller for Math {
///     fn queues(table: &mut QueueTable<Self>) {
///         table
///             .bind("math.add", &["a", "b"], Math::add)
///             .bind("math.div", &["a", "b"], Math::div);
///     }
/// }
/// ```
pub trait Controller: Sized + Send + 'static {
    /// Type tag used in descriptors and logs.
    fn name() -> &'static str {
        short_type_name::<Self>()
    }

    /// Declare the queue bindings of this controller.
    fn queues(table: &mut QueueTable<Self>);
}

pub(crate) struct QueueBinding<C> {
    pub queue: String,
    pub params: Vec<String>,
    pub method: Arc<dyn Method<C>>,
}

/// Bindings declared by one controller.
pub struct QueueTable<C> {
    bindings: Vec<QueueBinding<C>>,
}

impl<C: Controller> QueueTable<C> {
    pub(crate) fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Bind a queue to a handler.
    ///
    /// # Arguments
    ///
    /// * `queue` - Queue name (trimmed; blank names are skipped at registration)
    /// * `params` - Parameter names, one per element of the handler's argument tuple
    /// * `handler` - Function taking the controller, the request context and the arguments
    pub fn bind<F, A, Fut, R>(&mut self, queue: &str, params: &[&str], handler: F) -> &mut Self
    where
        F: Fn(C, RequestContext, A) -> Fut + Send + Sync + 'static,
        A: FromArgs,
        Fut: Future<Output = HandlerResult<R>> + Send + 'static,
        R: IntoReply + 'static,
    {
        self.bindings.push(QueueBinding {
            queue: queue.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            method: Arc::new(TypedMethod::new(handler)),
        });
        self
    }

    /// Number of declared bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub(crate) fn into_bindings(self) -> Vec<QueueBinding<C>> {
        self.bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeter;

    impl Greeter {
        async fn greet(self, _ctx: RequestContext, (name,): (String,)) -> HandlerResult<String> {
            Ok(format!("hello {}", name))
        }
    }

    impl Controller for Greeter {
        fn queues(table: &mut QueueTable<Self>) {
            table.bind("greet", &["name"], Greeter::greet);
        }
    }

    #[test]
    fn test_default_name_is_short_type_name() {
        assert_eq!(Greeter::name(), "Greeter");
    }

    #[test]
    fn test_bind_records_binding() {
        let mut table = QueueTable::<Greeter>::new();
        Greeter::queues(&mut table);

        assert_eq!(table.len(), 1);
        let bindings = table.into_bindings();
        assert_eq!(bindings[0].queue, "greet");
        assert_eq!(bindings[0].params, vec!["name".to_string()]);
    }
}
