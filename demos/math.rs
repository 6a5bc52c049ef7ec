//! Math Responder - controller bound to a few queues.
//!
//! This example demonstrates:
//! - Declaring queue bindings with `Controller::queues`
//! - Named, bare-scalar, enum and composite parameters
//! - Handler errors turning into failure results
//!
//! By default the demo runs against the in-process broker and prints every
//! reply. Pass `--broker` to serve the same queues on a real RabbitMQ, using
//! `appsettings*.json` and `RPC__*` variables for the connection.
//!
//! ```text
//! cargo run --example math
//! cargo run --example math -- --broker
//! ```

use queuerpc::transport::{BrokerEvent, MemoryBroker};
use queuerpc::{
    App, AppBuilder, Controller, Enum, HandlerError, HandlerResult, Json, QueueTable,
    RequestContext, RpcResult, SymbolicEnum,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
enum Rounding {
    Floor,
    Ceil,
    Nearest,
}

impl SymbolicEnum for Rounding {
    const VARIANTS: &'static [&'static str] = &["Floor", "Ceil", "Nearest"];

    fn from_index(index: usize) -> Option<Self> {
        [Rounding::Floor, Rounding::Ceil, Rounding::Nearest]
            .into_iter()
            .nth(index)
    }
}

#[derive(Debug, Deserialize)]
struct Rect {
    width: f64,
    height: f64,
}

#[derive(Debug, Serialize)]
struct Measure {
    area: f64,
    perimeter: f64,
}

#[derive(Default)]
struct MathController;

impl MathController {
    async fn add(self, _ctx: RequestContext, (a, b): (i64, i64)) -> HandlerResult<i64> {
        Ok(a + b)
    }

    async fn div(self, _ctx: RequestContext, (a, b): (f64, f64)) -> HandlerResult<RpcResult> {
        if b == 0.0 {
            return Err(HandlerError::new("DivideByZero", "b must not be zero"));
        }
        Ok(RpcResult::ok(a / b).with_message(format!("{} / {}", a, b)))
    }

    async fn round(
        self,
        _ctx: RequestContext,
        (value, Enum(mode)): (f64, Enum<Rounding>),
    ) -> HandlerResult<i64> {
        let rounded = match mode {
            Rounding::Floor => value.floor(),
            Rounding::Ceil => value.ceil(),
            Rounding::Nearest => value.round(),
        };
        Ok(rounded as i64)
    }

    async fn square(self, _ctx: RequestContext, (n,): (i64,)) -> HandlerResult<i64> {
        Ok(n * n)
    }

    async fn measure(
        self,
        _ctx: RequestContext,
        (Json(rect),): (Json<Rect>,),
    ) -> HandlerResult<Json<Measure>> {
        Ok(Json(Measure {
            area: rect.width * rect.height,
            perimeter: 2.0 * (rect.width + rect.height),
        }))
    }
}

impl Controller for MathController {
    fn queues(table: &mut QueueTable<Self>) {
        table
            .bind("math.add", &["a", "b"], MathController::add)
            .bind("math.div", &["a", "b"], MathController::div)
            .bind("math.round", &["value", "mode"], MathController::round)
            .bind("math.square", &["n"], MathController::square)
            .bind("math.measure", &["rect"], MathController::measure);
    }
}

fn builder() -> AppBuilder {
    App::builder().controller::<MathController>()
}

async fn run_in_memory() -> queuerpc::Result<()> {
    let broker = MemoryBroker::new();
    let mut events = broker.subscribe();
    let app = builder().start_with(broker.clone()).await?;

    let requests = [
        ("math.add", r#"{"a": 2, "b": 3}"#),
        ("math.div", r#"{"a": 1, "b": 0}"#),
        ("math.div", r#"{"a": 9, "b": 4}"#),
        ("math.round", r#"{"value": 2.5, "mode": "floor"}"#),
        ("math.square", "12"),
        ("math.measure", r#"{"width": 3, "height": 4}"#),
    ];

    let reply_to = Some("demo.replies");
    for (n, (queue, body)) in requests.iter().enumerate() {
        let correlation_id = format!("req-{}", n);
        broker.deliver(queue, *body, Some(&correlation_id), reply_to)?;
    }

    let mut replies = 0;
    while replies < requests.len() {
        match events.recv().await {
            Ok(BrokerEvent::Published(reply)) => {
                replies += 1;
                println!(
                    "{} <- {}",
                    reply.correlation_id.as_deref().unwrap_or("-"),
                    String::from_utf8_lossy(&reply.body)
                );
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("event stream ended: {}", e);
                break;
            }
        }
    }

    app.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    queuerpc::logging::init();

    if std::env::args().any(|arg| arg == "--broker") {
        let app = AppBuilder::from_config()?
            .controller::<MathController>()
            .start()
            .await?;
        println!("Serving {:?}", app.queues());
        app.wait_for_shutdown().await?;
    } else {
        run_in_memory().await?;
    }
    Ok(())
}
