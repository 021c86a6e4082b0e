//! Bundled demo workflows.
//!
//! - `demo.greeter/greet(name)`: composes a greeting record, then delivers it.
//! - `demo.sleeper/nap(seconds)`: records a start marker, sleeps durably,
//!   records a wake-up marker.
//!
//! Both take the replay context in their first parameter slot, so submit
//! them with `--with-context`.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use duraflow_core::{
    Arguments, Codec, Durable, DurableRecord, HandlerRegistry, Json, ReplayContext, TypedValue,
    WorkflowError,
};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const GREETER: &str = "demo.greeter";
pub const SLEEPER: &str = "demo.sleeper";

/// Result of `demo.greeter/greet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Greeting {
    pub recipient: String,
    pub text: String,
}

impl DurableRecord for Greeting {
    const TYPE_TAG: &'static str = "demo.Greeting";
}

/// Register the demo handlers and the record types they persist.
pub fn register_demo_workflows(registry: &mut HandlerRegistry, codec: &mut Codec) {
    codec.register_record::<Greeting>();
    registry
        .register(GREETER, "greet", greet)
        .register(SLEEPER, "nap", nap);
}

fn greet(
    ctx: &mut ReplayContext,
    mut args: Arguments,
) -> BoxFuture<'_, Result<TypedValue, WorkflowError>> {
    Box::pin(async move {
        let name: String = args.next()?;
        args.finish()?;

        let greeting: Json<Greeting> = ctx
            .action("compose", || async move {
                Ok(Json(Greeting {
                    text: format!("Hello, {name}!"),
                    recipient: name,
                }))
            })
            .await?;

        let text = greeting.0.text.clone();
        let execution_id = ctx.execution_id();
        let _delivered_at: DateTime<Utc> = ctx
            .action("deliver", || async move {
                info!(%execution_id, greeting = %text, "greeting delivered");
                Ok(Utc::now())
            })
            .await?;

        Ok(greeting.to_typed()?)
    })
}

fn nap(
    ctx: &mut ReplayContext,
    mut args: Arguments,
) -> BoxFuture<'_, Result<TypedValue, WorkflowError>> {
    Box::pin(async move {
        let seconds: i64 = args.next()?;
        args.finish()?;
        let seconds = u64::try_from(seconds).map_err(|_| {
            WorkflowError::InvalidArguments(format!("nap length must be >= 0, got {seconds}"))
        })?;

        let fell_asleep: DateTime<Utc> = ctx
            .action("fall-asleep", || async { Ok(Utc::now()) })
            .await?;
        ctx.sleep(Duration::from_secs(seconds)).await?;
        let woke_up: DateTime<Utc> = ctx.action("wake-up", || async { Ok(Utc::now()) }).await?;

        Ok(TypedValue::String(format!(
            "slept from {} to {}",
            fell_asleep.to_rfc3339_opts(SecondsFormat::Secs, true),
            woke_up.to_rfc3339_opts(SecondsFormat::Secs, true)
        )))
    })
}
