//! Durable sleeps.
//!
//! Short sleeps run in memory as a memoized activity. Longer ones are handed
//! to the engine's scheduler and awaited through a deferred, so the
//! execution suspends instead of holding a task for the whole duration.

use std::time::Duration;

use serde_json::Value;

use crate::activity::Activity;
use crate::cause::Cause;
use crate::context::WorkflowContext;
use crate::deferred::DurableDeferred;

/// Sleeps at or below this run in memory unless the caller overrides it.
pub const DEFAULT_IN_MEMORY_THRESHOLD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct DurableClock {
    name: String,
    duration: Duration,
    deferred: DurableDeferred<(), Value>,
}

impl DurableClock {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        let name = name.into();
        let deferred = DurableDeferred::new(format!("DurableClock/{name}"));
        Self {
            name,
            duration,
            deferred,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Deferred the scheduler completes when the clock fires.
    pub fn deferred(&self) -> &DurableDeferred<(), Value> {
        &self.deferred
    }
}

/// Sleep for `duration` as part of the execution owning `ctx`.
///
/// `in_memory_threshold` defaults to the engine's clock threshold.
pub async fn sleep<E>(
    ctx: &WorkflowContext,
    name: &str,
    duration: Duration,
    in_memory_threshold: Option<Duration>,
) -> Result<(), Cause<E>> {
    let threshold = in_memory_threshold.unwrap_or_else(|| ctx.engine().default_clock_threshold());
    if duration <= threshold {
        let nap = Activity::<(), Value>::new(format!("DurableClock/{name}"), move |_| async move {
            tokio::time::sleep(duration).await;
            Ok(())
        });
        return nap.execute(ctx).await.map_err(Cause::retype);
    }

    let clock = DurableClock::new(name, duration);
    if let Err(err) = ctx
        .engine()
        .schedule_clock(ctx.instance().workflow(), ctx.execution_id(), &clock)
        .await
    {
        return Err(Cause::<Value>::from(err).retype());
    }
    clock.deferred().await_result(ctx).await.map_err(Cause::retype)
}
