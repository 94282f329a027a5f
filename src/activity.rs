//! Memoized side-effecting steps.
//!
//! An activity's result is recorded under `execution_id/name/attempt`. On
//! replay the recorded exit is returned without running the body again.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::{select_all, BoxFuture};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cause::{Cause, CauseEncoded, ExitEncoded};
use crate::codec;
use crate::context::WorkflowContext;
use crate::deferred::DurableDeferred;
use crate::engine::{ActivityFn, ErasedActivity};
use crate::keys;
use crate::schedule::RetrySchedule;
use crate::workflow::wrap_activity_result;

type BodyFn<A, E> = Arc<dyn Fn(WorkflowContext) -> BoxFuture<'static, Result<A, Cause<E>>> + Send + Sync>;

pub struct Activity<A, E> {
    name: String,
    body: BodyFn<A, E>,
    interrupt_retry_policy: RetrySchedule,
    _types: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Activity<A, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            body: self.body.clone(),
            interrupt_retry_policy: self.interrupt_retry_policy.clone(),
            _types: PhantomData,
        }
    }
}

impl<A, E> std::fmt::Debug for Activity<A, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activity").field("name", &self.name).finish()
    }
}

impl<A, E> Activity<A, E>
where
    A: Serialize + DeserializeOwned + Send + 'static,
    E: Serialize + DeserializeOwned + Send + 'static,
{
    /// The body receives a context bound to the activity's own sub-instance.
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<A, Cause<E>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(move |ctx| -> BoxFuture<'static, Result<A, Cause<E>>> {
                Box::pin(body(ctx))
            }),
            interrupt_retry_policy: RetrySchedule::interrupt_default(),
            _types: PhantomData,
        }
    }

    /// Backoff for re-running a body that was interrupted by infrastructure
    /// rather than by a workflow interrupt or suspension.
    pub fn with_interrupt_retry_policy(mut self, policy: RetrySchedule) -> Self {
        self.interrupt_retry_policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn execute(&self, ctx: &WorkflowContext) -> Result<A, Cause<E>> {
        let exit = self
            .execute_encoded(ctx)
            .await
            .map_err(|cause| cause.decode::<E>())?;
        exit.decode()
    }

    /// Like [`Activity::execute`], leaving the recorded exit undecoded. `Err`
    /// is a cause raised past the memo (suspension, infrastructure interrupt).
    pub async fn execute_encoded(&self, ctx: &WorkflowContext) -> Result<ExitEncoded, CauseEncoded> {
        let engine = ctx.engine().clone();
        let activity_ctx = ctx.clone();
        let erased = self.erased();
        let attempt = ctx.attempt();
        wrap_activity_result(ctx, async move {
            engine.activity_execute(&activity_ctx, erased, attempt).await
        })
        .await
    }

    fn erased(&self) -> ErasedActivity {
        let name = self.name.clone();
        let body = self.body.clone();
        let policy = self.interrupt_retry_policy.clone();
        let execute: ActivityFn = Arc::new(
            move |ctx: WorkflowContext| -> BoxFuture<'static, Result<Value, CauseEncoded>> {
                let name = name.clone();
                let body = body.clone();
                let policy = policy.clone();
                Box::pin(async move {
                    match run_with_interrupt_retry(&name, &policy, &ctx, &body).await {
                        Ok(value) => Ok(codec::encode(&value)?),
                        Err(cause) => Err(cause.encode()),
                    }
                })
            },
        );
        ErasedActivity {
            name: self.name.clone(),
            execute,
        }
    }
}

async fn run_with_interrupt_retry<A, E>(
    name: &str,
    policy: &RetrySchedule,
    ctx: &WorkflowContext,
    body: &BodyFn<A, E>,
) -> Result<A, Cause<E>> {
    let mut retries = 0;
    loop {
        match body(ctx.clone()).await {
            Err(Cause::Interrupt)
                if !ctx.instance().is_interrupted() && !ctx.instance().is_suspended() =>
            {
                let Some(delay) = policy.delay(retries) else {
                    crate::workflow_warn!(ctx, activity = name, retries, "activity interrupt retries exhausted");
                    return Err(Cause::Die(format!(
                        "Activity {name} interrupted and retry attempts exhausted"
                    )));
                };
                debug!(activity = name, retries, ?delay, "activity interrupted, retrying");
                retries += 1;
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// Run `f` with the attempt counter in its context, re-running it with the
/// next attempt after each typed failure, at most `times` more times.
///
/// Activities executed inside `f` are memoized per attempt, so each retry
/// performs the work again instead of replaying the failure.
pub async fn retry<T, E, F, Fut>(ctx: &WorkflowContext, times: u32, mut f: F) -> Result<T, Cause<E>>
where
    F: FnMut(WorkflowContext) -> Fut,
    Fut: Future<Output = Result<T, Cause<E>>>,
{
    let mut attempt = ctx.attempt();
    let mut remaining = times;
    loop {
        match f(ctx.with_attempt(attempt)).await {
            Err(Cause::Fail(_)) if remaining > 0 => {
                debug!(execution_id = ctx.execution_id(), attempt, remaining, "retrying after failure");
                remaining -= 1;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Race `activities`; the first to settle wins and is recorded so replays
/// return the same winner.
pub async fn race_all<A, E>(
    ctx: &WorkflowContext,
    name: &str,
    activities: Vec<Activity<A, E>>,
) -> Result<A, Cause<E>>
where
    A: Serialize + DeserializeOwned + Send + 'static,
    E: Serialize + DeserializeOwned + Send + 'static,
{
    let deferred = DurableDeferred::<A, E>::new(format!("Activity/{name}"));
    if let Some(exit) = deferred.recorded(ctx).await? {
        debug!(execution_id = ctx.execution_id(), race = name, "replaying recorded race winner");
        return exit.decode();
    }
    if activities.is_empty() {
        return Err(Cause::Die(format!("race {name} has no activities")));
    }
    let racers = activities.iter().map(|activity| Box::pin(activity.execute(ctx)));
    deferred
        .into_deferred(ctx, async move {
            let (winner, _, _) = select_all(racers).await;
            winner
        })
        .await
}

/// Stable key the current activity can hand to an external system.
pub fn idempotency_key(ctx: &WorkflowContext, key: &str, include_attempt: bool) -> String {
    let attempt = include_attempt.then(|| ctx.attempt());
    keys::activity_idempotency_key(ctx.execution_id(), key, attempt)
}
