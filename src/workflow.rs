//! Workflow definitions and the attempt state machine.
//!
//! A [`Workflow`] is a typed handle over an erased [`WorkflowDefinition`]. Its
//! body is registered with an engine and re-run from the top on every
//! attempt; memoized activities and recorded deferreds make the replay reach
//! the same point without repeating side effects.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::annotations::{Annotation, Annotations, CaptureDefects, SuspendOnFailure};
use crate::cause::{panic_message, Cause, CauseEncoded, Exit, ExitEncoded};
use crate::codec;
use crate::context::WorkflowContext;
use crate::engine::{
    EngineError, ExecuteFn, ExecuteOptions, FiberExit, WorkflowEngine, WorkflowInstance,
    WorkflowResult,
};
use crate::keys;
use crate::schedule::RetrySchedule;

/// Type-erased workflow identity shared with the engine.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub name: String,
    pub annotations: Annotations,
    pub suspended_retry_schedule: RetrySchedule,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotations: Annotations::new(),
            suspended_retry_schedule: RetrySchedule::suspended_default(),
        }
    }
}

type KeyFn<P> = Arc<dyn Fn(&P) -> String + Send + Sync>;

/// Typed workflow handle: payload `P`, success `S`, failure `E`.
pub struct Workflow<P, S, E> {
    definition: Arc<WorkflowDefinition>,
    idempotency_key: KeyFn<P>,
    _types: PhantomData<fn(P) -> (S, E)>,
}

impl<P, S, E> Clone for Workflow<P, S, E> {
    fn clone(&self) -> Self {
        Self {
            definition: self.definition.clone(),
            idempotency_key: self.idempotency_key.clone(),
            _types: PhantomData,
        }
    }
}

impl<P, S, E> std::fmt::Debug for Workflow<P, S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("definition", &self.definition)
            .finish()
    }
}

impl<P, S, E> Workflow<P, S, E> {
    /// `idempotency_key` maps a payload to the key its execution id is
    /// derived from. Equal keys mean the same execution.
    pub fn new(
        name: impl Into<String>,
        idempotency_key: impl Fn(&P) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            definition: Arc::new(WorkflowDefinition::new(name)),
            idempotency_key: Arc::new(idempotency_key),
            _types: PhantomData,
        }
    }

    pub fn with_annotation<A: Annotation>(mut self, value: A::Value) -> Self {
        Arc::make_mut(&mut self.definition).annotations.set::<A>(value);
        self
    }

    /// Schedule used by [`Workflow::execute`] to re-poll a suspended run.
    pub fn with_suspended_retry_schedule(mut self, schedule: RetrySchedule) -> Self {
        Arc::make_mut(&mut self.definition).suspended_retry_schedule = schedule;
        self
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<WorkflowDefinition> {
        &self.definition
    }

    pub fn execution_id(&self, payload: &P) -> String {
        keys::execution_id(&self.definition.name, &(self.idempotency_key)(payload))
    }
}

impl<P, S, E> Workflow<P, S, E>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
    S: Serialize + DeserializeOwned + Send + 'static,
    E: Serialize + DeserializeOwned + Send + 'static,
{
    /// Register `body` as this workflow's implementation.
    pub async fn register<F, Fut>(&self, engine: &dyn WorkflowEngine, body: F) -> Result<(), EngineError>
    where
        F: Fn(P, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, Cause<E>>> + Send + 'static,
    {
        let body = Arc::new(body);
        let execute: ExecuteFn = Arc::new(
            move |payload: Value, ctx: WorkflowContext| -> BoxFuture<'static, Result<Value, CauseEncoded>> {
                let body = body.clone();
                Box::pin(async move {
                    let payload: P = codec::decode(&payload)?;
                    match body(payload, ctx).await {
                        Ok(success) => Ok(codec::encode(&success)?),
                        Err(cause) => Err(cause.encode()),
                    }
                })
            },
        );
        engine.register(self.definition.clone(), execute).await
    }

    /// Run to completion, re-polling while the execution is suspended.
    pub async fn execute(&self, engine: &dyn WorkflowEngine, payload: P) -> Result<S, Cause<E>> {
        let execution_id = self.execution_id(&payload);
        let payload = codec::encode(&payload)?;
        let schedule = &self.definition.suspended_retry_schedule;
        let mut polls = 0;
        loop {
            let options = ExecuteOptions {
                execution_id: execution_id.clone(),
                payload: payload.clone(),
                discard: false,
                parent: None,
            };
            match engine.execute(&self.definition, options).await? {
                Some(WorkflowResult::Complete { exit }) => return exit.decode(),
                Some(WorkflowResult::Suspended { .. }) | None => {
                    let Some(delay) = schedule.delay(polls) else {
                        warn!(
                            workflow = %self.definition.name,
                            %execution_id,
                            polls,
                            "gave up waiting for suspended execution"
                        );
                        return Err(EngineError::ScheduleExhausted {
                            workflow: self.definition.name.clone(),
                            execution_id,
                            polls,
                        }
                        .into());
                    };
                    debug!(
                        workflow = %self.definition.name,
                        %execution_id,
                        polls,
                        ?delay,
                        "execution suspended, polling again"
                    );
                    polls += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Start an execution in the background and return its id.
    pub async fn execute_discard(
        &self,
        engine: &dyn WorkflowEngine,
        payload: P,
    ) -> Result<String, EngineError> {
        let execution_id = self.execution_id(&payload);
        let options = ExecuteOptions {
            execution_id: execution_id.clone(),
            payload: codec::encode(&payload)?,
            discard: true,
            parent: None,
        };
        engine.execute(&self.definition, options).await?;
        Ok(execution_id)
    }

    /// Run as a child of the workflow that owns `ctx`.
    ///
    /// A suspended child suspends the parent; a completed child resumes it.
    /// If the parent execution is interrupted while the child is unfinished,
    /// the child is interrupted too.
    pub async fn execute_child(&self, ctx: &WorkflowContext, payload: P) -> Result<S, Cause<E>> {
        let parent = ctx.instance();
        if parent.is_interrupted() {
            return Err(Cause::Interrupt);
        }
        let execution_id = self.execution_id(&payload);
        let payload = codec::encode(&payload)?;
        let parent_scope = parent.scope().clone();

        let child = self.definition.clone();
        let child_id = execution_id.clone();
        let engine = Arc::downgrade(ctx.engine());
        let scope = parent_scope.clone();
        ctx.add_finalizer(move |_exit: ExitEncoded| {
            Box::pin(async move {
                let Some(engine) = engine.upgrade() else { return };
                if !scope.is_interrupted() {
                    return;
                }
                let finished = matches!(
                    engine.poll(&child, &child_id).await,
                    Ok(Some(WorkflowResult::Complete { .. }))
                );
                if !finished {
                    debug!(
                        workflow = %child.name,
                        execution_id = %child_id,
                        "interrupting child of interrupted parent"
                    );
                    let _ = engine.interrupt(&child, &child_id).await;
                }
            }) as BoxFuture<'static, ()>
        })
        .await;

        let engine = ctx.engine().clone();
        let definition = self.definition.clone();
        let start = ExecuteOptions {
            execution_id,
            payload,
            discard: true,
            parent: Some(parent.execution_id().to_string()),
        };
        let exit = wrap_activity_result(ctx, async move {
            let join = ExecuteOptions {
                discard: false,
                ..start.clone()
            };
            engine.execute(&definition, start).await?;
            // The parent may have been interrupted, and its scope closed,
            // before the child existed for the finalizer to find.
            if parent_scope.is_interrupted() {
                debug!(
                    workflow = %definition.name,
                    execution_id = %join.execution_id,
                    "parent interrupted while starting child"
                );
                engine.interrupt(&definition, &join.execution_id).await?;
            }
            let result = engine.execute(&definition, join).await?;
            Ok(result.unwrap_or(WorkflowResult::Suspended { cause: None }))
        })
        .await
        .map_err(|cause| cause.decode::<E>())?;
        exit.decode()
    }

    pub async fn poll(
        &self,
        engine: &dyn WorkflowEngine,
        execution_id: &str,
    ) -> Result<Option<WorkflowResult>, EngineError> {
        engine.poll(&self.definition, execution_id).await
    }

    pub async fn interrupt(&self, engine: &dyn WorkflowEngine, execution_id: &str) -> Result<(), EngineError> {
        engine.interrupt(&self.definition, execution_id).await
    }

    pub async fn resume(&self, engine: &dyn WorkflowEngine, execution_id: &str) -> Result<(), EngineError> {
        engine.resume(&self.definition, execution_id).await
    }
}

impl<E: DeserializeOwned> From<EngineError> for Cause<E> {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Raised(cause) => cause.decode(),
            other => Cause::Die(other.to_string()),
        }
    }
}

/// Map one attempt of `body` onto a [`WorkflowResult`] or a raised cause.
///
/// - A cancelled attempt fails with `Interrupt`.
/// - With `SuspendOnFailure`, any failure marks the instance suspended and
///   keeps a squashed defect as the suspension cause.
/// - A suspended instance yields `Suspended` once its activities drain.
/// - A bare interrupt on an instance nobody interrupted, or a defect with
///   `CaptureDefects` off, is raised.
/// - Everything else is `Complete`.
///
/// The execution scope is closed on every outcome except `Suspended`.
pub(crate) async fn into_result(
    instance: Arc<WorkflowInstance>,
    body: BoxFuture<'static, Result<Value, CauseEncoded>>,
) -> FiberExit {
    let annotations = &instance.workflow().annotations;
    let capture_defects = annotations.get::<CaptureDefects>();
    let suspend_on_failure = annotations.get::<SuspendOnFailure>();

    let cancellation = instance.cancellation().clone();
    let outcome = tokio::select! {
        biased;
        _ = cancellation.cancelled() => Err(Cause::Interrupt),
        caught = AssertUnwindSafe(body).catch_unwind() => match caught {
            Ok(outcome) => outcome,
            Err(panic) => Err(Cause::Die(panic_message(panic))),
        },
    };
    if instance.is_interrupted() {
        instance.set_suspended(false);
    }

    let outcome = match outcome {
        Err(cause) if suspend_on_failure => {
            instance.set_suspended(true);
            if !cause.is_interrupted_only() {
                instance.set_cause(cause.squash());
            }
            Err(Cause::Interrupt)
        }
        other => other,
    };

    let result = match outcome {
        Ok(value) => Ok(WorkflowResult::Complete {
            exit: Exit::Success(value),
        }),
        Err(_) if instance.is_suspended() => {
            instance.activity_state().wait_idle().await;
            Ok(WorkflowResult::Suspended {
                cause: instance.cause(),
            })
        }
        Err(cause)
            if (!instance.is_interrupted() && cause.is_interrupted_only())
                || (!capture_defects && cause.is_die()) =>
        {
            if cause.is_die() {
                crate::workflow_error!(instance, cause = %cause, "defect raised out of attempt");
            }
            Err(cause)
        }
        Err(cause) => Ok(WorkflowResult::Complete {
            exit: Exit::Failure(cause),
        }),
    };

    let closing = match &result {
        Ok(WorkflowResult::Complete { exit }) => Some(exit.clone()),
        Ok(WorkflowResult::Suspended { .. }) => None,
        Err(cause) => Some(Exit::Failure(cause.clone())),
    };
    if let Some(exit) = closing {
        instance.scope().close(&exit).await;
    }
    result
}

/// Run an activity-like engine call on behalf of the attempt in `ctx`.
///
/// The call runs in its own task and holds an activity slot until it
/// finishes, even if this future is dropped. A `Suspended` result marks the
/// instance suspended and surfaces as `Interrupt`.
pub(crate) async fn wrap_activity_result<F>(
    ctx: &WorkflowContext,
    call: F,
) -> Result<ExitEncoded, CauseEncoded>
where
    F: Future<Output = Result<WorkflowResult, EngineError>> + Send + 'static,
{
    let instance = ctx.instance().clone();
    if instance.is_suspended() {
        instance.activity_state().wait_idle().await;
        return Err(Cause::Interrupt);
    }

    let guard = instance.enter_activity();
    let task = tokio::spawn(async move {
        let _guard = guard;
        call.await
    });
    let result = match task.await {
        Ok(result) => result,
        Err(join) if join.is_panic() => return Err(Cause::Die(panic_message(join.into_panic()))),
        Err(_) => return Err(Cause::Interrupt),
    };

    match result {
        Ok(WorkflowResult::Complete { exit }) => Ok(exit),
        Ok(WorkflowResult::Suspended { .. }) => {
            instance.set_suspended(true);
            Err(Cause::Interrupt)
        }
        Err(EngineError::Raised(cause)) => Err(cause),
        Err(other) => Err(Cause::Die(other.to_string())),
    }
}

/// Run `effect`; if it succeeds, register `compensation` to run with its
/// value should the execution end in failure.
pub async fn with_compensation<T, Er, Fut, C, CFut>(
    ctx: &WorkflowContext,
    effect: Fut,
    compensation: C,
) -> Result<T, Cause<Er>>
where
    T: Clone + Send + 'static,
    Fut: Future<Output = Result<T, Cause<Er>>>,
    C: FnOnce(T, CauseEncoded) -> CFut + Send + 'static,
    CFut: Future<Output = ()> + Send + 'static,
{
    let ordinal = ctx.instance().next_finalizer_ordinal();
    let value = effect.await?;
    let captured = value.clone();
    ctx.instance()
        .scope()
        .add_finalizer(
            Some(ordinal),
            Box::new(move |exit: ExitEncoded| -> BoxFuture<'static, ()> {
                Box::pin(async move {
                    if let Exit::Failure(cause) = exit {
                        compensation(captured, cause).await;
                    }
                })
            }),
        )
        .await;
    Ok(value)
}
