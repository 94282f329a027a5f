//! Named, write-once results an execution can wait on.
//!
//! Awaiting a deferred with no recorded result suspends the execution. The
//! result is supplied from inside the execution ([`DurableDeferred::into_deferred`])
//! or from anywhere holding a [`Token`]. The first result recorded wins.

use std::future::Future;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cause::{Cause, Exit, ExitEncoded};
use crate::context::WorkflowContext;
use crate::engine::{DeferredDone, EngineError, WorkflowEngine};
use crate::token::Token;
use crate::workflow::Workflow;

pub struct DurableDeferred<A, E> {
    name: String,
    _types: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for DurableDeferred<A, E> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl<A, E> std::fmt::Debug for DurableDeferred<A, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableDeferred").field("name", &self.name).finish()
    }
}

impl<A, E> DurableDeferred<A, E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _types: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A deferred scoped to the current logical attempt, named `name/attempt`.
    pub fn with_activity_attempt(&self, ctx: &WorkflowContext) -> Self {
        Self::new(format!("{}/{}", self.name, ctx.attempt()))
    }

    /// Token addressing this deferred in the execution owning `ctx`.
    pub fn token(&self, ctx: &WorkflowContext) -> Token {
        Token::new(ctx.workflow_name(), ctx.execution_id(), &self.name)
    }

    pub fn token_from_execution_id<P, S, W>(&self, workflow: &Workflow<P, S, W>, execution_id: &str) -> Token {
        Token::new(workflow.name(), execution_id, &self.name)
    }

    /// Token addressing this deferred in the execution `payload` maps to.
    pub fn token_from_payload<P, S, W>(&self, workflow: &Workflow<P, S, W>, payload: &P) -> Token {
        self.token_from_execution_id(workflow, &workflow.execution_id(payload))
    }

    pub(crate) async fn recorded(&self, ctx: &WorkflowContext) -> Result<Option<ExitEncoded>, EngineError> {
        ctx.engine().deferred_result(ctx.instance(), &self.name).await
    }
}

impl<A, E> DurableDeferred<A, E>
where
    A: Serialize + DeserializeOwned + Send + 'static,
    E: Serialize + DeserializeOwned + Send + 'static,
{
    /// The recorded result, or suspend the execution until one arrives.
    pub async fn await_result(&self, ctx: &WorkflowContext) -> Result<A, Cause<E>> {
        match self.recorded(ctx).await? {
            Some(exit) => exit.decode(),
            None => {
                crate::workflow_info!(ctx, deferred = %self.name, "deferred not yet done, suspending");
                ctx.instance().set_suspended(true);
                Err(Cause::Interrupt)
            }
        }
    }

    /// Run `effect` and record its outcome as this deferred's result,
    /// unless the execution suspended while running it.
    pub async fn into_deferred<F>(&self, ctx: &WorkflowContext, effect: F) -> Result<A, Cause<E>>
    where
        F: Future<Output = Result<A, Cause<E>>>,
    {
        let result = effect.await;
        if ctx.instance().is_suspended() {
            return result;
        }
        let done = DeferredDone {
            workflow_name: ctx.workflow_name().to_string(),
            execution_id: ctx.execution_id().to_string(),
            deferred_name: self.name.clone(),
            exit: ExitEncoded::from_result(&result),
        };
        ctx.engine().deferred_done(done).await?;
        result
    }

    /// Complete the deferred addressed by `token`. Later completions of the
    /// same deferred are ignored.
    pub async fn done(&self, engine: &dyn WorkflowEngine, token: &Token, exit: Exit<A, E>) -> Result<(), EngineError> {
        let parts = token.parse()?;
        engine
            .deferred_done(DeferredDone {
                workflow_name: parts.workflow_name,
                execution_id: parts.execution_id,
                deferred_name: parts.deferred_name,
                exit: exit.encode(),
            })
            .await
    }

    pub async fn succeed(&self, engine: &dyn WorkflowEngine, token: &Token, value: A) -> Result<(), EngineError> {
        self.done(engine, token, Exit::Success(value)).await
    }

    pub async fn fail(&self, engine: &dyn WorkflowEngine, token: &Token, error: E) -> Result<(), EngineError> {
        self.done(engine, token, Exit::Failure(Cause::Fail(error))).await
    }

    pub async fn fail_cause(
        &self,
        engine: &dyn WorkflowEngine,
        token: &Token,
        cause: Cause<E>,
    ) -> Result<(), EngineError> {
        self.done(engine, token, Exit::Failure(cause)).await
    }
}
