//! The engine contract and its shared types.
//!
//! A [`WorkflowEngine`] owns execution state, the activity memo table and the
//! deferred-result table. Everything crossing the trait is in encoded form;
//! the typed layer in [`crate::workflow`], [`crate::activity`] and
//! [`crate::deferred`] does the decoding.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cause::{CauseEncoded, ExitEncoded};
use crate::clock::{DurableClock, DEFAULT_IN_MEMORY_THRESHOLD};
use crate::codec::CodecError;
use crate::context::WorkflowContext;
use crate::token::TokenError;
use crate::workflow::WorkflowDefinition;

pub mod fiber;
pub mod in_memory;
pub mod instance;

pub use fiber::{Fiber, FiberExit};
pub use in_memory::InMemoryWorkflowEngine;
pub use instance::{ActivityGuard, ActivityState, Finalizer, WorkflowInstance, WorkflowScope};

/// Outcome of one attempt as observed from outside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_tag")]
pub enum WorkflowResult {
    Complete {
        exit: ExitEncoded,
    },
    Suspended {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<CauseEncoded>,
    },
}

impl WorkflowResult {
    pub fn is_complete(&self) -> bool {
        matches!(self, WorkflowResult::Complete { .. })
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, WorkflowResult::Suspended { .. })
    }

    pub fn exit(&self) -> Option<&ExitEncoded> {
        match self {
            WorkflowResult::Complete { exit } => Some(exit),
            WorkflowResult::Suspended { .. } => None,
        }
    }
}

/// Encoded workflow body: payload in, encoded success or raised cause out.
pub type ExecuteFn =
    Arc<dyn Fn(Value, WorkflowContext) -> BoxFuture<'static, Result<Value, CauseEncoded>> + Send + Sync>;

/// Encoded activity body, including its interrupt-retry wrapper.
pub type ActivityFn =
    Arc<dyn Fn(WorkflowContext) -> BoxFuture<'static, Result<Value, CauseEncoded>> + Send + Sync>;

#[derive(Clone)]
pub struct ErasedActivity {
    pub name: String,
    pub execute: ActivityFn,
}

#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub execution_id: String,
    pub payload: Value,
    /// Start without waiting for a result.
    pub discard: bool,
    /// Execution id of the workflow that started this one, if any.
    pub parent: Option<String>,
}

/// External completion of a deferred.
#[derive(Debug, Clone)]
pub struct DeferredDone {
    pub workflow_name: String,
    pub execution_id: String,
    pub deferred_name: String,
    pub exit: ExitEncoded,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("workflow '{0}' is not registered")]
    UnknownWorkflow(String),
    #[error("execution '{0}' not found")]
    UnknownExecution(String),
    #[error("engine is no longer running")]
    Unavailable,
    #[error("workflow '{workflow}' still suspended after {polls} polls (execution {execution_id})")]
    ScheduleExhausted {
        workflow: String,
        execution_id: String,
        polls: u32,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Token(#[from] TokenError),
    /// The attempt raised a cause instead of producing a result.
    #[error("execution raised {0}")]
    Raised(CauseEncoded),
}

#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Make a workflow body available for execution and resumption.
    async fn register(
        &self,
        workflow: Arc<WorkflowDefinition>,
        execute: ExecuteFn,
    ) -> Result<(), EngineError>;

    /// Start an execution, or attach to the existing one with the same id.
    /// Returns `None` when `discard` is set.
    async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        options: ExecuteOptions,
    ) -> Result<Option<WorkflowResult>, EngineError>;

    /// Latest settled result of the execution, without waiting.
    async fn poll(
        &self,
        workflow: &WorkflowDefinition,
        execution_id: &str,
    ) -> Result<Option<WorkflowResult>, EngineError>;

    async fn interrupt(
        &self,
        workflow: &WorkflowDefinition,
        execution_id: &str,
    ) -> Result<(), EngineError>;

    async fn resume(&self, workflow: &WorkflowDefinition, execution_id: &str) -> Result<(), EngineError>;

    /// Run an activity under `ctx`, or return its memoized result.
    async fn activity_execute(
        &self,
        ctx: &WorkflowContext,
        activity: ErasedActivity,
        attempt: u32,
    ) -> Result<WorkflowResult, EngineError>;

    async fn deferred_result(
        &self,
        instance: &WorkflowInstance,
        deferred_name: &str,
    ) -> Result<Option<ExitEncoded>, EngineError>;

    /// Record a deferred's result if none exists yet, then resume the
    /// owning execution.
    async fn deferred_done(&self, done: DeferredDone) -> Result<(), EngineError>;

    /// Arrange for `clock`'s deferred to succeed once its duration elapses.
    async fn schedule_clock(
        &self,
        workflow: &WorkflowDefinition,
        execution_id: &str,
        clock: &DurableClock,
    ) -> Result<(), EngineError>;

    /// Durations at or below this are slept in memory by [`crate::clock::sleep`].
    fn default_clock_threshold(&self) -> Duration {
        DEFAULT_IN_MEMORY_THRESHOLD
    }
}
