//! Reference engine keeping all state in process memory.
//!
//! Tables are guarded by `parking_lot` mutexes and never held across an
//! await. Attempts run as spawned [`Fiber`]s.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cause::{Exit, ExitEncoded};
use crate::clock::DurableClock;
use crate::config::EngineOptions;
use crate::context::WorkflowContext;
use crate::engine::{
    DeferredDone, EngineError, ErasedActivity, ExecuteFn, ExecuteOptions, Fiber, FiberExit,
    WorkflowEngine, WorkflowInstance, WorkflowResult, WorkflowScope,
};
use crate::keys;
use crate::logging;
use crate::workflow::{into_result, WorkflowDefinition};

#[derive(Clone)]
struct Registration {
    definition: Arc<WorkflowDefinition>,
    execute: ExecuteFn,
}

struct ExecutionState {
    definition: Arc<WorkflowDefinition>,
    execute: ExecuteFn,
    payload: Value,
    parent: Option<String>,
    scope: Arc<WorkflowScope>,
    instance: Arc<WorkflowInstance>,
    fiber: Option<Fiber>,
    /// A resume arrived while the current attempt was still running.
    resume_requested: bool,
}

enum MemoEntry {
    InFlight(Fiber),
    Recorded(WorkflowResult),
}

pub struct InMemoryWorkflowEngine {
    this: Weak<InMemoryWorkflowEngine>,
    options: EngineOptions,
    workflows: Mutex<HashMap<String, Registration>>,
    executions: Mutex<HashMap<String, ExecutionState>>,
    activities: Mutex<HashMap<String, MemoEntry>>,
    deferred_results: Mutex<HashMap<String, ExitEncoded>>,
    clocks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl InMemoryWorkflowEngine {
    pub fn new() -> Arc<Self> {
        Self::with_options(EngineOptions::default())
    }

    /// Build an engine, installing logging if `options` asks for it.
    pub fn with_options(options: EngineOptions) -> Arc<Self> {
        if let Some(observability) = &options.observability {
            if let Err(err) = logging::init_logging(observability) {
                debug!(error = %err, "logging already initialized");
            }
        }
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            options,
            workflows: Mutex::new(HashMap::new()),
            executions: Mutex::new(HashMap::new()),
            activities: Mutex::new(HashMap::new()),
            deferred_results: Mutex::new(HashMap::new()),
            clocks: Mutex::new(HashMap::new()),
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn execution_count(&self) -> usize {
        self.executions.lock().len()
    }

    /// Number of activities with a recorded (non-transient) result.
    pub fn activity_memo_count(&self) -> usize {
        self.activities
            .lock()
            .values()
            .filter(|entry| matches!(entry, MemoEntry::Recorded(r) if r.is_complete()))
            .count()
    }

    pub fn deferred_result_count(&self) -> usize {
        self.deferred_results.lock().len()
    }

    /// Durable clocks waiting to fire.
    pub fn scheduled_clock_count(&self) -> usize {
        self.clocks.lock().len()
    }

    fn handle(&self) -> Result<Arc<InMemoryWorkflowEngine>, EngineError> {
        self.this.upgrade().ok_or(EngineError::Unavailable)
    }

    /// Start a new attempt unless one is running or the execution completed.
    fn resume_execution(&self, execution_id: &str) {
        let mut executions = self.executions.lock();
        self.resume_locked(&mut executions, execution_id);
    }

    fn resume_locked(&self, executions: &mut HashMap<String, ExecutionState>, execution_id: &str) {
        let Ok(engine) = self.handle() else { return };
        let Some(state) = executions.get_mut(execution_id) else {
            debug!(execution_id, "resume of unknown execution ignored");
            return;
        };
        if let Some(fiber) = &state.fiber {
            match fiber.poll() {
                None => {
                    debug!(execution_id, "attempt still running, deferring resume");
                    state.resume_requested = true;
                    return;
                }
                Some(Ok(WorkflowResult::Complete { .. })) => return,
                Some(_) => {}
            }
        }

        let interrupted = state.instance.is_interrupted();
        let instance = Arc::new(WorkflowInstance::new(
            state.definition.clone(),
            execution_id,
            state.scope.clone(),
            CancellationToken::new(),
        ));
        if interrupted {
            instance.set_interrupted(true);
            instance.cancellation().cancel();
        }
        state.instance = instance.clone();
        state.resume_requested = false;

        let ctx = WorkflowContext::new(engine, instance.clone());
        let attempt = into_result(instance.clone(), (state.execute)(state.payload.clone(), ctx));
        let this = self.this.clone();
        let id = execution_id.to_string();
        state.fiber = Some(Fiber::spawn(
            instance.cancellation().clone(),
            attempt,
            move |exit| {
                if let Some(engine) = this.upgrade() {
                    engine.attempt_settled(&id, exit);
                }
            },
        ));
        debug!(workflow = %state.definition.name, execution_id, interrupted, "attempt started");
    }

    fn attempt_settled(&self, execution_id: &str, exit: &FiberExit) {
        let (resume_again, parent) = {
            let mut executions = self.executions.lock();
            let Some(state) = executions.get_mut(execution_id) else { return };
            match exit {
                Ok(WorkflowResult::Complete { .. }) => (false, state.parent.clone()),
                _ => (std::mem::take(&mut state.resume_requested), None),
            }
        };
        match exit {
            Ok(WorkflowResult::Complete { exit }) => {
                info!(execution_id, success = exit.is_success(), "execution completed")
            }
            Ok(WorkflowResult::Suspended { cause }) => {
                info!(execution_id, has_cause = cause.is_some(), "execution suspended")
            }
            Err(cause) => warn!(execution_id, cause = %cause, "attempt raised"),
        }
        if resume_again {
            self.resume_execution(execution_id);
        }
        if let Some(parent) = parent {
            debug!(execution_id, parent = %parent, "resuming parent of completed child");
            self.resume_execution(&parent);
        }
    }

    fn record_deferred(&self, done: DeferredDone) {
        let key = keys::deferred_key(&done.execution_id, &done.deferred_name);
        {
            let mut results = self.deferred_results.lock();
            if results.contains_key(&key) {
                debug!(
                    workflow = %done.workflow_name,
                    deferred = %done.deferred_name,
                    "deferred already done, ignoring"
                );
                return;
            }
            results.insert(key, done.exit);
        }
        debug!(
            workflow = %done.workflow_name,
            execution_id = %done.execution_id,
            deferred = %done.deferred_name,
            "deferred done"
        );
        self.resume_execution(&done.execution_id);
    }

    fn record_activity(&self, key: &str, exit: &FiberExit) {
        let mut activities = self.activities.lock();
        match exit {
            Ok(result) => {
                activities.insert(key.to_string(), MemoEntry::Recorded(result.clone()));
            }
            Err(_) => {
                activities.remove(key);
            }
        }
    }
}

#[async_trait]
impl WorkflowEngine for InMemoryWorkflowEngine {
    async fn register(
        &self,
        workflow: Arc<WorkflowDefinition>,
        execute: ExecuteFn,
    ) -> Result<(), EngineError> {
        let name = workflow.name.clone();
        let previous = self.workflows.lock().insert(
            name.clone(),
            Registration {
                definition: workflow,
                execute,
            },
        );
        if previous.is_some() {
            warn!(workflow = %name, "workflow re-registered, replacing previous body");
        } else {
            info!(workflow = %name, "workflow registered");
        }
        Ok(())
    }

    async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        options: ExecuteOptions,
    ) -> Result<Option<WorkflowResult>, EngineError> {
        let registration = self
            .workflows
            .lock()
            .get(&workflow.name)
            .cloned();
        let Some(registration) = registration else {
            warn!(workflow = %workflow.name, execution_id = %options.execution_id, "execute of unregistered workflow");
            return Err(EngineError::UnknownWorkflow(workflow.name.clone()));
        };

        {
            let mut executions = self.executions.lock();
            if !executions.contains_key(&options.execution_id) {
                let scope = Arc::new(WorkflowScope::new());
                let instance = Arc::new(WorkflowInstance::new(
                    registration.definition.clone(),
                    options.execution_id.clone(),
                    scope.clone(),
                    CancellationToken::new(),
                ));
                executions.insert(
                    options.execution_id.clone(),
                    ExecutionState {
                        definition: registration.definition,
                        execute: registration.execute,
                        payload: options.payload,
                        parent: options.parent,
                        scope,
                        instance,
                        fiber: None,
                        resume_requested: false,
                    },
                );
                info!(workflow = %workflow.name, execution_id = %options.execution_id, "execution created");
                // Start under the same lock so concurrent callers always find a fiber.
                self.resume_locked(&mut executions, &options.execution_id);
            }
        }
        if options.discard {
            return Ok(None);
        }

        let fiber = self
            .executions
            .lock()
            .get(&options.execution_id)
            .and_then(|state| state.fiber.clone())
            .ok_or_else(|| EngineError::UnknownExecution(options.execution_id.clone()))?;
        match fiber.join().await {
            Ok(result) => Ok(Some(result)),
            Err(cause) => Err(EngineError::Raised(cause)),
        }
    }

    async fn poll(
        &self,
        _workflow: &WorkflowDefinition,
        execution_id: &str,
    ) -> Result<Option<WorkflowResult>, EngineError> {
        let fiber = self
            .executions
            .lock()
            .get(execution_id)
            .and_then(|state| state.fiber.clone());
        Ok(fiber.and_then(|fiber| fiber.poll()).map(|exit| match exit {
            Ok(result) => result,
            Err(cause) => WorkflowResult::Suspended { cause: Some(cause) },
        }))
    }

    async fn interrupt(
        &self,
        workflow: &WorkflowDefinition,
        execution_id: &str,
    ) -> Result<(), EngineError> {
        let fiber = {
            let executions = self.executions.lock();
            let Some(state) = executions.get(execution_id) else {
                debug!(workflow = %workflow.name, execution_id, "interrupt of unknown execution ignored");
                return Ok(());
            };
            state.instance.set_interrupted(true);
            state.fiber.clone()
        };
        info!(workflow = %workflow.name, execution_id, "interrupt requested");
        if let Some(fiber) = fiber.filter(Fiber::is_running) {
            fiber.interrupt();
        }
        self.resume_execution(execution_id);
        Ok(())
    }

    async fn resume(&self, _workflow: &WorkflowDefinition, execution_id: &str) -> Result<(), EngineError> {
        self.resume_execution(execution_id);
        Ok(())
    }

    async fn activity_execute(
        &self,
        ctx: &WorkflowContext,
        activity: ErasedActivity,
        attempt: u32,
    ) -> Result<WorkflowResult, EngineError> {
        let parent = ctx.instance();
        let key = keys::activity_key(parent.execution_id(), &activity.name, attempt);

        let fiber = {
            let mut activities = self.activities.lock();
            match activities.get(&key) {
                Some(MemoEntry::Recorded(result)) if result.is_complete() => {
                    debug!(activity = %activity.name, attempt, "activity replayed from memo");
                    return Ok(result.clone());
                }
                Some(MemoEntry::InFlight(fiber)) => fiber.clone(),
                _ => {
                    let instance = Arc::new(parent.for_activity());
                    let run = into_result(instance.clone(), (activity.execute)(ctx.with_instance(instance.clone())));
                    let this = self.this.clone();
                    let memo_key = key.clone();
                    let fiber = Fiber::spawn(instance.cancellation().clone(), run, move |exit| {
                        if let Some(engine) = this.upgrade() {
                            engine.record_activity(&memo_key, exit);
                        }
                    });
                    debug!(
                        activity = %activity.name,
                        attempt,
                        execution_id = %parent.execution_id(),
                        "activity started"
                    );
                    activities.insert(key, MemoEntry::InFlight(fiber.clone()));
                    fiber
                }
            }
        };
        fiber.join().await.map_err(EngineError::Raised)
    }

    async fn deferred_result(
        &self,
        instance: &WorkflowInstance,
        deferred_name: &str,
    ) -> Result<Option<ExitEncoded>, EngineError> {
        let key = keys::deferred_key(instance.execution_id(), deferred_name);
        Ok(self.deferred_results.lock().get(&key).cloned())
    }

    async fn deferred_done(&self, done: DeferredDone) -> Result<(), EngineError> {
        self.record_deferred(done);
        Ok(())
    }

    async fn schedule_clock(
        &self,
        workflow: &WorkflowDefinition,
        execution_id: &str,
        clock: &DurableClock,
    ) -> Result<(), EngineError> {
        let deferred_key = keys::deferred_key(execution_id, clock.deferred().name());
        if self.deferred_results.lock().contains_key(&deferred_key) {
            debug!(execution_id, clock = clock.name(), "clock already fired");
            return Ok(());
        }
        let key = keys::clock_key(execution_id, clock.deferred().name());
        let this = self.this.clone();
        let mut clocks = self.clocks.lock();
        if clocks.contains_key(&key) {
            return Ok(());
        }
        let done = DeferredDone {
            workflow_name: workflow.name.clone(),
            execution_id: execution_id.to_string(),
            deferred_name: clock.deferred().name().to_string(),
            exit: Exit::Success(Value::Null),
        };
        let duration = clock.duration();
        let clock_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(engine) = this.upgrade() {
                engine.clocks.lock().remove(&clock_key);
                engine.record_deferred(done);
            }
        });
        debug!(workflow = %workflow.name, execution_id, clock = clock.name(), ?duration, "clock scheduled");
        clocks.insert(key, handle);
        Ok(())
    }

    fn default_clock_threshold(&self) -> Duration {
        self.options.default_clock_threshold
    }
}

impl Drop for InMemoryWorkflowEngine {
    fn drop(&mut self) {
        for (_, handle) in self.clocks.get_mut().drain() {
            handle.abort();
        }
    }
}
