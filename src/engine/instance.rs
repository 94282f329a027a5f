//! Per-attempt execution state shared between the engine and a running body.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cause::{CauseEncoded, ExitEncoded};
use crate::workflow::WorkflowDefinition;

/// Cleanup run when the execution reaches a terminal outcome.
pub type Finalizer = Box<dyn FnOnce(ExitEncoded) -> BoxFuture<'static, ()> + Send>;

/// Execution-lifetime finalizers. Survives resumes; closed once.
///
/// Registrations carry the ordinal of their call site within an attempt.
/// A replayed attempt re-registers the same ordinals, which are ignored.
#[derive(Default)]
pub struct WorkflowScope {
    inner: Mutex<ScopeInner>,
    /// Set once any attempt of the execution is interrupted.
    interrupted: AtomicBool,
}

#[derive(Default)]
struct ScopeInner {
    finalizers: Vec<Finalizer>,
    ordinals: HashSet<usize>,
    closed_with: Option<ExitEncoded>,
}

impl WorkflowScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a finalizer. If the scope is already closed it runs
    /// immediately with the closing exit.
    pub async fn add_finalizer(&self, ordinal: Option<usize>, finalizer: Finalizer) {
        let run_now = {
            let mut inner = self.inner.lock();
            if let Some(ordinal) = ordinal {
                if !inner.ordinals.insert(ordinal) {
                    debug!(ordinal, "finalizer already registered by an earlier attempt");
                    return;
                }
            }
            match inner.closed_with.clone() {
                Some(exit) => Some((exit, finalizer)),
                None => {
                    inner.finalizers.push(finalizer);
                    None
                }
            }
        };
        if let Some((exit, finalizer)) = run_now {
            finalizer(exit).await;
        }
    }

    /// Run finalizers in reverse registration order. Returns false if the
    /// scope had already been closed.
    pub async fn close(&self, exit: &ExitEncoded) -> bool {
        let finalizers = {
            let mut inner = self.inner.lock();
            if inner.closed_with.is_some() {
                return false;
            }
            inner.closed_with = Some(exit.clone());
            std::mem::take(&mut inner.finalizers)
        };
        debug!(count = finalizers.len(), "closing workflow scope");
        for finalizer in finalizers.into_iter().rev() {
            finalizer(exit.clone()).await;
        }
        true
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed_with.is_some()
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().finalizers.len()
    }
}

/// Count of activities in flight for one attempt.
pub struct ActivityState {
    count: watch::Sender<usize>,
}

impl ActivityState {
    fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    pub fn in_flight(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolves once no activity is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives as long as `self`, so this only returns once idle.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    fn enter(&self) {
        self.count.send_modify(|count| *count += 1);
    }

    fn leave(&self) {
        self.count.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Holds an activity slot until dropped.
pub struct ActivityGuard {
    instance: Arc<WorkflowInstance>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.instance.activity_state.leave();
    }
}

pub struct WorkflowInstance {
    execution_id: String,
    workflow: Arc<WorkflowDefinition>,
    scope: Arc<WorkflowScope>,
    suspended: AtomicBool,
    interrupted: AtomicBool,
    cause: Mutex<Option<CauseEncoded>>,
    activity_state: ActivityState,
    cancellation: CancellationToken,
    finalizer_ordinal: AtomicUsize,
}

impl WorkflowInstance {
    pub fn new(
        workflow: Arc<WorkflowDefinition>,
        execution_id: impl Into<String>,
        scope: Arc<WorkflowScope>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow,
            scope,
            suspended: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            cause: Mutex::new(None),
            activity_state: ActivityState::new(),
            cancellation,
            finalizer_ordinal: AtomicUsize::new(0),
        }
    }

    /// Fresh instance with its own scope and cancellation.
    pub fn initial(workflow: Arc<WorkflowDefinition>, execution_id: impl Into<String>) -> Self {
        Self::new(
            workflow,
            execution_id,
            Arc::new(WorkflowScope::new()),
            CancellationToken::new(),
        )
    }

    /// Sub-instance an activity body runs under. It has its own scope,
    /// inherits the interrupt flag, and is cancelled with this attempt.
    pub fn for_activity(&self) -> Self {
        let sub = Self::new(
            self.workflow.clone(),
            self.execution_id.clone(),
            Arc::new(WorkflowScope::new()),
            self.cancellation.child_token(),
        );
        sub.set_interrupted(self.is_interrupted());
        sub
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn workflow(&self) -> &Arc<WorkflowDefinition> {
        &self.workflow
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow.name
    }

    pub fn scope(&self) -> &Arc<WorkflowScope> {
        &self.scope
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Marks this attempt, and the execution scope it shares with later
    /// attempts, as interrupted.
    pub fn set_interrupted(&self, interrupted: bool) {
        if interrupted {
            self.scope.interrupted.store(true, Ordering::SeqCst);
        }
        self.interrupted.store(interrupted, Ordering::SeqCst);
    }

    pub fn cause(&self) -> Option<CauseEncoded> {
        self.cause.lock().clone()
    }

    pub fn set_cause(&self, cause: CauseEncoded) {
        *self.cause.lock() = Some(cause);
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn activity_state(&self) -> &ActivityState {
        &self.activity_state
    }

    pub fn enter_activity(self: &Arc<Self>) -> ActivityGuard {
        self.activity_state.enter();
        ActivityGuard {
            instance: self.clone(),
        }
    }

    /// Ordinal for the next finalizer registered by this attempt's body.
    pub fn next_finalizer_ordinal(&self) -> usize {
        self.finalizer_ordinal.fetch_add(1, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WorkflowInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowInstance")
            .field("workflow", &self.workflow.name)
            .field("execution_id", &self.execution_id)
            .field("suspended", &self.is_suspended())
            .field("interrupted", &self.is_interrupted())
            .field("activities_in_flight", &self.activity_state.in_flight())
            .finish()
    }
}
