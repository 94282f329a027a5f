//! Ambient services handed to workflow and activity bodies.

use std::sync::Arc;

use crate::cause::ExitEncoded;
use crate::engine::{WorkflowEngine, WorkflowInstance};
use futures::future::BoxFuture;

/// Engine handle, current instance and logical attempt for a running body.
///
/// Cheap to clone; clones share the same instance.
#[derive(Clone)]
pub struct WorkflowContext {
    engine: Arc<dyn WorkflowEngine>,
    instance: Arc<WorkflowInstance>,
    attempt: u32,
}

impl WorkflowContext {
    pub fn new(engine: Arc<dyn WorkflowEngine>, instance: Arc<WorkflowInstance>) -> Self {
        Self {
            engine,
            instance,
            attempt: 1,
        }
    }

    pub fn engine(&self) -> &Arc<dyn WorkflowEngine> {
        &self.engine
    }

    pub fn instance(&self) -> &Arc<WorkflowInstance> {
        &self.instance
    }

    pub fn execution_id(&self) -> &str {
        self.instance.execution_id()
    }

    pub fn workflow_name(&self) -> &str {
        self.instance.workflow_name()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn with_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    pub(crate) fn with_instance(&self, instance: Arc<WorkflowInstance>) -> Self {
        Self {
            instance,
            ..self.clone()
        }
    }

    /// Register cleanup that runs once the execution reaches a terminal
    /// outcome. Replays of the same call site do not register twice.
    pub async fn add_finalizer<F>(&self, finalizer: F)
    where
        F: FnOnce(ExitEncoded) -> BoxFuture<'static, ()> + Send + 'static,
    {
        let ordinal = self.instance.next_finalizer_ordinal();
        self.instance
            .scope()
            .add_finalizer(Some(ordinal), Box::new(finalizer))
            .await;
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("instance", &self.instance)
            .field("attempt", &self.attempt)
            .finish()
    }
}
