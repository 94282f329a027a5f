#![allow(dead_code)]

use std::future::Future;
use std::time::{Duration, Instant};

use duroflow::{RetrySchedule, WorkflowDefinition, WorkflowEngine, WorkflowResult};

/// Tight re-poll schedule so suspended executions are noticed quickly.
pub fn fast_polling() -> RetrySchedule {
    RetrySchedule::spaced(Duration::from_millis(5))
}

pub async fn wait_until<F, Fut>(timeout_ms: u64, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if check().await {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until the execution's latest settled result matches `predicate`.
pub async fn wait_for_result<F>(
    engine: &dyn WorkflowEngine,
    definition: &WorkflowDefinition,
    execution_id: &str,
    predicate: F,
    timeout_ms: u64,
) -> Option<WorkflowResult>
where
    F: Fn(&WorkflowResult) -> bool,
{
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if let Ok(Some(result)) = engine.poll(definition, execution_id).await {
            if predicate(&result) {
                return Some(result);
            }
        }
        if Instant::now() > deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_suspended(
    engine: &dyn WorkflowEngine,
    definition: &WorkflowDefinition,
    execution_id: &str,
) -> Option<WorkflowResult> {
    wait_for_result(engine, definition, execution_id, WorkflowResult::is_suspended, 5_000).await
}

pub async fn wait_for_complete(
    engine: &dyn WorkflowEngine,
    definition: &WorkflowDefinition,
    execution_id: &str,
) -> Option<WorkflowResult> {
    wait_for_result(engine, definition, execution_id, WorkflowResult::is_complete, 5_000).await
}
