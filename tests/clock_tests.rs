mod common;

use std::time::Duration;

use duroflow::clock;
use duroflow::{EngineOptions, InMemoryWorkflowEngine, Workflow, WorkflowEngine};

fn sleeper(name: &str) -> Workflow<String, String, String> {
    Workflow::new(name.to_string(), |k: &String| k.clone()).with_suspended_retry_schedule(common::fast_polling())
}

async fn register_sleeper(
    engine: &dyn WorkflowEngine,
    workflow: &Workflow<String, String, String>,
    duration: Duration,
    threshold: Option<Duration>,
) {
    workflow
        .register(engine, move |key, ctx| async move {
            clock::sleep::<String>(&ctx, "nap", duration, threshold).await?;
            Ok(format!("{key} rested"))
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn short_sleeps_run_in_memory() {
    let engine = InMemoryWorkflowEngine::new();
    let workflow = sleeper("Doze");
    register_sleeper(engine.as_ref(), &workflow, Duration::from_millis(5), None).await;

    assert_eq!(
        workflow.execute(engine.as_ref(), "cat".to_string()).await,
        Ok("cat rested".to_string())
    );
    assert_eq!(engine.activity_memo_count(), 1);
    assert_eq!(engine.scheduled_clock_count(), 0);
    assert_eq!(engine.deferred_result_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn long_sleeps_suspend_on_a_durable_clock() {
    let engine = InMemoryWorkflowEngine::with_options(EngineOptions {
        default_clock_threshold: Duration::from_millis(10),
        ..EngineOptions::default()
    });
    assert_eq!(engine.default_clock_threshold(), Duration::from_millis(10));

    let workflow = sleeper("Hibernate");
    register_sleeper(engine.as_ref(), &workflow, Duration::from_millis(200), None).await;

    let id = workflow.execute_discard(engine.as_ref(), "bear".to_string()).await.unwrap();
    common::wait_for_suspended(engine.as_ref(), workflow.definition(), &id).await.unwrap();
    assert_eq!(engine.scheduled_clock_count(), 1);

    common::wait_for_complete(engine.as_ref(), workflow.definition(), &id).await.unwrap();
    assert_eq!(engine.scheduled_clock_count(), 0);
    assert_eq!(engine.deferred_result_count(), 1);
    assert_eq!(engine.activity_memo_count(), 0);
    assert_eq!(
        workflow.execute(engine.as_ref(), "bear".to_string()).await,
        Ok("bear rested".to_string())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn threshold_can_be_overridden_per_sleep() {
    let engine = InMemoryWorkflowEngine::new();
    let workflow = sleeper("Blink");
    register_sleeper(engine.as_ref(), &workflow, Duration::from_millis(20), Some(Duration::ZERO)).await;

    assert_eq!(
        workflow.execute(engine.as_ref(), "owl".to_string()).await,
        Ok("owl rested".to_string())
    );
    assert_eq!(engine.deferred_result_count(), 1);
    assert_eq!(engine.activity_memo_count(), 0);
}

#[tokio::test]
async fn dropping_the_engine_cancels_pending_clocks() {
    let engine = InMemoryWorkflowEngine::with_options(EngineOptions {
        default_clock_threshold: Duration::ZERO,
        ..EngineOptions::default()
    });
    let workflow = sleeper("Forever");
    register_sleeper(engine.as_ref(), &workflow, Duration::from_secs(3600), None).await;

    let id = workflow.execute_discard(engine.as_ref(), "x".to_string()).await.unwrap();
    common::wait_for_suspended(engine.as_ref(), workflow.definition(), &id).await.unwrap();
    assert_eq!(engine.scheduled_clock_count(), 1);

    let weak = std::sync::Arc::downgrade(&engine);
    drop(engine);
    assert!(common::wait_until(2_000, || async { weak.upgrade().is_none() }).await);
}
