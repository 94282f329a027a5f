mod common;

use std::time::Duration;

use duroflow::{Activity, Cause, DurableDeferred, Exit, InMemoryWorkflowEngine, Workflow, WorkflowResult};
use serde_json::json;

fn child_workflow() -> Workflow<u32, u32, String> {
    Workflow::new("Child", |n: &u32| n.to_string()).with_suspended_retry_schedule(common::fast_polling())
}

fn parent_workflow() -> Workflow<u32, u32, String> {
    Workflow::new("Parent", |n: &u32| n.to_string()).with_suspended_retry_schedule(common::fast_polling())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn child_result_flows_to_parent() {
    let engine = InMemoryWorkflowEngine::new();
    let child = child_workflow();
    let parent = parent_workflow();

    child
        .register(engine.as_ref(), |n, _ctx| async move { Ok(n * 10) })
        .await
        .unwrap();
    let spawned = child.clone();
    parent
        .register(engine.as_ref(), move |n, ctx| {
            let child = spawned.clone();
            async move {
                let from_child = child.execute_child(&ctx, n + 1).await?;
                Ok(from_child + 1)
            }
        })
        .await
        .unwrap();

    assert_eq!(parent.execute(engine.as_ref(), 4).await, Ok(51));
    assert_eq!(engine.execution_count(), 2);

    let child_id = child.execution_id(&5);
    assert_eq!(
        child.poll(engine.as_ref(), &child_id).await.unwrap(),
        Some(WorkflowResult::Complete {
            exit: Exit::Success(json!(50))
        })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn child_failure_is_the_parents_failure() {
    let engine = InMemoryWorkflowEngine::new();
    let child = child_workflow();
    let parent = parent_workflow();

    child
        .register(engine.as_ref(), |n, _ctx| async move { Err(Cause::fail(format!("child {n} refused"))) })
        .await
        .unwrap();
    let spawned = child.clone();
    parent
        .register(engine.as_ref(), move |n, ctx| {
            let child = spawned.clone();
            async move { child.execute_child(&ctx, n).await }
        })
        .await
        .unwrap();

    assert_eq!(
        parent.execute(engine.as_ref(), 2).await,
        Err(Cause::Fail("child 2 refused".to_string()))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn suspended_child_suspends_parent_until_it_completes() {
    let engine = InMemoryWorkflowEngine::new();
    let child = child_workflow();
    let parent = parent_workflow();
    let signal = DurableDeferred::<u32, String>::new("Signal");

    let child_signal = signal.clone();
    child
        .register(engine.as_ref(), move |n, ctx| {
            let signal = child_signal.clone();
            async move { Ok(n + signal.await_result(&ctx).await?) }
        })
        .await
        .unwrap();
    let spawned = child.clone();
    parent
        .register(engine.as_ref(), move |n, ctx| {
            let child = spawned.clone();
            async move { child.execute_child(&ctx, n).await }
        })
        .await
        .unwrap();

    let parent_id = parent.execute_discard(engine.as_ref(), 7).await.unwrap();
    common::wait_for_suspended(engine.as_ref(), parent.definition(), &parent_id)
        .await
        .unwrap();
    let child_id = child.execution_id(&7);
    common::wait_for_suspended(engine.as_ref(), child.definition(), &child_id)
        .await
        .unwrap();

    // Completing the child's deferred resumes the child, which resumes the parent.
    signal
        .succeed(engine.as_ref(), &signal.token_from_execution_id(&child, &child_id), 100)
        .await
        .unwrap();
    let settled = common::wait_for_complete(engine.as_ref(), parent.definition(), &parent_id).await;
    assert_eq!(
        settled,
        Some(WorkflowResult::Complete {
            exit: Exit::Success(json!(107))
        })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupting_the_parent_interrupts_an_unfinished_child() {
    let engine = InMemoryWorkflowEngine::new();
    let child = child_workflow();
    let parent = parent_workflow();
    let never = DurableDeferred::<u32, String>::new("Never");

    child
        .register(engine.as_ref(), move |_n, ctx| {
            let never = never.clone();
            async move { never.await_result(&ctx).await }
        })
        .await
        .unwrap();
    let spawned = child.clone();
    parent
        .register(engine.as_ref(), move |n, ctx| {
            let child = spawned.clone();
            async move { child.execute_child(&ctx, n).await }
        })
        .await
        .unwrap();

    let parent_id = parent.execute_discard(engine.as_ref(), 1).await.unwrap();
    common::wait_for_suspended(engine.as_ref(), parent.definition(), &parent_id)
        .await
        .unwrap();

    parent.interrupt(engine.as_ref(), &parent_id).await.unwrap();

    let interrupted = Some(WorkflowResult::Complete {
        exit: Exit::Failure(Cause::Interrupt),
    });
    let parent_settled = common::wait_for_complete(engine.as_ref(), parent.definition(), &parent_id).await;
    assert_eq!(parent_settled, interrupted);
    let child_id = child.execution_id(&1);
    let child_settled = common::wait_for_complete(engine.as_ref(), child.definition(), &child_id).await;
    assert_eq!(child_settled, interrupted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parent_interrupted_while_starting_a_child_leaves_nothing_running() {
    let interrupted = Some(WorkflowResult::Complete {
        exit: Exit::Failure(Cause::Interrupt),
    });

    for round in 0..50u32 {
        let engine = InMemoryWorkflowEngine::new();
        let child = child_workflow();
        let parent = parent_workflow();

        child
            .register(engine.as_ref(), |n, ctx| async move {
                let long = Activity::<u32, String>::new("long", move |_| async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(n)
                });
                long.execute(&ctx).await
            })
            .await
            .unwrap();
        let spawned = child.clone();
        parent
            .register(engine.as_ref(), move |n, ctx| {
                let child = spawned.clone();
                async move { child.execute_child(&ctx, n).await }
            })
            .await
            .unwrap();

        let parent_id = parent.execute_discard(engine.as_ref(), round).await.unwrap();
        for _ in 0..round % 5 {
            tokio::task::yield_now().await;
        }
        parent.interrupt(engine.as_ref(), &parent_id).await.unwrap();

        let parent_settled = common::wait_for_complete(engine.as_ref(), parent.definition(), &parent_id).await;
        assert_eq!(parent_settled, interrupted, "round {round}");

        // Give a child start that was already under way time to land.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let child_id = child.execution_id(&round);
        let settled = common::wait_until(2_000, || {
            let engine = engine.clone();
            let child = child.clone();
            let child_id = child_id.clone();
            async move {
                engine.execution_count() == 1
                    || matches!(
                        child.poll(engine.as_ref(), &child_id).await,
                        Ok(Some(WorkflowResult::Complete { .. }))
                    )
            }
        })
        .await;
        assert!(settled, "child of round {round} left running");
    }
}
