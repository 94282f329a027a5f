//! Durable workflow execution.
//!
//! A workflow body is an ordinary async function that is re-run from the top
//! each time its execution resumes. Side effects go through [`Activity`],
//! whose results are memoized per execution; waits go through
//! [`DurableDeferred`] and [`clock::sleep`], which suspend the execution
//! instead of blocking. Replaying the body against the recorded results
//! brings it back to where it left off.
//!
//! ```rust,no_run
//! use duroflow::{Activity, Cause, DurableDeferred, InMemoryWorkflowEngine, Workflow};
//!
//! # async fn run() -> Result<(), Cause<String>> {
//! let engine = InMemoryWorkflowEngine::new();
//! let approval = DurableDeferred::<bool, String>::new("Approval");
//! let order = Workflow::<String, u32, String>::new("PlaceOrder", |id: &String| id.clone());
//!
//! let gate = approval.clone();
//! order
//!     .register(engine.as_ref(), move |id, ctx| {
//!         let gate = gate.clone();
//!         async move {
//!             let reserve = Activity::<u32, String>::new("Reserve", move |_| {
//!                 let id = id.clone();
//!                 async move { Ok(id.len() as u32) }
//!             });
//!             let reserved = reserve.execute(&ctx).await?;
//!             if !gate.await_result(&ctx).await? {
//!                 return Err(Cause::fail("rejected".to_string()));
//!             }
//!             Ok(reserved)
//!         }
//!     })
//!     .await
//!     .map_err(Cause::<String>::from)?;
//!
//! let token = approval.token_from_payload(&order, &"order-7".to_string());
//! approval.succeed(engine.as_ref(), &token, true).await.map_err(Cause::<String>::from)?;
//! let reserved = order.execute(engine.as_ref(), "order-7".to_string()).await?;
//! # let _ = reserved;
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod annotations;
pub mod cause;
pub mod clock;
pub mod codec;
pub mod config;
pub mod context;
pub mod deferred;
pub mod engine;
pub mod keys;
pub mod logging;
pub mod schedule;
pub mod token;
pub mod workflow;

pub use activity::Activity;
pub use annotations::{Annotation, Annotations, CaptureDefects, SuspendOnFailure};
pub use cause::{Cause, CauseEncoded, Exit, ExitEncoded};
pub use clock::DurableClock;
pub use codec::CodecError;
pub use config::{EngineOptions, LogFormat, ObservabilityConfig};
pub use context::WorkflowContext;
pub use deferred::DurableDeferred;
pub use engine::{EngineError, InMemoryWorkflowEngine, WorkflowEngine, WorkflowResult};
pub use schedule::RetrySchedule;
pub use token::{Token, TokenError, TokenParts};
pub use workflow::{with_compensation, Workflow, WorkflowDefinition};
