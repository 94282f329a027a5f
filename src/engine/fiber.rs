//! Spawned attempt handles with non-blocking poll and awaitable join.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::cause::{panic_message, Cause, CauseEncoded};
use crate::engine::WorkflowResult;

/// What an attempt settles with. `Err` is a cause raised past the result
/// mapping (infrastructure interrupt, uncaptured defect).
pub type FiberExit = Result<WorkflowResult, CauseEncoded>;

#[derive(Clone)]
pub struct Fiber {
    exit: watch::Receiver<Option<FiberExit>>,
    cancellation: CancellationToken,
}

impl Fiber {
    /// Spawn `attempt` on the runtime. `on_exit` runs after the exit is
    /// observable through [`Fiber::poll`].
    pub fn spawn<F, C>(cancellation: CancellationToken, attempt: F, on_exit: C) -> Self
    where
        F: Future<Output = FiberExit> + Send + 'static,
        C: FnOnce(&FiberExit) + Send + 'static,
    {
        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            let exit = match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(exit) => exit,
                Err(panic) => Err(Cause::Die(panic_message(panic))),
            };
            tx.send_replace(Some(exit.clone()));
            on_exit(&exit);
        });
        Self {
            exit: rx,
            cancellation,
        }
    }

    pub fn poll(&self) -> Option<FiberExit> {
        self.exit.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.exit.borrow().is_none()
    }

    pub async fn join(&self) -> FiberExit {
        let mut rx = self.exit.clone();
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => exit.clone(),
            // task dropped without settling (runtime shutdown)
            Err(_) => None,
        };
        exit.unwrap_or(Err(Cause::Interrupt))
    }

    pub fn interrupt(&self) {
        self.cancellation.cancel();
    }
}
