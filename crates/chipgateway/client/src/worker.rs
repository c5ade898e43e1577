//! Background workers with a hard deadline and cooperative cancellation

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a worker ended
#[derive(Debug)]
pub(crate) enum WorkerOutcome<T> {
    /// The worker produced a value
    Completed(T),
    /// The deadline passed first
    TimedOut,
    /// The run was cancelled, or the worker gave up after noticing its token
    Cancelled,
    /// The worker panicked
    Failed(JoinError),
}

enum Race<T> {
    Joined(Result<Option<T>, JoinError>),
    Deadline,
    Cancelled,
}

/// Run `body` on a spawned task until it finishes, `deadline` elapses or `parent` fires
///
/// The body gets a child token of `parent`. It is cancelled and awaited before this
/// returns, so the worker never outlives the call. A body returning `None` acknowledged
/// cancellation.
pub(crate) async fn run_with_deadline<T, F, Fut>(
    name: &'static str,
    parent: &CancellationToken,
    deadline: Duration,
    body: F,
) -> WorkerOutcome<T>
where
    T: Send + 'static,
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Option<T>> + Send + 'static,
{
    let token = parent.child_token();
    let mut handle = tokio::spawn(body(token.clone()));

    let race = tokio::select! {
        joined = &mut handle => Race::Joined(joined),
        _ = tokio::time::sleep(deadline) => Race::Deadline,
        _ = parent.cancelled() => Race::Cancelled,
    };

    match race {
        Race::Joined(Ok(Some(value))) => WorkerOutcome::Completed(value),
        Race::Joined(Ok(None)) => WorkerOutcome::Cancelled,
        Race::Joined(Err(e)) => {
            warn!(worker = name, error = %e, "Worker failed");
            WorkerOutcome::Failed(e)
        }
        Race::Deadline => {
            debug!(worker = name, ?deadline, "Worker deadline elapsed, stopping it");
            token.cancel();
            // The result of a worker that finishes anyway is discarded.
            let _ = handle.await;
            WorkerOutcome::TimedOut
        }
        Race::Cancelled => {
            debug!(worker = name, "Run cancelled, stopping worker");
            token.cancel();
            let _ = handle.await;
            WorkerOutcome::Cancelled
        }
    }
}
