//! Handlers for the commands the server sends
//!
//! Every handler turns a request into a well-formed response: card failures become result
//! codes and are never returned as errors. The only way out without a response is
//! cancellation of the run.

mod list_certificates;
mod list_tokens;
mod sign;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::card::CardService;
use crate::messages::{
    ListCertificatesRequest, ListCertificatesResponse, ListTokensRequest, ListTokensResponse,
    ResultCode, SignRequest, SignResponse, SlotHandle,
};
use crate::pin::PinUnwrapper;
use crate::worker::{WorkerOutcome, run_with_deadline};

/// Upper bound of every wait budget
pub const WAIT_MAX: Duration = Duration::from_secs(60 * 60);

/// Interval between two token searches
pub const TOKEN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Wait budget for a request's `MaxWaitSeconds`
///
/// Absent values and values of [`WAIT_MAX`] or more are clamped to [`WAIT_MAX`].
pub fn effective_wait(max_wait_seconds: Option<u64>) -> Duration {
    match max_wait_seconds {
        Some(seconds) if seconds < WAIT_MAX.as_secs() => Duration::from_secs(seconds),
        _ => WAIT_MAX,
    }
}

/// The run was cancelled while a command was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stopped;

/// Collaborators shared by the handlers of one run
#[derive(Clone)]
pub(crate) struct HandlerContext {
    pub(crate) session_id: Arc<str>,
    pub(crate) card: Arc<dyn CardService>,
    pub(crate) pins: Arc<PinUnwrapper>,
}

impl HandlerContext {
    pub(crate) fn new(session_id: &str, card: Arc<dyn CardService>, pins: PinUnwrapper) -> Self {
        Self {
            session_id: session_id.into(),
            card,
            pins: Arc::new(pins),
        }
    }

    /// Search tokens on the calling task
    ///
    /// Every slot the searches touch is recorded in `connected`.
    pub(crate) async fn list_tokens(
        &self,
        request: ListTokensRequest,
        connected: &mut BTreeSet<SlotHandle>,
        cancel: &CancellationToken,
    ) -> Result<ListTokensResponse, Stopped> {
        if cancel.is_cancelled() {
            return Err(Stopped);
        }
        list_tokens::handle(self, request, connected, cancel).await
    }

    /// Read certificates on a worker task bounded by the request's wait budget
    pub(crate) async fn list_certificates(
        &self,
        request: ListCertificatesRequest,
        cancel: &CancellationToken,
    ) -> Result<ListCertificatesResponse, Stopped> {
        if cancel.is_cancelled() {
            return Err(Stopped);
        }
        let wait = effective_wait(request.max_wait_seconds);
        let context = self.clone();
        let outcome = run_with_deadline("list-certificates", cancel, wait, move |token| {
            list_certificates::handle(context, request, token)
        })
        .await;
        self.settle(outcome, |id, code| ListCertificatesResponse::new(id, code))
    }

    /// Sign on a worker task bounded by the request's wait budget
    pub(crate) async fn sign(
        &self,
        request: SignRequest,
        cancel: &CancellationToken,
    ) -> Result<SignResponse, Stopped> {
        if cancel.is_cancelled() {
            return Err(Stopped);
        }
        let wait = effective_wait(request.max_wait_seconds);
        let context = self.clone();
        let outcome = run_with_deadline("sign", cancel, wait, move |token| {
            sign::handle(context, request, token)
        })
        .await;
        self.settle(outcome, |id, code| SignResponse::new(id, code))
    }

    fn settle<R>(
        &self,
        outcome: WorkerOutcome<R>,
        failed: impl FnOnce(&str, ResultCode) -> R,
    ) -> Result<R, Stopped> {
        match outcome {
            WorkerOutcome::Completed(response) => Ok(response),
            WorkerOutcome::TimedOut => Ok(failed(&self.session_id, ResultCode::Timeout)),
            WorkerOutcome::Cancelled => Err(Stopped),
            WorkerOutcome::Failed(e) => {
                error!(error = %e, "Worker panicked");
                Ok(failed(&self.session_id, ResultCode::Other))
            }
        }
    }
}
