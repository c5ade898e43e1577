use std::collections::BTreeSet;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{HandlerContext, Stopped, TOKEN_POLL_INTERVAL, effective_wait};
use crate::messages::{ListTokensRequest, ListTokensResponse, ResultCode, SlotHandle};

/// Poll the card layer until a token matches or the wait budget is spent
pub(super) async fn handle(
    context: &HandlerContext,
    request: ListTokensRequest,
    connected: &mut BTreeSet<SlotHandle>,
    cancel: &CancellationToken,
) -> Result<ListTokensResponse, Stopped> {
    let id = &context.session_id;
    let deadline = Instant::now() + effective_wait(request.max_wait_seconds);

    loop {
        let search = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Stopped),
            search = context.card.find_tokens(&request.token_info) => search,
        };

        match search {
            Ok(search) => {
                connected.extend(search.connected_slots);
                if !search.matched.is_empty() {
                    debug!(count = search.matched.len(), "Found matching tokens");
                    let mut response = ListTokensResponse::new(id, ResultCode::Ok);
                    response.token_info = search.matched;
                    return Ok(response);
                }
            }
            Err(e) => {
                error!(error = %e, "Token search failed");
                return Ok(ListTokensResponse::new(id, e.result_code()));
            }
        }

        let now = Instant::now();
        if now >= deadline {
            debug!("No matching token within the wait budget");
            return Ok(ListTokensResponse::new(id, ResultCode::Timeout));
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Stopped),
            _ = sleep_until(deadline.min(now + TOKEN_POLL_INTERVAL)) => {}
        }
    }
}
