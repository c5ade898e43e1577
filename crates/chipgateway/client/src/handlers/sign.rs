use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::HandlerContext;
use crate::messages::{EncryptedPin, ResultCode, SignRequest, SignResponse};

/// Sign on a worker task, `None` once `token` is cancelled
pub(super) async fn handle(
    context: HandlerContext,
    request: SignRequest,
    token: CancellationToken,
) -> Option<SignResponse> {
    if token.is_cancelled() {
        return None;
    }
    let id = &context.session_id;

    let mut pin = match context.pins.unwrap(request.pin.as_ref().map(EncryptedPin::as_str)) {
        Ok(pin) => pin,
        Err(e) => {
            error!(error = %e, "Unusable PIN in sign request");
            return Some(SignResponse::new(id, ResultCode::IncorrectParameter));
        }
    };

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        result = context.card.sign(
            &request.slot_handle,
            &request.did_name,
            pin.as_ref(),
            &request.message,
        ) => Some(result),
    };
    if let Some(pin) = pin.as_mut() {
        pin.erase();
    }

    Some(match result? {
        Ok(signature) => {
            debug!(did = %request.did_name, slot = %request.slot_handle, "Created signature");
            let mut response = SignResponse::new(id, ResultCode::Ok);
            response.signature = Some(signature);
            response
        }
        Err(e) => {
            error!(error = %e, did = %request.did_name, "Signing failed");
            SignResponse::new(id, e.result_code())
        }
    })
}
