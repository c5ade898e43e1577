use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::HandlerContext;
use crate::messages::{EncryptedPin, ListCertificatesRequest, ListCertificatesResponse, ResultCode};

/// Read certificates on a worker task, `None` once `token` is cancelled
pub(super) async fn handle(
    context: HandlerContext,
    request: ListCertificatesRequest,
    token: CancellationToken,
) -> Option<ListCertificatesResponse> {
    if token.is_cancelled() {
        return None;
    }
    let id = &context.session_id;

    let mut pin = match context.pins.unwrap(request.pin.as_ref().map(EncryptedPin::as_str)) {
        Ok(pin) => pin,
        Err(e) => {
            error!(error = %e, "Unusable PIN in certificate request");
            return Some(ListCertificatesResponse::new(id, ResultCode::IncorrectParameter));
        }
    };

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        result = context.card.list_certificates(
            &request.slot_handle,
            &request.certificate_filter,
            pin.as_ref(),
        ) => Some(result),
    };
    if let Some(pin) = pin.as_mut() {
        pin.erase();
    }

    Some(match result? {
        Ok(certificates) => {
            debug!(count = certificates.len(), slot = %request.slot_handle, "Read certificates");
            let mut response = ListCertificatesResponse::new(id, ResultCode::Ok);
            response.certificate_info = certificates;
            response
        }
        Err(e) => {
            error!(error = %e, slot = %request.slot_handle, "Reading certificates failed");
            ListCertificatesResponse::new(id, e.result_code())
        }
    })
}
