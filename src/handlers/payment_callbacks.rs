use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Form,
};
use tracing::debug;

use crate::{gateway::gatepay::RawCallback, AppState};

/// POST /api/v1/payments/gateway/callback
///
/// Server-to-server endpoint the gateway calls for both precheck and confirm
/// phases. The wire contract is plain text: body `OK` with 200 accepts, any
/// 4xx body is a rejection reason, 500 asks the gateway to retry. Never JSON,
/// and never carrying the shared secret or a computed digest.
pub async fn gateway_callback(
    State(state): State<AppState>,
    Form(raw): Form<RawCallback>,
) -> Response {
    debug!(bill_no = raw.bill_no.as_deref().unwrap_or("-"), "gateway callback received");

    match state.services.payments.handle_callback(raw).await {
        Ok(()) => (StatusCode::OK, "OK".to_string()).into_response(),
        Err(err) => err.wire_response().into_response(),
    }
}
