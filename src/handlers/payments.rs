use axum::{
    extract::{Form, State},
    response::Json,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::checkout::{CheckoutSession, CheckoutStep};
use crate::services::payments::{GatewayResponse, PaymentOutcome};
use crate::{ApiResponse, ApiResult, AppState};

/// Client-side `onResponse` hand-off from the payment widget.
pub async fn payment_response(
    State(state): State<AppState>,
    Json(response): Json<GatewayResponse>,
) -> ApiResult<PaymentOutcome> {
    relay(&state, response).await
}

/// Server-to-server confirmation posted by the gateway as a form.
pub async fn payment_confirmation(
    State(state): State<AppState>,
    Form(response): Form<GatewayResponse>,
) -> ApiResult<PaymentOutcome> {
    relay(&state, response).await
}

async fn relay(state: &AppState, response: GatewayResponse) -> ApiResult<PaymentOutcome> {
    let session_id = response
        .x_extra1
        .as_deref()
        .and_then(|raw| Uuid::parse_str(raw).ok());
    let invoice = response.x_id_invoice.as_str();

    let outcome = match state.payments.relay(&response) {
        Ok(outcome) => outcome,
        // Approved invoices are closed once applied; a repeat is answered from the session
        Err(ServiceError::NotFound(message)) => {
            return match settled_outcome(state, session_id, invoice).await? {
                Some(outcome) => {
                    info!(%invoice, "Repeated callback for a settled payment");
                    Ok(Json(ApiResponse::success(outcome)))
                }
                None => Err(ServiceError::NotFound(message)),
            };
        }
        Err(err) => return Err(err),
    };

    let Some(session_id) = session_id else {
        return Ok(Json(ApiResponse::success(outcome)));
    };

    let checkout = &state.checkout;
    let applied = outcome.clone();
    let settled = state
        .sessions
        .update(
            session_id,
            Box::new(move |session: &mut CheckoutSession| {
                checkout.settle_payment(session, applied)
            }),
        )
        .await;

    match settled {
        Ok(_) => {
            if outcome.is_approved() {
                state.payments.abandon(invoice);
            }
        }
        // The response and confirmation hooks may both report the same attempt
        Err(ServiceError::InvalidOperation(reason)) => {
            info!(%session_id, %reason, "Payment outcome already applied")
        }
        Err(ServiceError::NotFound(_)) => {
            warn!(%session_id, "Payment callback for an unknown checkout session")
        }
        Err(err) => return Err(err),
    }

    Ok(Json(ApiResponse::success(outcome)))
}

/// The approval already recorded for `invoice` on a completed checkout.
async fn settled_outcome(
    state: &AppState,
    session_id: Option<Uuid>,
    invoice: &str,
) -> Result<Option<PaymentOutcome>, ServiceError> {
    let Some(session_id) = session_id else {
        return Ok(None);
    };
    let Some(session) = state.sessions.load(session_id).await? else {
        return Ok(None);
    };

    Ok(match session.step() {
        CheckoutStep::Completed { order } if order.invoice.as_deref() == Some(invoice) => order
            .transaction_id
            .clone()
            .map(|transaction_id| PaymentOutcome::Approved { transaction_id }),
        _ => None,
    })
}
