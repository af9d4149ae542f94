use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::IntoEnumIterator;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::address::{ShippingField, ShippingForm};
use crate::models::cart::{Cart, CartLine};
use crate::services::checkout::{CheckoutReceipt, CheckoutSession, CheckoutStep};
use crate::services::payments::PaymentSession;
use crate::services::pricing::PricingSnapshot;
use crate::services::shipping::{ShippingLocator, ShippingZone};
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub lines: Vec<CartLine>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub shipping_type: ShippingZone,
    pub pricing: PricingSnapshot,
}

/// Prices a cart for an optional destination.
pub async fn quote(
    State(state): State<AppState>,
    Json(payload): Json<QuoteRequest>,
) -> ApiResult<QuoteResponse> {
    let mut cart = Cart::default();
    for line in payload.lines {
        cart.add(line)?;
    }

    let locator = state.checkout.locator();
    let shipping_type = match (payload.region.as_deref(), payload.city.as_deref()) {
        (Some(region), Some(city)) => locator.zone_for(city, region),
        _ => ShippingZone::Nationwide,
    };
    let pricing = state.checkout.pricing().quote(cart.lines(), shipping_type)?;

    Ok(Json(ApiResponse::success(QuoteResponse {
        shipping_type,
        pricing,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub lines: Vec<CartLine>,
    /// Submitted right away when present
    #[serde(default)]
    pub shipping: Option<ShippingForm>,
}

/// A checkout session with its current totals.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub step: CheckoutStep,
    pub pricing: PricingSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub session_id: Uuid,
    pub step: CheckoutStep,
    pub receipt: CheckoutReceipt,
}

#[derive(Debug, Serialize)]
struct FieldErrorsBody {
    success: bool,
    message: String,
    session_id: Uuid,
    field_errors: BTreeMap<ShippingField, String>,
}

fn field_errors_response(session: &CheckoutSession, message: String) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(FieldErrorsBody {
            success: false,
            message,
            session_id: session.id,
            field_errors: session.field_errors().clone(),
        }),
    )
        .into_response()
}

fn session_view(state: &AppState, session: &CheckoutSession) -> Result<SessionView, ServiceError> {
    Ok(SessionView {
        session_id: session.id,
        step: session.step().clone(),
        pricing: state.checkout.quote(session)?,
    })
}

/// Copies the form into the session and submits it, stepping back from
/// confirmation first when the shopper is editing their details.
fn apply_shipping(
    session: &mut CheckoutSession,
    form: &ShippingForm,
    locator: &ShippingLocator,
) -> Result<(), ServiceError> {
    if matches!(session.step(), CheckoutStep::Confirmation) {
        session.back()?;
    }
    // Declaration order puts the region before the city it resets
    for field in ShippingField::iter() {
        session.set_field(field, form.get(field))?;
    }
    session.submit_shipping(locator).map(|_| ())
}

/// Starts a checkout for a cart, optionally submitting the shipping form too.
///
/// The session is stored even when the form is rejected; the 422 body carries
/// its id along with one message per invalid field.
#[instrument(skip(state, payload), fields(lines = payload.lines.len()))]
pub async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<Response, ServiceError> {
    let mut session = CheckoutSession::new();
    for line in payload.lines {
        session.add_line(line)?;
    }
    session.proceed_to_shipping()?;

    let submitted = match &payload.shipping {
        Some(form) => apply_shipping(&mut session, form, state.checkout.locator()),
        None => Ok(()),
    };
    state.sessions.save(&session).await?;

    match submitted {
        Ok(()) => Ok((
            StatusCode::CREATED,
            Json(ApiResponse::success(session_view(&state, &session)?)),
        )
            .into_response()),
        Err(ServiceError::ValidationError(message)) => {
            Ok(field_errors_response(&session, message))
        }
        Err(other) => Err(other),
    }
}

/// Replaces the shipping details of a session and submits them.
#[instrument(skip(state, form))]
pub async fn submit_shipping(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(form): Json<ShippingForm>,
) -> Result<Response, ServiceError> {
    let locator = state.checkout.locator();
    let mut rejected = None;
    let session = state
        .sessions
        .update(
            id,
            Box::new(|session: &mut CheckoutSession| {
                match apply_shipping(session, &form, locator) {
                    // Keep the entered values and field errors
                    Err(ServiceError::ValidationError(message)) => {
                        rejected = Some(message);
                        Ok(())
                    }
                    other => other,
                }
            }),
        )
        .await?;

    match rejected {
        Some(message) => Ok(field_errors_response(&session, message)),
        None => Ok(Json(ApiResponse::success(session_view(&state, &session)?)).into_response()),
    }
}

/// Places the order for a session on the confirmation step.
///
/// Only one submission per session runs at a time: a concurrent or repeated
/// confirmation answers 409.
#[instrument(skip(state))]
pub async fn confirm(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let mut session = state
        .sessions
        .update(
            id,
            Box::new(|session: &mut CheckoutSession| session.begin_submission()),
        )
        .await?;

    // Detached so a dropped request cannot leave the session marked as submitting
    let checkout = state.checkout.clone();
    let sessions = state.sessions.clone();
    let submission = tokio::spawn(async move {
        let result = checkout.complete_confirmation(&mut session).await;
        sessions.save(&session).await?;
        result.map(|receipt| (session, receipt))
    });
    let (session, receipt) = submission.await.map_err(|e| {
        error!(session_id = %id, error = %e, "Order submission task failed");
        ServiceError::InternalError(format!("Order submission task failed: {e}"))
    })??;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(ConfirmResponse {
            session_id: session.id,
            step: session.step().clone(),
            receipt,
        })),
    )
        .into_response())
}

async fn load_session(state: &AppState, id: Uuid) -> Result<CheckoutSession, ServiceError> {
    state
        .sessions
        .load(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Checkout session {id} not found")))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<CheckoutSession> {
    Ok(Json(ApiResponse::success(load_session(&state, id).await?)))
}

/// Opens a new gateway attempt after a decline.
pub async fn retry_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<PaymentSession> {
    let mut session = load_session(&state, id).await?;
    let payment_session = state.checkout.retry_payment(&mut session).await?;
    state.sessions.save(&session).await?;
    Ok(Json(ApiResponse::success(payment_session)))
}

pub async fn abandon_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    let session = load_session(&state, id).await?;
    if let Some(invoice) = session.placed_order().and_then(|order| order.invoice.as_deref()) {
        state.payments.abandon(invoice);
    }
    state.sessions.discard(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
