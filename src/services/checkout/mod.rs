pub mod session;
pub mod store;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::config::OrderWriteMode;
use crate::entities::order::{PaymentMethod, ShippingType};
use crate::errors::ServiceError;
use crate::notifications::{NotificationDispatcher, OrderConfirmation};
use crate::repositories::order_repository::{NewOrder, NewOrderItem, OrderRepository, PersistedOrder};
use crate::services::payments::{PaymentGatewayAdapter, PaymentOutcome, PaymentSession};
use crate::services::pricing::{PricingEngine, PricingSnapshot};
use crate::services::shipping::{ShippingLocator, ShippingZone};

pub use session::{CheckoutSession, CheckoutStep, PlacedOrder, SubmissionError};
pub use store::{InMemorySessionStore, SessionChange, SessionStore, DEFAULT_SESSION_TTL};

/// What the shopper sees after confirming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub order: PersistedOrder,
    pub pricing: PricingSnapshot,
    /// Present when the order is paid through the gateway
    pub payment_session: Option<PaymentSession>,
}

impl CheckoutReceipt {
    pub fn placed_order(&self) -> PlacedOrder {
        PlacedOrder {
            order_id: self.order.order.id,
            reference: self.order.order.reference.clone(),
            payment_method: self.order.order.payment_method,
            total: self.order.order.total,
            invoice: self
                .payment_session
                .as_ref()
                .map(|session| session.invoice.clone()),
            transaction_id: None,
        }
    }
}

/// Drives a checkout session through pricing, persistence, notification and
/// the payment hand-off.
#[derive(Clone)]
pub struct CheckoutService {
    orders: Arc<OrderRepository>,
    pricing: PricingEngine,
    locator: ShippingLocator,
    notifications: NotificationDispatcher,
    payments: Arc<PaymentGatewayAdapter>,
    persistence_timeout: Duration,
}

impl CheckoutService {
    pub fn new(
        orders: Arc<OrderRepository>,
        pricing: PricingEngine,
        locator: ShippingLocator,
        notifications: NotificationDispatcher,
        payments: Arc<PaymentGatewayAdapter>,
        persistence_timeout: Duration,
    ) -> Self {
        Self {
            orders,
            pricing,
            locator,
            notifications,
            payments,
            persistence_timeout,
        }
    }

    pub fn locator(&self) -> &ShippingLocator {
        &self.locator
    }

    pub fn pricing(&self) -> &PricingEngine {
        &self.pricing
    }

    /// Destination zone for whatever the shopper has entered so far.
    /// Until a region and city are known the cart is priced as nationwide.
    fn zone_of(&self, session: &CheckoutSession) -> ShippingZone {
        let form = session.form();
        if form.region.trim().is_empty() || form.city.trim().is_empty() {
            ShippingZone::Nationwide
        } else {
            self.locator.zone_for(&form.city, &form.region)
        }
    }

    /// Totals for the current cart and destination.
    pub fn quote(&self, session: &CheckoutSession) -> Result<PricingSnapshot, ServiceError> {
        self.pricing.quote(session.cart().lines(), self.zone_of(session))
    }

    /// Places the order for a session on the confirmation step.
    ///
    /// The session must be saved by the caller afterwards: on success it has
    /// moved on, on failure it holds the error and stays on confirmation.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn confirm(
        &self,
        session: &mut CheckoutSession,
    ) -> Result<CheckoutReceipt, ServiceError> {
        session.begin_submission()?;
        self.complete_confirmation(session).await
    }

    /// Second half of [`confirm`](Self::confirm) for a session whose
    /// submission was already started, e.g. through [`SessionStore::update`].
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn complete_confirmation(
        &self,
        session: &mut CheckoutSession,
    ) -> Result<CheckoutReceipt, ServiceError> {
        if !session.is_submitting() {
            return Err(ServiceError::InvalidOperation(
                "No order submission has been started".to_string(),
            ));
        }

        match self.place_order(session).await {
            Ok(receipt) => {
                session.complete_submission(receipt.placed_order());
                info!(
                    reference = %receipt.order.order.reference,
                    payment_method = ?receipt.order.order.payment_method,
                    "Checkout confirmed"
                );
                Ok(receipt)
            }
            Err(err) => {
                warn!(error = %err, retryable = err.is_retryable(), "Checkout confirmation failed");
                session.fail_submission(&err);
                Err(err)
            }
        }
    }

    async fn place_order(&self, session: &CheckoutSession) -> Result<CheckoutReceipt, ServiceError> {
        let address = session.shipping_address()?;
        let zone = self.locator.zone_for(&address.city, &address.region);
        let payment_method = session.payment_path(&self.locator);
        let pricing = self.pricing.quote(session.cart().lines(), zone)?;

        let new_order = NewOrder {
            items: session
                .cart()
                .lines()
                .iter()
                .map(|line| NewOrderItem {
                    product_id: line.product_id.clone(),
                    product_name: line.name.clone(),
                    product_image: line.image.clone(),
                    size: line.variant.size.clone(),
                    color: line.variant.color.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect(),
            subtotal: pricing.subtotal_with_tax,
            shipping_cost: pricing.shipping_cost,
            total: pricing.total,
            shipping_type: zone,
            payment_method,
            cod_eligible: zone == ShippingType::RegionalCod,
            address,
        };

        let persisted = match self.orders.settings().write_mode {
            OrderWriteMode::Transactional => {
                // An abandoned transaction rolls back, so the write can be cut short
                let persisted = tokio::time::timeout(
                    self.persistence_timeout,
                    self.orders.create_order(new_order),
                )
                .await
                .map_err(|_| {
                    ServiceError::Timeout(
                        "Saving the order took too long; please try again".to_string(),
                    )
                })??;
                // Fire and forget
                let _ = self
                    .notifications
                    .dispatch(OrderConfirmation::from(&persisted));
                persisted
            }
            OrderWriteMode::Sequential => self.create_detached(new_order).await?,
        };

        let payment_session = match persisted.order.payment_method {
            PaymentMethod::CashOnDelivery => None,
            PaymentMethod::Gateway => {
                let payment_session = self.payments.build_session(&persisted, Some(session.id));
                self.payments.open(&payment_session)?;
                Some(payment_session)
            }
        };

        Ok(CheckoutReceipt {
            order: persisted,
            pricing,
            payment_session,
        })
    }

    /// Runs a sequential write on its own task so that giving up on it never
    /// stops it between the header and the rows that depend on it. The task
    /// also sends the confirmation, so a write that finishes late still does.
    async fn create_detached(&self, new_order: NewOrder) -> Result<PersistedOrder, ServiceError> {
        let orders = self.orders.clone();
        let notifications = self.notifications.clone();
        let write = tokio::spawn(async move {
            let persisted = orders.create_order(new_order).await?;
            let _ = notifications.dispatch(OrderConfirmation::from(&persisted));
            Ok::<_, ServiceError>(persisted)
        });

        match tokio::time::timeout(self.persistence_timeout, write).await {
            Ok(joined) => joined.map_err(|e| {
                ServiceError::InternalError(format!("Order write task failed: {e}"))
            })?,
            Err(_) => {
                warn!("Order write is still running after the persistence timeout");
                Err(ServiceError::OrderWriteInDoubt(
                    "the order may still be created".to_string(),
                ))
            }
        }
    }

    fn pending_invoice(session: &CheckoutSession) -> Result<String, ServiceError> {
        match session.step() {
            CheckoutStep::AwaitingPayment { order } => order.invoice.clone().ok_or_else(|| {
                ServiceError::InvalidOperation("No payment session is open".to_string())
            }),
            other => Err(ServiceError::InvalidOperation(format!(
                "No payment is expected during the {} step",
                other.name()
            ))),
        }
    }

    /// Waits for the gateway's verdict on the current payment attempt and
    /// applies it to the session.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn await_payment(
        &self,
        session: &mut CheckoutSession,
    ) -> Result<PaymentOutcome, ServiceError> {
        let invoice = Self::pending_invoice(session)?;
        let outcome = self.payments.await_outcome(&invoice).await?;
        self.settle_payment(session, outcome.clone())?;
        Ok(outcome)
    }

    /// Applies a payment outcome that arrived by other means, e.g. the callback handler.
    pub fn settle_payment(
        &self,
        session: &mut CheckoutSession,
        outcome: PaymentOutcome,
    ) -> Result<(), ServiceError> {
        if let PaymentOutcome::Declined { reason_code, reason } = &outcome {
            info!(%reason_code, %reason, "Payment declined");
        }
        session.record_payment_outcome(outcome)
    }

    /// Opens a new gateway attempt for an order awaiting payment.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn retry_payment(
        &self,
        session: &mut CheckoutSession,
    ) -> Result<PaymentSession, ServiceError> {
        let previous = Self::pending_invoice(session)?;
        let order_id = session
            .placed_order()
            .map(|order| order.order_id)
            .ok_or_else(|| ServiceError::InvalidOperation("No order to pay".to_string()))?;

        let persisted = self.orders.load(order_id).await?;
        let payment_session = self.payments.build_session(&persisted, Some(session.id));
        self.payments.abandon(&previous);
        self.payments.open(&payment_session)?;
        session.set_payment_invoice(payment_session.invoice.clone())?;
        Ok(payment_session)
    }
}
