use dashmap::DashMap;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::repositories::order_repository::PersistedOrder;
use crate::services::pricing::PricingEngine;

/// `x_cod_response` value for an approved transaction.
const APPROVED_CODE: i32 = 1;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub public_key: String,
    pub test_mode: bool,
    pub store_name: String,
    pub currency: String,
    pub response_url: Option<String>,
    pub confirmation_url: Option<String>,
    pub timeout: Duration,
}

impl From<&AppConfig> for GatewaySettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            public_key: cfg.gateway.public_key.clone().unwrap_or_default(),
            test_mode: cfg.gateway.test_mode,
            store_name: cfg.store_name.clone(),
            currency: cfg.currency.to_lowercase(),
            response_url: cfg.gateway.response_url.clone(),
            confirmation_url: cfg.gateway.confirmation_url.clone(),
            timeout: Duration::from_secs(cfg.gateway.timeout_secs),
        }
    }
}

/// Checkout object handed to the gateway's client-side widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub key: String,
    pub test: bool,
    pub name: String,
    pub description: String,
    pub invoice: String,
    pub currency: String,
    pub amount: String,
    pub tax_base: String,
    pub tax: String,
    pub country: String,
    pub lang: String,
    pub external: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<String>,
    pub name_billing: String,
    pub email_billing: String,
    pub mobilephone_billing: String,
    pub address_billing: String,
    /// Checkout session id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra1: Option<String>,
    /// Order id
    pub extra2: String,
}

/// Callback parameters posted back by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub x_ref_payco: String,
    #[serde(deserialize_with = "deserialize_code")]
    pub x_cod_response: i32,
    pub x_amount: Decimal,
    #[serde(default)]
    pub x_transaction_date: Option<String>,
    pub x_id_invoice: String,
    #[serde(default)]
    pub x_response_reason_text: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    /// Checkout session id echoed back from `extra1`
    #[serde(default)]
    pub x_extra1: Option<String>,
}

fn deserialize_code<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Number(i32),
        Text(String),
    }

    match Code::deserialize(deserializer)? {
        Code::Number(code) => Ok(code),
        Code::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl GatewayResponse {
    /// Only code 1 is an approval. Pending (3) and failed (4) transactions are
    /// reported as declines carrying their code.
    pub fn outcome(&self) -> PaymentOutcome {
        if self.x_cod_response == APPROVED_CODE && self.success != Some(false) {
            return PaymentOutcome::Approved {
                transaction_id: self.x_ref_payco.clone(),
            };
        }

        let reason = self
            .x_response_reason_text
            .clone()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| {
                match self.x_cod_response {
                    2 => "Rechazada",
                    3 => "Pendiente",
                    4 => "Fallida",
                    _ => "Transacción no aprobada",
                }
                .to_string()
            });

        PaymentOutcome::Declined {
            reason_code: self.x_cod_response.to_string(),
            reason,
        }
    }
}

/// Result of a payment attempt. A decline is a normal business result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Approved { transaction_id: String },
    Declined { reason_code: String, reason: String },
}

impl PaymentOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

struct PendingPayment {
    order_id: Uuid,
    expected_amount: Decimal,
    sender: Option<oneshot::Sender<PaymentOutcome>>,
    receiver: Option<oneshot::Receiver<PaymentOutcome>>,
    opened_at: Instant,
}

/// Builds gateway checkout objects and turns the gateway's callback into an
/// awaitable [`PaymentOutcome`].
pub struct PaymentGatewayAdapter {
    settings: GatewaySettings,
    pricing: PricingEngine,
    pending: DashMap<String, PendingPayment>,
}

impl PaymentGatewayAdapter {
    pub fn new(settings: GatewaySettings, pricing: PricingEngine) -> Self {
        Self {
            settings,
            pricing,
            pending: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// A fresh invoice number for each payment attempt on an order.
    fn invoice_for(reference: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string()[..6].to_uppercase();
        format!("{reference}-{suffix}")
    }

    fn amount_string(amount: Decimal) -> String {
        amount.normalize().to_string()
    }

    pub fn build_session(
        &self,
        persisted: &PersistedOrder,
        checkout_id: Option<Uuid>,
    ) -> PaymentSession {
        let order = &persisted.order;
        let shipping = &persisted.shipping;
        let breakdown = self.pricing.back_calculate(order.total);

        let description = persisted
            .items
            .iter()
            .map(|item| format!("{} x{}", item.product_name, item.quantity))
            .collect::<Vec<_>>()
            .join(", ");

        PaymentSession {
            key: self.settings.public_key.clone(),
            test: self.settings.test_mode,
            name: format!("{} - Pedido {}", self.settings.store_name, order.reference),
            description,
            invoice: Self::invoice_for(&order.reference),
            currency: self.settings.currency.clone(),
            amount: Self::amount_string(order.total),
            tax_base: Self::amount_string(breakdown.base),
            tax: Self::amount_string(breakdown.tax),
            country: "co".to_string(),
            lang: "es".to_string(),
            external: "false".to_string(),
            response: self.settings.response_url.clone(),
            confirmation: self.settings.confirmation_url.clone(),
            name_billing: shipping.full_name.clone(),
            email_billing: shipping.email.clone(),
            mobilephone_billing: shipping.phone.clone(),
            address_billing: format!("{}, {}, {}", shipping.full_address, shipping.city, shipping.department),
            extra1: checkout_id.map(|id| id.to_string()),
            extra2: order.id.to_string(),
        }
    }

    /// Registers a payment session so its callback can be awaited.
    #[instrument(skip(self, session), fields(invoice = %session.invoice))]
    pub fn open(&self, session: &PaymentSession) -> Result<(), ServiceError> {
        let order_id = Uuid::parse_str(&session.extra2)
            .map_err(|e| ServiceError::InvalidInput(format!("Invalid order id: {e}")))?;
        let expected_amount: Decimal = session
            .amount
            .parse()
            .map_err(|e| ServiceError::InvalidInput(format!("Invalid amount: {e}")))?;

        let (sender, receiver) = oneshot::channel();
        self.pending.insert(
            session.invoice.clone(),
            PendingPayment {
                order_id,
                expected_amount,
                sender: Some(sender),
                receiver: Some(receiver),
                opened_at: Instant::now(),
            },
        );
        counter!("storefront_payments.sessions_opened", 1);
        info!(order_id = %order_id, "Payment session opened");
        Ok(())
    }

    /// Delivers a gateway callback to whoever awaits its invoice.
    ///
    /// Repeated callbacks for an invoice that was already resolved are ignored.
    #[instrument(skip(self, response), fields(invoice = %response.x_id_invoice))]
    pub fn relay(&self, response: &GatewayResponse) -> Result<PaymentOutcome, ServiceError> {
        let mut pending = self
            .pending
            .get_mut(&response.x_id_invoice)
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No open payment for invoice {}",
                    response.x_id_invoice
                ))
            })?;

        if response.x_amount != pending.expected_amount {
            counter!("storefront_payments.amount_mismatch", 1);
            warn!(
                expected = %pending.expected_amount,
                received = %response.x_amount,
                "Gateway callback amount does not match the order"
            );
            return Err(ServiceError::PaymentFailed(format!(
                "Amount {} does not match the expected {} for invoice {}",
                response.x_amount, pending.expected_amount, response.x_id_invoice
            )));
        }

        let outcome = response.outcome();
        match pending.sender.take() {
            Some(sender) => {
                if sender.send(outcome.clone()).is_err() {
                    warn!("Payment waiter went away before the callback arrived");
                }
                let label = if outcome.is_approved() { "approved" } else { "declined" };
                counter!("storefront_payments.callbacks", 1, "outcome" => label);
                info!(order_id = %pending.order_id, outcome = label, "Payment callback relayed");
            }
            None => info!("Duplicate payment callback ignored"),
        }
        Ok(outcome)
    }

    /// Waits for the callback of an opened invoice.
    ///
    /// Gives up after the configured gateway timeout with a retryable
    /// `ServiceError::Timeout`; the invoice is then forgotten.
    #[instrument(skip(self))]
    pub async fn await_outcome(&self, invoice: &str) -> Result<PaymentOutcome, ServiceError> {
        let receiver = {
            let mut pending = self.pending.get_mut(invoice).ok_or_else(|| {
                ServiceError::NotFound(format!("No open payment for invoice {invoice}"))
            })?;
            pending.receiver.take().ok_or_else(|| {
                ServiceError::Conflict(format!("Payment {invoice} is already being awaited"))
            })?
        };

        let result = tokio::time::timeout(self.settings.timeout, receiver).await;
        self.pending.remove(invoice);

        match result {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(ServiceError::ExternalServiceError(format!(
                "Payment {invoice} was closed before the gateway answered"
            ))),
            Err(_) => {
                counter!("storefront_payments.timeouts", 1);
                warn!("Timed out waiting for the payment gateway");
                Err(ServiceError::Timeout(format!(
                    "No answer from the payment gateway for invoice {invoice}"
                )))
            }
        }
    }

    /// Forgets an invoice; anyone awaiting it is released with an error.
    /// Also used to close an invoice once its approval has been applied.
    pub fn abandon(&self, invoice: &str) -> bool {
        self.pending.remove(invoice).is_some()
    }

    pub fn is_open(&self, invoice: &str) -> bool {
        self.pending.contains_key(invoice)
    }

    pub fn open_count(&self) -> usize {
        self.pending.len()
    }

    /// Drops invoices nobody is awaiting that are older than the gateway
    /// timeout. Awaited invoices are removed by their waiter.
    pub fn sweep_expired(&self) -> usize {
        let before = self.pending.len();
        let timeout = self.settings.timeout;
        self.pending.retain(|_, pending| {
            pending.receiver.is_none() || pending.opened_at.elapsed() < timeout
        });
        let removed = before.saturating_sub(self.pending.len());
        if removed > 0 {
            counter!("storefront_payments.expired", removed as u64);
            debug!(removed, "Expired payment sessions dropped");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::entities::order::{self, OrderStatus, PaymentMethod, ShippingType};
    use crate::entities::{order_item, shipping_info};
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn adapter(timeout: Duration) -> PaymentGatewayAdapter {
        let mut settings = GatewaySettings::from(&AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "test".into(),
        ));
        settings.public_key = "pk_test".into();
        settings.timeout = timeout;
        PaymentGatewayAdapter::new(settings, PricingEngine::default())
    }

    fn persisted() -> PersistedOrder {
        let order_id = Uuid::new_v4();
        let now = Utc::now();
        PersistedOrder {
            order: order::Model {
                id: order_id,
                reference: "ORD-20240105-003".into(),
                customer_email: "luis@example.com".into(),
                customer_name: "Luis Pérez".into(),
                customer_phone: "3109876543".into(),
                subtotal: dec!(150000),
                shipping_cost: dec!(18000),
                total: dec!(168000),
                status: OrderStatus::Pending,
                shipping_type: ShippingType::Nationwide,
                payment_method: PaymentMethod::Gateway,
                created_at: now,
                updated_at: now,
            },
            items: vec![order_item::Model {
                id: Uuid::new_v4(),
                order_id,
                product_id: "vestido-02".into(),
                product_name: "Vestido".into(),
                product_image: None,
                size: Some("S".into()),
                color: None,
                quantity: 1,
                unit_price: dec!(150000),
                subtotal: dec!(150000),
            }],
            shipping: shipping_info::Model {
                id: Uuid::new_v4(),
                order_id,
                full_name: "Luis Pérez".into(),
                email: "luis@example.com".into(),
                phone: "3109876543".into(),
                full_address: "Carrera 7 # 12-30".into(),
                department: "Bogotá D.C.".into(),
                city: "Bogotá".into(),
                postal_code: None,
                cod_eligible: false,
                shipping_cost: dec!(18000),
            },
        }
    }

    fn response(invoice: &str, code: i32, amount: Decimal) -> GatewayResponse {
        GatewayResponse {
            x_ref_payco: "98765".into(),
            x_cod_response: code,
            x_amount: amount,
            x_transaction_date: Some("2024-01-05 10:31:00".into()),
            x_id_invoice: invoice.into(),
            x_response_reason_text: None,
            success: None,
            x_extra1: None,
        }
    }

    #[test]
    fn session_carries_gateway_fields() {
        let adapter = adapter(Duration::from_secs(1));
        let session = adapter.build_session(&persisted(), None);

        assert_eq!(session.amount, "168000");
        assert_eq!(session.tax_base, "161538");
        assert_eq!(session.tax, "6462");
        assert_eq!(session.currency, "cop");
        assert_eq!(session.country, "co");
        assert!(session.invoice.starts_with("ORD-20240105-003-"));
        assert_eq!(session.description, "Vestido x1");
        assert_eq!(session.mobilephone_billing, "3109876543");
    }

    #[test]
    fn each_attempt_gets_its_own_invoice() {
        let adapter = adapter(Duration::from_secs(1));
        let order = persisted();
        let first = adapter.build_session(&order, None);
        let second = adapter.build_session(&order, None);
        assert_ne!(first.invoice, second.invoice);
    }

    #[test]
    fn callback_code_accepts_text_or_number() {
        let parsed: GatewayResponse = serde_json::from_value(serde_json::json!({
            "x_ref_payco": "123",
            "x_cod_response": "2",
            "x_amount": "168000",
            "x_id_invoice": "ORD-20240105-003-ABC123",
            "x_response_reason_text": "Fondos insuficientes"
        }))
        .unwrap();

        assert_eq!(parsed.x_cod_response, 2);
        assert_matches!(
            parsed.outcome(),
            PaymentOutcome::Declined { reason_code, reason }
                if reason_code == "2" && reason == "Fondos insuficientes"
        );
    }

    #[test]
    fn success_flag_false_overrides_code() {
        let mut callback = response("inv", 1, dec!(10));
        callback.success = Some(false);
        assert!(!callback.outcome().is_approved());
    }

    #[tokio::test]
    async fn relayed_callback_resolves_waiter() {
        let adapter = Arc::new(adapter(Duration::from_secs(5)));
        let session = adapter.build_session(&persisted(), None);
        adapter.open(&session).unwrap();

        let waiter = {
            let adapter = adapter.clone();
            let invoice = session.invoice.clone();
            tokio::spawn(async move { adapter.await_outcome(&invoice).await })
        };

        adapter
            .relay(&response(&session.invoice, 1, dec!(168000)))
            .unwrap();

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            PaymentOutcome::Approved {
                transaction_id: "98765".into()
            }
        );
        assert!(!adapter.is_open(&session.invoice));
    }

    #[tokio::test]
    async fn callback_before_await_is_kept() {
        let adapter = adapter(Duration::from_secs(5));
        let session = adapter.build_session(&persisted(), None);
        adapter.open(&session).unwrap();

        adapter
            .relay(&response(&session.invoice, 2, dec!(168000)))
            .unwrap();
        // duplicate confirmation call
        adapter
            .relay(&response(&session.invoice, 2, dec!(168000)))
            .unwrap();

        let outcome = adapter.await_outcome(&session.invoice).await.unwrap();
        assert_matches!(outcome, PaymentOutcome::Declined { .. });
    }

    #[tokio::test]
    async fn amount_mismatch_is_rejected() {
        let adapter = adapter(Duration::from_secs(5));
        let session = adapter.build_session(&persisted(), None);
        adapter.open(&session).unwrap();

        assert_matches!(
            adapter.relay(&response(&session.invoice, 1, dec!(1000))),
            Err(ServiceError::PaymentFailed(_))
        );
    }

    #[tokio::test]
    async fn silence_from_gateway_times_out() {
        let adapter = adapter(Duration::from_millis(20));
        let session = adapter.build_session(&persisted(), None);
        adapter.open(&session).unwrap();

        let err = adapter.await_outcome(&session.invoice).await.unwrap_err();
        assert_matches!(err, ServiceError::Timeout(_));
        assert!(err.is_retryable());
        assert!(!adapter.is_open(&session.invoice));
    }

    #[test]
    fn stale_invoices_are_swept() {
        let stale = adapter(Duration::ZERO);
        let session = stale.build_session(&persisted(), None);
        stale.open(&session).unwrap();

        assert_eq!(stale.sweep_expired(), 1);
        assert!(!stale.is_open(&session.invoice));

        let fresh = adapter(Duration::from_secs(600));
        fresh.open(&session).unwrap();
        assert_eq!(fresh.sweep_expired(), 0);
        assert_eq!(fresh.open_count(), 1);
    }

    #[tokio::test]
    async fn unknown_invoice_is_not_found() {
        let adapter = adapter(Duration::from_secs(1));
        assert_matches!(
            adapter.relay(&response("nope", 1, dec!(1))),
            Err(ServiceError::NotFound(_))
        );
    }
}
