use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::order::{PaymentMethod, ShippingType};
use crate::repositories::order_repository::PersistedOrder;

/// Notification delivery errors. These are logged and never shown to shoppers.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Notification rejected: {0}")]
    Rejected(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationItem {
    pub product_name: String,
    pub size: Option<String>,
    pub color: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationAddress {
    pub full_address: String,
    pub city: String,
    pub department: String,
    pub postal_code: Option<String>,
}

/// Payload of the order confirmation email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfirmation {
    pub order_id: Uuid,
    pub reference: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub items: Vec<ConfirmationItem>,
    pub shipping_address: ConfirmationAddress,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub payment_method: PaymentMethod,
    pub shipping_type: ShippingType,
    pub created_at: DateTime<Utc>,
}

impl From<&PersistedOrder> for OrderConfirmation {
    fn from(persisted: &PersistedOrder) -> Self {
        let order = &persisted.order;
        let shipping = &persisted.shipping;
        Self {
            order_id: order.id,
            reference: order.reference.clone(),
            customer_name: order.customer_name.clone(),
            customer_email: order.customer_email.clone(),
            customer_phone: order.customer_phone.clone(),
            items: persisted
                .items
                .iter()
                .map(|item| ConfirmationItem {
                    product_name: item.product_name.clone(),
                    size: item.size.clone(),
                    color: item.color.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    subtotal: item.subtotal,
                })
                .collect(),
            shipping_address: ConfirmationAddress {
                full_address: shipping.full_address.clone(),
                city: shipping.city.clone(),
                department: shipping.department.clone(),
                postal_code: shipping.postal_code.clone(),
            },
            subtotal: order.subtotal,
            shipping_cost: order.shipping_cost,
            total: order.total,
            payment_method: order.payment_method,
            shipping_type: order.shipping_type,
            created_at: order.created_at,
        }
    }
}

#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn notify(&self, confirmation: &OrderConfirmation) -> Result<(), NotificationError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmationRequest<'a> {
    order_data: &'a OrderConfirmation,
}

#[derive(Deserialize)]
struct ConfirmationReply {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts `{ "orderData": ... }` to the confirmation-email endpoint.
#[derive(Clone)]
pub struct HttpOrderNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpOrderNotifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl OrderNotifier for HttpOrderNotifier {
    #[instrument(skip(self, confirmation), fields(reference = %confirmation.reference))]
    async fn notify(&self, confirmation: &OrderConfirmation) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ConfirmationRequest {
                order_data: confirmation,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(NotificationError::Rejected(format!("HTTP {status}: {body}")));
        }

        let reply: ConfirmationReply = serde_json::from_str(&body)?;
        if !reply.success {
            return Err(NotificationError::Rejected(
                reply
                    .error
                    .unwrap_or_else(|| "endpoint reported failure".to_string()),
            ));
        }
        Ok(())
    }
}

/// Used when no confirmation endpoint is configured.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl OrderNotifier for LoggingNotifier {
    async fn notify(&self, confirmation: &OrderConfirmation) -> Result<(), NotificationError> {
        info!(
            reference = %confirmation.reference,
            email = %confirmation.customer_email,
            "No confirmation endpoint configured; skipping order email"
        );
        Ok(())
    }
}

/// Sends order confirmations in the background. Failures are logged, never
/// retried and never reported to the caller.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn OrderNotifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn OrderNotifier>) -> Self {
        Self { notifier }
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, NotificationError> {
        let notifier: Arc<dyn OrderNotifier> = match cfg.notification_endpoint.as_deref() {
            Some(endpoint) if !endpoint.trim().is_empty() => Arc::new(HttpOrderNotifier::new(
                endpoint,
                Duration::from_secs(cfg.notification_timeout_secs),
            )?),
            _ => Arc::new(LoggingNotifier),
        };
        Ok(Self::new(notifier))
    }

    pub fn dispatch(&self, confirmation: OrderConfirmation) -> JoinHandle<()> {
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            match notifier.notify(&confirmation).await {
                Ok(()) => {
                    counter!("storefront_notifications.sent", 1);
                    info!(reference = %confirmation.reference, "Order confirmation sent");
                }
                Err(e) => {
                    counter!("storefront_notifications.failed", 1);
                    warn!(
                        reference = %confirmation.reference,
                        error = %e,
                        "Order confirmation could not be sent"
                    );
                }
            }
        })
    }
}
