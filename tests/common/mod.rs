#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use rust_decimal::Decimal;
use serde_json::Value;
use storefront_checkout::{
    app_router,
    config::AppConfig,
    db,
    models::address::ShippingForm,
    models::cart::{CartLine, VariantSelection},
    notifications::{NotificationDispatcher, NotificationError, OrderConfirmation, OrderNotifier},
    services::checkout::CheckoutService,
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;

/// Captures confirmations instead of sending emails.
pub struct RecordingNotifier {
    sender: mpsc::UnboundedSender<OrderConfirmation>,
}

#[async_trait]
impl OrderNotifier for RecordingNotifier {
    async fn notify(&self, confirmation: &OrderConfirmation) -> Result<(), NotificationError> {
        let _ = self.sender.send(confirmation.clone());
        Ok(())
    }
}

/// Application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    notifications: mpsc::UnboundedReceiver<OrderConfirmation>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting the caller adjust the configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection keeps every query on the same in-memory database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.store_name = "Tienda de prueba".to_string();
        cfg.gateway.public_key = Some("test-public-key".to_string());
        cfg.gateway.timeout_secs = 5;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (sender, notifications) = mpsc::unbounded_channel();
        let dispatcher = NotificationDispatcher::new(Arc::new(RecordingNotifier { sender }));

        let state = AppState::build(Arc::new(pool), cfg, dispatcher).expect("app state");
        let router = app_router(state.clone());

        Self {
            router,
            state,
            notifications,
        }
    }

    pub fn checkout(&self) -> &CheckoutService {
        &self.state.checkout
    }

    /// Waits for the next confirmation handed to the notifier.
    pub async fn next_notification(&mut self) -> OrderConfirmation {
        tokio::time::timeout(Duration::from_secs(2), self.notifications.recv())
            .await
            .expect("no confirmation was dispatched")
            .expect("notification channel closed")
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response")
    }

    /// Posts an `application/x-www-form-urlencoded` body.
    pub async fn post_form(&self, uri: &str, fields: &[(&str, &str)]) -> Response {
        let encoded = fields
            .iter()
            .map(|(key, value)| format!("{key}={}", value.replace(' ', "+")))
            .collect::<Vec<_>>()
            .join("&");

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(encoded))
            .expect("request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn cart_line(product_id: &str, name: &str, unit_price: Decimal, quantity: u32) -> CartLine {
    CartLine {
        product_id: product_id.to_string(),
        name: name.to_string(),
        image: None,
        variant: VariantSelection {
            size: Some("M".to_string()),
            color: Some("Negro".to_string()),
        },
        unit_price,
        quantity,
    }
}

/// A complete, valid destination in the cash-on-delivery region.
pub fn medellin_form() -> ShippingForm {
    ShippingForm {
        full_name: "Ana Gómez".to_string(),
        email: "ana@example.com".to_string(),
        phone: "300 123 4567".to_string(),
        full_address: "Calle 10 # 43-12, El Poblado".to_string(),
        region: "Antioquia".to_string(),
        city: "Medellín".to_string(),
        postal_code: "050021".to_string(),
    }
}

/// A complete, valid destination outside the cash-on-delivery region.
pub fn bogota_form() -> ShippingForm {
    ShippingForm {
        full_name: "Carlos Ruiz".to_string(),
        email: "carlos@example.com".to_string(),
        phone: "+57 310 555 1234".to_string(),
        full_address: "Carrera 7 # 72-41".to_string(),
        region: "Bogotá D.C.".to_string(),
        city: "Bogotá".to_string(),
        postal_code: String::new(),
    }
}
