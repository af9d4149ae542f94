//! Storefront checkout library
//!
//! Pricing, shipping eligibility, checkout sessions, order persistence,
//! confirmation notifications and the payment gateway hand-off.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod migrator;
pub mod models;
pub mod notifications;
pub mod repositories;
pub mod services;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::notifications::NotificationDispatcher;
use crate::repositories::{OrderRepository, RepositorySettings};
use crate::services::checkout::{CheckoutService, InMemorySessionStore, SessionStore};
use crate::services::payments::{GatewaySettings, PaymentGatewayAdapter};
use crate::services::pricing::{PricingEngine, PricingPolicy};
use crate::services::shipping::ShippingLocator;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub checkout: CheckoutService,
    pub orders: Arc<OrderRepository>,
    pub sessions: Arc<dyn SessionStore>,
    pub payments: Arc<PaymentGatewayAdapter>,
}

impl AppState {
    /// Wires every service from configuration.
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        notifications: NotificationDispatcher,
    ) -> Result<Self, errors::ServiceError> {
        let pricing = PricingEngine::new(PricingPolicy::from(&config.pricing));
        let locator = ShippingLocator::new(config.cod_region.clone());
        let orders = Arc::new(OrderRepository::new(
            db.clone(),
            RepositorySettings::from_config(&config)?,
        ));
        let payments = Arc::new(PaymentGatewayAdapter::new(
            GatewaySettings::from(&config),
            pricing.clone(),
        ));
        let checkout = CheckoutService::new(
            orders.clone(),
            pricing,
            locator,
            notifications,
            payments.clone(),
            Duration::from_secs(config.persistence_timeout_secs),
        );

        Ok(Self {
            checkout,
            orders,
            sessions: Arc::new(InMemorySessionStore::with_ttl(Duration::from_secs(
                config.session_ttl_secs,
            ))),
            payments,
            db,
            config,
        })
    }

    /// Drops expired checkout sessions and stale payment attempts.
    /// Returns how many entries went in total.
    pub async fn sweep_expired(&self) -> Result<usize, errors::ServiceError> {
        let sessions = self.sessions.sweep_expired().await?;
        let payments = self.payments.sweep_expired();
        Ok(sessions + payments)
    }
}

/// Background task sweeping expired sessions and payment attempts.
pub async fn start_cleanup_task(state: AppState, interval: Duration) {
    let mut interval_timer = tokio::time::interval(interval);

    loop {
        interval_timer.tick().await;
        match state.sweep_expired().await {
            Ok(removed) => debug!(removed, "Checkout cleanup completed"),
            Err(e) => warn!("Checkout cleanup failed: {}", e),
        }
    }
}

// Common response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        // Checkout
        .route("/checkout/quote", post(handlers::checkout::quote))
        .route(
            "/checkout/sessions",
            post(handlers::checkout::create_session),
        )
        .route(
            "/checkout/sessions/:id",
            get(handlers::checkout::get_session).delete(handlers::checkout::abandon_session),
        )
        .route(
            "/checkout/sessions/:id/shipping",
            put(handlers::checkout::submit_shipping),
        )
        .route(
            "/checkout/sessions/:id/confirm",
            post(handlers::checkout::confirm),
        )
        .route(
            "/checkout/sessions/:id/payment/retry",
            post(handlers::checkout::retry_payment),
        )
        // Gateway callbacks
        .route(
            "/payments/response",
            post(handlers::payments::payment_response),
        )
        .route(
            "/payments/confirmation",
            post(handlers::payments::payment_confirmation),
        )
        // Back-office contract
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/:id/status",
            put(handlers::orders::update_order_status),
        )
}

/// Full application router with request tracing.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(_) => "unhealthy",
    };

    Ok(Json(ApiResponse::success(json!({
        "status": db_status,
        "checks": { "database": db_status },
        "service": "storefront-checkout",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))))
}
