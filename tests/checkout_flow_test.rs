//! End-to-end checkout tests.
//!
//! Tests cover:
//! - Cash-on-delivery checkout inside the regional zone
//! - Gateway checkout for nationwide destinations, approvals and declines
//! - Shipping form validation
//! - The HTTP surface: quote, checkout sessions, gateway callbacks and order lookup

mod common;

use std::str::FromStr;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::{bogota_form, cart_line, medellin_form, response_json, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use storefront_checkout::{
    entities::order::{OrderStatus, PaymentMethod, ShippingType},
    errors::ServiceError,
    models::address::{ShippingField, ShippingForm},
    services::checkout::{CheckoutSession, CheckoutStep},
    services::payments::{GatewayResponse, PaymentOutcome},
};
use strum::IntoEnumIterator;

fn decimal(value: &Value) -> Decimal {
    Decimal::from_str(value.as_str().expect("decimal string")).expect("decimal")
}

/// A session on the confirmation step for the given cart and destination.
fn session_at_confirmation(app: &TestApp, lines: Vec<(&str, Decimal, u32)>, form: ShippingForm) -> CheckoutSession {
    let mut session = CheckoutSession::new();
    for (id, price, quantity) in lines {
        session
            .add_line(cart_line(id, "Prenda", price, quantity))
            .expect("add line");
    }
    session.proceed_to_shipping().expect("shipping step");
    for field in ShippingField::iter() {
        session.set_field(field, form.get(field)).expect("set field");
    }
    session
        .submit_shipping(app.checkout().locator())
        .expect("valid shipping form");
    assert_eq!(session.step(), &CheckoutStep::Confirmation);
    session
}

/// Opens a checkout session over HTTP with the shipping form already submitted.
async fn open_session(app: &TestApp, lines: Value, form: ShippingForm) -> String {
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/sessions",
            Some(json!({
                "lines": lines,
                "shipping": serde_json::to_value(form).expect("form json")
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(body["data"]["step"]["step"], "confirmation");
    body["data"]["session_id"]
        .as_str()
        .expect("session id")
        .to_string()
}

fn gateway_response(invoice: &str, code: i32, amount: Decimal) -> GatewayResponse {
    GatewayResponse {
        x_ref_payco: "98765432".to_string(),
        x_cod_response: code,
        x_amount: amount,
        x_transaction_date: Some("2024-01-05 10:15:00".to_string()),
        x_id_invoice: invoice.to_string(),
        x_response_reason_text: None,
        success: None,
        x_extra1: None,
    }
}

// ==================== Service level ====================

#[tokio::test]
async fn regional_order_is_cash_on_delivery_with_discount() {
    let mut app = TestApp::new().await;
    let mut session = session_at_confirmation(
        &app,
        vec![("vestido-01", dec!(125000), 2)],
        medellin_form(),
    );

    let receipt = app.checkout().confirm(&mut session).await.expect("confirm");

    assert_eq!(receipt.pricing.subtotal_with_tax, dec!(250000));
    assert_eq!(receipt.pricing.discount_rate, dec!(0.05));
    assert_eq!(receipt.pricing.discount_amount, dec!(12500));
    assert_eq!(receipt.pricing.shipping_cost, dec!(0));
    assert_eq!(receipt.pricing.total, dec!(237500));
    assert!(receipt.payment_session.is_none());

    let order = &receipt.order.order;
    assert_eq!(order.payment_method, PaymentMethod::CashOnDelivery);
    assert_eq!(order.shipping_type, ShippingType::RegionalCod);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total, dec!(237500));
    assert_eq!(order.customer_phone, "3001234567");
    assert!(receipt.order.shipping.cod_eligible);
    assert_eq!(receipt.order.items.len(), 1);
    assert_eq!(receipt.order.items[0].subtotal, dec!(250000));

    assert_matches!(session.step(), CheckoutStep::Completed { order: placed } if placed.reference == order.reference);
    assert!(session.cart().is_empty());

    let confirmation = app.next_notification().await;
    assert_eq!(confirmation.reference, order.reference);
    assert_eq!(confirmation.customer_email, "ana@example.com");
    assert_eq!(confirmation.shipping_address.department, "Antioquia");
}

#[tokio::test]
async fn nationwide_order_goes_through_the_gateway() {
    let app = TestApp::new().await;
    let mut session = session_at_confirmation(
        &app,
        vec![("camisa-02", dec!(50000), 3)],
        bogota_form(),
    );

    let receipt = app.checkout().confirm(&mut session).await.expect("confirm");

    assert_eq!(receipt.pricing.discount_amount, dec!(0));
    assert_eq!(receipt.pricing.shipping_cost, dec!(18000));
    assert_eq!(receipt.pricing.total, dec!(168000));
    assert_eq!(receipt.order.order.payment_method, PaymentMethod::Gateway);
    assert!(!receipt.order.shipping.cod_eligible);

    let payment = receipt.payment_session.expect("payment session");
    assert_eq!(payment.amount, "168000");
    assert_eq!(payment.tax_base, "161538");
    assert_eq!(payment.tax, "6462");
    assert_eq!(payment.currency, "cop");
    assert_eq!(payment.key, "test-public-key");
    assert_eq!(payment.extra1, Some(session.id.to_string()));
    assert!(payment.invoice.starts_with(&receipt.order.order.reference));

    assert_matches!(
        session.step(),
        CheckoutStep::AwaitingPayment { order } if order.invoice.as_deref() == Some(payment.invoice.as_str())
    );

    app.state
        .payments
        .relay(&gateway_response(&payment.invoice, 1, dec!(168000)))
        .expect("relay");
    let outcome = app
        .checkout()
        .await_payment(&mut session)
        .await
        .expect("outcome");

    assert!(outcome.is_approved());
    assert_matches!(
        session.step(),
        CheckoutStep::Completed { order } if order.transaction_id.as_deref() == Some("98765432")
    );
}

#[tokio::test]
async fn declined_payment_can_be_retried_with_a_new_invoice() {
    let app = TestApp::new().await;
    let mut session = session_at_confirmation(
        &app,
        vec![("chaqueta-03", dec!(150000), 1)],
        bogota_form(),
    );
    let receipt = app.checkout().confirm(&mut session).await.expect("confirm");
    let first = receipt.payment_session.expect("payment session");

    app.state
        .payments
        .relay(&gateway_response(&first.invoice, 2, dec!(168000)))
        .expect("relay decline");
    let outcome = app
        .checkout()
        .await_payment(&mut session)
        .await
        .expect("outcome");

    assert_matches!(outcome, PaymentOutcome::Declined { ref reason_code, .. } if reason_code == "2");
    assert_matches!(session.step(), CheckoutStep::AwaitingPayment { .. });
    assert!(session.last_decline().is_some());

    let second = app
        .checkout()
        .retry_payment(&mut session)
        .await
        .expect("retry");
    assert_ne!(second.invoice, first.invoice);
    assert_eq!(second.amount, first.amount);
    assert!(!app.state.payments.is_open(&first.invoice));
    assert!(app.state.payments.is_open(&second.invoice));

    app.state
        .payments
        .relay(&gateway_response(&second.invoice, 1, dec!(168000)))
        .expect("relay approval");
    app.checkout()
        .await_payment(&mut session)
        .await
        .expect("outcome");

    assert_matches!(session.step(), CheckoutStep::Completed { .. });
    assert!(session.last_decline().is_none());

    // Still a single order for both attempts
    let page = app
        .state
        .orders
        .get_orders(&Default::default(), 1, 20)
        .await
        .expect("orders");
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn invalid_email_keeps_the_shipping_form() {
    let app = TestApp::new().await;
    let mut session = CheckoutSession::new();
    session
        .add_line(cart_line("falda-04", "Falda", dec!(90000), 1))
        .expect("add line");
    session.proceed_to_shipping().expect("shipping step");

    let mut form = medellin_form();
    form.email = "ana.example.com".to_string();
    for field in ShippingField::iter() {
        session.set_field(field, form.get(field)).expect("set field");
    }

    let result = session.submit_shipping(app.checkout().locator());

    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert_eq!(session.step(), &CheckoutStep::ShippingForm);
    assert_eq!(
        session.field_errors().keys().copied().collect::<Vec<_>>(),
        vec![ShippingField::Email]
    );
    assert_eq!(session.form().city, "Medellín");
}

#[tokio::test]
async fn failed_confirmation_stays_on_confirmation_with_a_retryable_error() {
    let app = TestApp::new().await;
    let mut session = session_at_confirmation(
        &app,
        vec![("vestido-01", dec!(125000), 1)],
        medellin_form(),
    );

    // Break persistence underneath the service
    use sea_orm::{ConnectionTrait, Statement};
    app.state
        .db
        .execute(Statement::from_string(
            app.state.db.get_database_backend(),
            "DROP TABLE shipping_info".to_string(),
        ))
        .await
        .expect("drop table");

    let err = app
        .checkout()
        .confirm(&mut session)
        .await
        .expect_err("persistence failure");

    assert_matches!(err, ServiceError::DatabaseError(_));
    assert_eq!(session.step(), &CheckoutStep::Confirmation);
    assert!(!session.is_submitting());
    assert!(!session.cart().is_empty());
    let last_error = session.last_error().expect("error recorded");
    assert!(last_error.retryable);
    assert!(last_error.message.contains("shipping_info"));

    // Transactional writes leave nothing behind
    let page = app
        .state
        .orders
        .get_orders(&Default::default(), 1, 20)
        .await
        .expect("orders");
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn sequential_write_outliving_the_timeout_is_not_offered_again() {
    use sea_orm::TransactionTrait;
    use storefront_checkout::config::OrderWriteMode;

    let mut app = TestApp::with_config(|cfg| {
        cfg.order_write_mode = OrderWriteMode::Sequential;
        cfg.persistence_timeout_secs = 1;
    })
    .await;
    let mut session = session_at_confirmation(
        &app,
        vec![("vestido-01", dec!(125000), 1)],
        medellin_form(),
    );

    // Hold the only connection so the write cannot start in time
    let blocker = app.state.db.begin().await.expect("begin");
    let err = app
        .checkout()
        .confirm(&mut session)
        .await
        .expect_err("write outlives the timeout");

    assert_matches!(err, ServiceError::OrderWriteInDoubt(_));
    assert!(!err.is_retryable());
    assert_eq!(session.step(), &CheckoutStep::Confirmation);
    assert!(!session.last_error().expect("error recorded").retryable);

    // The write carries on once the connection is free, confirmation included
    blocker.rollback().await.expect("release connection");
    let confirmation = app.next_notification().await;
    let order = app
        .state
        .orders
        .find_by_reference(&confirmation.reference)
        .await
        .expect("lookup")
        .expect("order written in the background");
    let loaded = app.state.orders.load(order.id).await.expect("load");
    assert_eq!(loaded.items.len(), 1);
}

// ==================== HTTP ====================

#[tokio::test]
async fn quote_endpoint_prices_a_regional_cart() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/quote",
            Some(json!({
                "lines": [{
                    "product_id": "vestido-01",
                    "name": "Vestido",
                    "unit_price": "125000",
                    "quantity": 2
                }],
                "region": "antioquia",
                "city": "medellin"
            })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["shipping_type"], "regional-cod");
    assert_eq!(decimal(&body["data"]["pricing"]["total"]), dec!(237500));
    assert_eq!(decimal(&body["data"]["pricing"]["shipping_cost"]), dec!(0));
}

#[tokio::test]
async fn quote_rejects_amounts_out_of_range() {
    let app = TestApp::new().await;

    let huge_quantity = app
        .request(
            Method::POST,
            "/api/v1/checkout/quote",
            Some(json!({
                "lines": [
                    { "product_id": "gorra-01", "name": "Gorra", "unit_price": "35000", "quantity": 3000000000u64 },
                    { "product_id": "gorra-01", "name": "Gorra", "unit_price": "35000", "quantity": 3000000000u64 }
                ]
            })),
        )
        .await;
    assert_eq!(huge_quantity.status(), StatusCode::BAD_REQUEST);

    let huge_price = app
        .request(
            Method::POST,
            "/api/v1/checkout/quote",
            Some(json!({
                "lines": [{
                    "product_id": "joya-01",
                    "name": "Joya",
                    "unit_price": "79228162514264337593543950335",
                    "quantity": 2
                }]
            })),
        )
        .await;
    assert_eq!(huge_price.status(), StatusCode::BAD_REQUEST);
    let body = response_json(huge_price).await;
    assert_eq!(body["retryable"], false);

    // The server keeps answering
    let health = app.request(Method::GET, "/health", None).await;
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn session_endpoint_reports_field_errors_until_fixed() {
    let app = TestApp::new().await;
    let mut shipping = serde_json::to_value(medellin_form()).expect("form json");
    shipping["email"] = json!("not-an-email");

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/sessions",
            Some(json!({
                "lines": [{
                    "product_id": "falda-04",
                    "name": "Falda",
                    "unit_price": "90000",
                    "quantity": 1
                }],
                "shipping": shipping
            })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response).await;
    assert_eq!(body["success"], false);
    let errors = body["field_errors"].as_object().expect("field errors");
    assert_eq!(errors.len(), 1);
    assert!(errors.contains_key("email"));
    let session_id = body["session_id"].as_str().expect("session id").to_string();

    let fixed = app
        .request(
            Method::PUT,
            &format!("/api/v1/checkout/sessions/{session_id}/shipping"),
            Some(serde_json::to_value(medellin_form()).expect("form json")),
        )
        .await;
    assert_eq!(fixed.status(), StatusCode::OK);
    let fixed_body = response_json(fixed).await;
    assert_eq!(fixed_body["data"]["step"]["step"], "confirmation");
    assert_eq!(decimal(&fixed_body["data"]["pricing"]["shipping_cost"]), dec!(10000));
}

#[tokio::test]
async fn concurrent_confirmations_place_a_single_order() {
    let app = TestApp::new().await;
    let session_id = open_session(
        &app,
        json!([{ "product_id": "vestido-01", "name": "Vestido", "unit_price": "125000", "quantity": 1 }]),
        medellin_form(),
    )
    .await;
    let uri = format!("/api/v1/checkout/sessions/{session_id}/confirm");

    let (first, second) = tokio::join!(
        app.request(Method::POST, &uri, None),
        app.request(Method::POST, &uri, None)
    );

    let mut statuses = vec![first.status(), second.status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::CONFLICT]);

    // A later confirmation of the completed checkout conflicts too
    let again = app.request(Method::POST, &uri, None).await;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let page = app
        .state
        .orders
        .get_orders(&Default::default(), 1, 20)
        .await
        .expect("orders");
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn gateway_confirmation_callback_completes_the_session() {
    let app = TestApp::new().await;
    let session_id = open_session(
        &app,
        json!([{ "product_id": "camisa-02", "name": "Camisa", "unit_price": "50000", "quantity": 3 }]),
        bogota_form(),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/sessions/{session_id}/confirm"),
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(body["data"]["step"]["step"], "awaiting_payment");
    assert_eq!(body["data"]["session_id"], session_id.as_str());
    let invoice = body["data"]["receipt"]["payment_session"]["invoice"]
        .as_str()
        .expect("invoice")
        .to_string();
    let reference = body["data"]["receipt"]["order"]["order"]["reference"]
        .as_str()
        .expect("reference")
        .to_string();
    assert!(app.state.payments.is_open(&invoice));

    let approval = [
        ("x_ref_payco", "55501"),
        ("x_cod_response", "1"),
        ("x_amount", "168000"),
        ("x_id_invoice", invoice.as_str()),
        ("x_response_reason_text", "Aprobada"),
        ("x_extra1", session_id.as_str()),
    ];
    let callback = app
        .post_form("/api/v1/payments/confirmation", &approval)
        .await;
    assert_eq!(callback.status(), StatusCode::OK);
    let callback_body = response_json(callback).await;
    assert_eq!(callback_body["data"]["outcome"], "approved");

    // Applied approvals close the invoice; the gateway's repeat still gets an answer
    assert!(!app.state.payments.is_open(&invoice));
    let repeat = app
        .post_form("/api/v1/payments/confirmation", &approval)
        .await;
    assert_eq!(repeat.status(), StatusCode::OK);
    assert_eq!(response_json(repeat).await["data"]["outcome"], "approved");

    let session = app
        .request(
            Method::GET,
            &format!("/api/v1/checkout/sessions/{session_id}"),
            None,
        )
        .await;
    assert_eq!(session.status(), StatusCode::OK);
    let session_body = response_json(session).await;
    assert_eq!(session_body["data"]["step"]["step"], "completed");
    assert_eq!(
        session_body["data"]["step"]["order"]["transaction_id"],
        "55501"
    );

    let order = app
        .request(Method::GET, &format!("/api/v1/orders/{reference}"), None)
        .await;
    assert_eq!(order.status(), StatusCode::OK);
    let order_body = response_json(order).await;
    assert_eq!(order_body["data"]["shipping"]["department"], "Bogotá D.C.");
    assert_eq!(order_body["data"]["items"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn callback_with_wrong_amount_is_rejected() {
    let app = TestApp::new().await;
    let mut session = session_at_confirmation(
        &app,
        vec![("camisa-02", dec!(50000), 3)],
        bogota_form(),
    );
    let receipt = app.checkout().confirm(&mut session).await.expect("confirm");
    let invoice = receipt.payment_session.expect("payment session").invoice;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/response",
            Some(json!({
                "x_ref_payco": "1",
                "x_cod_response": 1,
                "x_amount": "1000",
                "x_id_invoice": invoice,
            })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert!(app.state.payments.is_open(&invoice));
}

#[tokio::test]
async fn order_status_can_be_advanced_over_http() {
    let app = TestApp::new().await;
    let mut session = session_at_confirmation(
        &app,
        vec![("vestido-01", dec!(125000), 2)],
        medellin_form(),
    );
    let receipt = app.checkout().confirm(&mut session).await.expect("confirm");
    let order_id = receipt.order.order.id;

    let shipped = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{order_id}/status"),
            Some(json!({ "status": "enviado" })),
        )
        .await;
    assert_eq!(shipped.status(), StatusCode::OK);
    assert_eq!(response_json(shipped).await["data"]["status"], "enviado");

    let back_to_pending = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{order_id}/status"),
            Some(json!({ "status": "pendiente" })),
        )
        .await;
    assert_eq!(back_to_pending.status(), StatusCode::BAD_REQUEST);

    let listing = app
        .request(Method::GET, "/api/v1/orders?status=enviado", None)
        .await;
    let listing_body = response_json(listing).await;
    assert_eq!(listing_body["data"]["total"], 1);
}

#[tokio::test]
async fn health_reports_database_status() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "healthy");
}
