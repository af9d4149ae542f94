use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::order::{self, OrderStatus, PaymentMethod, ShippingType};
use crate::errors::ServiceError;
use crate::repositories::{OrderFilters, OrderPage, PersistedOrder};
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub status: Option<OrderStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub shipping_type: Option<ShippingType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

/// List orders with filters and pagination
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> ApiResult<OrderPage> {
    let filters = OrderFilters {
        status: query.status,
        payment_method: query.payment_method,
        shipping_type: query.shipping_type,
        from: query.from,
        to: query.to,
        search: query.search,
    };
    let page = state
        .orders
        .get_orders(&filters, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

/// Get an order by id or reference, with its items and shipping record
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PersistedOrder> {
    let order_id = match Uuid::parse_str(&id) {
        Ok(order_id) => order_id,
        Err(_) => {
            state
                .orders
                .find_by_reference(&id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Order {id} not found")))?
                .id
        }
    };
    Ok(Json(ApiResponse::success(state.orders.load(order_id).await?)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

/// Update order status
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> ApiResult<order::Model> {
    let updated = state
        .orders
        .update_order_status(id, payload.status)
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}
