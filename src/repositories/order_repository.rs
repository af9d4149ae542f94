use chrono::{DateTime, FixedOffset, Offset, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Condition, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{AppConfig, OrderWriteMode};
use crate::entities::order::{
    self, Column, Entity as Order, Model as OrderModel, OrderStatus, PaymentMethod, ShippingType,
};
use crate::entities::order_item::{self, Entity as OrderItem, Model as OrderItemModel};
use crate::entities::shipping_info::{self, Entity as ShippingInfo, Model as ShippingInfoModel};
use crate::errors::{ServiceError, WriteStage};
use crate::models::address::ShippingAddress;
use crate::repositories::Repository;

use super::BaseRepository;

const REFERENCE_PREFIX: &str = "ORD";
const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone)]
pub struct RepositorySettings {
    pub write_mode: OrderWriteMode,
    pub reference_max_attempts: u32,
    /// Offset used to pick the calendar date in order references
    pub store_offset: FixedOffset,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            write_mode: OrderWriteMode::default(),
            reference_max_attempts: 5,
            store_offset: FixedOffset::west_opt(5 * 3600).unwrap_or_else(|| Utc.fix()),
        }
    }
}

impl RepositorySettings {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        let store_offset = FixedOffset::east_opt(cfg.store_utc_offset_hours * 3600).ok_or_else(
            || {
                ServiceError::InvalidInput(format!(
                    "Invalid store UTC offset: {}",
                    cfg.store_utc_offset_hours
                ))
            },
        )?;

        Ok(Self {
            write_mode: cfg.order_write_mode,
            reference_max_attempts: cfg.reference_max_attempts.max(1),
            store_offset,
        })
    }
}

/// One purchased line, snapshotted from the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: String,
    pub product_name: String,
    pub product_image: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl NewOrderItem {
    pub fn line_subtotal(&self) -> Result<Decimal, ServiceError> {
        self.unit_price
            .checked_mul(Decimal::from(self.quantity))
            .ok_or_else(|| {
                ServiceError::InvalidInput(format!(
                    "Subtotal for {} is out of range",
                    self.product_id
                ))
            })
    }

    /// Quantity as stored in the `quantity` integer column.
    pub fn stored_quantity(&self) -> Result<i32, ServiceError> {
        i32::try_from(self.quantity).map_err(|_| {
            ServiceError::InvalidInput(format!(
                "Quantity {} for {} is out of range",
                self.quantity, self.product_id
            ))
        })
    }
}

/// Everything needed to persist an order at confirmation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub address: ShippingAddress,
    pub items: Vec<NewOrderItem>,
    /// Tax-inclusive subtotal before the volume discount
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub shipping_type: ShippingType,
    pub payment_method: PaymentMethod,
    pub cod_eligible: bool,
}

/// An order header together with its items and shipping record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedOrder {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
    pub shipping: ShippingInfoModel,
}

/// Filters for the back-office order listing. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilters {
    pub status: Option<OrderStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub shipping_type: Option<ShippingType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Matches reference, customer name or customer email
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPage {
    pub orders: Vec<OrderModel>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

/// Repository for orders, their items and shipping records
#[derive(Debug)]
pub struct OrderRepository {
    base: BaseRepository,
    settings: RepositorySettings,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>, settings: RepositorySettings) -> Self {
        Self {
            base: BaseRepository::new(db),
            settings,
        }
    }

    pub fn settings(&self) -> &RepositorySettings {
        &self.settings
    }

    fn reference_prefix(&self, at: DateTime<Utc>) -> String {
        let local = at.with_timezone(&self.settings.store_offset);
        format!("{REFERENCE_PREFIX}-{}-", local.format("%Y%m%d"))
    }

    /// Next free reference for the store-local day of `at`, e.g. `ORD-20240105-004`.
    pub async fn next_reference(&self, at: DateTime<Utc>) -> Result<String, ServiceError> {
        self.next_reference_on(self.base.get_db(), at).await
    }

    async fn next_reference_on<C: ConnectionTrait>(
        &self,
        db: &C,
        at: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let prefix = self.reference_prefix(at);

        let references: Vec<String> = Order::find()
            .select_only()
            .column(Column::Reference)
            .filter(Column::Reference.starts_with(prefix.as_str()))
            .into_tuple()
            .all(db)
            .await?;

        let last = references
            .iter()
            .filter_map(|reference| reference.strip_prefix(prefix.as_str()))
            .filter_map(|counter| counter.parse::<u32>().ok())
            .max()
            .unwrap_or(0);

        Ok(format!("{prefix}{:03}", last + 1))
    }

    /// Inserts the order header, retrying with a fresh reference when another
    /// order took the same one.
    async fn insert_header<C>(
        &self,
        db: &C,
        new_order: &NewOrder,
        now: DateTime<Utc>,
    ) -> Result<OrderModel, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let reference = self.next_reference_on(db, now).await?;

            let header = order::ActiveModel {
                id: Set(Uuid::new_v4()),
                reference: Set(reference.clone()),
                customer_email: Set(new_order.address.email.clone()),
                customer_name: Set(new_order.address.full_name.clone()),
                customer_phone: Set(new_order.address.phone.clone()),
                subtotal: Set(new_order.subtotal),
                shipping_cost: Set(new_order.shipping_cost),
                total: Set(new_order.total),
                status: Set(OrderStatus::Pending),
                shipping_type: Set(new_order.shipping_type),
                payment_method: Set(new_order.payment_method),
                created_at: Set(now),
                updated_at: Set(now),
            };

            // A failed statement aborts an enclosing Postgres transaction, so each
            // attempt runs in its own savepoint.
            let savepoint = db.begin().await?;
            match header.insert(&savepoint).await {
                Ok(model) => {
                    savepoint.commit().await?;
                    return Ok(model);
                }
                Err(err) if is_unique_violation(&err) => {
                    savepoint.rollback().await?;
                    counter!("storefront_orders.reference_collisions", 1);
                    if attempt >= self.settings.reference_max_attempts {
                        return Err(ServiceError::Conflict(format!(
                            "Could not allocate an order reference after {attempt} attempts"
                        )));
                    }
                    warn!(%reference, attempt, "Order reference already taken, retrying");
                }
                Err(err) => {
                    savepoint.rollback().await?;
                    return Err(err.into());
                }
            }
        }
    }

    async fn insert_items<C: ConnectionTrait>(
        db: &C,
        order_id: Uuid,
        items: &[NewOrderItem],
    ) -> Result<Vec<OrderItemModel>, DbErr> {
        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            let model = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id.clone()),
                product_name: Set(item.product_name.clone()),
                product_image: Set(item.product_image.clone()),
                size: Set(item.size.clone()),
                color: Set(item.color.clone()),
                quantity: Set(item.stored_quantity().map_err(as_db_err)?),
                unit_price: Set(item.unit_price),
                subtotal: Set(item.line_subtotal().map_err(as_db_err)?),
            }
            .insert(db)
            .await?;
            inserted.push(model);
        }
        Ok(inserted)
    }

    async fn insert_shipping<C: ConnectionTrait>(
        db: &C,
        order_id: Uuid,
        new_order: &NewOrder,
    ) -> Result<ShippingInfoModel, DbErr> {
        let address = &new_order.address;
        shipping_info::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            full_name: Set(address.full_name.clone()),
            email: Set(address.email.clone()),
            phone: Set(address.phone.clone()),
            full_address: Set(address.full_address.clone()),
            department: Set(address.region.clone()),
            city: Set(address.city.clone()),
            postal_code: Set(address.postal_code.clone()),
            cod_eligible: Set(new_order.cod_eligible),
            shipping_cost: Set(new_order.shipping_cost),
        }
        .insert(db)
        .await
    }

    /// Persists the order header, its items and the shipping record.
    ///
    /// In [`OrderWriteMode::Transactional`] the three writes commit together.
    /// In [`OrderWriteMode::Sequential`] they are independent: a failure after
    /// the header is written returns [`ServiceError::PartialOrderWrite`] and
    /// leaves the header behind, and calling again creates a second order.
    #[instrument(skip(self, new_order), fields(items = new_order.items.len(), mode = ?self.settings.write_mode))]
    pub async fn create_order(&self, new_order: NewOrder) -> Result<PersistedOrder, ServiceError> {
        if new_order.items.is_empty() {
            return Err(ServiceError::InvalidInput(
                "An order needs at least one item".to_string(),
            ));
        }
        if new_order.items.iter().any(|item| item.quantity < 1) {
            return Err(ServiceError::InvalidInput(
                "Item quantities must be at least 1".to_string(),
            ));
        }
        // Rejected before any row is written
        for item in &new_order.items {
            item.stored_quantity()?;
            item.line_subtotal()?;
        }

        let now = Utc::now();
        let persisted = match self.settings.write_mode {
            OrderWriteMode::Transactional => self.create_transactional(&new_order, now).await?,
            OrderWriteMode::Sequential => self.create_sequential(&new_order, now).await?,
        };

        counter!("storefront_orders.created", 1);
        info!(
            order_id = %persisted.order.id,
            reference = %persisted.order.reference,
            total = %persisted.order.total,
            "Order created"
        );
        Ok(persisted)
    }

    async fn create_transactional(
        &self,
        new_order: &NewOrder,
        now: DateTime<Utc>,
    ) -> Result<PersistedOrder, ServiceError> {
        let txn = self.base.get_db().begin().await?;

        let order = self.insert_header(&txn, new_order, now).await?;
        let items = Self::insert_items(&txn, order.id, &new_order.items).await?;
        let shipping = Self::insert_shipping(&txn, order.id, new_order).await?;

        txn.commit().await?;
        Ok(PersistedOrder {
            order,
            items,
            shipping,
        })
    }

    async fn create_sequential(
        &self,
        new_order: &NewOrder,
        now: DateTime<Utc>,
    ) -> Result<PersistedOrder, ServiceError> {
        let db = self.base.get_db();
        let order = self.insert_header(db, new_order, now).await?;

        let partial = |stage: WriteStage, err: DbErr| {
            counter!("storefront_orders.partial_writes", 1);
            error!(
                order_id = %order.id,
                reference = %order.reference,
                %stage,
                error = %err,
                "Order header written but a dependent write failed"
            );
            ServiceError::PartialOrderWrite {
                order_id: order.id,
                reference: order.reference.clone(),
                stage,
                message: err.to_string(),
            }
        };

        let items = Self::insert_items(db, order.id, &new_order.items)
            .await
            .map_err(|err| partial(WriteStage::OrderItems, err))?;
        let shipping = Self::insert_shipping(db, order.id, new_order)
            .await
            .map_err(|err| partial(WriteStage::ShippingRecord, err))?;

        Ok(PersistedOrder {
            order,
            items,
            shipping,
        })
    }

    /// Find an order by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find_by_id(id).one(self.base.get_db()).await?)
    }

    pub async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(Column::Reference.eq(reference))
            .one(self.base.get_db())
            .await?)
    }

    pub async fn get_order_items(&self, order_id: Uuid) -> Result<Vec<OrderItemModel>, ServiceError> {
        Ok(OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(self.base.get_db())
            .await?)
    }

    pub async fn get_shipping_record(
        &self,
        order_id: Uuid,
    ) -> Result<Option<ShippingInfoModel>, ServiceError> {
        Ok(ShippingInfo::find()
            .filter(shipping_info::Column::OrderId.eq(order_id))
            .one(self.base.get_db())
            .await?)
    }

    /// Loads an order with its items and shipping record.
    pub async fn load(&self, order_id: Uuid) -> Result<PersistedOrder, ServiceError> {
        let order = self
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;
        let items = self.get_order_items(order_id).await?;
        let shipping = self.get_shipping_record(order_id).await?.ok_or_else(|| {
            ServiceError::NotFound(format!("Shipping record for order {order_id} not found"))
        })?;

        Ok(PersistedOrder {
            order,
            items,
            shipping,
        })
    }

    /// Newest-first order listing. `page` is 1-based; `limit` is clamped to 1..=100.
    #[instrument(skip(self))]
    pub async fn get_orders(
        &self,
        filters: &OrderFilters,
        page: u64,
        limit: u64,
    ) -> Result<OrderPage, ServiceError> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let mut condition = Condition::all();
        if let Some(status) = filters.status {
            condition = condition.add(Column::Status.eq(status));
        }
        if let Some(payment_method) = filters.payment_method {
            condition = condition.add(Column::PaymentMethod.eq(payment_method));
        }
        if let Some(shipping_type) = filters.shipping_type {
            condition = condition.add(Column::ShippingType.eq(shipping_type));
        }
        if let Some(from) = filters.from {
            condition = condition.add(Column::CreatedAt.gte(from));
        }
        if let Some(to) = filters.to {
            condition = condition.add(Column::CreatedAt.lte(to));
        }
        if let Some(search) = filters
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            condition = condition.add(
                Condition::any()
                    .add(Column::Reference.contains(search))
                    .add(Column::CustomerName.contains(search))
                    .add(Column::CustomerEmail.contains(search)),
            );
        }

        let paginator = Order::find()
            .filter(condition)
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Reference)
            .paginate(self.base.get_db(), limit);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        Ok(OrderPage {
            orders,
            total,
            page,
            limit,
        })
    }

    /// Moves an order along `pendiente -> enviado -> entregado`, or cancels it
    /// while it is not yet delivered.
    #[instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.base.get_db().begin().await?;

        let current = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        if current.status.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} is already {} and can no longer change",
                current.reference, current.status
            )));
        }
        if !current.status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot change order {} from {} to {}",
                current.reference, current.status, new_status
            )));
        }

        let previous = current.status;
        let mut active: order::ActiveModel = current.into();
        active.status = Set(new_status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(
            reference = %updated.reference,
            from = %previous,
            to = %new_status,
            "Order status updated"
        );
        Ok(updated)
    }
}

impl Repository for OrderRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn as_db_err(err: ServiceError) -> DbErr {
    DbErr::Custom(err.to_string())
}
