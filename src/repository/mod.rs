//! Persistence gateway.
//!
//! One trait per entity family, no business rules. [`sea::SeaStore`] backs them with
//! Postgres; [`memory::MemoryStore`] keeps everything in-process.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Address, Cart, Order, OrderStatus, Payment, PaymentStatus, Product},
};

pub mod memory;
pub mod sea;

#[derive(Debug, Clone, Default)]
pub struct NewCart {
    pub user_id: Option<Uuid>,
    pub guest_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewCartItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// A single item change, applied only if the cart version still matches.
#[derive(Debug, Clone)]
pub enum CartMutation {
    InsertItem(NewCartItem),
    SetQuantity { item_id: Uuid, quantity: i32 },
    RemoveItem { item_id: Uuid },
    Clear,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_amount: Decimal,
    pub currency: String,
    pub shipping_address_id: Uuid,
    pub billing_address_id: Uuid,
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub newest_first: bool,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: Uuid,
    pub provider: String,
    pub provider_payment_id: String,
    pub transaction_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub status: PaymentStatus,
    pub idempotency_key: String,
    pub metadata: serde_json::Value,
}

/// Fields a payment transition may touch. `None` leaves the column as is.
#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub refunded_amount: Option<Decimal>,
    pub metadata: Option<serde_json::Value>,
}

impl PaymentUpdate {
    pub fn status(status: PaymentStatus) -> Self {
        Self {
            status,
            transaction_id: None,
            refunded_amount: None,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
}

/// Fields an admin may change on a product. `None` leaves the column as is.
#[derive(Debug, Clone, Default)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewAddress {
    pub user_id: Uuid,
    pub label: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
}

#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Cart>>;

    async fn find_by_user(&self, user_id: Uuid) -> AppResult<Option<Cart>>;

    async fn find_by_guest_token(&self, token: &str) -> AppResult<Option<Cart>>;

    /// Inserts a cart. An owner-bound cart that already exists is returned instead.
    async fn create(&self, cart: NewCart) -> AppResult<Cart>;

    /// Applies `mutation` and bumps the version if it still equals `expected_version`.
    /// Returns `false` when another writer got there first.
    async fn apply(
        &self,
        cart_id: Uuid,
        expected_version: i32,
        mutation: CartMutation,
    ) -> AppResult<bool>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persists the order and all of its items atomically.
    async fn create(&self, order: NewOrder) -> AppResult<Order>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Order>>;

    async fn list(&self, filter: OrderFilter) -> AppResult<(Vec<Order>, u64)>;

    /// Moves the order from `from` to `to`. Returns `false` if it was no longer in `from`.
    async fn update_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus)
    -> AppResult<bool>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Fails with `InvalidState` when the provider id is already stored, or when
    /// an `initiated` payment already exists for the order.
    async fn create(&self, payment: NewPayment) -> AppResult<Payment>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Payment>>;

    async fn find_by_provider_payment_id(&self, provider_payment_id: &str)
    -> AppResult<Option<Payment>>;

    async fn list_by_order(&self, order_id: Uuid) -> AppResult<Vec<Payment>>;

    /// Applies `update` only while the payment is still in `from`.
    /// Returns the updated row, or `None` if the status moved in the meantime.
    async fn transition(
        &self,
        id: Uuid,
        from: PaymentStatus,
        update: PaymentUpdate,
    ) -> AppResult<Option<Payment>>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn find_product(&self, id: Uuid) -> AppResult<Option<Product>>;

    async fn list_products(&self, limit: u64, offset: u64) -> AppResult<(Vec<Product>, u64)>;

    async fn create_product(&self, product: NewProduct) -> AppResult<Product>;

    /// NotFound when the product does not exist.
    async fn update_product(&self, id: Uuid, update: ProductUpdate) -> AppResult<Product>;

    async fn find_address(&self, id: Uuid) -> AppResult<Option<Address>>;

    async fn list_addresses(&self, user_id: Uuid) -> AppResult<Vec<Address>>;

    async fn create_address(&self, address: NewAddress) -> AppResult<Address>;
}

/// Runs a gateway call, failing with a retryable error once `limit` elapses.
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout_ms = %limit.as_millis(), "database call timed out");
            Err(AppError::external("database call timed out"))
        }
    }
}
