//! In-process gateway used by tests and local experiments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        Address, Cart, CartItem, Order, OrderItem, OrderStatus, Payment, PaymentStatus, Product,
    },
    repository::{
        CartMutation, CartRepository, CatalogRepository, NewAddress, NewCart, NewOrder,
        NewPayment, NewProduct, OrderFilter, OrderRepository, PaymentRepository, PaymentUpdate,
        ProductUpdate,
    },
};

#[derive(Default)]
struct Tables {
    carts: HashMap<Uuid, Cart>,
    orders: HashMap<Uuid, Order>,
    payments: HashMap<Uuid, Payment>,
    products: HashMap<Uuid, Product>,
    addresses: HashMap<Uuid, Address>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites a product in place, e.g. to simulate a price or name change.
    pub async fn put_product(&self, product: Product) {
        self.tables
            .lock()
            .await
            .products
            .insert(product.id, product);
    }

    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }

    pub async fn payment_count(&self) -> usize {
        self.tables.lock().await.payments.len()
    }
}

#[async_trait]
impl CartRepository for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Cart>> {
        Ok(self.tables.lock().await.carts.get(&id).cloned())
    }

    async fn find_by_user(&self, user_id: Uuid) -> AppResult<Option<Cart>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .carts
            .values()
            .find(|cart| cart.user_id == Some(user_id))
            .cloned())
    }

    async fn find_by_guest_token(&self, token: &str) -> AppResult<Option<Cart>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .carts
            .values()
            .find(|cart| cart.guest_token.as_deref() == Some(token))
            .cloned())
    }

    async fn create(&self, cart: NewCart) -> AppResult<Cart> {
        let mut tables = self.tables.lock().await;
        let existing = tables.carts.values().find(|c| {
            (cart.user_id.is_some() && c.user_id == cart.user_id)
                || (cart.guest_token.is_some() && c.guest_token == cart.guest_token)
        });
        if let Some(existing) = existing {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let created = Cart {
            id: Uuid::new_v4(),
            user_id: cart.user_id,
            guest_token: cart.guest_token,
            version: 0,
            items: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        tables.carts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn apply(
        &self,
        cart_id: Uuid,
        expected_version: i32,
        mutation: CartMutation,
    ) -> AppResult<bool> {
        let mut tables = self.tables.lock().await;
        let cart = tables.carts.get_mut(&cart_id).ok_or(AppError::NotFound)?;
        if cart.version != expected_version {
            return Ok(false);
        }

        match mutation {
            CartMutation::InsertItem(item) => {
                if cart.item_for_product(item.product_id).is_some() {
                    return Err(AppError::invalid_state("product already in cart"));
                }
                cart.items.push(CartItem {
                    id: item.id,
                    cart_id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    created_at: Utc::now(),
                });
            }
            CartMutation::SetQuantity { item_id, quantity } => {
                if let Some(item) = cart.items.iter_mut().find(|i| i.id == item_id) {
                    item.quantity = quantity;
                }
            }
            CartMutation::RemoveItem { item_id } => cart.items.retain(|i| i.id != item_id),
            CartMutation::Clear => cart.items.clear(),
        }

        cart.version += 1;
        cart.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn create(&self, order: NewOrder) -> AppResult<Order> {
        let now = Utc::now();
        let items = order
            .items
            .into_iter()
            .map(|item| OrderItem {
                id: Uuid::new_v4(),
                order_id: order.id,
                product_id: item.product_id,
                product_name: item.product_name,
                sku: item.sku,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.total_price,
                created_at: now,
            })
            .collect();
        let created = Order {
            id: order.id,
            user_id: order.user_id,
            status: OrderStatus::Pending,
            total_amount: order.total_amount,
            currency: order.currency,
            shipping_address_id: order.shipping_address_id,
            billing_address_id: order.billing_address_id,
            items,
            created_at: now,
            updated_at: now,
        };
        self.tables
            .lock()
            .await
            .orders
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Order>> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn list(&self, filter: OrderFilter) -> AppResult<(Vec<Order>, u64)> {
        let tables = self.tables.lock().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| filter.user_id.is_none_or(|user| o.user_id == user))
            .filter(|o| filter.status.is_none_or(|status| o.status == status))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        if filter.newest_first {
            orders.reverse();
        }
        let total = orders.len() as u64;
        let page = orders
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> AppResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.orders.get_mut(&id) {
            Some(order) if order.status == from => {
                order.status = to;
                order.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(AppError::NotFound),
        }
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn create(&self, payment: NewPayment) -> AppResult<Payment> {
        let mut tables = self.tables.lock().await;
        if tables
            .payments
            .values()
            .any(|p| p.provider_payment_id == payment.provider_payment_id)
        {
            return Err(AppError::invalid_state("provider payment already recorded"));
        }
        if payment.status == PaymentStatus::Initiated
            && tables.payments.values().any(|p| {
                p.order_id == payment.order_id && p.status == PaymentStatus::Initiated
            })
        {
            return Err(AppError::invalid_state(
                "another payment attempt is in progress for this order",
            ));
        }
        let now = Utc::now();
        let created = Payment {
            id: Uuid::new_v4(),
            order_id: payment.order_id,
            provider: payment.provider,
            provider_payment_id: payment.provider_payment_id,
            transaction_id: payment.transaction_id,
            amount: payment.amount,
            refunded_amount: Decimal::ZERO,
            currency: payment.currency,
            method: payment.method,
            status: payment.status,
            idempotency_key: payment.idempotency_key,
            metadata: payment.metadata,
            created_at: now,
            updated_at: now,
        };
        tables.payments.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Payment>> {
        Ok(self.tables.lock().await.payments.get(&id).cloned())
    }

    async fn find_by_provider_payment_id(
        &self,
        provider_payment_id: &str,
    ) -> AppResult<Option<Payment>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payments
            .values()
            .find(|p| p.provider_payment_id == provider_payment_id)
            .cloned())
    }

    async fn list_by_order(&self, order_id: Uuid) -> AppResult<Vec<Payment>> {
        let tables = self.tables.lock().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: PaymentStatus,
        update: PaymentUpdate,
    ) -> AppResult<Option<Payment>> {
        let mut tables = self.tables.lock().await;
        let payment = tables.payments.get_mut(&id).ok_or(AppError::NotFound)?;
        if payment.status != from {
            return Ok(None);
        }
        payment.status = update.status;
        if let Some(transaction_id) = update.transaction_id {
            payment.transaction_id = Some(transaction_id);
        }
        if let Some(refunded) = update.refunded_amount {
            payment.refunded_amount = refunded;
        }
        if let Some(metadata) = update.metadata {
            payment.metadata = metadata;
        }
        payment.updated_at = Utc::now();
        Ok(Some(payment.clone()))
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn find_product(&self, id: Uuid) -> AppResult<Option<Product>> {
        Ok(self.tables.lock().await.products.get(&id).cloned())
    }

    async fn list_products(&self, limit: u64, offset: u64) -> AppResult<(Vec<Product>, u64)> {
        let tables = self.tables.lock().await;
        let mut products: Vec<Product> = tables
            .products
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = products.len() as u64;
        let page = products
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn create_product(&self, product: NewProduct) -> AppResult<Product> {
        let mut tables = self.tables.lock().await;
        if tables.products.values().any(|p| p.sku == product.sku) {
            return Err(AppError::validation("sku is already taken"));
        }
        let now = Utc::now();
        let created = Product {
            id: Uuid::new_v4(),
            sku: product.sku,
            name: product.name,
            description: product.description,
            price: product.price,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tables.products.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_product(&self, id: Uuid, update: ProductUpdate) -> AppResult<Product> {
        let mut tables = self.tables.lock().await;
        let product = tables.products.get_mut(&id).ok_or(AppError::NotFound)?;
        if let Some(name) = update.name {
            product.name = name;
        }
        if let Some(description) = update.description {
            product.description = Some(description);
        }
        if let Some(price) = update.price {
            product.price = price;
        }
        if let Some(is_active) = update.is_active {
            product.is_active = is_active;
        }
        product.updated_at = Utc::now();
        Ok(product.clone())
    }

    async fn find_address(&self, id: Uuid) -> AppResult<Option<Address>> {
        Ok(self.tables.lock().await.addresses.get(&id).cloned())
    }

    async fn list_addresses(&self, user_id: Uuid) -> AppResult<Vec<Address>> {
        let tables = self.tables.lock().await;
        let mut addresses: Vec<Address> = tables
            .addresses
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        addresses.sort_by_key(|a| a.created_at);
        Ok(addresses)
    }

    async fn create_address(&self, address: NewAddress) -> AppResult<Address> {
        let created = Address {
            id: Uuid::new_v4(),
            user_id: address.user_id,
            label: address.label,
            street: address.street,
            city: address.city,
            state: address.state,
            postal_code: address.postal_code,
            country: address.country,
            phone: address.phone,
            created_at: Utc::now(),
        };
        self.tables
            .lock()
            .await
            .addresses
            .insert(created.id, created.clone());
        Ok(created)
    }
}
