//! Postgres gateway on top of SeaORM.

use std::time::Duration;

use chrono::Utc;
use sea_orm::DatabaseConnection;

use crate::{
    entity::{
        addresses::Model as AddressModel, cart_items::Model as CartItemModel,
        carts::Model as CartModel, order_items::Model as OrderItemModel,
        orders::Model as OrderModel, payments::Model as PaymentModel,
        products::Model as ProductModel,
    },
    error::{AppError, AppResult},
    models::{Address, Cart, CartItem, Order, OrderItem, Payment, Product},
};

mod carts;
mod catalog;
mod orders;
mod payments;

#[derive(Debug, Clone)]
pub struct SeaStore {
    conn: DatabaseConnection,
    timeout: Duration,
}

impl SeaStore {
    pub fn new(conn: DatabaseConnection, timeout: Duration) -> Self {
        Self { conn, timeout }
    }
}

fn corrupt(err: AppError) -> AppError {
    AppError::Internal(anyhow::anyhow!("corrupt row: {err}"))
}

fn cart_from_entity(model: CartModel, items: Vec<CartItemModel>) -> Cart {
    Cart {
        id: model.id,
        user_id: model.user_id,
        guest_token: model.guest_token,
        version: model.version,
        items: items.into_iter().map(cart_item_from_entity).collect(),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn cart_item_from_entity(model: CartItemModel) -> CartItem {
    CartItem {
        id: model.id,
        cart_id: model.cart_id,
        product_id: model.product_id,
        quantity: model.quantity,
        unit_price: model.unit_price,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn order_from_entity(model: OrderModel, items: Vec<OrderItemModel>) -> AppResult<Order> {
    Ok(Order {
        id: model.id,
        user_id: model.user_id,
        status: model.status.parse().map_err(corrupt)?,
        total_amount: model.total_amount,
        currency: model.currency,
        shipping_address_id: model.shipping_address_id,
        billing_address_id: model.billing_address_id,
        items: items.into_iter().map(order_item_from_entity).collect(),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        product_name: model.product_name,
        sku: model.sku,
        quantity: model.quantity,
        unit_price: model.unit_price,
        total_price: model.total_price,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn payment_from_entity(model: PaymentModel) -> AppResult<Payment> {
    Ok(Payment {
        id: model.id,
        order_id: model.order_id,
        provider: model.provider,
        provider_payment_id: model.provider_payment_id,
        transaction_id: model.transaction_id,
        amount: model.amount,
        refunded_amount: model.refunded_amount,
        currency: model.currency,
        method: model.method,
        status: model.status.parse().map_err(corrupt)?,
        idempotency_key: model.idempotency_key,
        metadata: model.metadata,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

fn product_from_entity(model: ProductModel) -> Product {
    Product {
        id: model.id,
        sku: model.sku,
        name: model.name,
        description: model.description,
        price: model.price,
        is_active: model.is_active,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn address_from_entity(model: AddressModel) -> Address {
    Address {
        id: model.id,
        user_id: model.user_id,
        label: model.label,
        street: model.street,
        city: model.city,
        state: model.state,
        postal_code: model.postal_code,
        country: model.country,
        phone: model.phone,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
