use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{CartCaller, Order, OrderStatus},
    repository::{CatalogRepository, NewOrder, NewOrderItem, OrderFilter, OrderRepository},
    services::cart_service::CartService,
};

const MAX_TRANSITION_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub user_id: Uuid,
    /// Lets a signed-in user check out the guest cart they were filling.
    pub guest_token: Option<String>,
    pub cart_id: Uuid,
    pub shipping_address_id: Uuid,
    pub billing_address_id: Uuid,
}

#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    carts: CartService,
    catalog: Arc<dyn CatalogRepository>,
    currency: String,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        carts: CartService,
        catalog: Arc<dyn CatalogRepository>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            orders,
            carts,
            catalog,
            currency: currency.into(),
        }
    }

    /// Snapshots the cart into a pending order. The cart itself is left as is.
    pub async fn create_order(&self, input: CreateOrder) -> AppResult<Order> {
        let caller = CartCaller {
            user_id: Some(input.user_id),
            guest_token: input.guest_token.clone(),
        };
        let cart = self.carts.get_for(input.cart_id, &caller).await?;
        if cart.is_empty() {
            return Err(AppError::invalid_state("cannot create an order from an empty cart"));
        }

        for address_id in [input.shipping_address_id, input.billing_address_id] {
            self.catalog
                .find_address(address_id)
                .await?
                .filter(|a| a.user_id == input.user_id)
                .ok_or(AppError::NotFound)?;
        }

        let mut items = Vec::with_capacity(cart.items.len());
        for item in &cart.items {
            let product = self
                .catalog
                .find_product(item.product_id)
                .await?
                .filter(|p| p.is_active)
                .ok_or_else(|| {
                    AppError::invalid_state(format!(
                        "product {} in cart is no longer available",
                        item.product_id
                    ))
                })?;
            items.push(NewOrderItem {
                product_id: product.id,
                product_name: product.name,
                sku: product.sku,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.line_total(),
            });
        }
        let total_amount: Decimal = items.iter().map(|i| i.total_price).sum();

        let order = self
            .orders
            .create(NewOrder {
                id: Uuid::new_v4(),
                user_id: input.user_id,
                total_amount,
                currency: self.currency.clone(),
                shipping_address_id: input.shipping_address_id,
                billing_address_id: input.billing_address_id,
                items,
            })
            .await?;

        tracing::info!(
            order_id = %order.id,
            cart_id = %cart.id,
            user_id = %order.user_id,
            total = %order.total_amount,
            "order created"
        );
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> AppResult<Order> {
        self.orders
            .find_by_id(order_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Owners see their own orders; admins see everything.
    pub async fn get_order_for(&self, order_id: Uuid, user_id: Uuid, is_admin: bool) -> AppResult<Order> {
        let order = self.get_order(order_id).await?;
        if order.user_id != user_id && !is_admin {
            return Err(AppError::Forbidden);
        }
        Ok(order)
    }

    pub async fn list_orders(&self, filter: OrderFilter) -> AppResult<(Vec<Order>, u64)> {
        self.orders.list(filter).await
    }

    /// Only pending and processing orders can be cancelled. Captured money is not
    /// refunded here.
    pub async fn cancel_order(&self, order_id: Uuid) -> AppResult<Order> {
        self.transition(order_id, OrderStatus::Cancelled).await
    }

    pub async fn update_status(&self, order_id: Uuid, next: OrderStatus) -> AppResult<Order> {
        self.transition(order_id, next).await
    }

    /// Records a successful payment. Safe to call repeatedly.
    pub async fn mark_paid(&self, order_id: Uuid) -> AppResult<Order> {
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let order = self.get_order(order_id).await?;
            match order.status {
                OrderStatus::Pending => {
                    if self
                        .orders
                        .update_status(order_id, OrderStatus::Pending, OrderStatus::Paid)
                        .await?
                    {
                        tracing::info!(%order_id, "order paid");
                        return self.get_order(order_id).await;
                    }
                }
                OrderStatus::Cancelled => {
                    tracing::warn!(%order_id, "payment captured for a cancelled order");
                    return Ok(order);
                }
                _ => return Ok(order),
            }
        }
        Err(AppError::Conflict)
    }

    async fn transition(&self, order_id: Uuid, next: OrderStatus) -> AppResult<Order> {
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let order = self.get_order(order_id).await?;
            if !order.status.can_transition_to(next) {
                return Err(AppError::invalid_state(format!(
                    "order is {}, cannot move to {next}",
                    order.status
                )));
            }
            if self.orders.update_status(order_id, order.status, next).await? {
                tracing::info!(%order_id, from = %order.status, to = %next, "order status changed");
                return self.get_order(order_id).await;
            }
        }
        Err(AppError::Conflict)
    }
}
