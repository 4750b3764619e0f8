use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
    ActiveValue::NotSet,
    sea_query::Expr,
};
use uuid::Uuid;

use super::{SeaStore, order_from_entity};
use crate::{
    entity::{
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders},
    },
    error::{AppError, AppResult},
    models::{Order, OrderStatus},
    repository::{NewOrder, OrderFilter, OrderRepository, bounded},
};

impl SeaStore {
    async fn insert_order(&self, order: NewOrder) -> AppResult<Order> {
        let txn = self.conn.begin().await?;

        let created = OrderActive {
            id: Set(order.id),
            user_id: Set(order.user_id),
            status: Set(OrderStatus::Pending.as_str().to_string()),
            total_amount: Set(order.total_amount),
            currency: Set(order.currency),
            shipping_address_id: Set(order.shipping_address_id),
            billing_address_id: Set(order.billing_address_id),
            created_at: NotSet,
            updated_at: NotSet,
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(order.items.len());
        for (position, item) in (0i32..).zip(order.items) {
            let inserted = OrderItemActive {
                id: Set(Uuid::new_v4()),
                order_id: Set(created.id),
                position: Set(position),
                product_id: Set(item.product_id),
                product_name: Set(item.product_name),
                sku: Set(item.sku),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                total_price: Set(item.total_price),
                created_at: NotSet,
            }
            .insert(&txn)
            .await?;
            items.push(inserted);
        }

        txn.commit().await?;
        order_from_entity(created, items)
    }

    async fn load_order(&self, id: Uuid) -> AppResult<Option<Order>> {
        let Some(order) = Orders::find_by_id(id).one(&self.conn).await? else {
            return Ok(None);
        };
        let items = OrderItems::find()
            .filter(OrderItemCol::OrderId.eq(order.id))
            .order_by_asc(OrderItemCol::Position)
            .order_by_asc(OrderItemCol::Id)
            .all(&self.conn)
            .await?;
        order_from_entity(order, items).map(Some)
    }

    async fn list_orders(&self, filter: OrderFilter) -> AppResult<(Vec<Order>, u64)> {
        let mut condition = Condition::all();
        if let Some(user_id) = filter.user_id {
            condition = condition.add(OrderCol::UserId.eq(user_id));
        }
        if let Some(status) = filter.status {
            condition = condition.add(OrderCol::Status.eq(status.as_str()));
        }

        let mut finder = Orders::find().filter(condition);
        finder = if filter.newest_first {
            finder.order_by_desc(OrderCol::CreatedAt)
        } else {
            finder.order_by_asc(OrderCol::CreatedAt)
        };

        let total = finder.clone().count(&self.conn).await?;
        let orders = finder
            .limit(filter.limit)
            .offset(filter.offset)
            .all(&self.conn)
            .await?;

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items_by_order: HashMap<Uuid, Vec<_>> = HashMap::new();
        if !ids.is_empty() {
            let items = OrderItems::find()
                .filter(OrderItemCol::OrderId.is_in(ids))
                .order_by_asc(OrderItemCol::Position)
                .order_by_asc(OrderItemCol::Id)
                .all(&self.conn)
                .await?;
            for item in items {
                items_by_order.entry(item.order_id).or_default().push(item);
            }
        }

        let orders = orders
            .into_iter()
            .map(|order| {
                let items = items_by_order.remove(&order.id).unwrap_or_default();
                order_from_entity(order, items)
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok((orders, total))
    }

    async fn swap_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> AppResult<bool> {
        let result = Orders::update_many()
            .col_expr(OrderCol::Status, Expr::value(to.as_str()))
            .col_expr(OrderCol::UpdatedAt, Expr::value(Utc::now()))
            .filter(OrderCol::Id.eq(id))
            .filter(OrderCol::Status.eq(from.as_str()))
            .exec(&self.conn)
            .await?;
        if result.rows_affected == 1 {
            return Ok(true);
        }
        match Orders::find_by_id(id).one(&self.conn).await? {
            Some(_) => Ok(false),
            None => Err(AppError::NotFound),
        }
    }
}

#[async_trait]
impl OrderRepository for SeaStore {
    async fn create(&self, order: NewOrder) -> AppResult<Order> {
        bounded(self.timeout, self.insert_order(order)).await
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Order>> {
        bounded(self.timeout, self.load_order(id)).await
    }

    async fn list(&self, filter: OrderFilter) -> AppResult<(Vec<Order>, u64)> {
        bounded(self.timeout, self.list_orders(filter)).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> AppResult<bool> {
        bounded(self.timeout, self.swap_status(id, from, to)).await
    }
}
