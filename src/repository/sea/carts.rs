use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
    ActiveValue::NotSet,
    sea_query::{Expr, OnConflict},
};
use uuid::Uuid;

use super::{SeaStore, cart_from_entity};
use crate::{
    entity::{
        cart_items::{ActiveModel as CartItemActive, Column as CartItemCol, Entity as CartItems},
        carts::{ActiveModel as CartActive, Column as CartCol, Entity as Carts, Model as CartModel},
    },
    error::{AppError, AppResult},
    models::Cart,
    repository::{CartMutation, CartRepository, NewCart, bounded},
};

impl SeaStore {
    async fn with_items(&self, cart: Option<CartModel>) -> AppResult<Option<Cart>> {
        let Some(cart) = cart else {
            return Ok(None);
        };
        let items = CartItems::find()
            .filter(CartItemCol::CartId.eq(cart.id))
            .order_by_asc(CartItemCol::CreatedAt)
            .all(&self.conn)
            .await?;
        Ok(Some(cart_from_entity(cart, items)))
    }

    async fn insert_cart(&self, cart: NewCart) -> AppResult<Cart> {
        let id = Uuid::new_v4();
        let active = CartActive {
            id: Set(id),
            user_id: Set(cart.user_id),
            guest_token: Set(cart.guest_token.clone()),
            version: Set(0),
            created_at: NotSet,
            updated_at: NotSet,
        };

        // A concurrent request may have created the owner's cart already.
        Carts::insert(active)
            .on_conflict(OnConflict::new().do_nothing().to_owned())
            .exec_without_returning(&self.conn)
            .await?;

        let mut finder = Carts::find();
        finder = match (cart.user_id, cart.guest_token) {
            (Some(user_id), _) => finder.filter(CartCol::UserId.eq(user_id)),
            (None, Some(token)) => finder.filter(CartCol::GuestToken.eq(token)),
            (None, None) => finder.filter(CartCol::Id.eq(id)),
        };
        let model = finder.one(&self.conn).await?;
        self.with_items(model)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("cart {id} vanished after insert")))
    }

    async fn apply_mutation(
        &self,
        cart_id: Uuid,
        expected_version: i32,
        mutation: CartMutation,
    ) -> AppResult<bool> {
        let txn = self.conn.begin().await?;

        let bumped = Carts::update_many()
            .col_expr(CartCol::Version, Expr::col(CartCol::Version).add(1))
            .col_expr(CartCol::UpdatedAt, Expr::value(Utc::now()))
            .filter(CartCol::Id.eq(cart_id))
            .filter(CartCol::Version.eq(expected_version))
            .exec(&txn)
            .await?;
        if bumped.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(false);
        }

        match mutation {
            CartMutation::InsertItem(item) => {
                CartItemActive {
                    id: Set(item.id),
                    cart_id: Set(cart_id),
                    product_id: Set(item.product_id),
                    quantity: Set(item.quantity),
                    unit_price: Set(item.unit_price),
                    created_at: NotSet,
                }
                .insert(&txn)
                .await?;
            }
            CartMutation::SetQuantity { item_id, quantity } => {
                CartItems::update_many()
                    .col_expr(CartItemCol::Quantity, Expr::value(quantity))
                    .filter(CartItemCol::Id.eq(item_id))
                    .filter(CartItemCol::CartId.eq(cart_id))
                    .exec(&txn)
                    .await?;
            }
            CartMutation::RemoveItem { item_id } => {
                CartItems::delete_many()
                    .filter(CartItemCol::Id.eq(item_id))
                    .filter(CartItemCol::CartId.eq(cart_id))
                    .exec(&txn)
                    .await?;
            }
            CartMutation::Clear => {
                CartItems::delete_many()
                    .filter(CartItemCol::CartId.eq(cart_id))
                    .exec(&txn)
                    .await?;
            }
        }

        txn.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl CartRepository for SeaStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Cart>> {
        bounded(self.timeout, async {
            let cart = Carts::find_by_id(id).one(&self.conn).await?;
            self.with_items(cart).await
        })
        .await
    }

    async fn find_by_user(&self, user_id: Uuid) -> AppResult<Option<Cart>> {
        bounded(self.timeout, async {
            let cart = Carts::find()
                .filter(CartCol::UserId.eq(user_id))
                .one(&self.conn)
                .await?;
            self.with_items(cart).await
        })
        .await
    }

    async fn find_by_guest_token(&self, token: &str) -> AppResult<Option<Cart>> {
        bounded(self.timeout, async {
            let cart = Carts::find()
                .filter(CartCol::GuestToken.eq(token))
                .one(&self.conn)
                .await?;
            self.with_items(cart).await
        })
        .await
    }

    async fn create(&self, cart: NewCart) -> AppResult<Cart> {
        bounded(self.timeout, self.insert_cart(cart)).await
    }

    async fn apply(
        &self,
        cart_id: Uuid,
        expected_version: i32,
        mutation: CartMutation,
    ) -> AppResult<bool> {
        bounded(
            self.timeout,
            self.apply_mutation(cart_id, expected_version, mutation),
        )
        .await
    }
}
