use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
    ActiveValue::NotSet,
};
use uuid::Uuid;

use super::{SeaStore, address_from_entity, product_from_entity};
use crate::{
    entity::{
        addresses::{ActiveModel as AddressActive, Column as AddressCol, Entity as Addresses},
        products::{ActiveModel as ProductActive, Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    models::{Address, Product},
    repository::{CatalogRepository, NewAddress, NewProduct, ProductUpdate, bounded},
};

#[async_trait]
impl CatalogRepository for SeaStore {
    async fn find_product(&self, id: Uuid) -> AppResult<Option<Product>> {
        bounded(self.timeout, async {
            Ok(Products::find_by_id(id)
                .one(&self.conn)
                .await?
                .map(product_from_entity))
        })
        .await
    }

    async fn list_products(&self, limit: u64, offset: u64) -> AppResult<(Vec<Product>, u64)> {
        bounded(self.timeout, async {
            let finder = Products::find()
                .filter(ProdCol::IsActive.eq(true))
                .order_by_desc(ProdCol::CreatedAt);
            let total = finder.clone().count(&self.conn).await?;
            let items = finder
                .limit(limit)
                .offset(offset)
                .all(&self.conn)
                .await?
                .into_iter()
                .map(product_from_entity)
                .collect();
            Ok((items, total))
        })
        .await
    }

    async fn create_product(&self, product: NewProduct) -> AppResult<Product> {
        bounded(self.timeout, async {
            let taken = Products::find()
                .filter(ProdCol::Sku.eq(product.sku.as_str()))
                .one(&self.conn)
                .await?;
            if taken.is_some() {
                return Err(AppError::validation("sku is already taken"));
            }

            let created = ProductActive {
                id: Set(Uuid::new_v4()),
                sku: Set(product.sku),
                name: Set(product.name),
                description: Set(product.description),
                price: Set(product.price),
                is_active: Set(true),
                created_at: NotSet,
                updated_at: NotSet,
            }
            .insert(&self.conn)
            .await?;
            Ok(product_from_entity(created))
        })
        .await
    }

    async fn update_product(&self, id: Uuid, update: ProductUpdate) -> AppResult<Product> {
        bounded(self.timeout, async {
            let existing = Products::find_by_id(id)
                .one(&self.conn)
                .await?
                .ok_or(AppError::NotFound)?;

            let mut active: ProductActive = existing.into();
            if let Some(name) = update.name {
                active.name = Set(name);
            }
            if let Some(description) = update.description {
                active.description = Set(Some(description));
            }
            if let Some(price) = update.price {
                active.price = Set(price);
            }
            if let Some(is_active) = update.is_active {
                active.is_active = Set(is_active);
            }
            active.updated_at = Set(Utc::now().into());

            let updated = active.update(&self.conn).await?;
            Ok(product_from_entity(updated))
        })
        .await
    }

    async fn find_address(&self, id: Uuid) -> AppResult<Option<Address>> {
        bounded(self.timeout, async {
            Ok(Addresses::find_by_id(id)
                .one(&self.conn)
                .await?
                .map(address_from_entity))
        })
        .await
    }

    async fn list_addresses(&self, user_id: Uuid) -> AppResult<Vec<Address>> {
        bounded(self.timeout, async {
            Ok(Addresses::find()
                .filter(AddressCol::UserId.eq(user_id))
                .order_by_asc(AddressCol::CreatedAt)
                .all(&self.conn)
                .await?
                .into_iter()
                .map(address_from_entity)
                .collect())
        })
        .await
    }

    async fn create_address(&self, address: NewAddress) -> AppResult<Address> {
        bounded(self.timeout, async {
            let created = AddressActive {
                id: Set(Uuid::new_v4()),
                user_id: Set(address.user_id),
                label: Set(address.label),
                street: Set(address.street),
                city: Set(address.city),
                state: Set(address.state),
                postal_code: Set(address.postal_code),
                country: Set(address.country),
                phone: Set(address.phone),
                created_at: NotSet,
            }
            .insert(&self.conn)
            .await?;
            Ok(address_from_entity(created))
        })
        .await
    }
}
