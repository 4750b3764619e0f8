use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Address, Product},
    repository::{CatalogRepository, NewAddress, NewProduct, ProductUpdate},
};

#[derive(Clone)]
pub struct CatalogService {
    catalog: Arc<dyn CatalogRepository>,
}

impl CatalogService {
    pub fn new(catalog: Arc<dyn CatalogRepository>) -> Self {
        Self { catalog }
    }

    pub async fn list_products(&self, limit: u64, offset: u64) -> AppResult<(Vec<Product>, u64)> {
        self.catalog.list_products(limit, offset).await
    }

    pub async fn get_product(&self, id: Uuid) -> AppResult<Product> {
        self.catalog
            .find_product(id)
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn create_product(&self, mut product: NewProduct) -> AppResult<Product> {
        product.sku = product.sku.trim().to_string();
        product.name = product.name.trim().to_string();
        if product.sku.is_empty() || product.name.is_empty() {
            return Err(AppError::validation("sku and name are required"));
        }
        validate_price(product.price)?;

        let created = self.catalog.create_product(product).await?;
        tracing::info!(product_id = %created.id, sku = %created.sku, "product created");
        Ok(created)
    }

    /// Carts keep the price they were filled at and orders keep their snapshot,
    /// so an edit only affects items added afterwards.
    pub async fn update_product(&self, id: Uuid, mut update: ProductUpdate) -> AppResult<Product> {
        if let Some(name) = update.name.as_mut() {
            *name = name.trim().to_string();
            if name.is_empty() {
                return Err(AppError::validation("name must not be empty"));
            }
        }
        if let Some(price) = update.price {
            validate_price(price)?;
        }

        let updated = self.catalog.update_product(id, update).await?;
        tracing::info!(product_id = %id, price = %updated.price, active = updated.is_active, "product updated");
        Ok(updated)
    }

    /// Soft delete: the row stays so existing carts and orders still resolve it.
    pub async fn deactivate_product(&self, id: Uuid) -> AppResult<Product> {
        let product = self
            .catalog
            .update_product(
                id,
                ProductUpdate {
                    is_active: Some(false),
                    ..ProductUpdate::default()
                },
            )
            .await?;
        tracing::info!(product_id = %id, "product deactivated");
        Ok(product)
    }

    pub async fn list_addresses(&self, user_id: Uuid) -> AppResult<Vec<Address>> {
        self.catalog.list_addresses(user_id).await
    }

    pub async fn create_address(&self, address: NewAddress) -> AppResult<Address> {
        let required = [
            ("street", &address.street),
            ("city", &address.city),
            ("postal_code", &address.postal_code),
            ("country", &address.country),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(AppError::validation(format!("{field} is required")));
        }
        self.catalog.create_address(address).await
    }
}

fn validate_price(price: Decimal) -> AppResult<()> {
    if price <= Decimal::ZERO {
        return Err(AppError::validation("price must be greater than 0"));
    }
    if price.normalize().scale() > 2 {
        return Err(AppError::validation("price has more than two decimal places"));
    }
    Ok(())
}
