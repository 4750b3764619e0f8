#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use sha2::Sha256;
use storefront_api::{
    config::{AppConfig, PaymentConfig},
    models::Product,
    payments::PaymentProvider,
    repository::{CatalogRepository, NewAddress, NewProduct, memory::MemoryStore},
    state::{AppState, Gateways},
};
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const JWT_SECRET: &str = "test-jwt-secret";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub state: AppState,
    pub user_id: Uuid,
    pub address_id: Uuid,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".into(),
        host: "127.0.0.1".into(),
        port: 0,
        jwt_secret: JWT_SECRET.into(),
        default_currency: "USD".into(),
        db_timeout: Duration::from_secs(5),
        payment: PaymentConfig {
            api_base: "http://127.0.0.1:9".into(),
            secret_key: "sk_test".into(),
            webhook_secret: WEBHOOK_SECRET.into(),
            timeout: Duration::from_secs(2),
        },
    }
}

/// Services over the in-process store. The ORM handle is disconnected, so only
/// best-effort audit writes ever touch it.
pub async fn harness(provider: Arc<dyn PaymentProvider>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::with_gateways(
        DatabaseConnection::Disconnected,
        test_config(),
        Gateways::single(store.clone()),
        provider,
    );

    let user_id = Uuid::new_v4();
    let address_id = store
        .create_address(NewAddress {
            user_id,
            label: "Home".into(),
            street: "1 Main St".into(),
            city: "Springfield".into(),
            state: "IL".into(),
            postal_code: "62701".into(),
            country: "US".into(),
            phone: None,
        })
        .await
        .unwrap()
        .id;

    Harness {
        store,
        state,
        user_id,
        address_id,
    }
}

pub async fn product(store: &MemoryStore, sku: &str, price: Decimal) -> Product {
    store
        .create_product(NewProduct {
            sku: sku.into(),
            name: format!("Product {sku}"),
            description: None,
            price,
        })
        .await
        .unwrap()
}

pub fn sign(payload: &str, secret: &str, timestamp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    )
}

pub fn sign_now(payload: &str) -> String {
    sign(payload, WEBHOOK_SECRET, chrono::Utc::now().timestamp())
}
