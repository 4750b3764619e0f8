use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    config::AppConfig,
    payments::PaymentProvider,
    repository::{
        CartRepository, CatalogRepository, OrderRepository, PaymentRepository, sea::SeaStore,
    },
    services::{
        cart_service::CartService, catalog_service::CatalogService, order_service::OrderService,
        payment_service::PaymentService, reconciler_service::ReconcilerService,
    },
};

pub const PROVIDER_NAME: &str = "stripe";

/// Persistence backends the services are wired against.
#[derive(Clone)]
pub struct Gateways {
    pub carts: Arc<dyn CartRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
}

impl Gateways {
    /// Every family served by one store.
    pub fn single<T>(store: Arc<T>) -> Self
    where
        T: CartRepository + OrderRepository + PaymentRepository + CatalogRepository + 'static,
    {
        Self {
            carts: store.clone(),
            orders: store.clone(),
            payments: store.clone(),
            catalog: store,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orm: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub carts: CartService,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub reconciler: ReconcilerService,
    pub catalog: CatalogService,
}

impl AppState {
    pub fn new(orm: DatabaseConnection, config: AppConfig, provider: Arc<dyn PaymentProvider>) -> Self {
        let store = Arc::new(SeaStore::new(orm.clone(), config.db_timeout));
        Self::with_gateways(orm, config, Gateways::single(store), provider)
    }

    pub fn with_gateways(
        orm: DatabaseConnection,
        config: AppConfig,
        gateways: Gateways,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        let carts = CartService::new(gateways.carts, gateways.catalog.clone());
        let orders = OrderService::new(
            gateways.orders,
            carts.clone(),
            gateways.catalog.clone(),
            config.default_currency.clone(),
        );
        let payments = PaymentService::new(
            gateways.payments.clone(),
            orders.clone(),
            provider.clone(),
            PROVIDER_NAME,
        );
        let reconciler = ReconcilerService::new(gateways.payments, orders.clone(), provider);
        let catalog = CatalogService::new(gateways.catalog);

        Self {
            orm,
            config: Arc::new(config),
            carts,
            orders,
            payments,
            reconciler,
            catalog,
        }
    }
}
