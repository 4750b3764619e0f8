use std::sync::Arc;

use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Cart, CartCaller},
    repository::{CartMutation, CartRepository, CatalogRepository, NewCart, NewCartItem},
};

/// Attempts before a contended cart mutation gives up with [`AppError::Conflict`].
pub const MAX_MUTATION_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct CartService {
    carts: Arc<dyn CartRepository>,
    catalog: Arc<dyn CatalogRepository>,
}

impl CartService {
    pub fn new(carts: Arc<dyn CartRepository>, catalog: Arc<dyn CatalogRepository>) -> Self {
        Self { carts, catalog }
    }

    /// Returns the caller's cart, creating it on first use.
    ///
    /// A user id wins over a guest token. With neither, a fresh anonymous cart is
    /// created and its id is the only handle the client gets.
    pub async fn get_or_create(
        &self,
        user_id: Option<Uuid>,
        guest_token: Option<&str>,
    ) -> AppResult<Cart> {
        let guest_token = guest_token.map(str::trim).filter(|t| !t.is_empty());

        if let Some(user_id) = user_id {
            if let Some(cart) = self.carts.find_by_user(user_id).await? {
                return Ok(cart);
            }
            let cart = self
                .carts
                .create(NewCart {
                    user_id: Some(user_id),
                    guest_token: None,
                })
                .await?;
            tracing::info!(cart_id = %cart.id, %user_id, "user cart created");
            return Ok(cart);
        }

        if let Some(token) = guest_token {
            if let Some(cart) = self.carts.find_by_guest_token(token).await? {
                return Ok(cart);
            }
            let cart = self
                .carts
                .create(NewCart {
                    user_id: None,
                    guest_token: Some(token.to_string()),
                })
                .await?;
            tracing::info!(cart_id = %cart.id, "guest cart created");
            return Ok(cart);
        }

        let cart = self.carts.create(NewCart::default()).await?;
        tracing::info!(cart_id = %cart.id, "anonymous cart created");
        Ok(cart)
    }

    pub async fn get_cart(&self, cart_id: Uuid) -> AppResult<Cart> {
        self.carts
            .find_by_id(cart_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Loads a cart and checks that `caller` may see it.
    pub async fn get_for(&self, cart_id: Uuid, caller: &CartCaller) -> AppResult<Cart> {
        let cart = self.get_cart(cart_id).await?;
        if !cart.accessible_by(caller) {
            return Err(AppError::Forbidden);
        }
        Ok(cart)
    }

    pub async fn add_item(&self, cart_id: Uuid, product_id: Uuid, quantity: i32) -> AppResult<Cart> {
        if quantity < 1 {
            return Err(AppError::validation("quantity must be at least 1"));
        }
        let product = self
            .catalog
            .find_product(product_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or(AppError::NotFound)?;

        let cart = self
            .mutate(cart_id, |cart| match cart.item_for_product(product_id) {
                Some(item) => {
                    let quantity = item
                        .quantity
                        .checked_add(quantity)
                        .ok_or_else(|| AppError::validation("quantity is too large"))?;
                    Ok(Some(CartMutation::SetQuantity {
                        item_id: item.id,
                        quantity,
                    }))
                }
                None => Ok(Some(CartMutation::InsertItem(NewCartItem {
                    id: Uuid::new_v4(),
                    product_id,
                    quantity,
                    unit_price: product.price,
                }))),
            })
            .await?;

        tracing::debug!(%cart_id, %product_id, quantity, "cart item added");
        Ok(cart)
    }

    /// `quantity <= 0` removes the item. An unknown item leaves the cart untouched.
    pub async fn update_item_quantity(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> AppResult<Cart> {
        self.mutate(cart_id, |cart| {
            Ok(match cart.item(item_id) {
                None => None,
                Some(_) if quantity <= 0 => Some(CartMutation::RemoveItem { item_id }),
                Some(item) if item.quantity == quantity => None,
                Some(_) => Some(CartMutation::SetQuantity { item_id, quantity }),
            })
        })
        .await
    }

    pub async fn remove_item(&self, cart_id: Uuid, item_id: Uuid) -> AppResult<Cart> {
        self.mutate(cart_id, |cart| {
            Ok(cart
                .item(item_id)
                .map(|_| CartMutation::RemoveItem { item_id }))
        })
        .await
    }

    pub async fn clear_cart(&self, cart_id: Uuid) -> AppResult<Cart> {
        let cart = self
            .mutate(cart_id, |cart| {
                Ok((!cart.is_empty()).then_some(CartMutation::Clear))
            })
            .await?;
        tracing::debug!(%cart_id, "cart cleared");
        Ok(cart)
    }

    /// Optimistic write loop: read, plan against that snapshot, apply if the
    /// version is unchanged, otherwise start over. `plan` returning `None` means
    /// there is nothing to do and the cart is returned as read.
    async fn mutate<F>(&self, cart_id: Uuid, plan: F) -> AppResult<Cart>
    where
        F: Fn(&Cart) -> AppResult<Option<CartMutation>>,
    {
        for attempt in 1..=MAX_MUTATION_ATTEMPTS {
            let cart = self.get_cart(cart_id).await?;
            let Some(mutation) = plan(&cart)? else {
                return Ok(cart);
            };
            if self.carts.apply(cart.id, cart.version, mutation).await? {
                return self.get_cart(cart_id).await;
            }
            tracing::debug!(%cart_id, attempt, "cart version moved, retrying");
        }

        tracing::warn!(%cart_id, attempts = MAX_MUTATION_ATTEMPTS, "cart mutation kept conflicting");
        Err(AppError::Conflict)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use super::*;
    use crate::{
        models::Product,
        repository::{NewProduct, memory::MemoryStore},
    };

    fn setup() -> (Arc<MemoryStore>, CartService) {
        let store = Arc::new(MemoryStore::new());
        let service = CartService::new(store.clone(), store.clone());
        (store, service)
    }

    async fn product(store: &MemoryStore, sku: &str, price: Decimal) -> Product {
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

    #[tokio::test]
    async fn same_product_twice_sums_quantity() {
        let (store, carts) = setup();
        let p = product(&store, "SKU-1", Decimal::new(999, 2)).await;
        let cart = carts.get_or_create(None, None).await.unwrap();

        carts.add_item(cart.id, p.id, 1).await.unwrap();
        let cart = carts.add_item(cart.id, p.id, 2).await.unwrap();

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 3);
        assert_eq!(cart.items[0].unit_price, Decimal::new(999, 2));
    }

    #[tokio::test]
    async fn unit_price_is_frozen_at_add_time() {
        let (store, carts) = setup();
        let mut p = product(&store, "SKU-1", Decimal::new(999, 2)).await;
        let cart = carts.get_or_create(None, None).await.unwrap();
        carts.add_item(cart.id, p.id, 1).await.unwrap();

        p.price = Decimal::new(1999, 2);
        store.put_product(p.clone()).await;
        let cart = carts.add_item(cart.id, p.id, 1).await.unwrap();

        assert_eq!(cart.items[0].unit_price, Decimal::new(999, 2));
        assert_eq!(cart.subtotal(), Decimal::new(1998, 2));
    }

    #[tokio::test]
    async fn rejects_bad_quantity_and_unknown_or_inactive_products() {
        let (store, carts) = setup();
        let mut p = product(&store, "SKU-1", Decimal::ONE).await;
        let cart = carts.get_or_create(None, None).await.unwrap();

        assert!(matches!(
            carts.add_item(cart.id, p.id, 0).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            carts.add_item(cart.id, Uuid::new_v4(), 1).await,
            Err(AppError::NotFound)
        ));

        p.is_active = false;
        store.put_product(p.clone()).await;
        assert!(matches!(
            carts.add_item(cart.id, p.id, 1).await,
            Err(AppError::NotFound)
        ));
        assert!(matches!(
            carts.add_item(Uuid::new_v4(), p.id, 1).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn zero_quantity_update_and_remove_are_equivalent() {
        let (store, carts) = setup();
        let p = product(&store, "SKU-1", Decimal::ONE).await;

        let a = carts.get_or_create(None, Some("guest-a")).await.unwrap();
        let a = carts.add_item(a.id, p.id, 2).await.unwrap();
        let b = carts.get_or_create(None, Some("guest-b")).await.unwrap();
        let b = carts.add_item(b.id, p.id, 2).await.unwrap();

        let a = carts
            .update_item_quantity(a.id, a.items[0].id, 0)
            .await
            .unwrap();
        let b_item = b.items[0].id;
        let b = carts.remove_item(b.id, b_item).await.unwrap();
        assert!(a.is_empty() && b.is_empty());

        // Repeating either is a no-op and does not bump the version.
        let again = carts.remove_item(b.id, b_item).await.unwrap();
        assert_eq!(again.version, b.version);
        let again = carts.update_item_quantity(b.id, b_item, 0).await.unwrap();
        assert_eq!(again.version, b.version);
    }

    #[tokio::test]
    async fn unknown_item_update_returns_cart_unchanged() {
        let (store, carts) = setup();
        let p = product(&store, "SKU-1", Decimal::ONE).await;
        let cart = carts.get_or_create(None, None).await.unwrap();
        let cart = carts.add_item(cart.id, p.id, 2).await.unwrap();

        let after = carts
            .update_item_quantity(cart.id, Uuid::new_v4(), 7)
            .await
            .unwrap();
        assert_eq!(after.version, cart.version);
        assert_eq!(after.items[0].quantity, 2);
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let (store, carts) = setup();
        let p = product(&store, "SKU-1", Decimal::ONE).await;
        let cart = carts.get_or_create(None, None).await.unwrap();
        carts.add_item(cart.id, p.id, 1).await.unwrap();

        let cleared = carts.clear_cart(cart.id).await.unwrap();
        assert!(cleared.is_empty());
        let again = carts.clear_cart(cart.id).await.unwrap();
        assert_eq!(again.version, cleared.version);
    }

    #[tokio::test]
    async fn owner_lookup_prefers_user_then_token() {
        let (_store, carts) = setup();
        let user = Uuid::new_v4();

        let first = carts.get_or_create(Some(user), Some("tok")).await.unwrap();
        let second = carts.get_or_create(Some(user), None).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.user_id, Some(user));
        assert_eq!(first.guest_token, None);

        let guest = carts.get_or_create(None, Some("tok")).await.unwrap();
        assert_ne!(guest.id, first.id);
        assert_eq!(
            carts.get_or_create(None, Some(" tok ")).await.unwrap().id,
            guest.id
        );

        let anon_a = carts.get_or_create(None, Some("")).await.unwrap();
        let anon_b = carts.get_or_create(None, None).await.unwrap();
        assert_ne!(anon_a.id, anon_b.id);
    }

    #[tokio::test]
    async fn access_is_checked_against_caller() {
        let (_store, carts) = setup();
        let user = Uuid::new_v4();
        let cart = carts.get_or_create(Some(user), None).await.unwrap();

        assert!(carts.get_for(cart.id, &CartCaller::user(user)).await.is_ok());
        assert!(matches!(
            carts.get_for(cart.id, &CartCaller::user(Uuid::new_v4())).await,
            Err(AppError::Forbidden)
        ));
    }

    /// Lets another writer slip in right before the first `apply` call.
    struct RacingCarts {
        inner: Arc<MemoryStore>,
        rival: Uuid,
        raced: AtomicBool,
    }

    #[async_trait]
    impl CartRepository for RacingCarts {
        async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Cart>> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_user(&self, user_id: Uuid) -> AppResult<Option<Cart>> {
            self.inner.find_by_user(user_id).await
        }

        async fn find_by_guest_token(&self, token: &str) -> AppResult<Option<Cart>> {
            self.inner.find_by_guest_token(token).await
        }

        async fn create(&self, cart: NewCart) -> AppResult<Cart> {
            CartRepository::create(&*self.inner, cart).await
        }

        async fn apply(
            &self,
            cart_id: Uuid,
            expected_version: i32,
            mutation: CartMutation,
        ) -> AppResult<bool> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                let rival = NewCartItem {
                    id: Uuid::new_v4(),
                    product_id: self.rival,
                    quantity: 1,
                    unit_price: Decimal::ONE,
                };
                assert!(
                    self.inner
                        .apply(cart_id, expected_version, CartMutation::InsertItem(rival))
                        .await?
                );
            }
            self.inner.apply(cart_id, expected_version, mutation).await
        }
    }

    #[tokio::test]
    async fn version_conflict_is_retried_and_keeps_both_writes() {
        let store = Arc::new(MemoryStore::new());
        let mine = product(&store, "MINE", Decimal::new(500, 2)).await;
        let rival = product(&store, "RIVAL", Decimal::ONE).await;
        let racing = Arc::new(RacingCarts {
            inner: store.clone(),
            rival: rival.id,
            raced: AtomicBool::new(false),
        });
        let carts = CartService::new(racing, store.clone());

        let cart = carts.get_or_create(None, None).await.unwrap();
        let cart = carts.add_item(cart.id, mine.id, 2).await.unwrap();

        assert_eq!(cart.items.len(), 2);
        assert_eq!(cart.version, 2);
        assert_eq!(cart.item_for_product(mine.id).unwrap().quantity, 2);
        assert!(cart.item_for_product(rival.id).is_some());
    }

    /// Never lets a write through.
    struct AlwaysStale {
        inner: Arc<MemoryStore>,
        applies: AtomicUsize,
    }

    #[async_trait]
    impl CartRepository for AlwaysStale {
        async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Cart>> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_user(&self, user_id: Uuid) -> AppResult<Option<Cart>> {
            self.inner.find_by_user(user_id).await
        }

        async fn find_by_guest_token(&self, token: &str) -> AppResult<Option<Cart>> {
            self.inner.find_by_guest_token(token).await
        }

        async fn create(&self, cart: NewCart) -> AppResult<Cart> {
            CartRepository::create(&*self.inner, cart).await
        }

        async fn apply(&self, _: Uuid, _: i32, _: CartMutation) -> AppResult<bool> {
            self.applies.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }
    }

    #[tokio::test]
    async fn persistent_conflict_gives_up() {
        let store = Arc::new(MemoryStore::new());
        let p = product(&store, "SKU-1", Decimal::ONE).await;
        let stale = Arc::new(AlwaysStale {
            inner: store.clone(),
            applies: AtomicUsize::new(0),
        });
        let carts = CartService::new(stale.clone(), store.clone());
        let cart = carts.get_or_create(None, None).await.unwrap();

        let err = carts.add_item(cart.id, p.id, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict));
        assert_eq!(stale.applies.load(Ordering::SeqCst), MAX_MUTATION_ATTEMPTS);
    }
}
