use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, Set,
};
use storefront_api::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    entity::users::{ActiveModel as UserActive, Column as UserCol, Entity as Users},
    error::AppError,
    repository::{CatalogRepository, NewAddress, NewProduct, sea::SeaStore},
    services::auth_service::hash_password,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url, config.db_timeout).await?;
    run_migrations(&orm).await?;

    let admin_id = ensure_user(&orm, "admin@example.com", "admin12345", "admin").await?;
    let user_id = ensure_user(&orm, "user@example.com", "user12345", "user").await?;

    let store = SeaStore::new(orm.clone(), config.db_timeout);
    seed_address(&store, user_id).await?;
    seed_products(&store).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(
    conn: &DatabaseConnection,
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    if let Some(existing) = Users::find()
        .filter(UserCol::Email.eq(email))
        .one(conn)
        .await?
    {
        let id = existing.id;
        if existing.role != role {
            let mut active = existing.into_active_model();
            active.role = Set(role.to_string());
            active.update(conn).await?;
        }
        println!("Ensured user {email} (role={role})");
        return Ok(id);
    }

    let created = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set(hash_password(password)?),
        role: Set(role.to_string()),
        created_at: NotSet,
    }
    .insert(conn)
    .await?;

    println!("Created user {email} (role={role})");
    Ok(created.id)
}

async fn seed_address(store: &SeaStore, user_id: Uuid) -> anyhow::Result<()> {
    if !store.list_addresses(user_id).await?.is_empty() {
        return Ok(());
    }
    store
        .create_address(NewAddress {
            user_id,
            label: "Home".into(),
            street: "1 Ferris Way".into(),
            city: "Portland".into(),
            state: "OR".into(),
            postal_code: "97201".into(),
            country: "US".into(),
            phone: None,
        })
        .await?;
    println!("Seeded address");
    Ok(())
}

async fn seed_products(store: &SeaStore) -> anyhow::Result<()> {
    let products = [
        ("HOODIE-AXUM", "Axum Hoodie", "Warm hoodie for Rustaceans", Decimal::new(5500, 2)),
        ("MUG-FERRIS", "Ferris Mug", "Coffee tastes better with Ferris", Decimal::new(1200, 2)),
        ("STICKER-PACK", "Rust Sticker Pack", "Decorate your laptop", Decimal::new(500, 2)),
        ("EBOOK-ASYNC", "E-book: Async Rust", "Learn async Rust patterns", Decimal::new(2500, 2)),
    ];

    for (sku, name, description, price) in products {
        let result = store
            .create_product(NewProduct {
                sku: sku.into(),
                name: name.into(),
                description: Some(description.into()),
                price,
            })
            .await;
        match result {
            Ok(_) | Err(AppError::Validation(_)) => {}
            Err(err) => return Err(err.into()),
        }
    }

    println!("Seeded products");
    Ok(())
}
