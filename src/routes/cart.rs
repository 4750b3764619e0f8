use axum::{
    Json, Router,
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post, put},
};
use uuid::Uuid;

use crate::{
    dto::cart::{AddItemRequest, CartView, UpdateItemRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    models::CartCaller,
    response::{ApiResponse, Meta},
    state::AppState,
};

pub const GUEST_TOKEN_HEADER: &str = "x-guest-token";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(current_cart))
        .route("/{id}", get(get_cart).delete(clear_cart))
        .route("/{id}/items", post(add_item))
        .route("/{id}/items/{item_id}", put(update_item).delete(remove_item))
}

fn caller(user: Option<AuthUser>, headers: &HeaderMap) -> CartCaller {
    CartCaller {
        user_id: user.map(|u| u.user_id),
        guest_token: headers
            .get(GUEST_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
    }
}

fn ok(message: &str, cart: crate::models::Cart) -> Json<ApiResponse<CartView>> {
    Json(ApiResponse::success(
        message,
        CartView::from(cart),
        Some(Meta::empty()),
    ))
}

#[utoipa::path(
    get,
    path = "/api/carts",
    params(
        ("x-guest-token" = Option<String>, Header, description = "Guest cart token")
    ),
    responses(
        (status = 200, description = "Current cart, created on first use", body = ApiResponse<CartView>),
    ),
    tag = "Cart"
)]
pub async fn current_cart(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    headers: HeaderMap,
) -> AppResult<Json<ApiResponse<CartView>>> {
    let caller = caller(user, &headers);
    let cart = state
        .carts
        .get_or_create(caller.user_id, caller.guest_token.as_deref())
        .await?;
    Ok(ok("Cart", cart))
}

#[utoipa::path(
    get,
    path = "/api/carts/{id}",
    params(
        ("id" = Uuid, Path, description = "Cart ID"),
        ("x-guest-token" = Option<String>, Header, description = "Guest cart token")
    ),
    responses(
        (status = 200, description = "Cart", body = ApiResponse<CartView>),
        (status = 403, description = "Cart belongs to someone else"),
        (status = 404, description = "Cart not found"),
    ),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<CartView>>> {
    let cart = state.carts.get_for(id, &caller(user, &headers)).await?;
    Ok(ok("Cart", cart))
}

#[utoipa::path(
    post,
    path = "/api/carts/{id}/items",
    params(
        ("id" = Uuid, Path, description = "Cart ID"),
        ("x-guest-token" = Option<String>, Header, description = "Guest cart token")
    ),
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Item added", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity"),
        (status = 404, description = "Cart or product not found"),
        (status = 409, description = "Concurrent update, retry"),
    ),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddItemRequest>,
) -> AppResult<Json<ApiResponse<CartView>>> {
    state.carts.get_for(id, &caller(user, &headers)).await?;
    let cart = state
        .carts
        .add_item(id, payload.product_id, payload.quantity)
        .await?;
    Ok(ok("Added to cart", cart))
}

#[utoipa::path(
    put,
    path = "/api/carts/{id}/items/{item_id}",
    params(
        ("id" = Uuid, Path, description = "Cart ID"),
        ("item_id" = Uuid, Path, description = "Cart item ID"),
        ("x-guest-token" = Option<String>, Header, description = "Guest cart token")
    ),
    request_body = UpdateItemRequest,
    responses(
        (status = 200, description = "Quantity updated", body = ApiResponse<CartView>),
    ),
    tag = "Cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    headers: HeaderMap,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateItemRequest>,
) -> AppResult<Json<ApiResponse<CartView>>> {
    state.carts.get_for(id, &caller(user, &headers)).await?;
    let cart = state
        .carts
        .update_item_quantity(id, item_id, payload.quantity)
        .await?;
    Ok(ok("Cart updated", cart))
}

#[utoipa::path(
    delete,
    path = "/api/carts/{id}/items/{item_id}",
    params(
        ("id" = Uuid, Path, description = "Cart ID"),
        ("item_id" = Uuid, Path, description = "Cart item ID"),
        ("x-guest-token" = Option<String>, Header, description = "Guest cart token")
    ),
    responses(
        (status = 200, description = "Item removed", body = ApiResponse<CartView>),
    ),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    headers: HeaderMap,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<CartView>>> {
    state.carts.get_for(id, &caller(user, &headers)).await?;
    let cart = state.carts.remove_item(id, item_id).await?;
    Ok(ok("Removed from cart", cart))
}

#[utoipa::path(
    delete,
    path = "/api/carts/{id}",
    params(
        ("id" = Uuid, Path, description = "Cart ID"),
        ("x-guest-token" = Option<String>, Header, description = "Guest cart token")
    ),
    responses(
        (status = 200, description = "Cart emptied", body = ApiResponse<CartView>),
    ),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<CartView>>> {
    state.carts.get_for(id, &caller(user, &headers)).await?;
    let cart = state.carts.clear_cart(id).await?;
    Ok(ok("Cart cleared", cart))
}
