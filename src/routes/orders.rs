use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    audit,
    dto::{
        orders::{CreateOrderRequest, OrderList},
        payments::{CreatePaymentRequest, PaymentList},
    },
    error::AppResult,
    middleware::auth::AuthUser,
    models::{Order, Payment},
    repository::OrderFilter,
    response::{ApiResponse, Meta},
    routes::{
        cart::GUEST_TOKEN_HEADER,
        params::{OrderListQuery, SortOrder},
    },
    services::{order_service::CreateOrder, payment_service::ProcessPayment},
    state::AppState,
};

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/{id}", get(get_order))
        .route("/{id}/cancel", post(cancel_order))
        .route("/{id}/payments", get(list_payments).post(create_payment))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Shared by the user and admin listings; `user_id` narrows to one customer.
pub(crate) async fn list_with_query(
    state: &AppState,
    user_id: Option<Uuid>,
    query: OrderListQuery,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let (page, limit, offset) = query.pagination().normalize();
    let (items, total) = state
        .orders
        .list_orders(OrderFilter {
            user_id,
            status: query.status,
            newest_first: !matches!(query.sort_order, Some(SortOrder::Asc)),
            limit: limit as u64,
            offset: offset as u64,
        })
        .await?;
    let meta = Meta::new(page, limit, total);
    Ok(Json(ApiResponse::success("Ok", OrderList { items }, Some(meta))))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Orders of the current user", body = ApiResponse<OrderList>),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    list_with_query(&state, Some(user.user_id), query).await
}

#[utoipa::path(
    post,
    path = "/api/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created from the cart", body = ApiResponse<Order>),
        (status = 404, description = "Cart or address not found"),
        (status = 409, description = "Cart is empty"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<CreateOrderRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Order>>)> {
    let order = state
        .orders
        .create_order(CreateOrder {
            user_id: user.user_id,
            guest_token: header_value(&headers, GUEST_TOKEN_HEADER),
            cart_id: payload.cart_id,
            shipping_address_id: payload.shipping_address_id,
            billing_address_id: payload
                .billing_address_id
                .unwrap_or(payload.shipping_address_id),
        })
        .await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "order_create",
        "orders",
        serde_json::json!({ "order_id": order.id, "total_amount": order.total_amount }),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Order created", order, None)),
    ))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<Order>),
        (status = 403, description = "Not your order"),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let order = state
        .orders
        .get_order_for(id, user.user_id, user.is_admin())
        .await?;
    Ok(Json(ApiResponse::success("Order", order, None)))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<Order>),
        (status = 409, description = "Order can no longer be cancelled"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Order>>> {
    state
        .orders
        .get_order_for(id, user.user_id, user.is_admin())
        .await?;
    let order = state.orders.cancel_order(id).await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "order_cancel",
        "orders",
        serde_json::json!({ "order_id": order.id }),
    )
    .await;

    Ok(Json(ApiResponse::success("Order cancelled", order, None)))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}/payments",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Payment attempts for the order", body = ApiResponse<PaymentList>),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<PaymentList>>> {
    state
        .orders
        .get_order_for(id, user.user_id, user.is_admin())
        .await?;
    let items = state.payments.list_order_payments(id).await?;
    Ok(Json(ApiResponse::success(
        "Payments",
        PaymentList { items },
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/payments",
    params(
        ("id" = Uuid, Path, description = "Order ID"),
        ("idempotency-key" = Option<String>, Header, description = "Reuse on retry to get the same intent")
    ),
    request_body = CreatePaymentRequest,
    responses(
        (status = 201, description = "Payment initiated", body = ApiResponse<Payment>),
        (status = 400, description = "Amount or currency mismatch"),
        (status = 409, description = "Order not payable or payment already in progress"),
        (status = 502, description = "Payment provider unavailable, retry with the same key"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreatePaymentRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Payment>>)> {
    let order = state
        .orders
        .get_order_for(id, user.user_id, user.is_admin())
        .await?;
    let payment = state
        .payments
        .process_payment(ProcessPayment {
            order_id: order.id,
            amount: payload.amount,
            currency: payload.currency.unwrap_or(order.currency),
            method: payload.method,
            idempotency_key: payload
                .idempotency_key
                .or_else(|| header_value(&headers, IDEMPOTENCY_KEY_HEADER)),
        })
        .await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "payment_create",
        "payments",
        serde_json::json!({ "order_id": id, "payment_id": payment.id }),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Payment initiated", payment, None)),
    ))
}
