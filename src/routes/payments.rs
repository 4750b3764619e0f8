use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    audit,
    dto::payments::RefundPaymentRequest,
    error::AppResult,
    middleware::auth::{AuthUser, ensure_admin},
    models::Payment,
    response::ApiResponse,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(get_payment))
        .route("/{id}/refund", post(refund_payment))
        .route("/{id}/sync", post(sync_payment))
}

#[utoipa::path(
    get,
    path = "/api/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment", body = ApiResponse<Payment>),
        (status = 403, description = "Not your payment"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let payment = state.payments.get_payment(id).await?;
    state
        .orders
        .get_order_for(payment.order_id, user.user_id, user.is_admin())
        .await?;
    Ok(Json(ApiResponse::success("Payment", payment, None)))
}

#[utoipa::path(
    post,
    path = "/api/payments/{id}/refund",
    params(("id" = Uuid, Path, description = "Payment ID")),
    request_body = RefundPaymentRequest,
    responses(
        (status = 200, description = "Refund issued", body = ApiResponse<Payment>),
        (status = 400, description = "Amount exceeds what is left to refund"),
        (status = 409, description = "Payment is not refundable"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    payload: Option<Json<RefundPaymentRequest>>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    ensure_admin(&user)?;
    let Json(payload) = payload.unwrap_or_default();
    let payment = state.payments.refund_payment(id, payload.amount).await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "payment_refund",
        "payments",
        serde_json::json!({
            "payment_id": payment.id,
            "refunded_amount": payment.refunded_amount,
        }),
    )
    .await;

    Ok(Json(ApiResponse::success("Refund issued", payment, None)))
}

#[utoipa::path(
    post,
    path = "/api/payments/{id}/sync",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment reconciled with the provider", body = ApiResponse<Payment>),
        (status = 502, description = "Provider unreachable"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn sync_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    ensure_admin(&user)?;
    let payment = state.reconciler.sync_payment(id).await?;
    Ok(Json(ApiResponse::success("Payment synced", payment, None)))
}
