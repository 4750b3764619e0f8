use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};

use crate::{
    dto::payments::WebhookAck,
    error::{AppError, AppResult},
    response::ApiResponse,
    state::AppState,
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

pub fn router() -> Router<AppState> {
    Router::new().route("/payments", post(payment_webhook))
}

/// Takes the raw body: the signature covers the exact bytes the provider sent.
#[utoipa::path(
    post,
    path = "/api/webhooks/payments",
    params(
        ("stripe-signature" = String, Header, description = "t=<unix>,v1=<hex hmac>")
    ),
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Event applied or ignored", body = ApiResponse<WebhookAck>),
        (status = 401, description = "Signature rejected"),
        (status = 404, description = "Unknown payment, the provider will redeliver"),
    ),
    tag = "Webhooks"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<ApiResponse<WebhookAck>>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Authentication("missing signature header".into()))?;

    let payment = state.reconciler.handle_event(&body, signature).await?;
    Ok(Json(ApiResponse::success(
        "Webhook received",
        WebhookAck {
            received: true,
            payment,
        },
        None,
    )))
}
