use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Payment;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    pub amount: Decimal,
    /// Defaults to the order currency.
    pub currency: Option<String>,
    pub method: String,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RefundPaymentRequest {
    /// Omit to refund everything not yet refunded.
    pub amount: Option<Decimal>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentList {
    pub items: Vec<Payment>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    pub payment: Option<Payment>,
}
