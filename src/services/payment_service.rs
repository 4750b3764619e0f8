use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{OrderStatus, Payment, PaymentStatus},
    payments::{
        IntentRequest, IntentStatus, PaymentProvider, RefundRequest,
        currency::{normalize_currency, to_exact_minor_units, to_minor_units},
    },
    repository::{NewPayment, PaymentRepository, PaymentUpdate},
    services::order_service::OrderService,
};

#[derive(Debug, Clone)]
pub struct ProcessPayment {
    pub order_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    /// Reusing a key on retry makes the provider return the same intent.
    pub idempotency_key: Option<String>,
}

#[derive(Clone)]
pub struct PaymentService {
    payments: Arc<dyn PaymentRepository>,
    orders: OrderService,
    provider: Arc<dyn PaymentProvider>,
    provider_name: String,
}

impl PaymentService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        orders: OrderService,
        provider: Arc<dyn PaymentProvider>,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            payments,
            orders,
            provider,
            provider_name: provider_name.into(),
        }
    }

    /// Opens a payment intent for a pending order.
    ///
    /// The local row is written only after the provider accepted the intent, so a
    /// provider failure leaves nothing behind. The intent is never re-created
    /// automatically; a retry must come from the caller with the same key.
    pub async fn process_payment(&self, input: ProcessPayment) -> AppResult<Payment> {
        let order = self.orders.get_order(input.order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(AppError::invalid_state(format!(
                "order is {}, only pending orders accept payments",
                order.status
            )));
        }

        let currency = normalize_currency(&input.currency)?;
        if input.amount <= Decimal::ZERO {
            return Err(AppError::validation("amount must be greater than 0"));
        }
        if input.amount != order.total_amount {
            return Err(AppError::validation(format!(
                "amount {} does not match order total {}",
                input.amount, order.total_amount
            )));
        }
        if currency != order.currency {
            return Err(AppError::validation(format!(
                "currency {currency} does not match order currency {}",
                order.currency
            )));
        }
        let method = input.method.trim();
        if method.is_empty() {
            return Err(AppError::validation("payment method is required"));
        }

        let existing = self.payments.list_by_order(order.id).await?;
        let idempotency_key = input
            .idempotency_key
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| format!("order-{}-attempt-{}", order.id, existing.len() + 1));

        if let Some(open) = existing
            .iter()
            .find(|p| p.status == PaymentStatus::Initiated)
        {
            if open.idempotency_key == idempotency_key {
                return Ok(open.clone());
            }
            return Err(AppError::invalid_state(format!(
                "payment {} is still in progress for this order",
                open.id
            )));
        }

        let intent = self
            .provider
            .create_payment_intent(IntentRequest {
                amount_minor: to_minor_units(input.amount, &currency)?,
                currency: currency.clone(),
                order_ref: order.id.to_string(),
                method: method.to_string(),
                idempotency_key: idempotency_key.clone(),
            })
            .await
            .inspect_err(|err| {
                tracing::warn!(order_id = %order.id, error = %err, "payment intent creation failed");
            })?;

        // Same key, same intent: a concurrent retry may already have stored it.
        if let Some(stored) = self.payments.find_by_provider_payment_id(&intent.id).await? {
            return Ok(stored);
        }

        let status = match intent.status {
            IntentStatus::Pending => PaymentStatus::Initiated,
            IntentStatus::Succeeded => PaymentStatus::Succeeded,
            IntentStatus::Failed => PaymentStatus::Failed,
        };
        let created = self
            .payments
            .create(NewPayment {
                order_id: order.id,
                provider: self.provider_name.clone(),
                provider_payment_id: intent.id.clone(),
                transaction_id: intent.charge_id.filter(|_| status == PaymentStatus::Succeeded),
                amount: input.amount,
                currency,
                method: method.to_string(),
                status,
                idempotency_key,
                metadata: json!({
                    "client_secret": intent.client_secret,
                    "error_message": intent.failure_message,
                }),
            })
            .await;
        let payment = match created {
            Ok(payment) => payment,
            Err(AppError::InvalidState(reason)) => {
                // Lost a race: either the same intent was stored concurrently, or
                // another attempt for this order got its row in first.
                if let Some(stored) = self.payments.find_by_provider_payment_id(&intent.id).await? {
                    return Ok(stored);
                }
                tracing::warn!(
                    order_id = %order.id,
                    provider_payment_id = %intent.id,
                    "concurrent payment attempt rejected: {reason}"
                );
                return Err(AppError::invalid_state(
                    "another payment attempt is in progress for this order",
                ));
            }
            Err(err) => return Err(err),
        };

        tracing::info!(
            payment_id = %payment.id,
            order_id = %order.id,
            provider_payment_id = %payment.provider_payment_id,
            status = %payment.status,
            "payment initiated"
        );

        if payment.status == PaymentStatus::Succeeded {
            self.orders.mark_paid(order.id).await?;
        }
        Ok(payment)
    }

    /// Refunds `amount`, or everything not yet refunded when omitted.
    pub async fn refund_payment(&self, payment_id: Uuid, amount: Option<Decimal>) -> AppResult<Payment> {
        let payment = self.get_payment(payment_id).await?;
        if !payment.status.is_refundable() {
            return Err(AppError::invalid_state(format!(
                "payment is {}, only succeeded payments can be refunded",
                payment.status
            )));
        }

        let remaining = payment.refundable_amount();
        let amount = amount.unwrap_or(remaining);
        if amount <= Decimal::ZERO || amount > remaining {
            return Err(AppError::validation(format!(
                "refund amount must be greater than 0 and at most {remaining}"
            )));
        }

        let amount_minor = to_exact_minor_units(amount, &payment.currency)?;
        if amount_minor <= 0 {
            return Err(AppError::validation(format!(
                "refund amount {amount} is below the smallest {} unit",
                payment.currency
            )));
        }

        let refunded_total = payment.refunded_amount + amount;
        let refund = self
            .provider
            .create_refund(RefundRequest {
                intent_id: payment.provider_payment_id.clone(),
                amount_minor,
                idempotency_key: format!("refund-{}-{}", payment.id, refunded_total),
            })
            .await
            .inspect_err(|err| {
                tracing::warn!(%payment_id, error = %err, "refund request failed");
            })?;

        let status = if refunded_total >= payment.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        let mut metadata = payment.metadata.clone();
        if let Some(fields) = metadata.as_object_mut() {
            fields.insert("last_refund_id".into(), json!(refund.id));
        }

        let updated = self
            .payments
            .transition(
                payment.id,
                payment.status,
                PaymentUpdate {
                    status,
                    transaction_id: None,
                    refunded_amount: Some(refunded_total),
                    metadata: Some(metadata),
                },
            )
            .await?;

        match updated {
            Some(updated) => {
                tracing::info!(%payment_id, refund_id = %refund.id, %amount, status = %updated.status, "payment refunded");
                Ok(updated)
            }
            None => {
                // A refund webhook got there first; it carries the provider's totals.
                tracing::info!(%payment_id, refund_id = %refund.id, "refund already reconciled");
                self.get_payment(payment_id).await
            }
        }
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> AppResult<Payment> {
        self.payments
            .find_by_id(payment_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn list_order_payments(&self, order_id: Uuid) -> AppResult<Vec<Payment>> {
        self.payments.list_by_order(order_id).await
    }
}
