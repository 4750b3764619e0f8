//! Brings local payment and order state in line with what the provider reports.
//!
//! Events can arrive late, twice, or before the synchronous payment call has
//! returned, so every rule only moves a payment forward from the state it is
//! actually in. Replaying an event is a no-op.

use std::{sync::Arc, time::Duration};

use serde_json::json;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Payment, PaymentStatus},
    payments::{
        IntentStatus, PaymentIntent, PaymentProvider, ProviderEventKind,
        currency::from_minor_units,
    },
    repository::{PaymentRepository, PaymentUpdate},
    services::order_service::OrderService,
};

const MAX_RECONCILE_ATTEMPTS: usize = 3;

/// Retry schedule for idempotent provider reads.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Provider-side fact about a payment, independent of how it was learned.
#[derive(Debug, Clone)]
enum Observation {
    Succeeded {
        charge_id: Option<String>,
    },
    Failed {
        message: Option<String>,
    },
    Refunded {
        charge_id: Option<String>,
        amount_minor: i64,
        amount_refunded_minor: i64,
    },
    Pending,
}

#[derive(Clone)]
pub struct ReconcilerService {
    payments: Arc<dyn PaymentRepository>,
    orders: OrderService,
    provider: Arc<dyn PaymentProvider>,
    backoff: Backoff,
}

impl ReconcilerService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        orders: OrderService,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        Self {
            payments,
            orders,
            provider,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Verifies and applies one webhook delivery.
    ///
    /// Returns the payment as it stands afterwards, or `None` for event kinds
    /// that are acknowledged without action.
    pub async fn handle_event(&self, payload: &[u8], signature: &str) -> AppResult<Option<Payment>> {
        let event = self
            .provider
            .verify_and_parse_webhook(payload, signature)
            .inspect_err(|err| tracing::warn!(error = %err, "webhook rejected"))?;
        tracing::info!(event_id = %event.id, "webhook received");

        let (intent_id, observation) = match event.kind {
            ProviderEventKind::PaymentSucceeded {
                intent_id,
                charge_id,
            } => (intent_id, Observation::Succeeded { charge_id }),
            ProviderEventKind::PaymentFailed { intent_id, message } => {
                (intent_id, Observation::Failed { message })
            }
            ProviderEventKind::ChargeRefunded {
                intent_id,
                charge_id,
                amount_minor,
                amount_refunded_minor,
            } => (
                intent_id,
                Observation::Refunded {
                    charge_id: Some(charge_id),
                    amount_minor,
                    amount_refunded_minor,
                },
            ),
            ProviderEventKind::Ignored { kind } => {
                tracing::debug!(event_id = %event.id, kind, "webhook ignored");
                return Ok(None);
            }
        };

        let payment = self
            .payments
            .find_by_provider_payment_id(&intent_id)
            .await?
            .ok_or_else(|| {
                tracing::error!(
                    event_id = %event.id,
                    provider_payment_id = %intent_id,
                    "webhook references an unknown payment"
                );
                AppError::NotFound
            })?;

        self.reconcile(payment, observation).await.map(Some)
    }

    /// Pulls the current intent from the provider and applies it like a webhook.
    pub async fn sync_payment(&self, payment_id: Uuid) -> AppResult<Payment> {
        let payment = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let intent = self
            .retrieve_with_backoff(&payment.provider_payment_id)
            .await?;
        tracing::info!(%payment_id, intent_status = ?intent.status, "payment synced from provider");
        self.reconcile(payment, observe(intent)).await
    }

    async fn retrieve_with_backoff(&self, intent_id: &str) -> AppResult<PaymentIntent> {
        let mut delay = self.backoff.initial_delay;
        let max_attempts = self.backoff.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.provider.retrieve_payment_intent(intent_id).await {
                Ok(intent) => return Ok(intent),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(
                        intent_id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "provider read failed, retrying: {err}"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.backoff.max_delay);
                }
                Err(err) => return Err(err),
            }
        }

        Err(AppError::external("payment provider read retries exhausted"))
    }

    async fn reconcile(&self, mut payment: Payment, observation: Observation) -> AppResult<Payment> {
        for _ in 0..MAX_RECONCILE_ATTEMPTS {
            let Some(update) = plan(&payment, &observation) else {
                tracing::debug!(payment_id = %payment.id, status = %payment.status, "payment already up to date");
                return self.after_reconcile(payment).await;
            };

            let from = payment.status;
            match self.payments.transition(payment.id, from, update).await? {
                Some(updated) => {
                    tracing::info!(
                        payment_id = %updated.id,
                        order_id = %updated.order_id,
                        from = %from,
                        to = %updated.status,
                        "payment reconciled"
                    );
                    return self.after_reconcile(updated).await;
                }
                None => {
                    payment = self
                        .payments
                        .find_by_id(payment.id)
                        .await?
                        .ok_or(AppError::NotFound)?;
                }
            }
        }
        Err(AppError::Conflict)
    }

    /// Runs on replays too, so a crash between the two writes heals on redelivery.
    /// A refund seen before the success event still proves the charge was captured.
    async fn after_reconcile(&self, payment: Payment) -> AppResult<Payment> {
        if payment.status.is_captured() {
            self.orders.mark_paid(payment.order_id).await?;
        }
        Ok(payment)
    }
}

fn observe(intent: PaymentIntent) -> Observation {
    if intent.amount_refunded_minor > 0 {
        return Observation::Refunded {
            charge_id: intent.charge_id,
            amount_minor: intent.amount_minor,
            amount_refunded_minor: intent.amount_refunded_minor,
        };
    }
    match intent.status {
        IntentStatus::Succeeded => Observation::Succeeded {
            charge_id: intent.charge_id,
        },
        IntentStatus::Failed => Observation::Failed {
            message: intent.failure_message,
        },
        // A pending intent that carries an error means the last attempt was declined.
        IntentStatus::Pending if intent.failure_message.is_some() => Observation::Failed {
            message: intent.failure_message,
        },
        IntentStatus::Pending => Observation::Pending,
    }
}

/// The forward-only rules. `None` means the observation adds nothing.
fn plan(payment: &Payment, observation: &Observation) -> Option<PaymentUpdate> {
    use PaymentStatus::*;

    match observation {
        Observation::Pending => None,
        Observation::Succeeded { charge_id } => match payment.status {
            Initiated | Failed => Some(PaymentUpdate {
                transaction_id: charge_id.clone(),
                ..PaymentUpdate::status(Succeeded)
            }),
            Succeeded if payment.transaction_id.is_none() && charge_id.is_some() => {
                Some(PaymentUpdate {
                    transaction_id: charge_id.clone(),
                    ..PaymentUpdate::status(Succeeded)
                })
            }
            _ => None,
        },
        Observation::Failed { message } => match payment.status {
            Initiated => {
                let mut metadata = payment.metadata.clone();
                match metadata.as_object_mut() {
                    Some(fields) => {
                        fields.insert("error_message".into(), json!(message));
                    }
                    None => metadata = json!({ "error_message": message }),
                }
                Some(PaymentUpdate {
                    metadata: Some(metadata),
                    ..PaymentUpdate::status(Failed)
                })
            }
            _ => None,
        },
        Observation::Refunded {
            charge_id,
            amount_minor,
            amount_refunded_minor,
        } => {
            if matches!(payment.status, Refunded | Failed) {
                return None;
            }
            let reported = from_minor_units(*amount_refunded_minor, &payment.currency);
            let refunded = reported.max(payment.refunded_amount);
            if refunded <= rust_decimal::Decimal::ZERO {
                return None;
            }
            let status = if amount_refunded_minor >= amount_minor || refunded >= payment.amount {
                Refunded
            } else {
                PartiallyRefunded
            };
            if status == payment.status && refunded == payment.refunded_amount {
                return None;
            }
            Some(PaymentUpdate {
                transaction_id: payment
                    .transaction_id
                    .is_none()
                    .then(|| charge_id.clone())
                    .flatten(),
                refunded_amount: Some(refunded),
                ..PaymentUpdate::status(status)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;

    fn payment(status: PaymentStatus) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            provider: "stripe".into(),
            provider_payment_id: "pi_1".into(),
            transaction_id: None,
            amount: Decimal::new(1998, 2),
            refunded_amount: Decimal::ZERO,
            currency: "USD".into(),
            method: "card".into(),
            status,
            idempotency_key: "k".into(),
            metadata: json!({ "client_secret": "secret" }),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn refunded(minor: i64) -> Observation {
        Observation::Refunded {
            charge_id: Some("ch_1".into()),
            amount_minor: 1998,
            amount_refunded_minor: minor,
        }
    }

    #[test]
    fn success_never_moves_a_payment_backwards() {
        let succeeded = Observation::Succeeded {
            charge_id: Some("ch_1".into()),
        };
        for status in [PaymentStatus::Refunded, PaymentStatus::PartiallyRefunded] {
            assert!(plan(&payment(status), &succeeded).is_none());
        }
        let update = plan(&payment(PaymentStatus::Failed), &succeeded).unwrap();
        assert_eq!(update.status, PaymentStatus::Succeeded);
        assert_eq!(update.transaction_id.as_deref(), Some("ch_1"));
    }

    #[test]
    fn failure_only_applies_to_initiated_payments() {
        let failed = Observation::Failed {
            message: Some("card declined".into()),
        };
        let update = plan(&payment(PaymentStatus::Initiated), &failed).unwrap();
        assert_eq!(update.status, PaymentStatus::Failed);
        let metadata = update.metadata.unwrap();
        assert_eq!(metadata["error_message"], "card declined");
        assert_eq!(metadata["client_secret"], "secret");

        assert!(plan(&payment(PaymentStatus::Succeeded), &failed).is_none());
    }

    #[test]
    fn refund_status_follows_provider_amounts() {
        let partial = plan(&payment(PaymentStatus::Succeeded), &refunded(500)).unwrap();
        assert_eq!(partial.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(partial.refunded_amount, Some(Decimal::new(500, 2)));

        let full = plan(&payment(PaymentStatus::PartiallyRefunded), &refunded(1998)).unwrap();
        assert_eq!(full.status, PaymentStatus::Refunded);

        assert!(plan(&payment(PaymentStatus::Refunded), &refunded(500)).is_none());
    }

    #[test]
    fn stale_refund_total_is_not_applied() {
        let mut p = payment(PaymentStatus::PartiallyRefunded);
        p.refunded_amount = Decimal::new(800, 2);
        assert!(plan(&p, &refunded(500)).is_none());
    }

    #[test]
    fn observes_refunds_before_status() {
        let intent = PaymentIntent {
            id: "pi_1".into(),
            status: IntentStatus::Succeeded,
            client_secret: None,
            charge_id: Some("ch_1".into()),
            amount_minor: 1998,
            amount_refunded_minor: 1998,
            failure_message: None,
        };
        assert!(matches!(observe(intent), Observation::Refunded { .. }));
    }

    struct FlakyProvider {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PaymentProvider for FlakyProvider {
        async fn create_payment_intent(
            &self,
            _: crate::payments::IntentRequest,
        ) -> AppResult<PaymentIntent> {
            unreachable!()
        }

        async fn retrieve_payment_intent(&self, intent_id: &str) -> AppResult<PaymentIntent> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(AppError::external("retrieve_payment_intent timed out"));
            }
            Ok(PaymentIntent {
                id: intent_id.into(),
                status: IntentStatus::Succeeded,
                client_secret: None,
                charge_id: Some("ch_1".into()),
                amount_minor: 1998,
                amount_refunded_minor: 0,
                failure_message: None,
            })
        }

        async fn create_refund(
            &self,
            _: crate::payments::RefundRequest,
        ) -> AppResult<crate::payments::Refund> {
            unreachable!()
        }

        fn verify_and_parse_webhook(
            &self,
            _: &[u8],
            _: &str,
        ) -> AppResult<crate::payments::ProviderEvent> {
            unreachable!()
        }
    }

    fn reconciler_with(provider: Arc<FlakyProvider>) -> ReconcilerService {
        use crate::{repository::memory::MemoryStore, services::cart_service::CartService};

        let store = Arc::new(MemoryStore::new());
        let carts = CartService::new(store.clone(), store.clone());
        let orders = OrderService::new(store.clone(), carts, store.clone(), "USD");
        ReconcilerService::new(store, orders, provider).with_backoff(Backoff {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        })
    }

    #[tokio::test]
    async fn provider_reads_retry_transient_failures() {
        let provider = Arc::new(FlakyProvider {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let reconciler = reconciler_with(provider.clone());

        let intent = reconciler.retrieve_with_backoff("pi_1").await.unwrap();
        assert_eq!(intent.status, IntentStatus::Succeeded);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn provider_reads_give_up_after_max_attempts() {
        let provider = Arc::new(FlakyProvider {
            failures: 10,
            calls: AtomicUsize::new(0),
        });
        let reconciler = reconciler_with(provider.clone());

        let err = reconciler.retrieve_with_backoff("pi_1").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }
}
