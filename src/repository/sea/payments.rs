use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, SqlErr,
    ActiveValue::NotSet,
    sea_query::Expr,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{SeaStore, payment_from_entity};
use crate::{
    entity::payments::{ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments},
    error::{AppError, AppResult},
    models::{Payment, PaymentStatus},
    repository::{NewPayment, PaymentRepository, PaymentUpdate, bounded},
};

impl SeaStore {
    async fn insert_payment(&self, payment: NewPayment) -> AppResult<Payment> {
        let created = PaymentActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(payment.order_id),
            provider: Set(payment.provider),
            provider_payment_id: Set(payment.provider_payment_id),
            transaction_id: Set(payment.transaction_id),
            amount: Set(payment.amount),
            refunded_amount: Set(Decimal::ZERO),
            currency: Set(payment.currency),
            method: Set(payment.method),
            status: Set(payment.status.as_str().to_string()),
            idempotency_key: Set(payment.idempotency_key),
            metadata: Set(payment.metadata),
            created_at: NotSet,
            updated_at: NotSet,
        }
        .insert(&self.conn)
        .await
        .map_err(|err| match err.sql_err() {
            // provider_payment_id, or the single open attempt per order
            Some(SqlErr::UniqueConstraintViolation(detail)) => {
                AppError::invalid_state(format!("payment already recorded: {detail}"))
            }
            _ => AppError::from(err),
        })?;
        payment_from_entity(created)
    }

    async fn transition_payment(
        &self,
        id: Uuid,
        from: PaymentStatus,
        update: PaymentUpdate,
    ) -> AppResult<Option<Payment>> {
        let mut query = Payments::update_many()
            .col_expr(PaymentCol::Status, Expr::value(update.status.as_str()))
            .col_expr(PaymentCol::UpdatedAt, Expr::value(Utc::now()));
        if let Some(transaction_id) = update.transaction_id {
            query = query.col_expr(PaymentCol::TransactionId, Expr::value(transaction_id));
        }
        if let Some(refunded) = update.refunded_amount {
            query = query.col_expr(PaymentCol::RefundedAmount, Expr::value(refunded));
        }
        if let Some(metadata) = update.metadata {
            query = query.col_expr(PaymentCol::Metadata, Expr::value(metadata));
        }

        let result = query
            .filter(PaymentCol::Id.eq(id))
            .filter(PaymentCol::Status.eq(from.as_str()))
            .exec(&self.conn)
            .await?;

        let current = Payments::find_by_id(id)
            .one(&self.conn)
            .await?
            .ok_or(AppError::NotFound)?;
        if result.rows_affected == 0 {
            return Ok(None);
        }
        payment_from_entity(current).map(Some)
    }
}

#[async_trait]
impl PaymentRepository for SeaStore {
    async fn create(&self, payment: NewPayment) -> AppResult<Payment> {
        bounded(self.timeout, self.insert_payment(payment)).await
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Payment>> {
        bounded(self.timeout, async {
            Payments::find_by_id(id)
                .one(&self.conn)
                .await?
                .map(payment_from_entity)
                .transpose()
        })
        .await
    }

    async fn find_by_provider_payment_id(
        &self,
        provider_payment_id: &str,
    ) -> AppResult<Option<Payment>> {
        bounded(self.timeout, async {
            Payments::find()
                .filter(PaymentCol::ProviderPaymentId.eq(provider_payment_id))
                .one(&self.conn)
                .await?
                .map(payment_from_entity)
                .transpose()
        })
        .await
    }

    async fn list_by_order(&self, order_id: Uuid) -> AppResult<Vec<Payment>> {
        bounded(self.timeout, async {
            Payments::find()
                .filter(PaymentCol::OrderId.eq(order_id))
                .order_by_asc(PaymentCol::CreatedAt)
                .all(&self.conn)
                .await?
                .into_iter()
                .map(payment_from_entity)
                .collect()
        })
        .await
    }

    async fn transition(
        &self,
        id: Uuid,
        from: PaymentStatus,
        update: PaymentUpdate,
    ) -> AppResult<Option<Payment>> {
        bounded(self.timeout, self.transition_payment(id, from, update)).await
    }
}
