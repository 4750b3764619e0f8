mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use rust_decimal::Decimal;
use serde_json::json;
use storefront_api::{
    build_router,
    error::AppError,
    models::{Order, OrderStatus, Payment, PaymentStatus},
    payments::stripe::StripeClient,
    repository::{NewPayment, PaymentRepository},
    services::order_service::CreateOrder,
};
use tower::ServiceExt;

use common::{Harness, harness, product, sign, sign_now, test_config};

async fn stripe_harness() -> Harness {
    let client = StripeClient::new(&test_config().payment).unwrap();
    harness(Arc::new(client)).await
}

/// A pending 19.98 USD order with one initiated payment for intent `pi_123`.
async fn seed(h: &Harness) -> (Order, Payment) {
    let p = product(&h.store, "WIDGET", Decimal::new(999, 2)).await;
    let cart = h.state.carts.get_or_create(Some(h.user_id), None).await.unwrap();
    h.state.carts.add_item(cart.id, p.id, 2).await.unwrap();
    let order = h
        .state
        .orders
        .create_order(CreateOrder {
            user_id: h.user_id,
            guest_token: None,
            cart_id: cart.id,
            shipping_address_id: h.address_id,
            billing_address_id: h.address_id,
        })
        .await
        .unwrap();

    let payment = h
        .store
        .create(NewPayment {
            order_id: order.id,
            provider: "stripe".into(),
            provider_payment_id: "pi_123".into(),
            transaction_id: None,
            amount: order.total_amount,
            currency: "USD".into(),
            method: "card".into(),
            status: PaymentStatus::Initiated,
            idempotency_key: format!("order-{}-attempt-1", order.id),
            metadata: json!({ "client_secret": "pi_123_secret" }),
        })
        .await
        .unwrap();
    (order, payment)
}

fn succeeded_event() -> String {
    json!({
        "id": "evt_succeeded",
        "type": "payment_intent.succeeded",
        "data": { "object": {
            "id": "pi_123",
            "status": "succeeded",
            "amount": 1998,
            "latest_charge": "ch_1"
        }}
    })
    .to_string()
}

fn failed_event() -> String {
    json!({
        "id": "evt_failed",
        "type": "payment_intent.payment_failed",
        "data": { "object": {
            "id": "pi_123",
            "status": "requires_payment_method",
            "amount": 1998,
            "last_payment_error": { "message": "Your card was declined." }
        }}
    })
    .to_string()
}

fn refunded_event(refunded_minor: i64) -> String {
    json!({
        "id": format!("evt_refund_{refunded_minor}"),
        "type": "charge.refunded",
        "data": { "object": {
            "id": "ch_1",
            "payment_intent": "pi_123",
            "amount": 1998,
            "amount_refunded": refunded_minor
        }}
    })
    .to_string()
}

#[tokio::test]
async fn success_event_settles_payment_and_order() {
    let h = stripe_harness().await;
    let (order, payment) = seed(&h).await;
    let body = succeeded_event();

    let updated = h
        .state
        .reconciler
        .handle_event(body.as_bytes(), &sign_now(&body))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.id, payment.id);
    assert_eq!(updated.status, PaymentStatus::Succeeded);
    assert_eq!(updated.transaction_id.as_deref(), Some("ch_1"));
    assert_eq!(
        h.state.orders.get_order(order.id).await.unwrap().status,
        OrderStatus::Paid
    );

    // Redelivery changes nothing.
    let replayed = h
        .state
        .reconciler
        .handle_event(body.as_bytes(), &sign_now(&body))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replayed.status, PaymentStatus::Succeeded);
    assert_eq!(replayed.transaction_id.as_deref(), Some("ch_1"));
    assert_eq!(
        h.state.orders.get_order(order.id).await.unwrap().status,
        OrderStatus::Paid
    );
    assert_eq!(h.store.payment_count().await, 1);
}

#[tokio::test]
async fn bad_signature_changes_nothing() {
    let h = stripe_harness().await;
    let (order, payment) = seed(&h).await;
    let body = succeeded_event();
    let forged = sign(&body, "whsec_wrong", chrono::Utc::now().timestamp());

    let err = h
        .state
        .reconciler
        .handle_event(body.as_bytes(), &forged)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authentication(_)));

    let stale = sign(&body, common::WEBHOOK_SECRET, chrono::Utc::now().timestamp() - 3600);
    assert!(matches!(
        h.state.reconciler.handle_event(body.as_bytes(), &stale).await,
        Err(AppError::Authentication(_))
    ));

    assert_eq!(
        h.state.payments.get_payment(payment.id).await.unwrap().status,
        PaymentStatus::Initiated
    );
    assert_eq!(
        h.state.orders.get_order(order.id).await.unwrap().status,
        OrderStatus::Pending
    );
}

#[tokio::test]
async fn unhandled_event_types_are_acknowledged() {
    let h = stripe_harness().await;
    seed(&h).await;
    let body = json!({
        "id": "evt_other",
        "type": "customer.created",
        "data": { "object": { "id": "cus_1" } }
    })
    .to_string();

    let result = h
        .state
        .reconciler
        .handle_event(body.as_bytes(), &sign_now(&body))
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn event_for_unknown_intent_is_not_found() {
    let h = stripe_harness().await;
    let body = succeeded_event();

    let err = h
        .state
        .reconciler
        .handle_event(body.as_bytes(), &sign_now(&body))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
}

#[tokio::test]
async fn late_failure_does_not_undo_success() {
    let h = stripe_harness().await;
    let (order, _) = seed(&h).await;
    let ok = succeeded_event();
    h.state
        .reconciler
        .handle_event(ok.as_bytes(), &sign_now(&ok))
        .await
        .unwrap();

    let failed = failed_event();
    let after = h
        .state
        .reconciler
        .handle_event(failed.as_bytes(), &sign_now(&failed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, PaymentStatus::Succeeded);
    assert_eq!(
        h.state.orders.get_order(order.id).await.unwrap().status,
        OrderStatus::Paid
    );
}

#[tokio::test]
async fn failure_event_records_the_decline() {
    let h = stripe_harness().await;
    let (order, _) = seed(&h).await;
    let failed = failed_event();

    let after = h
        .state
        .reconciler
        .handle_event(failed.as_bytes(), &sign_now(&failed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, PaymentStatus::Failed);
    assert_eq!(after.metadata["error_message"], "Your card was declined.");
    assert_eq!(
        h.state.orders.get_order(order.id).await.unwrap().status,
        OrderStatus::Pending
    );
}

#[tokio::test]
async fn refunds_only_move_forward() {
    let h = stripe_harness().await;
    seed(&h).await;
    let ok = succeeded_event();
    h.state
        .reconciler
        .handle_event(ok.as_bytes(), &sign_now(&ok))
        .await
        .unwrap();

    let partial = refunded_event(500);
    let after = h
        .state
        .reconciler
        .handle_event(partial.as_bytes(), &sign_now(&partial))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, PaymentStatus::PartiallyRefunded);
    assert_eq!(after.refunded_amount, Decimal::new(500, 2));

    // A success delivered out of order must not pull it back.
    let late = h
        .state
        .reconciler
        .handle_event(ok.as_bytes(), &sign_now(&ok))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(late.status, PaymentStatus::PartiallyRefunded);

    let full = refunded_event(1998);
    let after = h
        .state
        .reconciler
        .handle_event(full.as_bytes(), &sign_now(&full))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, PaymentStatus::Refunded);
    assert_eq!(after.refunded_amount, Decimal::new(1998, 2));

    // An older partial refund arriving last is ignored.
    let after = h
        .state
        .reconciler
        .handle_event(partial.as_bytes(), &sign_now(&partial))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn webhook_route_checks_the_signature_header() {
    let h = stripe_harness().await;
    let (order, _) = seed(&h).await;
    let app = build_router(h.state.clone());
    let body = succeeded_event();

    let unsigned = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/payments")
                .header("content-type", "application/json")
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

    let signed = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/payments")
                .header("content-type", "application/json")
                .header("stripe-signature", sign_now(&body))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(signed.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(signed.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["data"]["received"], true);
    assert_eq!(json["data"]["payment"]["status"], "succeeded");
    assert_eq!(
        h.state.orders.get_order(order.id).await.unwrap().status,
        OrderStatus::Paid
    );
}

#[tokio::test]
async fn refund_arriving_before_success_still_settles_the_order() {
    let h = stripe_harness().await;
    let (order, _) = seed(&h).await;

    let partial = refunded_event(500);
    let after_refund = h
        .state
        .reconciler
        .handle_event(partial.as_bytes(), &sign_now(&partial))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_refund.status, PaymentStatus::PartiallyRefunded);
    assert_eq!(after_refund.transaction_id.as_deref(), Some("ch_1"));
    assert_eq!(
        h.state.orders.get_order(order.id).await.unwrap().status,
        OrderStatus::Paid
    );

    let ok = succeeded_event();
    let after_success = h
        .state
        .reconciler
        .handle_event(ok.as_bytes(), &sign_now(&ok))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_success.status, PaymentStatus::PartiallyRefunded);
    assert_eq!(after_success.refunded_amount, Decimal::new(500, 2));
    assert_eq!(
        h.state.orders.get_order(order.id).await.unwrap().status,
        OrderStatus::Paid
    );
}

#[tokio::test]
async fn concurrent_deliveries_of_one_event_apply_once() {
    let h = stripe_harness().await;
    let (order, payment) = seed(&h).await;
    let body = succeeded_event();
    let signature = sign_now(&body);

    let (a, b) = tokio::join!(
        h.state.reconciler.handle_event(body.as_bytes(), &signature),
        h.state.reconciler.handle_event(body.as_bytes(), &signature),
    );

    for result in [a, b] {
        let settled = result.unwrap().unwrap();
        assert_eq!(settled.id, payment.id);
        assert_eq!(settled.status, PaymentStatus::Succeeded);
    }
    assert_eq!(
        h.state.orders.get_order(order.id).await.unwrap().status,
        OrderStatus::Paid
    );
}
