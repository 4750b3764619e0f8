mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use rust_decimal::Decimal;
use storefront_api::{
    build_router,
    error::AppError,
    models::{OrderStatus, PaymentStatus},
    payments::{IntentStatus, MockPaymentProvider, PaymentIntent},
    services::{
        auth_service::issue_token, order_service::CreateOrder, payment_service::ProcessPayment,
    },
};
use tower::ServiceExt;
use uuid::Uuid;

use common::{harness, product};

#[tokio::test]
async fn cart_to_pending_order_to_payment() {
    let mut provider = MockPaymentProvider::new();
    provider
        .expect_create_payment_intent()
        .withf(|req| req.amount_minor == 1998 && req.currency == "USD")
        .times(1)
        .returning(|req| {
            Ok(PaymentIntent {
                id: "pi_e2e".into(),
                status: IntentStatus::Pending,
                client_secret: Some("pi_e2e_secret".into()),
                charge_id: None,
                amount_minor: req.amount_minor,
                amount_refunded_minor: 0,
                failure_message: None,
            })
        });
    let h = harness(Arc::new(provider)).await;
    let p = product(&h.store, "P", Decimal::new(999, 2)).await;

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

    assert_eq!(order.total_amount, Decimal::new(1998, 2));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].quantity, 2);
    assert_eq!(order.items[0].unit_price, Decimal::new(999, 2));

    let payment = h
        .state
        .payments
        .process_payment(ProcessPayment {
            order_id: order.id,
            amount: order.total_amount,
            currency: order.currency.clone(),
            method: "card".into(),
            idempotency_key: None,
        })
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Initiated);
    assert_eq!(payment.amount, Decimal::new(1998, 2));
    assert_eq!(
        h.state.payments.list_order_payments(order.id).await.unwrap().len(),
        1
    );

    // The order stays pending until the provider confirms.
    assert_eq!(
        h.state.orders.get_order(order.id).await.unwrap().status,
        OrderStatus::Pending
    );
}

#[tokio::test]
async fn empty_cart_creates_nothing() {
    let h = harness(Arc::new(MockPaymentProvider::new())).await;
    let cart = h.state.carts.get_or_create(Some(h.user_id), None).await.unwrap();

    let err = h
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
        .unwrap_err();

    assert!(matches!(err, AppError::InvalidState(_)));
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn refund_of_initiated_payment_is_rejected_without_provider_call() {
    let mut provider = MockPaymentProvider::new();
    provider.expect_create_payment_intent().returning(|req| {
        Ok(PaymentIntent {
            id: "pi_1".into(),
            status: IntentStatus::Pending,
            client_secret: None,
            charge_id: None,
            amount_minor: req.amount_minor,
            amount_refunded_minor: 0,
            failure_message: None,
        })
    });
    // No create_refund expectation: any call would panic.
    let h = harness(Arc::new(provider)).await;
    let p = product(&h.store, "P", Decimal::new(1000, 2)).await;
    let cart = h.state.carts.get_or_create(Some(h.user_id), None).await.unwrap();
    h.state.carts.add_item(cart.id, p.id, 1).await.unwrap();
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
        .state
        .payments
        .process_payment(ProcessPayment {
            order_id: order.id,
            amount: Decimal::new(1000, 2),
            currency: "USD".into(),
            method: "card".into(),
            idempotency_key: None,
        })
        .await
        .unwrap();

    let err = h
        .state
        .payments
        .refund_payment(payment.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
    assert_eq!(
        h.state.payments.get_payment(payment.id).await.unwrap().status,
        PaymentStatus::Initiated
    );
}

#[tokio::test]
async fn guest_cart_is_stable_per_token_over_http() {
    let h = harness(Arc::new(MockPaymentProvider::new())).await;
    let app = build_router(h.state.clone());

    let fetch = |token: &'static str| {
        Request::builder()
            .uri("/api/carts")
            .header("x-guest-token", token)
            .body(Body::empty())
            .unwrap()
    };

    let first = app.clone().oneshot(fetch("guest-1")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first: serde_json::Value =
        serde_json::from_slice(&axum::body::to_bytes(first.into_body(), usize::MAX).await.unwrap())
            .unwrap();

    let second = app.clone().oneshot(fetch("guest-1")).await.unwrap();
    let second: serde_json::Value =
        serde_json::from_slice(&axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap())
            .unwrap();

    assert_eq!(first["data"]["id"], second["data"]["id"]);
    assert_eq!(first["data"]["guest_token"], "guest-1");

    // Another guest cannot read it.
    let cart_id = first["data"]["id"].as_str().unwrap().to_string();
    let denied = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/carts/{cart_id}"))
                .header("x-guest-token", "guest-2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn order_routes_require_a_token() {
    let h = harness(Arc::new(MockPaymentProvider::new())).await;
    let response = build_router(h.state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/orders")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"cart_id":"00000000-0000-0000-0000-000000000000","shipping_address_id":"00000000-0000-0000-0000-000000000000"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_check_the_role_claim() {
    let h = harness(Arc::new(MockPaymentProvider::new())).await;
    let app = build_router(h.state.clone());
    let list = |token: String| {
        Request::builder()
            .uri("/api/admin/orders")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    };

    let (user_token, _) = issue_token(h.user_id, "user", common::JWT_SECRET).unwrap();
    let denied = app.clone().oneshot(list(user_token)).await.unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let (admin_token, _) = issue_token(Uuid::new_v4(), "admin", common::JWT_SECRET).unwrap();
    let allowed = app.clone().oneshot(list(admin_token)).await.unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);

    let (forged, _) = issue_token(h.user_id, "admin", "some-other-secret").unwrap();
    let rejected = app.oneshot(list(forged)).await.unwrap();
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn product_edits_over_http_leave_placed_orders_alone() {
    let h = harness(Arc::new(MockPaymentProvider::new())).await;
    let app = build_router(h.state.clone());
    let p = product(&h.store, "EDIT-1", Decimal::new(999, 2)).await;
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

    let (admin, _) = issue_token(Uuid::new_v4(), "admin", common::JWT_SECRET).unwrap();
    let (owner, _) = issue_token(h.user_id, "user", common::JWT_SECRET).unwrap();

    let edit = |token: &str| {
        Request::builder()
            .method("PUT")
            .uri(format!("/api/products/{}", p.id))
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"Renamed","price":"24.50"}"#))
            .unwrap()
    };
    assert_eq!(
        app.clone().oneshot(edit(&owner)).await.unwrap().status(),
        StatusCode::FORBIDDEN
    );
    let edited = app.clone().oneshot(edit(&admin)).await.unwrap();
    assert_eq!(edited.status(), StatusCode::OK);
    assert_eq!(json_body(edited).await["data"]["name"], "Renamed");

    let fetched = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/orders/{}", order.id))
                .header("authorization", format!("Bearer {owner}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);
    let fetched = json_body(fetched).await;
    assert_eq!(fetched["data"]["items"][0]["product_name"], "Product EDIT-1");
    assert_eq!(fetched["data"]["items"][0]["unit_price"], "9.99");
    assert_eq!(fetched["data"]["total_amount"], "19.98");

    let deleted = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/products/{}", p.id))
                .header("authorization", format!("Bearer {admin}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);
    assert_eq!(json_body(deleted).await["data"]["is_active"], false);

    let listed = app
        .oneshot(Request::builder().uri("/api/products").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let listed = json_body(listed).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 0);
    assert_eq!(listed["meta"]["total"], 0);
}

#[tokio::test]
async fn profile_route_requires_a_token() {
    let h = harness(Arc::new(MockPaymentProvider::new())).await;
    let response = build_router(h.state)
        .oneshot(Request::builder().uri("/api/auth/me").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
