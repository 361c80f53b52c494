//! HTTP surface over the in-memory store.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use storefront_fulfillment_server::{
    AppState,
    models::{
        product::{DeliveryMode, Product},
        user::User,
    },
    router,
    services::{fulfillment::FulfillmentService, ledger::LedgerPolicy, retry::RetryPolicy},
    store::memory::MemoryStore,
};

const ACTOR: &str = "3f0c6a52-6a43-4d5e-9d0e-0f6f0b1c2d3e";

fn app(store: &MemoryStore) -> Router {
    let service = FulfillmentService::new(Arc::new(store.clone()), LedgerPolicy::default());
    router(AppState::new(service, RetryPolicy::none()))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-actor-id", ACTOR)
        .header("x-actor-name", "support");
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// A funded buyer and a stocked automatic product, set up over HTTP.
async fn seeded(app: &Router, store: &MemoryStore) -> (Uuid, Uuid) {
    let user = store.insert_user(User::new("buyer", 0)).await;
    let product = store
        .insert_product(Product::new("Game key", 250, DeliveryMode::Automatic))
        .await;

    let (status, deposit) = send(
        app,
        "POST",
        &format!("/api/v1/users/{user}/deposits"),
        Some(json!({ "amount_cents": 1_000, "fee_cents": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(deposit["net_amount_cents"], 1_000);

    let (status, imported) = send(
        app,
        "POST",
        &format!("/api/v1/products/{product}/codes"),
        Some(json!({ "payloads": ["AAAA-1111", "BBBB-2222", "CCCC-3333"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(imported["imported"], 3);

    (user, product)
}

#[tokio::test]
async fn health_is_public() {
    let store = MemoryStore::new();
    let response = app(&store)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value =
        serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap())
            .unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn api_requires_actor_headers() {
    let store = MemoryStore::new();
    let app = app(&store);

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/orders/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            Request::get(format!("/api/v1/orders/{}", Uuid::new_v4()))
                .header("x-actor-id", "not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn order_lifecycle_over_http() {
    let store = MemoryStore::new();
    let app = app(&store);
    let (user, product) = seeded(&app, &store).await;

    let (status, created) = send(
        &app,
        "POST",
        "/api/v1/orders",
        Some(json!({ "user_id": user, "product_id": product, "quantity": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");
    assert_eq!(created["net_cents"], 500);
    let order_id = created["id"].as_str().unwrap().to_string();

    let (status, paid) = send(&app, "POST", &format!("/api/v1/orders/{order_id}/pay"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["status"], "completed");
    assert_eq!(paid["payment_status"], "paid");
    assert_eq!(paid["codes"].as_array().unwrap().len(), 2);

    let (status, balance) = send(&app, "GET", &format!("/api/v1/users/{user}/balance"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(balance["balance_cents"], 500);
    assert_eq!(balance["consistent"], true);

    let (status, stock) = send(&app, "GET", &format!("/api/v1/products/{product}/stock"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stock["available"], 1);
    assert_eq!(stock["sold"], 2);

    let (status, error) = send(
        &app,
        "POST",
        &format!("/api/v1/orders/{order_id}/cancel"),
        Some(json!({ "reason": "too late" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"]["code"], "invalid_transition");

    let (status, refunded) = send(
        &app,
        "POST",
        &format!("/api/v1/orders/{order_id}/refund"),
        Some(json!({ "amount_cents": 500, "refund_type": "full", "reason": "duplicate" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refunded["status"], "refunded");

    let (_, balance) = send(&app, "GET", &format!("/api/v1/users/{user}/balance"), None).await;
    assert_eq!(balance["balance_cents"], 1_000);
}

#[tokio::test]
async fn business_errors_map_to_status_codes() {
    let store = MemoryStore::new();
    let app = app(&store);
    let (user, product) = seeded(&app, &store).await;

    let (status, error) = send(&app, "GET", &format!("/api/v1/orders/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"]["code"], "not_found");

    let (status, error) = send(
        &app,
        "POST",
        "/api/v1/orders",
        Some(json!({ "user_id": user, "product_id": product, "quantity": 4 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error["error"]["code"], "out_of_stock");

    let (_, created) = send(
        &app,
        "POST",
        "/api/v1/orders",
        Some(json!({ "user_id": user, "product_id": product, "quantity": 3 })),
    )
    .await;
    let order_id = created["id"].as_str().unwrap().to_string();

    // a second payment of the same order is rejected
    let (status, _) = send(&app, "POST", &format!("/api/v1/orders/{order_id}/pay"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, error) = send(&app, "POST", &format!("/api/v1/orders/{order_id}/pay"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"]["code"], "invalid_transition");

    let (status, error) = send(
        &app,
        "POST",
        &format!("/api/v1/users/{user}/deposits"),
        Some(json!({ "amount_cents": 100, "fee_cents": 100 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"]["code"], "validation_error");
}

#[tokio::test]
async fn reversing_a_transaction_twice_conflicts() {
    let store = MemoryStore::new();
    let app = app(&store);
    let user = store.insert_user(User::new("buyer", 0)).await;

    let (_, deposit) = send(
        &app,
        "POST",
        &format!("/api/v1/users/{user}/deposits"),
        Some(json!({ "amount_cents": 300 })),
    )
    .await;
    let id = deposit["id"].as_str().unwrap().to_string();

    let (status, reversed) =
        send(&app, "POST", &format!("/api/v1/transactions/{id}/reverse"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reversed["status"], "cancelled");

    let (status, error) =
        send(&app, "POST", &format!("/api/v1/transactions/{id}/reverse"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"]["code"], "invalid_state");

    let (status, fetched) = send(&app, "GET", &format!("/api/v1/transactions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["code"], deposit["code"]);
}
