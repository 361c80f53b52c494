//! Storefront fulfillment core.
//!
//! Order lifecycle (creation, balance payment, code allocation and
//! delivery, cancellation, refunds) coupled to a ledger that keeps each
//! user's balance equal to the sum of their completed transactions.
//!
//! # Layout
//!
//! - [`store`]: unit-of-work persistence boundary (PostgreSQL and in-memory)
//! - [`services`]: ledger, inventory pool, delivery strategies, order state
//!   machine and the [`services::fulfillment::FulfillmentService`] facade
//! - [`handlers`] / [`middleware`]: the axum HTTP surface built by [`router`]

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::services::{fulfillment::FulfillmentService, retry::RetryPolicy};

/// State shared with every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FulfillmentService>,
    pub retry: RetryPolicy,
}

impl AppState {
    pub fn new(service: FulfillmentService, retry: RetryPolicy) -> Self {
        Self {
            service: Arc::new(service),
            retry,
        }
    }
}

/// Build the HTTP router.
///
/// `/health` is public; everything under `/api/v1` requires the actor
/// headers.
pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Orders
        .route("/api/v1/orders", post(handlers::orders::create_order))
        .route("/api/v1/orders/{id}", get(handlers::orders::get_order))
        .route("/api/v1/orders/{id}/pay", post(handlers::orders::pay_order))
        .route(
            "/api/v1/orders/{id}/process",
            post(handlers::orders::process_order),
        )
        .route(
            "/api/v1/orders/{id}/complete",
            post(handlers::orders::complete_order),
        )
        .route(
            "/api/v1/orders/{id}/cancel",
            post(handlers::orders::cancel_order),
        )
        .route(
            "/api/v1/orders/{id}/refund",
            post(handlers::orders::refund_order),
        )
        .route(
            "/api/v1/orders/{id}/codes",
            post(handlers::orders::assign_codes),
        )
        // Balances
        .route(
            "/api/v1/users/{id}/deposits",
            post(handlers::users::create_deposit),
        )
        .route(
            "/api/v1/users/{id}/balance",
            get(handlers::users::get_balance),
        )
        // Ledger entries
        .route(
            "/api/v1/transactions/{id}",
            get(handlers::transactions::get_transaction),
        )
        .route(
            "/api/v1/transactions/{id}/reverse",
            post(handlers::transactions::reverse_transaction),
        )
        // Inventory
        .route(
            "/api/v1/products/{id}/stock",
            get(handlers::products::get_stock),
        )
        .route(
            "/api/v1/products/{id}/codes",
            post(handlers::products::import_codes),
        )
        .route_layer(axum_middleware::from_fn(
            middleware::actor::actor_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
