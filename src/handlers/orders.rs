//! Order HTTP handlers.
//!
//! - POST /api/v1/orders - Create a pending order
//! - GET /api/v1/orders/{id} - Order with its codes
//! - POST /api/v1/orders/{id}/pay - Pay from balance and fulfil
//! - POST /api/v1/orders/{id}/process - Advance processing/delivery
//! - POST /api/v1/orders/{id}/complete - Staff completion (manual delivery)
//! - POST /api/v1/orders/{id}/cancel - Cancel, refunding if paid
//! - POST /api/v1/orders/{id}/refund - Full or partial refund
//! - POST /api/v1/orders/{id}/codes - Assign specific codes
//!
//! Mutating handlers retry contention with the configured backoff.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    AppState,
    error::AppError,
    models::{
        actor::Actor,
        order::{
            AssignCodesRequest, CancelOrderRequest, CreateOrderRequest, OrderResponse,
            RefundOrderRequest,
        },
    },
    services::retry::retry_on_contention,
};

/// Create an order.
///
/// # Request Body
///
/// ```json
/// {
///   "user_id": "550e8400-...",
///   "product_id": "660e8400-...",
///   "quantity": 2,
///   "promo_code": "SPRING10"
/// }
/// ```
///
/// # Response (201)
///
/// The pending order with an empty `codes` list.
pub async fn create_order(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    let details = retry_on_contention(&state.retry, "create_order", || {
        state.service.create_order(&actor, request.clone())
    })
    .await?;

    Ok((StatusCode::CREATED, Json(details.into())))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let details = state.service.order(order_id).await?;
    Ok(Json(details.into()))
}

/// Pay for an order from the buyer's balance.
///
/// # Response (200)
///
/// The order after fulfilment. For automatic delivery this is `completed`
/// with the delivered codes; for manual delivery it is `processing`.
pub async fn pay_order(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let details = retry_on_contention(&state.retry, "pay_order", || {
        state.service.pay_with_balance(&actor, order_id)
    })
    .await?;

    Ok(Json(details.into()))
}

pub async fn process_order(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let details = retry_on_contention(&state.retry, "process_order", || {
        state.service.process_order(&actor, order_id)
    })
    .await?;

    Ok(Json(details.into()))
}

pub async fn complete_order(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let details = retry_on_contention(&state.retry, "complete_order", || {
        state.service.complete_order(&actor, order_id)
    })
    .await?;

    Ok(Json(details.into()))
}

/// Cancel an order.
///
/// # Request Body
///
/// ```json
/// { "reason": "Customer changed their mind" }
/// ```
pub async fn cancel_order(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<CancelOrderRequest>,
) -> Result<Json<OrderResponse>, AppError> {
    let details = retry_on_contention(&state.retry, "cancel_order", || {
        state.service.cancel_order(&actor, order_id, &request.reason)
    })
    .await?;

    Ok(Json(details.into()))
}

/// Refund an order.
///
/// # Request Body
///
/// ```json
/// {
///   "amount_cents": 500,
///   "refund_type": "partial",
///   "reason": "One account was already banned"
/// }
/// ```
pub async fn refund_order(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<RefundOrderRequest>,
) -> Result<Json<OrderResponse>, AppError> {
    let details = retry_on_contention(&state.retry, "refund_order", || {
        state.service.refund_order(&actor, order_id, request.clone())
    })
    .await?;

    Ok(Json(details.into()))
}

/// Bind specific codes to a paid order that is still missing some.
///
/// # Request Body
///
/// ```json
/// { "code_ids": ["880e8400-...", "990e8400-..."] }
/// ```
pub async fn assign_codes(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<AssignCodesRequest>,
) -> Result<Json<OrderResponse>, AppError> {
    let details = retry_on_contention(&state.retry, "assign_codes", || {
        state.service.assign_codes(&actor, order_id, &request.code_ids)
    })
    .await?;

    Ok(Json(details.into()))
}
