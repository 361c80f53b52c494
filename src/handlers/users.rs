//! User balance HTTP handlers.
//!
//! - POST /api/v1/users/{id}/deposits - Credit the balance
//! - GET /api/v1/users/{id}/balance - Cached balance vs. ledger

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
        transaction::{DepositRequest, TransactionResponse},
        user::BalanceCheck,
    },
    services::retry::retry_on_contention,
};

/// Record a deposit.
///
/// # Request Body
///
/// ```json
/// {
///   "amount_cents": 10000,
///   "fee_cents": 150,
///   "gateway": "bank_transfer"
/// }
/// ```
///
/// # Response (201)
///
/// The completed deposit transaction with `net_amount_cents = 9850`.
pub async fn create_deposit(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<DepositRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    let transaction = retry_on_contention(&state.retry, "deposit", || {
        state.service.deposit(&actor, user_id, request.clone())
    })
    .await?;

    Ok((StatusCode::CREATED, Json(transaction.into())))
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<BalanceCheck>, AppError> {
    Ok(Json(state.service.balance(user_id).await?))
}
