//! Transaction HTTP handlers.
//!
//! - GET /api/v1/transactions/{id} - Get transaction details
//! - POST /api/v1/transactions/{id}/reverse - Reverse a completed entry

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use crate::{
    AppState,
    error::AppError,
    models::{actor::Actor, transaction::TransactionResponse},
    services::retry::retry_on_contention,
};

/// Get transaction details by ID.
///
/// # Response (404)
///
/// If the transaction doesn't exist.
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, AppError> {
    let transaction = state.service.transaction(transaction_id).await?;
    Ok(Json(transaction.into()))
}

/// Reverse a completed transaction.
///
/// # Response (200)
///
/// The transaction with `status: "cancelled"`.
///
/// # Response (409)
///
/// If it was already reversed or its type cannot be reversed.
pub async fn reverse_transaction(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, AppError> {
    let transaction = retry_on_contention(&state.retry, "reverse_transaction", || {
        state.service.reverse_transaction(&actor, transaction_id)
    })
    .await?;

    Ok(Json(transaction.into()))
}
