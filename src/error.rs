//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::models::order::{OrderStatus, PaymentStatus};
use crate::services::order_machine::OrderAction;

/// PostgreSQL error codes that mean "lost a race for a lock", not "bad data".
///
/// - `55P03`: lock_not_available (lock_timeout expired)
/// - `40001`: serialization_failure
/// - `40P01`: deadlock_detected
/// - `57014`: query_canceled (statement_timeout)
const CONTENTION_SQLSTATES: [&str; 4] = ["55P03", "40001", "40P01", "57014"];

/// A generated identifier (order number, transaction code) collided.
const UNIQUE_VIOLATION: &str = "23505";

/// Application-wide error type.
///
/// Every variant is distinguishable by callers; business-rule rejections are
/// never folded into a generic failure.
///
/// # Error Categories
///
/// - **Caller errors**: `Validation`, `NotFound`
/// - **Business rules**: `InvalidTransition`, `InvalidState`
/// - **Resource availability**: `OutOfStock`, `InsufficientFunds`
/// - **Concurrency**: `Conflict` (retry with a fresh read), `Contention` (retry with backoff)
/// - **Infrastructure**: `Database`
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    ///
    /// Returns HTTP 500 and hides details from the client.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// Caller supplied an out-of-policy value (quantity bounds, non-positive amount).
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced entity does not exist.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// An order state-machine guard was violated.
    ///
    /// Returns HTTP 409 Conflict. Never retried automatically: it signals a
    /// logic bug or a race that was already lost.
    #[error("Cannot {action} an order that is {from} with payment {payment}")]
    InvalidTransition {
        from: OrderStatus,
        payment: PaymentStatus,
        action: OrderAction,
    },

    /// A ledger entry is not in a state that allows the operation.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Not enough access codes for an automatic-delivery product.
    ///
    /// Returns HTTP 422 Unprocessable Entity.
    #[error("Out of stock: requested {requested}, available {available}")]
    OutOfStock { requested: i64, available: i64 },

    /// Balance would go negative.
    ///
    /// Returns HTTP 422 Unprocessable Entity.
    #[error("Insufficient funds: balance {balance_cents}, required {required_cents}")]
    InsufficientFunds {
        balance_cents: i64,
        required_cents: i64,
    },

    /// Access code rows no longer match expectations (consumed concurrently).
    ///
    /// Returns HTTP 409 Conflict. Safe to retry with a fresh read.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Lock wait or serialization contention.
    ///
    /// Returns HTTP 503 Service Unavailable. Safe to retry with backoff.
    #[error("Contention: {0}")]
    Contention(String),
}

impl AppError {
    /// Whether repeating the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Contention(_))
    }
}

/// Classify sqlx errors.
///
/// Lock timeouts, serialization failures, deadlocks and pool exhaustion
/// become `Contention`, unique violations become `Conflict`, and everything
/// else stays an opaque `Database` error.
impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::PoolTimedOut => {
                AppError::Contention("timed out waiting for a database connection".to_string())
            }
            sqlx::Error::Database(db_err) => {
                let code = db_err.code();
                match code.as_deref() {
                    Some(code) if CONTENTION_SQLSTATES.contains(&code) => {
                        AppError::Contention(format!("{} ({code})", db_err.message()))
                    }
                    Some(UNIQUE_VIOLATION) => AppError::Conflict(db_err.message().to_string()),
                    _ => AppError::Database(error),
                }
            }
            _ => AppError::Database(error),
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            AppError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::OutOfStock { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "out_of_stock"),
            AppError::InsufficientFunds { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_funds")
            }
            AppError::Contention(_) => (StatusCode::SERVICE_UNAVAILABLE, "contention"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let message = match &self {
            AppError::Database(err) => {
                tracing::error!("Database error: {:?}", err);
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_contention() {
        let err = AppError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, AppError::Contention(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn other_sqlx_errors_stay_opaque() {
        let err = AppError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::Database(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn business_errors_are_not_retryable() {
        let transition = AppError::InvalidTransition {
            from: OrderStatus::Completed,
            payment: PaymentStatus::Paid,
            action: OrderAction::Cancel,
        };
        assert!(!transition.is_retryable());
        assert!(!AppError::Conflict("code taken".into()).is_retryable());
        assert_eq!(
            transition.to_string(),
            "Cannot cancel an order that is completed with payment paid"
        );
    }

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (AppError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("Order"), StatusCode::NOT_FOUND),
            (
                AppError::OutOfStock {
                    requested: 2,
                    available: 1,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                AppError::InsufficientFunds {
                    balance_cents: 0,
                    required_cents: 1,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT),
            (AppError::InvalidState("x".into()), StatusCode::CONFLICT),
            (AppError::Contention("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                AppError::Database(sqlx::Error::RowNotFound),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
