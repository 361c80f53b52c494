//! Product inventory HTTP handlers.
//!
//! - GET /api/v1/products/{id}/stock - Code counts per status
//! - POST /api/v1/products/{id}/codes - Import codes

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
        access_code::{ImportCodesRequest, ImportCodesResponse, StockCounts},
        actor::Actor,
    },
    services::retry::retry_on_contention,
};

pub async fn get_stock(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<Json<StockCounts>, AppError> {
    Ok(Json(state.service.stock(product_id).await?))
}

/// Import access codes.
///
/// # Request Body
///
/// ```json
/// { "payloads": ["user1:secret1", "user2:secret2"] }
/// ```
///
/// # Response (201)
///
/// ```json
/// {
///   "imported": 2,
///   "stock": { "available": 5, "reserved": 0, "sold": 3 }
/// }
/// ```
pub async fn import_codes(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(product_id): Path<Uuid>,
    Json(request): Json<ImportCodesRequest>,
) -> Result<(StatusCode, Json<ImportCodesResponse>), AppError> {
    let response = retry_on_contention(&state.retry, "import_codes", || {
        state
            .service
            .import_codes(&actor, product_id, &request.payloads)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(response)))
}
