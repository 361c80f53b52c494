//! Actor extraction middleware.
//!
//! The service sits behind a gateway that authenticates staff and users and
//! forwards who they are in two headers:
//! - `X-Actor-Id`: UUID of the acting user (required)
//! - `X-Actor-Name`: display name for logs (optional)
//!
//! The middleware turns them into an [`Actor`] in the request extensions so
//! handlers can pass it explicitly into the fulfillment service.

use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

use crate::{error::AppError, models::actor::Actor};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";

/// Name used when the gateway does not send one.
const UNNAMED_ACTOR: &str = "unnamed";

/// # Returns
///
/// - `Ok(Response)` from the next handler with `Extension<Actor>` available
/// - `Err(AppError::Validation)` if the id header is missing or not a UUID
pub async fn actor_middleware(mut request: Request, next: Next) -> Result<Response, AppError> {
    let id = request
        .headers()
        .get(ACTOR_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Validation("Missing X-Actor-Id header".to_string()))?;

    let id = Uuid::parse_str(id.trim())
        .map_err(|_| AppError::Validation("X-Actor-Id must be a UUID".to_string()))?;

    let name = request
        .headers()
        .get(ACTOR_NAME_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(UNNAMED_ACTOR)
        .to_string();

    request.extensions_mut().insert(Actor::new(id, name));

    Ok(next.run(request).await)
}
