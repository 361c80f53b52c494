//! Fulfillment notifications.
//!
//! The fulfillment service reports completed, cancelled and refunded orders
//! after the unit of work has committed. Notifiers must never block the
//! caller or fail the operation: delivery problems are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::Order;

type HmacSha256 = Hmac<Sha256>;

/// Something a buyer may want to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FulfillmentEvent {
    OrderCompleted {
        order_id: Uuid,
        order_number: String,
    },
    OrderCancelled {
        order_id: Uuid,
        order_number: String,
        refunded_cents: i64,
    },
    OrderRefunded {
        order_id: Uuid,
        order_number: String,
        amount_cents: i64,
        full: bool,
    },
}

impl FulfillmentEvent {
    pub fn completed(order: &Order) -> Self {
        Self::OrderCompleted {
            order_id: order.id,
            order_number: order.order_number.clone(),
        }
    }

    pub fn cancelled(order: &Order, refunded_cents: i64) -> Self {
        Self::OrderCancelled {
            order_id: order.id,
            order_number: order.order_number.clone(),
            refunded_cents,
        }
    }

    pub fn refunded(order: &Order, amount_cents: i64, full: bool) -> Self {
        Self::OrderRefunded {
            order_id: order.id,
            order_number: order.order_number.clone(),
            amount_cents,
            full,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::OrderCompleted { .. } => "order_completed",
            Self::OrderCancelled { .. } => "order_cancelled",
            Self::OrderRefunded { .. } => "order_refunded",
        }
    }
}

/// Fire-and-forget sink for fulfillment events.
pub trait Notifier: Send + Sync {
    fn notify(&self, user_id: Uuid, event: FulfillmentEvent);
}

/// Writes events to the log. Default when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, user_id: Uuid, event: FulfillmentEvent) {
        tracing::info!(user_id = %user_id, event = event.name(), "Fulfillment event: {:?}", event);
    }
}

/// Body POSTed to the webhook endpoint.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "7d9f3c1e-4b5a-4c8e-9f2a-1b3c5d7e9f0a",
///   "user_id": "550e8400-e29b-41d4-a716-446655440000",
///   "event": "order_refunded",
///   "order_id": "660e8400-e29b-41d4-a716-446655440001",
///   "order_number": "ORD-20250101-9F2C01AB",
///   "amount_cents": 500,
///   "full": false,
///   "created_at": "2025-01-01T12:00:00Z"
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(flatten)]
    pub event: FulfillmentEvent,
    pub created_at: DateTime<Utc>,
}

/// Sends each event as a signed HTTP POST on a detached task.
///
/// # Headers Sent
///
/// - `Content-Type: application/json`
/// - `X-Webhook-Signature: sha256=<hex>`
/// - `X-Webhook-Event-Id: <uuid>`
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl WebhookNotifier {
    /// # Errors
    ///
    /// - `Validation`: the URL is malformed, too long, or plain HTTP to a
    ///   non-local host; the secret is blank; or the HTTP client cannot be
    ///   built
    pub fn new(url: &str, secret: impl Into<String>) -> Result<Self, AppError> {
        validate_webhook_url(url)?;
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(AppError::Validation(
                "Webhook secret must not be empty".to_string(),
            ));
        }

        // 5 seconds per delivery so slow endpoints don't pile up tasks
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::Validation(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
            secret,
        })
    }
}

/// Pick the notifier for the configured webhook settings.
///
/// No URL means notifications only go to the log. A URL without a secret
/// is refused so payloads are never signed with an empty key.
///
/// # Errors
///
/// - `Validation`: URL set with a missing or blank secret, or a bad URL
pub fn build_notifier(
    url: Option<&str>,
    secret: Option<&str>,
) -> Result<Arc<dyn Notifier>, AppError> {
    let Some(url) = url else {
        return Ok(Arc::new(LogNotifier));
    };
    let secret = secret.ok_or_else(|| {
        AppError::Validation(
            "NOTIFY_WEBHOOK_SECRET is required when NOTIFY_WEBHOOK_URL is set".to_string(),
        )
    })?;
    Ok(Arc::new(WebhookNotifier::new(url, secret)?))
}

impl Notifier for WebhookNotifier {
    fn notify(&self, user_id: Uuid, event: FulfillmentEvent) {
        let payload = WebhookPayload {
            id: Uuid::new_v4(),
            user_id,
            event,
            created_at: Utc::now(),
        };
        let body = match serde_json::to_string(&payload) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Failed to serialize webhook payload: {}", e);
                return;
            }
        };
        let signature = generate_signature(&self.secret, &body);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(event_id = %payload.id, "No runtime available, webhook dropped");
            return;
        };

        let client = self.client.clone();
        let url = self.url.clone();
        let event_id = payload.id;
        runtime.spawn(async move {
            let response = client
                .post(&url)
                .header("Content-Type", "application/json")
                .header("X-Webhook-Signature", &signature)
                .header("X-Webhook-Event-Id", event_id.to_string())
                .body(body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(event_id = %event_id, status = resp.status().as_u16(), "Webhook delivered");
                }
                Ok(resp) => {
                    tracing::warn!(event_id = %event_id, status = resp.status().as_u16(), "Webhook rejected");
                }
                Err(e) => {
                    tracing::error!(event_id = %event_id, "Webhook request failed: {}", e);
                }
            }
        });
    }
}

/// Generate HMAC-SHA256 signature for a webhook body.
///
/// # Format
///
/// `sha256=<hex_encoded_hmac>`
///
/// # Verification
///
/// Receivers compute HMAC-SHA256(secret, request_body) and compare it to
/// the `X-Webhook-Signature` header in constant time.
pub fn generate_signature(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(payload.as_bytes());
    let result = mac.finalize();
    format!("sha256={}", hex::encode(result.into_bytes()))
}

/// Validate webhook URL format.
///
/// # Rules
///
/// - Must be valid URL
/// - Must be HTTPS (HTTP localhost allowed for development)
/// - Maximum 2048 characters
pub fn validate_webhook_url(url: &str) -> Result<(), AppError> {
    if url.len() > 2048 {
        return Err(AppError::Validation(
            "Webhook URL exceeds 2048 characters".to_string(),
        ));
    }

    let parsed = url::Url::parse(url)
        .map_err(|_| AppError::Validation("Invalid webhook URL format".to_string()))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" => match parsed.host_str() {
            Some("localhost" | "127.0.0.1" | "0.0.0.0") => Ok(()),
            _ => Err(AppError::Validation(
                "HTTP is only allowed for localhost. Use HTTPS for production.".to_string(),
            )),
        },
        _ => Err(AppError::Validation(
            "Webhook URL must use HTTP or HTTPS".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_hex_hmac() {
        let a = generate_signature("secret", r#"{"event":"order_completed"}"#);
        let b = generate_signature("secret", r#"{"event":"order_completed"}"#);
        let other = generate_signature("other", r#"{"event":"order_completed"}"#);

        assert_eq!(a, b);
        assert_ne!(a, other);
        assert!(a.starts_with("sha256="));
        assert_eq!(a.len(), "sha256=".len() + 64);
    }

    #[test]
    fn webhook_urls_require_https_outside_localhost() {
        assert!(validate_webhook_url("https://hooks.example.com/shop").is_ok());
        assert!(validate_webhook_url("http://localhost:9000/hook").is_ok());
        assert!(validate_webhook_url("http://127.0.0.1/hook").is_ok());

        for bad in [
            "http://hooks.example.com/shop",
            "ftp://hooks.example.com",
            "not a url",
        ] {
            assert!(
                matches!(validate_webhook_url(bad), Err(AppError::Validation(_))),
                "{bad}"
            );
        }
        let long = format!("https://example.com/{}", "a".repeat(2048));
        assert!(validate_webhook_url(&long).is_err());
    }

    #[test]
    fn payload_flattens_the_event() {
        let order_id = Uuid::new_v4();
        let payload = WebhookPayload {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            event: FulfillmentEvent::OrderRefunded {
                order_id,
                order_number: "ORD-20250101-0000000A".to_string(),
                amount_cents: 500,
                full: false,
            },
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["event"], "order_refunded");
        assert_eq!(json["amount_cents"], 500);
        assert_eq!(json["order_id"], order_id.to_string());
    }

    #[test]
    fn webhook_requires_a_secret() {
        let url = Some("https://hooks.example.com/shop");

        for secret in [None, Some(""), Some("   ")] {
            assert!(
                matches!(build_notifier(url, secret), Err(AppError::Validation(_))),
                "{secret:?}"
            );
        }
        assert!(build_notifier(url, Some("s3cret")).is_ok());
        assert!(build_notifier(None, None).is_ok());
    }

    #[test]
    fn notify_without_runtime_does_not_panic() {
        let notifier = WebhookNotifier::new("http://localhost:1/hook", "s").unwrap();
        notifier.notify(
            Uuid::new_v4(),
            FulfillmentEvent::OrderCompleted {
                order_id: Uuid::new_v4(),
                order_number: "ORD-20250101-00000001".to_string(),
            },
        );
    }
}
