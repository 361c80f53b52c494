//! Order data models and API request/response types.
//!
//! This module defines:
//! - `Order`: Database entity representing a purchase of one product
//! - `OrderStatus` / `PaymentStatus`: lifecycle enums stored as TEXT
//! - Request types for creating, cancelling and refunding orders
//! - `OrderResponse`: Response body returned to clients

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::access_code::AccessCode;

/// Fulfillment status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status of an order.
///
/// `Failed` is reserved for external payment capture; balance payments are
/// all-or-nothing and never leave an order in this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents an order record from the database.
///
/// # Database Table
///
/// Maps to the `orders` table. Orders are financial records and are never
/// deleted; every change goes through the fulfillment service.
///
/// # Amounts
///
/// All amounts are stored in cents. `net_cents` is what actually moves
/// against the buyer's balance and always equals
/// `total_cents - discount_cents`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct Order {
    pub id: Uuid,

    /// Human-readable unique number, e.g. `ORD-20250101-9F2C01AB`
    pub order_number: String,

    pub user_id: Uuid,
    pub product_id: Uuid,

    /// Number of units purchased (always positive)
    pub quantity: i32,

    pub unit_price_cents: i64,
    pub total_cents: i64,
    pub discount_cents: i64,
    pub net_cents: i64,

    /// Sum of all refunds issued so far (partial and full)
    pub refunded_cents: i64,

    pub status: OrderStatus,
    pub payment_status: PaymentStatus,

    pub promo_code: Option<String>,
    pub notes: Option<String>,
    pub cancel_reason: Option<String>,
    pub refund_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub processing_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Amount that can still be refunded to the buyer.
    pub fn refundable_cents(&self) -> i64 {
        (self.net_cents - self.refunded_cents).max(0)
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }
}

/// Values needed to insert a new order row.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: String,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub total_cents: i64,
    pub discount_cents: i64,
    pub net_cents: i64,
    pub promo_code: Option<String>,
    pub notes: Option<String>,
}

/// Request body for creating an order.
///
/// # JSON Example
///
/// ```json
/// {
///   "user_id": "550e8400-e29b-41d4-a716-446655440000",
///   "product_id": "660e8400-e29b-41d4-a716-446655440001",
///   "quantity": 2,
///   "promo_code": "SPRING10"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,

    /// Optional promotion code applied to the order total
    #[serde(default)]
    pub promo_code: Option<String>,

    #[serde(default)]
    pub notes: Option<String>,
}

/// Request body for cancelling an order.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelOrderRequest {
    pub reason: String,
}

/// Whether a refund returns the whole order or only part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundType {
    Full,
    Partial,
}

/// Request body for refunding an order.
///
/// # JSON Example
///
/// ```json
/// {
///   "amount_cents": 500,
///   "refund_type": "partial",
///   "reason": "One account was already banned"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RefundOrderRequest {
    pub amount_cents: i64,
    pub refund_type: RefundType,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Request body for manually binding access codes to an order.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignCodesRequest {
    pub code_ids: Vec<Uuid>,
}

/// Response body for order endpoints.
///
/// Includes the access codes bound to the order so a completed order
/// carries its delivered credentials.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub codes: Vec<DeliveredCode>,
}

/// Access code as shown on an order.
#[derive(Debug, Serialize)]
pub struct DeliveredCode {
    pub id: Uuid,
    pub payload: String,
    pub status: String,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl From<AccessCode> for DeliveredCode {
    fn from(code: AccessCode) -> Self {
        Self {
            id: code.id,
            payload: code.payload,
            status: code.status.as_str().to_string(),
            delivered_at: code.delivered_at,
        }
    }
}

/// An order together with the codes bound to it.
#[derive(Debug, Clone)]
pub struct OrderDetails {
    pub order: Order,
    pub codes: Vec<AccessCode>,
}

impl From<OrderDetails> for OrderResponse {
    fn from(details: OrderDetails) -> Self {
        Self {
            order: details.order,
            codes: details.codes.into_iter().map(Into::into).collect(),
        }
    }
}
