//! Access code models.
//!
//! An access code is one redeemable credential (for example a login and
//! password pair) in a product's inventory pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Allocation status of an access code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CodeStatus {
    Available,
    Reserved,
    Sold,
}

impl CodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeStatus::Available => "available",
            CodeStatus::Reserved => "reserved",
            CodeStatus::Sold => "sold",
        }
    }
}

/// Represents an access code record from the database.
///
/// # Database Table
///
/// Maps to the `access_codes` table. A CHECK constraint keeps `order_id`
/// set exactly when the code is reserved or sold.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct AccessCode {
    pub id: Uuid,
    pub product_id: Uuid,

    /// Opaque credential text handed to the buyer on delivery
    pub payload: String,

    pub status: CodeStatus,
    pub order_id: Option<Uuid>,

    pub reserved_at: Option<DateTime<Utc>>,
    pub sold_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-status code counts for one product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StockCounts {
    pub available: i64,
    pub reserved: i64,
    pub sold: i64,
}

impl StockCounts {
    pub fn total(&self) -> i64 {
        self.available + self.reserved + self.sold
    }
}

/// Request body for importing codes into a product's pool.
///
/// # JSON Example
///
/// ```json
/// {
///   "payloads": ["user1:secret1", "user2:secret2"]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ImportCodesRequest {
    pub payloads: Vec<String>,
}

/// Response body for a code import.
#[derive(Debug, Serialize)]
pub struct ImportCodesResponse {
    pub imported: usize,
    pub stock: StockCounts,
}
