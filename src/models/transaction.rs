//! Transaction data models and API request/response types.
//!
//! This module defines:
//! - `Transaction`: Database entity representing one ledger entry
//! - `TransactionType` / `TransactionStatus`: enums stored as TEXT
//! - Request types for deposits
//! - `TransactionResponse`: Response body returned to clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of balance-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Purchase,
    Refund,
    ReferralCommission,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Purchase => "purchase",
            TransactionType::Refund => "refund",
            TransactionType::ReferralCommission => "referral_commission",
        }
    }
}

/// Ledger entry status.
///
/// Only `Completed` entries count towards a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

/// Represents a transaction record from the database.
///
/// # Database Table
///
/// Maps to the `transactions` table. Each transaction:
/// - Belongs to one user and optionally one order
/// - Stores signed amounts in cents (credits positive, debits negative)
/// - Is append-only; the only later change is `completed` → `cancelled`
///
/// # Sign Convention
///
/// `net_amount_cents = amount_cents - fee_cents` is the exact effect on the
/// user's balance, so a balance always equals the sum of `net_amount_cents`
/// over the user's completed transactions.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct Transaction {
    pub id: Uuid,

    /// External-facing unique code, e.g. `TRX-1A2B3C4D5E6F7A8B`
    pub code: String,

    pub user_id: Uuid,
    pub order_id: Option<Uuid>,

    pub transaction_type: TransactionType,

    /// Signed gross amount in cents
    pub amount_cents: i64,

    /// Fee withheld from a credit (never negative)
    pub fee_cents: i64,

    /// Signed balance effect in cents
    pub net_amount_cents: i64,

    pub status: TransactionStatus,

    /// Free-text label of where the money came from (e.g. "balance", "manual")
    pub gateway: Option<String>,

    pub description: Option<String>,

    /// Actor that caused this entry
    pub performed_by: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values needed to insert a new ledger entry.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub code: String,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub transaction_type: TransactionType,
    pub amount_cents: i64,
    pub fee_cents: i64,
    pub net_amount_cents: i64,
    pub status: TransactionStatus,
    pub gateway: Option<String>,
    pub description: Option<String>,
    pub performed_by: Option<Uuid>,
}

/// Request to deposit money into a user's balance.
///
/// # JSON Example
///
/// ```json
/// {
///   "amount_cents": 10000,
///   "fee_cents": 150,
///   "gateway": "bank_transfer",
///   "description": "Top-up"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DepositRequest {
    pub amount_cents: i64,

    #[serde(default)]
    pub fee_cents: i64,

    #[serde(default)]
    pub gateway: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

/// Response returned for transaction operations.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "770e8400-e29b-41d4-a716-446655440002",
///   "code": "TRX-1A2B3C4D5E6F7A8B",
///   "transaction_type": "purchase",
///   "amount_cents": -600,
///   "fee_cents": 0,
///   "net_amount_cents": -600,
///   "status": "completed",
///   "created_at": "2025-12-21T16:00:00Z"
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub code: String,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub transaction_type: TransactionType,
    pub amount_cents: i64,
    pub fee_cents: i64,
    pub net_amount_cents: i64,
    pub status: TransactionStatus,
    pub gateway: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Convert database Transaction to API TransactionResponse.
///
/// This drops `performed_by`, which is only kept for auditing.
impl From<Transaction> for TransactionResponse {
    fn from(transaction: Transaction) -> Self {
        Self {
            id: transaction.id,
            code: transaction.code,
            user_id: transaction.user_id,
            order_id: transaction.order_id,
            transaction_type: transaction.transaction_type,
            amount_cents: transaction.amount_cents,
            fee_cents: transaction.fee_cents,
            net_amount_cents: transaction.net_amount_cents,
            status: transaction.status,
            gateway: transaction.gateway,
            description: transaction.description,
            created_at: transaction.created_at,
        }
    }
}
