//! User balance models.
//!
//! Users themselves (credentials, roles, profiles) are managed elsewhere;
//! this service only reads and maintains the cached balance column.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Represents the balance-holding part of a user record.
///
/// # Balance Storage
///
/// Balances are stored as `i64` cents to avoid floating-point precision
/// issues. The column is a cache: it must always equal the sum of
/// `net_amount_cents` over the user's completed transactions, so every
/// write to it is paired with a ledger entry in the same unit of work.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,

    /// Current balance in cents
    pub balance_cents: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Build a user with the given starting balance (used for seeding).
    pub fn new(name: impl Into<String>, balance_cents: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            balance_cents,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Cached balance compared against the ledger.
///
/// # JSON Example
///
/// ```json
/// {
///   "user_id": "550e8400-e29b-41d4-a716-446655440000",
///   "balance_cents": 400,
///   "ledger_cents": 400,
///   "consistent": true
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceCheck {
    pub user_id: Uuid,
    pub balance_cents: i64,
    pub ledger_cents: i64,
    pub consistent: bool,
}
