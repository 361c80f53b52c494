//! Product and promotion models.
//!
//! Products and promotions are catalog data owned by the admin side of the
//! storefront; fulfillment only reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a product's goods reach the buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Stock is a pool of pre-loaded access codes allocated programmatically
    Automatic,
    /// No bounded stock; staff fulfil the order by hand
    Manual,
}

/// Represents a product record from the database.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,

    /// Unit price in cents
    pub price_cents: i64,

    pub delivery_mode: DeliveryMode,

    /// Smallest quantity a single order may request (at least 1)
    pub min_purchase: i32,

    /// Largest quantity a single order may request, if limited
    pub max_purchase: Option<i32>,

    /// Inactive products cannot be ordered
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Build an active product with no purchase limits (used for seeding).
    pub fn new(name: impl Into<String>, price_cents: i64, delivery_mode: DeliveryMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            price_cents,
            delivery_mode,
            min_purchase: 1,
            max_purchase: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_limits(mut self, min_purchase: i32, max_purchase: Option<i32>) -> Self {
        self.min_purchase = min_purchase;
        self.max_purchase = max_purchase;
        self
    }
}

/// Represents a promotion code record from the database.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct Promotion {
    /// Code typed by the buyer, stored upper-case
    pub code: String,

    /// Percentage taken off the order total (1..=100)
    pub percent_off: i32,

    /// Upper bound on the discount, if any
    pub max_discount_cents: Option<i64>,

    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Promotion {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|expires| expires > now)
    }

    /// Discount this promotion grants on `total_cents`.
    ///
    /// Never exceeds the total, so the order's net amount stays non-negative.
    pub fn discount_for(&self, total_cents: i64) -> i64 {
        let percent = i64::from(self.percent_off.clamp(0, 100));
        let mut discount = total_cents.saturating_mul(percent) / 100;
        if let Some(cap) = self.max_discount_cents {
            discount = discount.min(cap.max(0));
        }
        discount.clamp(0, total_cents.max(0))
    }
}
