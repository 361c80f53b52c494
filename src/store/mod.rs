//! Persistence boundary.
//!
//! All reads and writes go through a [`UnitOfWork`] obtained from
//! [`Store::begin`]. A unit of work is one database transaction: the caller
//! either commits it or rolls it back, and dropping an unfinished unit of
//! work (an early `?` return, a cancelled request) rolls it back as well.
//!
//! Two backends implement the traits:
//! - [`postgres::PgStore`]: PostgreSQL via sqlx, used in production
//! - [`memory::MemoryStore`]: in-process copy-on-begin store for tests and
//!   local development

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    access_code::{AccessCode, StockCounts},
    order::{NewOrder, Order},
    product::{Product, Promotion},
    transaction::{NewTransaction, Transaction, TransactionStatus},
    user::User,
};

/// Opens units of work.
#[async_trait]
pub trait Store: Send + Sync {
    /// Start a new transactional unit of work.
    ///
    /// # Errors
    ///
    /// - `Contention`: no connection or lock became available in time
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError>;

    /// Cheap connectivity check for health endpoints.
    async fn ping(&self) -> Result<(), AppError>;
}

/// One transactional context over orders, access codes, ledger entries and
/// balances.
///
/// Methods named `lock_*` take a row lock that is held until the unit of
/// work finishes. Callers lock in the order: order → user balance → access
/// codes.
#[async_trait]
pub trait UnitOfWork: Send {
    // ----- users -----

    async fn find_user(&mut self, user_id: Uuid) -> Result<Option<User>, AppError>;

    /// Lock the user's row and return the current balance.
    ///
    /// # Errors
    ///
    /// - `NotFound`: user does not exist
    async fn lock_balance(&mut self, user_id: Uuid) -> Result<i64, AppError>;

    async fn store_balance(&mut self, user_id: Uuid, balance_cents: i64) -> Result<(), AppError>;

    /// Sum of `net_amount_cents` over the user's completed transactions.
    async fn ledger_sum(&mut self, user_id: Uuid) -> Result<i64, AppError>;

    // ----- catalog -----

    async fn find_product(&mut self, product_id: Uuid) -> Result<Option<Product>, AppError>;

    async fn find_promotion(&mut self, code: &str) -> Result<Option<Promotion>, AppError>;

    // ----- orders -----

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, AppError>;

    async fn find_order(&mut self, order_id: Uuid) -> Result<Option<Order>, AppError>;

    /// # Errors
    ///
    /// - `NotFound`: order does not exist
    async fn lock_order(&mut self, order_id: Uuid) -> Result<Order, AppError>;

    /// Persist every mutable column of `order`.
    async fn update_order(&mut self, order: &Order) -> Result<(), AppError>;

    // ----- ledger -----

    async fn insert_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, AppError>;

    async fn find_transaction(
        &mut self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, AppError>;

    /// # Errors
    ///
    /// - `NotFound`: transaction does not exist
    async fn lock_transaction(&mut self, transaction_id: Uuid) -> Result<Transaction, AppError>;

    async fn set_transaction_status(
        &mut self,
        transaction_id: Uuid,
        status: TransactionStatus,
    ) -> Result<(), AppError>;

    // ----- access codes -----

    async fn insert_codes(
        &mut self,
        product_id: Uuid,
        payloads: &[String],
    ) -> Result<Vec<AccessCode>, AppError>;

    /// Atomically move up to `limit` available codes of the product to
    /// `reserved`, bound to `order_id`. Concurrent calls never return the
    /// same row.
    async fn reserve_available(
        &mut self,
        product_id: Uuid,
        order_id: Uuid,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccessCode>, AppError>;

    /// Lock the given codes; missing ids are simply absent from the result.
    async fn lock_codes(&mut self, code_ids: &[Uuid]) -> Result<Vec<AccessCode>, AppError>;

    /// Bind available codes to an order. Returns how many rows changed.
    async fn bind_codes(
        &mut self,
        code_ids: &[Uuid],
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError>;

    /// Move the order's reserved codes to sold. Returns how many rows changed.
    async fn mark_sold(&mut self, order_id: Uuid, now: DateTime<Utc>) -> Result<u64, AppError>;

    /// Return every code bound to the order to the pool.
    async fn release_codes(&mut self, order_id: Uuid) -> Result<u64, AppError>;

    async fn order_codes(&mut self, order_id: Uuid) -> Result<Vec<AccessCode>, AppError>;

    async fn stock_counts(&mut self, product_id: Uuid) -> Result<StockCounts, AppError>;

    // ----- lifecycle -----

    async fn commit(&mut self) -> Result<(), AppError>;

    async fn rollback(&mut self) -> Result<(), AppError>;
}

/// Commit `uow` if `result` is `Ok`, otherwise roll it back.
///
/// A failed rollback is logged and the original error is returned, since
/// the database discards the transaction when the connection drops anyway.
pub async fn finish<T>(
    mut uow: Box<dyn UnitOfWork>,
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                tracing::warn!("Rollback failed after {}: {:?}", err, rollback_err);
            }
            Err(err)
        }
    }
}
