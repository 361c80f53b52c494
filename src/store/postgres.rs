//! PostgreSQL implementation of the persistence boundary.
//!
//! Each unit of work wraps one `sqlx::Transaction`. On `begin` the
//! transaction's isolation level and `lock_timeout` are set, so no lock wait
//! is unbounded and every lock failure surfaces as `AppError::Contention`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres};
use uuid::Uuid;

use crate::config::IsolationLevel;
use crate::db::DbPool;
use crate::error::AppError;
use crate::models::{
    access_code::{AccessCode, CodeStatus, StockCounts},
    order::{NewOrder, Order},
    product::{Product, Promotion},
    transaction::{NewTransaction, Transaction, TransactionStatus},
    user::User,
};
use crate::store::{Store, UnitOfWork};

/// Store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
    isolation: IsolationLevel,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: DbPool, isolation: IsolationLevel, lock_timeout: Duration) -> Self {
        Self {
            pool,
            isolation,
            lock_timeout,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let mut tx = self.pool.begin().await?;

        // Must be the first statement of the transaction
        sqlx::query(self.isolation.set_transaction_sql())
            .execute(&mut *tx)
            .await?;

        // `true` scopes the setting to this transaction only
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgUnitOfWork { tx: Some(tx) }))
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Unit of work over one PostgreSQL transaction.
///
/// The transaction is taken out on commit/rollback; if the unit of work is
/// dropped while still holding it, sqlx rolls it back.
pub struct PgUnitOfWork {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PgUnitOfWork {
    fn conn(&mut self) -> Result<&mut PgConnection, AppError> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| AppError::InvalidState("unit of work already finished".to_string()))
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn find_user(&mut self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, balance_cents, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.conn()?)
        .await?;

        Ok(user)
    }

    async fn lock_balance(&mut self, user_id: Uuid) -> Result<i64, AppError> {
        // FOR UPDATE so concurrent debits cannot both pass a balance check
        // against the same stale value
        let balance: i64 =
            sqlx::query_scalar("SELECT balance_cents FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(self.conn()?)
                .await?
                .ok_or(AppError::NotFound("User"))?;

        Ok(balance)
    }

    async fn store_balance(&mut self, user_id: Uuid, balance_cents: i64) -> Result<(), AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE users
            SET balance_cents = $1,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(balance_cents)
        .bind(user_id)
        .execute(self.conn()?)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(AppError::NotFound("User"));
        }

        Ok(())
    }

    async fn ledger_sum(&mut self, user_id: Uuid) -> Result<i64, AppError> {
        let sum: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(net_amount_cents), 0)::BIGINT
            FROM transactions
            WHERE user_id = $1 AND status = 'completed'
            "#,
        )
        .bind(user_id)
        .fetch_one(self.conn()?)
        .await?;

        Ok(sum)
    }

    async fn find_product(&mut self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(self.conn()?)
            .await?;

        Ok(product)
    }

    async fn find_promotion(&mut self, code: &str) -> Result<Option<Promotion>, AppError> {
        let promotion = sqlx::query_as::<_, Promotion>("SELECT * FROM promotions WHERE code = $1")
            .bind(code)
            .fetch_optional(self.conn()?)
            .await?;

        Ok(promotion)
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, AppError> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (
                order_number,
                user_id,
                product_id,
                quantity,
                unit_price_cents,
                total_cents,
                discount_cents,
                net_cents,
                promo_code,
                notes,
                status,
                payment_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', 'pending')
            RETURNING *
            "#,
        )
        .bind(order.order_number)
        .bind(order.user_id)
        .bind(order.product_id)
        .bind(order.quantity)
        .bind(order.unit_price_cents)
        .bind(order.total_cents)
        .bind(order.discount_cents)
        .bind(order.net_cents)
        .bind(order.promo_code)
        .bind(order.notes)
        .fetch_one(self.conn()?)
        .await?;

        Ok(order)
    }

    async fn find_order(&mut self, order_id: Uuid) -> Result<Option<Order>, AppError> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(self.conn()?)
            .await?;

        Ok(order)
    }

    async fn lock_order(&mut self, order_id: Uuid) -> Result<Order, AppError> {
        sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(self.conn()?)
            .await?
            .ok_or(AppError::NotFound("Order"))
    }

    async fn update_order(&mut self, order: &Order) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2,
                payment_status = $3,
                refunded_cents = $4,
                notes = $5,
                cancel_reason = $6,
                refund_reason = $7,
                paid_at = $8,
                processing_at = $9,
                completed_at = $10,
                cancelled_at = $11,
                refunded_at = $12,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status)
        .bind(order.payment_status)
        .bind(order.refunded_cents)
        .bind(&order.notes)
        .bind(&order.cancel_reason)
        .bind(&order.refund_reason)
        .bind(order.paid_at)
        .bind(order.processing_at)
        .bind(order.completed_at)
        .bind(order.cancelled_at)
        .bind(order.refunded_at)
        .execute(self.conn()?)
        .await?;

        Ok(())
    }

    async fn insert_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, AppError> {
        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (
                code,
                user_id,
                order_id,
                transaction_type,
                amount_cents,
                fee_cents,
                net_amount_cents,
                status,
                gateway,
                description,
                performed_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(transaction.code)
        .bind(transaction.user_id)
        .bind(transaction.order_id)
        .bind(transaction.transaction_type)
        .bind(transaction.amount_cents)
        .bind(transaction.fee_cents)
        .bind(transaction.net_amount_cents)
        .bind(transaction.status)
        .bind(transaction.gateway)
        .bind(transaction.description)
        .bind(transaction.performed_by)
        .fetch_one(self.conn()?)
        .await?;

        Ok(transaction)
    }

    async fn find_transaction(
        &mut self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, AppError> {
        let transaction =
            sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
                .bind(transaction_id)
                .fetch_optional(self.conn()?)
                .await?;

        Ok(transaction)
    }

    async fn lock_transaction(&mut self, transaction_id: Uuid) -> Result<Transaction, AppError> {
        sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1 FOR UPDATE")
            .bind(transaction_id)
            .fetch_optional(self.conn()?)
            .await?
            .ok_or(AppError::NotFound("Transaction"))
    }

    async fn set_transaction_status(
        &mut self,
        transaction_id: Uuid,
        status: TransactionStatus,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE transactions SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status)
            .bind(transaction_id)
            .execute(self.conn()?)
            .await?;

        Ok(())
    }

    async fn insert_codes(
        &mut self,
        product_id: Uuid,
        payloads: &[String],
    ) -> Result<Vec<AccessCode>, AppError> {
        let codes = sqlx::query_as::<_, AccessCode>(
            r#"
            INSERT INTO access_codes (product_id, payload, status)
            SELECT $1, payload, 'available'
            FROM UNNEST($2::TEXT[]) AS payload
            RETURNING *
            "#,
        )
        .bind(product_id)
        .bind(payloads.to_vec())
        .fetch_all(self.conn()?)
        .await?;

        Ok(codes)
    }

    async fn reserve_available(
        &mut self,
        product_id: Uuid,
        order_id: Uuid,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccessCode>, AppError> {
        // SKIP LOCKED: a concurrent reservation that already holds a row makes
        // us pick the next free one instead of double-selecting or waiting
        let codes = sqlx::query_as::<_, AccessCode>(
            r#"
            UPDATE access_codes
            SET status = 'reserved',
                order_id = $1,
                reserved_at = $2,
                updated_at = NOW()
            WHERE id IN (
                SELECT id FROM access_codes
                WHERE product_id = $3 AND status = 'available'
                ORDER BY created_at, id
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(now)
        .bind(product_id)
        .bind(limit)
        .fetch_all(self.conn()?)
        .await?;

        Ok(codes)
    }

    async fn lock_codes(&mut self, code_ids: &[Uuid]) -> Result<Vec<AccessCode>, AppError> {
        let codes = sqlx::query_as::<_, AccessCode>(
            "SELECT * FROM access_codes WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(code_ids.to_vec())
        .fetch_all(self.conn()?)
        .await?;

        Ok(codes)
    }

    async fn bind_codes(
        &mut self,
        code_ids: &[Uuid],
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE access_codes
            SET status = 'reserved',
                order_id = $1,
                reserved_at = $2,
                updated_at = NOW()
            WHERE id = ANY($3) AND status = 'available'
            "#,
        )
        .bind(order_id)
        .bind(now)
        .bind(code_ids.to_vec())
        .execute(self.conn()?)
        .await?
        .rows_affected();

        Ok(updated)
    }

    async fn mark_sold(&mut self, order_id: Uuid, now: DateTime<Utc>) -> Result<u64, AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE access_codes
            SET status = 'sold',
                sold_at = $2,
                delivered_at = $2,
                updated_at = NOW()
            WHERE order_id = $1 AND status = 'reserved'
            "#,
        )
        .bind(order_id)
        .bind(now)
        .execute(self.conn()?)
        .await?
        .rows_affected();

        Ok(updated)
    }

    async fn release_codes(&mut self, order_id: Uuid) -> Result<u64, AppError> {
        let released = sqlx::query(
            r#"
            UPDATE access_codes
            SET status = 'available',
                order_id = NULL,
                reserved_at = NULL,
                sold_at = NULL,
                delivered_at = NULL,
                updated_at = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .execute(self.conn()?)
        .await?
        .rows_affected();

        Ok(released)
    }

    async fn order_codes(&mut self, order_id: Uuid) -> Result<Vec<AccessCode>, AppError> {
        let codes = sqlx::query_as::<_, AccessCode>(
            "SELECT * FROM access_codes WHERE order_id = $1 ORDER BY reserved_at, id",
        )
        .bind(order_id)
        .fetch_all(self.conn()?)
        .await?;

        Ok(codes)
    }

    async fn stock_counts(&mut self, product_id: Uuid) -> Result<StockCounts, AppError> {
        // Served by the (product_id, status) index
        let rows = sqlx::query_as::<_, (CodeStatus, i64)>(
            "SELECT status, COUNT(*) FROM access_codes WHERE product_id = $1 GROUP BY status",
        )
        .bind(product_id)
        .fetch_all(self.conn()?)
        .await?;

        let mut counts = StockCounts::default();
        for (status, count) in rows {
            match status {
                CodeStatus::Available => counts.available = count,
                CodeStatus::Reserved => counts.reserved = count,
                CodeStatus::Sold => counts.sold = count,
            }
        }

        Ok(counts)
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        match self.tx.take() {
            Some(tx) => Ok(tx.commit().await?),
            None => Err(AppError::InvalidState(
                "unit of work already finished".to_string(),
            )),
        }
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
