//! In-memory implementation of the persistence boundary.
//!
//! Useful for tests and local development where PostgreSQL is not
//! available. A unit of work holds the single state lock for its whole
//! lifetime and mutates a private copy of the state; `commit` publishes the
//! copy, while `rollback` or dropping the unit of work discards it. That
//! makes every unit of work serializable.
//!
//! Failures can be injected at named points with [`MemoryStore::fail_at`]
//! to exercise rollback paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    access_code::{AccessCode, CodeStatus, StockCounts},
    order::{NewOrder, Order, OrderStatus, PaymentStatus},
    product::{Product, Promotion},
    transaction::{NewTransaction, Transaction, TransactionStatus},
    user::User,
};
use crate::store::{Store, UnitOfWork};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Places where a [`MemoryStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertTransaction,
    StoreBalance,
    ReserveCodes,
    MarkSold,
    ReleaseCodes,
    UpdateOrder,
    Commit,
}

/// Snapshot of everything the memory store holds.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    users: HashMap<Uuid, User>,
    products: HashMap<Uuid, Product>,
    promotions: HashMap<String, Promotion>,
    orders: HashMap<Uuid, Order>,
    // Insertion order doubles as allocation order
    codes: Vec<AccessCode>,
    transactions: Vec<Transaction>,
}

impl MemoryState {
    pub fn user(&self, user_id: Uuid) -> Option<&User> {
        self.users.get(&user_id)
    }

    pub fn order(&self, order_id: Uuid) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    pub fn codes(&self) -> &[AccessCode] {
        &self.codes
    }

    pub fn order_codes(&self, order_id: Uuid) -> Vec<&AccessCode> {
        self.codes
            .iter()
            .filter(|c| c.order_id == Some(order_id))
            .collect()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn user_transactions(&self, user_id: Uuid) -> Vec<&Transaction> {
        self.transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .collect()
    }

    pub fn stock(&self, product_id: Uuid) -> StockCounts {
        let mut counts = StockCounts::default();
        for code in self.codes.iter().filter(|c| c.product_id == product_id) {
            match code.status {
                CodeStatus::Available => counts.available += 1,
                CodeStatus::Reserved => counts.reserved += 1,
                CodeStatus::Sold => counts.sold += 1,
            }
        }
        counts
    }

    pub fn ledger_sum(&self, user_id: Uuid) -> i64 {
        self.transactions
            .iter()
            .filter(|t| t.user_id == user_id && t.status == TransactionStatus::Completed)
            .map(|t| t.net_amount_cents)
            .sum()
    }
}

/// Thread-safe in-memory store.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    failpoints: Arc<StdMutex<HashSet<FailPoint>>>,
    lock_timeout: Duration,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            failpoints: Arc::new(StdMutex::new(HashSet::new())),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Bound how long `begin` waits for a concurrent unit of work.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub async fn insert_user(&self, user: User) -> Uuid {
        let id = user.id;
        self.state.lock().await.users.insert(id, user);
        id
    }

    pub async fn insert_product(&self, product: Product) -> Uuid {
        let id = product.id;
        self.state.lock().await.products.insert(id, product);
        id
    }

    pub async fn insert_promotion(&self, promotion: Promotion) {
        self.state
            .lock()
            .await
            .promotions
            .insert(promotion.code.to_uppercase(), promotion);
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    /// Make every later unit of work fail when it reaches `point`.
    pub fn fail_at(&self, point: FailPoint) {
        self.failpoints
            .lock()
            .expect("failpoint lock poisoned")
            .insert(point);
    }

    pub fn clear_failpoints(&self) {
        self.failpoints
            .lock()
            .expect("failpoint lock poisoned")
            .clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let guard = tokio::time::timeout(self.lock_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| {
                AppError::Contention(format!(
                    "store lock not acquired within {:?}",
                    self.lock_timeout
                ))
            })?;

        let working = (*guard).clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard: Some(guard),
            working,
            failpoints: self.failpoints.clone(),
        }))
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Unit of work over a private copy of the memory state.
pub struct MemoryUnitOfWork {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    working: MemoryState,
    failpoints: Arc<StdMutex<HashSet<FailPoint>>>,
}

impl MemoryUnitOfWork {
    fn check(&self, point: FailPoint) -> Result<(), AppError> {
        self.ensure_open()?;
        let armed = self
            .failpoints
            .lock()
            .expect("failpoint lock poisoned")
            .contains(&point);
        if armed {
            return Err(AppError::Database(sqlx::Error::Protocol(format!(
                "injected failure at {point:?}"
            ))));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), AppError> {
        if self.guard.is_none() {
            return Err(AppError::InvalidState(
                "unit of work already finished".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn find_user(&mut self, user_id: Uuid) -> Result<Option<User>, AppError> {
        self.ensure_open()?;
        Ok(self.working.users.get(&user_id).cloned())
    }

    async fn lock_balance(&mut self, user_id: Uuid) -> Result<i64, AppError> {
        self.ensure_open()?;
        self.working
            .users
            .get(&user_id)
            .map(|u| u.balance_cents)
            .ok_or(AppError::NotFound("User"))
    }

    async fn store_balance(&mut self, user_id: Uuid, balance_cents: i64) -> Result<(), AppError> {
        self.check(FailPoint::StoreBalance)?;
        let user = self
            .working
            .users
            .get_mut(&user_id)
            .ok_or(AppError::NotFound("User"))?;
        user.balance_cents = balance_cents;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn ledger_sum(&mut self, user_id: Uuid) -> Result<i64, AppError> {
        self.ensure_open()?;
        Ok(self.working.ledger_sum(user_id))
    }

    async fn find_product(&mut self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        self.ensure_open()?;
        Ok(self.working.products.get(&product_id).cloned())
    }

    async fn find_promotion(&mut self, code: &str) -> Result<Option<Promotion>, AppError> {
        self.ensure_open()?;
        Ok(self.working.promotions.get(code).cloned())
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, AppError> {
        self.ensure_open()?;
        if self
            .working
            .orders
            .values()
            .any(|o| o.order_number == order.order_number)
        {
            return Err(AppError::Conflict(format!(
                "order number {} already exists",
                order.order_number
            )));
        }

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            order_number: order.order_number,
            user_id: order.user_id,
            product_id: order.product_id,
            quantity: order.quantity,
            unit_price_cents: order.unit_price_cents,
            total_cents: order.total_cents,
            discount_cents: order.discount_cents,
            net_cents: order.net_cents,
            refunded_cents: 0,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            promo_code: order.promo_code,
            notes: order.notes,
            cancel_reason: None,
            refund_reason: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            processing_at: None,
            completed_at: None,
            cancelled_at: None,
            refunded_at: None,
        };
        self.working.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn find_order(&mut self, order_id: Uuid) -> Result<Option<Order>, AppError> {
        self.ensure_open()?;
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn lock_order(&mut self, order_id: Uuid) -> Result<Order, AppError> {
        self.ensure_open()?;
        self.working
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(AppError::NotFound("Order"))
    }

    async fn update_order(&mut self, order: &Order) -> Result<(), AppError> {
        self.check(FailPoint::UpdateOrder)?;
        let stored = self
            .working
            .orders
            .get_mut(&order.id)
            .ok_or(AppError::NotFound("Order"))?;
        *stored = Order {
            updated_at: Utc::now(),
            ..order.clone()
        };
        Ok(())
    }

    async fn insert_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, AppError> {
        self.check(FailPoint::InsertTransaction)?;
        let now = Utc::now();
        let transaction = Transaction {
            id: Uuid::new_v4(),
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
            performed_by: transaction.performed_by,
            created_at: now,
            updated_at: now,
        };
        self.working.transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn find_transaction(
        &mut self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, AppError> {
        self.ensure_open()?;
        Ok(self
            .working
            .transactions
            .iter()
            .find(|t| t.id == transaction_id)
            .cloned())
    }

    async fn lock_transaction(&mut self, transaction_id: Uuid) -> Result<Transaction, AppError> {
        self.find_transaction(transaction_id)
            .await?
            .ok_or(AppError::NotFound("Transaction"))
    }

    async fn set_transaction_status(
        &mut self,
        transaction_id: Uuid,
        status: TransactionStatus,
    ) -> Result<(), AppError> {
        self.ensure_open()?;
        let transaction = self
            .working
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction_id)
            .ok_or(AppError::NotFound("Transaction"))?;
        transaction.status = status;
        transaction.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_codes(
        &mut self,
        product_id: Uuid,
        payloads: &[String],
    ) -> Result<Vec<AccessCode>, AppError> {
        self.ensure_open()?;
        let now = Utc::now();
        let codes: Vec<AccessCode> = payloads
            .iter()
            .map(|payload| AccessCode {
                id: Uuid::new_v4(),
                product_id,
                payload: payload.clone(),
                status: CodeStatus::Available,
                order_id: None,
                reserved_at: None,
                sold_at: None,
                delivered_at: None,
                created_at: now,
                updated_at: now,
            })
            .collect();
        self.working.codes.extend(codes.iter().cloned());
        Ok(codes)
    }

    async fn reserve_available(
        &mut self,
        product_id: Uuid,
        order_id: Uuid,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccessCode>, AppError> {
        self.check(FailPoint::ReserveCodes)?;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let mut reserved = Vec::new();
        for code in self
            .working
            .codes
            .iter_mut()
            .filter(|c| c.product_id == product_id && c.status == CodeStatus::Available)
            .take(limit)
        {
            code.status = CodeStatus::Reserved;
            code.order_id = Some(order_id);
            code.reserved_at = Some(now);
            code.updated_at = now;
            reserved.push(code.clone());
        }
        Ok(reserved)
    }

    async fn lock_codes(&mut self, code_ids: &[Uuid]) -> Result<Vec<AccessCode>, AppError> {
        self.ensure_open()?;
        Ok(self
            .working
            .codes
            .iter()
            .filter(|c| code_ids.contains(&c.id))
            .cloned()
            .collect())
    }

    async fn bind_codes(
        &mut self,
        code_ids: &[Uuid],
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        self.ensure_open()?;
        let mut updated = 0;
        for code in self
            .working
            .codes
            .iter_mut()
            .filter(|c| code_ids.contains(&c.id) && c.status == CodeStatus::Available)
        {
            code.status = CodeStatus::Reserved;
            code.order_id = Some(order_id);
            code.reserved_at = Some(now);
            code.updated_at = now;
            updated += 1;
        }
        Ok(updated)
    }

    async fn mark_sold(&mut self, order_id: Uuid, now: DateTime<Utc>) -> Result<u64, AppError> {
        self.check(FailPoint::MarkSold)?;
        let mut updated = 0;
        for code in self
            .working
            .codes
            .iter_mut()
            .filter(|c| c.order_id == Some(order_id) && c.status == CodeStatus::Reserved)
        {
            code.status = CodeStatus::Sold;
            code.sold_at = Some(now);
            code.delivered_at = Some(now);
            code.updated_at = now;
            updated += 1;
        }
        Ok(updated)
    }

    async fn release_codes(&mut self, order_id: Uuid) -> Result<u64, AppError> {
        self.check(FailPoint::ReleaseCodes)?;
        let now = Utc::now();
        let mut released = 0;
        for code in self
            .working
            .codes
            .iter_mut()
            .filter(|c| c.order_id == Some(order_id))
        {
            code.status = CodeStatus::Available;
            code.order_id = None;
            code.reserved_at = None;
            code.sold_at = None;
            code.delivered_at = None;
            code.updated_at = now;
            released += 1;
        }
        Ok(released)
    }

    async fn order_codes(&mut self, order_id: Uuid) -> Result<Vec<AccessCode>, AppError> {
        self.ensure_open()?;
        Ok(self
            .working
            .order_codes(order_id)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn stock_counts(&mut self, product_id: Uuid) -> Result<StockCounts, AppError> {
        self.ensure_open()?;
        Ok(self.working.stock(product_id))
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        self.check(FailPoint::Commit)?;
        let mut guard = self.guard.take().ok_or_else(|| {
            AppError::InvalidState("unit of work already finished".to_string())
        })?;
        *guard = std::mem::take(&mut self.working);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        self.guard = None;
        self.working = MemoryState::default();
        Ok(())
    }
}
