//! Inventory pool - allocation of access codes to orders.
//!
//! Codes move `available → reserved → sold` and back to `available` when
//! an order is cancelled or fully refunded. Every method runs inside the
//! caller's unit of work; reservation relies on the store to hand out
//! disjoint rows to concurrent callers.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    access_code::{AccessCode, CodeStatus, StockCounts},
    product::{DeliveryMode, Product},
};
use crate::store::UnitOfWork;

#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryPool;

impl InventoryPool {
    /// Reserve up to `quantity` available codes of the product for an order.
    ///
    /// Returns only what could be reserved; a shortfall is not an error
    /// here, the caller decides whether a partial set is acceptable.
    pub async fn reserve(
        &self,
        uow: &mut dyn UnitOfWork,
        product_id: Uuid,
        quantity: i64,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccessCode>, AppError> {
        if quantity <= 0 {
            return Ok(Vec::new());
        }

        let codes = uow
            .reserve_available(product_id, order_id, quantity, now)
            .await?;

        if (codes.len() as i64) < quantity {
            tracing::info!(
                product_id = %product_id,
                order_id = %order_id,
                requested = quantity,
                reserved = codes.len(),
                "Partial reservation"
            );
        }

        Ok(codes)
    }

    /// Bind specific codes to an order.
    ///
    /// # Errors
    ///
    /// - `Validation`: no ids, or the same id given twice
    /// - `Conflict`: a code is missing, belongs to another product, or is
    ///   no longer available
    pub async fn assign(
        &self,
        uow: &mut dyn UnitOfWork,
        product_id: Uuid,
        order_id: Uuid,
        code_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<Vec<AccessCode>, AppError> {
        if code_ids.is_empty() {
            return Err(AppError::Validation(
                "At least one code id is required".to_string(),
            ));
        }
        let unique: HashSet<&Uuid> = code_ids.iter().collect();
        if unique.len() != code_ids.len() {
            return Err(AppError::Validation(
                "Code ids must not repeat".to_string(),
            ));
        }

        let locked = uow.lock_codes(code_ids).await?;
        for id in code_ids {
            let code = locked
                .iter()
                .find(|c| c.id == *id)
                .ok_or_else(|| AppError::Conflict(format!("code {id} does not exist")))?;
            if code.product_id != product_id {
                return Err(AppError::Conflict(format!(
                    "code {id} belongs to another product"
                )));
            }
            if code.status != CodeStatus::Available {
                return Err(AppError::Conflict(format!(
                    "code {id} is {}",
                    code.status.as_str()
                )));
            }
        }

        let bound = uow.bind_codes(code_ids, order_id, now).await?;
        if bound != code_ids.len() as u64 {
            return Err(AppError::Conflict(format!(
                "expected to bind {} codes, bound {bound}",
                code_ids.len()
            )));
        }

        Ok(uow
            .order_codes(order_id)
            .await?
            .into_iter()
            .filter(|c| code_ids.contains(&c.id))
            .collect())
    }

    /// Mark the order's reserved codes as sold. Calling it again is a no-op.
    pub async fn deliver(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        uow.mark_sold(order_id, now).await
    }

    /// Return every code bound to the order to the pool.
    pub async fn release(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: Uuid,
    ) -> Result<u64, AppError> {
        let released = uow.release_codes(order_id).await?;
        if released > 0 {
            tracing::info!(order_id = %order_id, released, "Access codes released");
        }
        Ok(released)
    }

    pub async fn stock(
        &self,
        uow: &mut dyn UnitOfWork,
        product_id: Uuid,
    ) -> Result<StockCounts, AppError> {
        uow.stock_counts(product_id).await
    }

    pub async fn available_count(
        &self,
        uow: &mut dyn UnitOfWork,
        product_id: Uuid,
    ) -> Result<i64, AppError> {
        Ok(self.stock(uow, product_id).await?.available)
    }

    pub async fn total_count(
        &self,
        uow: &mut dyn UnitOfWork,
        product_id: Uuid,
    ) -> Result<i64, AppError> {
        Ok(self.stock(uow, product_id).await?.total())
    }

    /// Add new available codes to an automatic-delivery product.
    ///
    /// Payloads are trimmed before storage.
    ///
    /// # Errors
    ///
    /// - `Validation`: product uses manual delivery, or a payload is blank,
    ///   or nothing was supplied
    pub async fn import(
        &self,
        uow: &mut dyn UnitOfWork,
        product: &Product,
        payloads: &[String],
    ) -> Result<Vec<AccessCode>, AppError> {
        if product.delivery_mode == DeliveryMode::Manual {
            return Err(AppError::Validation(format!(
                "{} is delivered manually and has no code pool",
                product.name
            )));
        }
        if payloads.is_empty() {
            return Err(AppError::Validation("No codes supplied".to_string()));
        }

        let trimmed: Vec<String> = payloads.iter().map(|p| p.trim().to_string()).collect();
        if trimmed.iter().any(String::is_empty) {
            return Err(AppError::Validation(
                "Code payloads must not be blank".to_string(),
            ));
        }

        uow.insert_codes(product.id, &trimmed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, memory::MemoryStore};

    async fn stocked(count: usize) -> (MemoryStore, Product) {
        let store = MemoryStore::new();
        let product = Product::new("Streaming account", 300, DeliveryMode::Automatic);
        store.insert_product(product.clone()).await;

        let payloads: Vec<String> = (0..count).map(|i| format!("user{i}:pass{i}")).collect();
        let mut uow = store.begin().await.unwrap();
        InventoryPool
            .import(&mut *uow, &product, &payloads)
            .await
            .unwrap();
        uow.commit().await.unwrap();
        (store, product)
    }

    #[tokio::test]
    async fn reserve_returns_partial_set_when_short() {
        let (store, product) = stocked(2).await;
        let pool = InventoryPool;
        let order_id = Uuid::new_v4();

        let mut uow = store.begin().await.unwrap();
        let codes = pool
            .reserve(&mut *uow, product.id, 5, order_id, Utc::now())
            .await
            .unwrap();

        assert_eq!(codes.len(), 2);
        assert!(codes.iter().all(|c| c.order_id == Some(order_id)));
        assert_eq!(pool.available_count(&mut *uow, product.id).await.unwrap(), 0);
        assert_eq!(pool.total_count(&mut *uow, product.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn deliver_is_idempotent() {
        let (store, product) = stocked(3).await;
        let pool = InventoryPool;
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let mut uow = store.begin().await.unwrap();
        pool.reserve(&mut *uow, product.id, 2, order_id, now)
            .await
            .unwrap();

        assert_eq!(pool.deliver(&mut *uow, order_id, now).await.unwrap(), 2);
        assert_eq!(pool.deliver(&mut *uow, order_id, now).await.unwrap(), 0);

        let stock = pool.stock(&mut *uow, product.id).await.unwrap();
        assert_eq!(
            stock,
            StockCounts {
                available: 1,
                reserved: 0,
                sold: 2
            }
        );
        let codes = uow.order_codes(order_id).await.unwrap();
        assert!(codes.iter().all(|c| c.delivered_at.is_some()));
    }

    #[tokio::test]
    async fn release_clears_binding_and_timestamps() {
        let (store, product) = stocked(2).await;
        let pool = InventoryPool;
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let mut uow = store.begin().await.unwrap();
        pool.reserve(&mut *uow, product.id, 2, order_id, now)
            .await
            .unwrap();
        pool.deliver(&mut *uow, order_id, now).await.unwrap();

        assert_eq!(pool.release(&mut *uow, order_id).await.unwrap(), 2);
        assert!(uow.order_codes(order_id).await.unwrap().is_empty());
        uow.commit().await.unwrap();
        drop(uow);

        let snapshot = store.snapshot().await;
        for code in snapshot.codes() {
            assert_eq!(code.status, CodeStatus::Available);
            assert!(code.order_id.is_none());
            assert!(code.sold_at.is_none() && code.delivered_at.is_none());
        }
    }

    #[tokio::test]
    async fn assign_rejects_taken_or_foreign_codes() {
        let (store, product) = stocked(2).await;
        let other = Product::new("Other", 100, DeliveryMode::Automatic);
        store.insert_product(other.clone()).await;
        let pool = InventoryPool;
        let now = Utc::now();

        let mut uow = store.begin().await.unwrap();
        let foreign = pool
            .import(&mut *uow, &other, &["x:y".to_string()])
            .await
            .unwrap();
        let taken = pool
            .reserve(&mut *uow, product.id, 1, Uuid::new_v4(), now)
            .await
            .unwrap();

        let order_id = Uuid::new_v4();
        for ids in [vec![foreign[0].id], vec![taken[0].id], vec![Uuid::new_v4()]] {
            let err = pool
                .assign(&mut *uow, product.id, order_id, &ids, now)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Conflict(_)), "{err:?}");
        }
        assert!(uow.order_codes(order_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn assign_binds_available_codes() {
        let (store, product) = stocked(3).await;
        let pool = InventoryPool;
        let order_id = Uuid::new_v4();

        let snapshot = store.snapshot().await;
        let ids: Vec<Uuid> = snapshot.codes().iter().take(2).map(|c| c.id).collect();

        let mut uow = store.begin().await.unwrap();
        let codes = pool
            .assign(&mut *uow, product.id, order_id, &ids, Utc::now())
            .await
            .unwrap();

        assert_eq!(codes.len(), 2);
        assert!(codes.iter().all(|c| c.status == CodeStatus::Reserved));

        let err = pool
            .assign(&mut *uow, product.id, order_id, &[ids[0], ids[0]], Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn import_rejects_manual_products_and_blank_payloads() {
        let store = MemoryStore::new();
        let manual = Product::new("Boosting service", 5_000, DeliveryMode::Manual);
        let auto = Product::new("Key", 100, DeliveryMode::Automatic);
        let pool = InventoryPool;

        let mut uow = store.begin().await.unwrap();
        let err = pool
            .import(&mut *uow, &manual, &["a".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        for payloads in [vec![], vec!["ok".to_string(), "   ".to_string()]] {
            let err = pool.import(&mut *uow, &auto, &payloads).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }

        let codes = pool
            .import(&mut *uow, &auto, &["  padded  ".to_string()])
            .await
            .unwrap();
        assert_eq!(codes[0].payload, "padded");
    }
}
