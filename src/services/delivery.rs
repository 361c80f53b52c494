//! How a paid order gets its goods.
//!
//! Each product selects one strategy through its `delivery_mode`:
//! - [`AutomaticDelivery`]: codes come from the product's inventory pool
//! - [`ManualDelivery`]: staff fulfil the order by hand; no codes are involved

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    access_code::{AccessCode, CodeStatus},
    order::Order,
    product::DeliveryMode,
};
use crate::services::{inventory::InventoryPool, order_machine::OrderAction};
use crate::store::UnitOfWork;

/// Result of one fulfilment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fulfilment {
    /// Every slot of the order holds a sold code.
    Delivered { codes: i64 },
    /// Stock ran short; the order keeps waiting for more codes.
    Partial { delivered: i64, missing: i64 },
    /// Nothing to do automatically; staff complete the order.
    AwaitingStaff,
}

#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    fn mode(&self) -> DeliveryMode;

    /// Fail with `OutOfStock` if the order's open slots cannot be covered.
    async fn ensure_stock(&self, uow: &mut dyn UnitOfWork, order: &Order) -> Result<(), AppError>;

    /// Allocate and deliver whatever the order is still missing.
    async fn fulfil(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<Fulfilment, AppError>;

    /// Bind explicitly chosen codes to the order.
    async fn assign(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &Order,
        code_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<Vec<AccessCode>, AppError>;

    /// Give back everything bound to the order.
    async fn release(&self, uow: &mut dyn UnitOfWork, order: &Order) -> Result<u64, AppError>;
}

/// Delivery from a pre-loaded pool of access codes.
#[derive(Debug, Clone, Default)]
pub struct AutomaticDelivery {
    inventory: InventoryPool,
}

impl AutomaticDelivery {
    pub fn new(inventory: InventoryPool) -> Self {
        Self { inventory }
    }

    /// Slots of the order not yet backed by a code.
    async fn open_slots(&self, uow: &mut dyn UnitOfWork, order: &Order) -> Result<i64, AppError> {
        let bound = uow.order_codes(order.id).await?.len() as i64;
        Ok((i64::from(order.quantity) - bound).max(0))
    }
}

#[async_trait]
impl DeliveryStrategy for AutomaticDelivery {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Automatic
    }

    async fn ensure_stock(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &Order,
    ) -> Result<(), AppError> {
        let needed = self.open_slots(uow, order).await?;
        if needed == 0 {
            return Ok(());
        }
        let available = self.inventory.available_count(uow, order.product_id).await?;
        if available < needed {
            return Err(AppError::OutOfStock {
                requested: needed,
                available,
            });
        }
        Ok(())
    }

    async fn fulfil(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<Fulfilment, AppError> {
        let needed = self.open_slots(uow, order).await?;
        self.inventory
            .reserve(uow, order.product_id, needed, order.id, now)
            .await?;
        self.inventory.deliver(uow, order.id, now).await?;

        let delivered = uow
            .order_codes(order.id)
            .await?
            .iter()
            .filter(|c| c.status == CodeStatus::Sold)
            .count() as i64;
        let quantity = i64::from(order.quantity);

        if delivered >= quantity {
            Ok(Fulfilment::Delivered { codes: delivered })
        } else {
            Ok(Fulfilment::Partial {
                delivered,
                missing: quantity - delivered,
            })
        }
    }

    async fn assign(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &Order,
        code_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<Vec<AccessCode>, AppError> {
        let open = self.open_slots(uow, order).await?;
        if code_ids.len() as i64 > open {
            return Err(AppError::Validation(format!(
                "Order {} has {open} open slots, got {} codes",
                order.order_number,
                code_ids.len()
            )));
        }
        self.inventory
            .assign(uow, order.product_id, order.id, code_ids, now)
            .await
    }

    async fn release(&self, uow: &mut dyn UnitOfWork, order: &Order) -> Result<u64, AppError> {
        self.inventory.release(uow, order.id).await
    }
}

/// Delivery performed by staff outside the system.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualDelivery;

#[async_trait]
impl DeliveryStrategy for ManualDelivery {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Manual
    }

    async fn ensure_stock(&self, _: &mut dyn UnitOfWork, _: &Order) -> Result<(), AppError> {
        Ok(())
    }

    async fn fulfil(
        &self,
        _: &mut dyn UnitOfWork,
        _: &Order,
        _: DateTime<Utc>,
    ) -> Result<Fulfilment, AppError> {
        Ok(Fulfilment::AwaitingStaff)
    }

    async fn assign(
        &self,
        _: &mut dyn UnitOfWork,
        order: &Order,
        _: &[Uuid],
        _: DateTime<Utc>,
    ) -> Result<Vec<AccessCode>, AppError> {
        Err(AppError::InvalidTransition {
            from: order.status,
            payment: order.payment_status,
            action: OrderAction::AssignCodes,
        })
    }

    async fn release(&self, _: &mut dyn UnitOfWork, _: &Order) -> Result<u64, AppError> {
        Ok(0)
    }
}
