//! Order state machine.
//!
//! ```text
//! pending ──► processing ──► completed
//!    │            │              │
//!    └──► cancelled ◄┘           └──► refunded (full refund)
//! ```
//!
//! [`next_status`] is the guard table. Every transition method checks it
//! first, applies its ledger and inventory side effects through the
//! caller's unit of work, and persists the order last. Nothing here commits;
//! the fulfillment service owns the unit of work.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    access_code::AccessCode,
    actor::Actor,
    order::{Order, OrderStatus, PaymentStatus, RefundType},
    transaction::{Transaction, TransactionType},
};
use crate::services::{
    delivery::{DeliveryStrategy, Fulfilment},
    ledger::{BalanceGate, Ledger, LedgerEntry},
};
use crate::store::UnitOfWork;

/// Something a caller wants to do to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    Pay,
    MarkProcessing,
    Deliver,
    Complete,
    Cancel,
    Refund { full: bool },
    AssignCodes,
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderAction::Pay => "pay for",
            OrderAction::MarkProcessing => "start processing",
            OrderAction::Deliver => "deliver",
            OrderAction::Complete => "complete",
            OrderAction::Cancel => "cancel",
            OrderAction::Refund { full: true } => "fully refund",
            OrderAction::Refund { full: false } => "partially refund",
            OrderAction::AssignCodes => "assign codes to",
        };
        f.write_str(name)
    }
}

/// Status the order ends up in if `action` is allowed.
///
/// # Errors
///
/// - `InvalidTransition`: the guard for `action` does not hold
pub fn next_status(order: &Order, action: OrderAction) -> Result<OrderStatus, AppError> {
    use OrderStatus::*;
    use PaymentStatus as P;

    let status = order.status;
    let payment = order.payment_status;

    let next = match action {
        OrderAction::Pay => match (status, payment) {
            (Pending | Processing, P::Pending) => Some(status),
            _ => None,
        },
        OrderAction::MarkProcessing => match (status, payment) {
            (Pending, P::Pending | P::Paid) => Some(Processing),
            _ => None,
        },
        OrderAction::Deliver | OrderAction::AssignCodes => match (status, payment) {
            (Processing, P::Paid) => Some(Processing),
            _ => None,
        },
        OrderAction::Complete => match (status, payment) {
            (Processing, P::Paid) => Some(Completed),
            _ => None,
        },
        OrderAction::Cancel => match status {
            Pending | Processing => Some(Cancelled),
            _ => None,
        },
        OrderAction::Refund { full } => match (status, payment) {
            (Completed | Processing, P::Paid) if full => Some(Refunded),
            (Completed | Processing, P::Paid) => Some(status),
            _ => None,
        },
    };

    next.ok_or(AppError::InvalidTransition {
        from: status,
        payment,
        action,
    })
}

/// Applies order transitions together with their side effects.
#[derive(Debug, Clone, Default)]
pub struct OrderStateMachine {
    ledger: Ledger,
}

impl OrderStateMachine {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Charge the buyer's balance for the order.
    ///
    /// Stock for the open slots is checked before any money moves. A
    /// zero-net order is marked paid without a ledger entry.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition`: already paid, or not pending/processing
    /// - `OutOfStock`: automatic delivery cannot cover the order
    /// - `InsufficientFunds`: balance lower than the net amount
    pub async fn pay(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        delivery: &dyn DeliveryStrategy,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, AppError> {
        next_status(order, OrderAction::Pay)?;
        delivery.ensure_stock(uow, order).await?;

        let purchase = if order.net_cents > 0 {
            let entry = LedgerEntry::new(order.user_id, order.net_cents, TransactionType::Purchase)
                .for_order(order.id)
                .with_description(format!("Purchase {}", order.order_number))
                .by(actor);
            Some(self.ledger.debit(uow, entry, BalanceGate::Enforce).await?)
        } else {
            None
        };

        order.payment_status = PaymentStatus::Paid;
        order.paid_at = Some(now);
        uow.update_order(order).await?;

        Ok(purchase)
    }

    pub async fn mark_processing(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        order.status = next_status(order, OrderAction::MarkProcessing)?;
        order.processing_at = Some(now);
        uow.update_order(order).await
    }

    /// Run the delivery strategy and complete the order once every slot
    /// is delivered.
    pub async fn deliver(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        delivery: &dyn DeliveryStrategy,
        now: DateTime<Utc>,
    ) -> Result<Fulfilment, AppError> {
        next_status(order, OrderAction::Deliver)?;

        let outcome = delivery.fulfil(uow, order, now).await?;
        if let Fulfilment::Delivered { .. } = outcome {
            self.complete(uow, order, now).await?;
        }
        Ok(outcome)
    }

    pub async fn complete(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        order.status = next_status(order, OrderAction::Complete)?;
        order.completed_at = Some(now);
        uow.update_order(order).await
    }

    /// Cancel a pending or processing order.
    ///
    /// A paid order gets its refundable remainder credited back and its
    /// codes returned to the pool.
    ///
    /// # Errors
    ///
    /// - `Validation`: blank reason
    /// - `InvalidTransition`: order already completed, cancelled or refunded
    pub async fn cancel(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        reason: &str,
        delivery: &dyn DeliveryStrategy,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, AppError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::Validation(
                "Cancellation reason is required".to_string(),
            ));
        }
        let next = next_status(order, OrderAction::Cancel)?;

        let mut refund = None;
        if order.is_paid() {
            let amount = order.refundable_cents();
            if amount > 0 {
                refund = Some(
                    self.credit_refund(uow, order, amount, "Cancellation", actor)
                        .await?,
                );
                order.refunded_cents += amount;
            }
            order.payment_status = PaymentStatus::Refunded;
        }
        delivery.release(uow, order).await?;

        order.status = next;
        order.cancel_reason = Some(reason.to_string());
        order.cancelled_at = Some(now);
        uow.update_order(order).await?;

        Ok(refund)
    }

    /// Credit part or all of a paid order back to the buyer.
    ///
    /// A full refund closes the order and releases its codes. A partial one
    /// only records the amount, unless it leaves nothing refundable, in
    /// which case it closes the order the same way.
    ///
    /// # Errors
    ///
    /// - `Validation`: amount not positive or above what is still refundable
    /// - `InvalidTransition`: order not paid, or not processing/completed
    #[allow(clippy::too_many_arguments)]
    pub async fn refund(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        amount_cents: i64,
        refund_type: RefundType,
        reason: Option<String>,
        delivery: &dyn DeliveryStrategy,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Transaction, AppError> {
        let full = refund_type == RefundType::Full;
        let next = next_status(order, OrderAction::Refund { full })?;

        if amount_cents <= 0 {
            return Err(AppError::Validation(
                "Refund amount must be positive".to_string(),
            ));
        }
        let refundable = order.refundable_cents();
        if amount_cents > refundable {
            return Err(AppError::Validation(format!(
                "Refund of {amount_cents} exceeds refundable {refundable}"
            )));
        }

        let label = if full { "Refund" } else { "Partial refund" };
        let transaction = self
            .credit_refund(uow, order, amount_cents, label, actor)
            .await?;
        order.refunded_cents += amount_cents;
        order.refund_reason = reason.or(order.refund_reason.take());

        // partial refunds that use up the remainder close the order too
        let closes = full || order.refundable_cents() == 0;
        if closes {
            delivery.release(uow, order).await?;
            order.payment_status = PaymentStatus::Refunded;
            order.refunded_at = Some(now);
        }
        order.status = if closes { OrderStatus::Refunded } else { next };
        uow.update_order(order).await?;

        Ok(transaction)
    }

    pub async fn assign_codes(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &Order,
        code_ids: &[Uuid],
        delivery: &dyn DeliveryStrategy,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccessCode>, AppError> {
        next_status(order, OrderAction::AssignCodes)?;
        delivery.assign(uow, order, code_ids, now).await
    }

    async fn credit_refund(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &Order,
        amount_cents: i64,
        label: &str,
        actor: &Actor,
    ) -> Result<Transaction, AppError> {
        let entry = LedgerEntry::new(order.user_id, amount_cents, TransactionType::Refund)
            .for_order(order.id)
            .with_description(format!("{label} {}", order.order_number))
            .by(actor);
        self.ledger.credit(uow, entry).await
    }
}
