//! Fulfillment service - the public entry point for order and balance
//! operations.
//!
//! Every method opens one unit of work, runs the order state machine, the
//! ledger and the inventory pool inside it, and commits only if every step
//! succeeded. Notifications go out after the commit.
//!
//! # Locking
//!
//! Rows are locked in a fixed order: order, then user balance, then access
//! codes. Two operations on the same order serialize on the order row.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    access_code::{ImportCodesResponse, StockCounts},
    actor::Actor,
    order::{
        CreateOrderRequest, NewOrder, Order, OrderDetails, OrderStatus, PaymentStatus,
        RefundOrderRequest,
    },
    product::{DeliveryMode, Product},
    transaction::{DepositRequest, Transaction, TransactionType},
    user::BalanceCheck,
};
use crate::services::{
    delivery::{AutomaticDelivery, DeliveryStrategy, Fulfilment, ManualDelivery},
    inventory::InventoryPool,
    ledger::{Ledger, LedgerEntry, LedgerPolicy},
    notifier::{FulfillmentEvent, LogNotifier, Notifier},
    order_machine::{OrderAction, OrderStateMachine},
};
use crate::store::{Store, UnitOfWork, finish};

/// Outcome of a mutating order operation plus the event to publish once
/// it has committed.
type Outcome = (OrderDetails, Option<FulfillmentEvent>);

pub struct FulfillmentService {
    store: Arc<dyn Store>,
    machine: OrderStateMachine,
    inventory: InventoryPool,
    automatic: AutomaticDelivery,
    manual: ManualDelivery,
    notifier: Arc<dyn Notifier>,
}

impl FulfillmentService {
    pub fn new(store: Arc<dyn Store>, policy: LedgerPolicy) -> Self {
        let inventory = InventoryPool;
        Self {
            store,
            machine: OrderStateMachine::new(Ledger::new(policy)),
            inventory,
            automatic: AutomaticDelivery::new(inventory),
            manual: ManualDelivery,
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn ledger(&self) -> &Ledger {
        self.machine.ledger()
    }

    fn delivery_for(&self, product: &Product) -> &dyn DeliveryStrategy {
        match product.delivery_mode {
            DeliveryMode::Automatic => &self.automatic,
            DeliveryMode::Manual => &self.manual,
        }
    }

    /// Create a pending order.
    ///
    /// # Process
    ///
    /// 1. Check the product is active and the quantity within its limits
    /// 2. For automatic delivery, check current stock covers the quantity
    /// 3. Apply the promotion, if any
    /// 4. Insert the order with a fresh order number
    ///
    /// No stock is reserved and no money moves until payment.
    ///
    /// # Errors
    ///
    /// - `Validation`: quantity out of bounds, inactive product, unusable promotion
    /// - `NotFound`: user or product doesn't exist
    /// - `OutOfStock`: automatic delivery with too few available codes
    pub async fn create_order(
        &self,
        actor: &Actor,
        request: CreateOrderRequest,
    ) -> Result<OrderDetails, AppError> {
        let mut uow = self.store.begin().await?;
        let result = self.create_order_in(&mut *uow, actor, request).await;
        finish(uow, result).await
    }

    async fn create_order_in(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        request: CreateOrderRequest,
    ) -> Result<OrderDetails, AppError> {
        let product = load_product(uow, request.product_id).await?;
        if !product.is_active {
            return Err(AppError::Validation(format!(
                "{} is not available for purchase",
                product.name
            )));
        }

        let quantity = request.quantity;
        let min = product.min_purchase.max(1);
        if quantity < min {
            return Err(AppError::Validation(format!(
                "Quantity must be at least {min}"
            )));
        }
        if let Some(max) = product.max_purchase.filter(|max| quantity > *max) {
            return Err(AppError::Validation(format!(
                "Quantity must be at most {max}"
            )));
        }

        uow.find_user(request.user_id)
            .await?
            .ok_or(AppError::NotFound("User"))?;

        if product.delivery_mode == DeliveryMode::Automatic {
            let available = self.inventory.available_count(uow, product.id).await?;
            if available < i64::from(quantity) {
                return Err(AppError::OutOfStock {
                    requested: i64::from(quantity),
                    available,
                });
            }
        }

        let total_cents = product
            .price_cents
            .checked_mul(i64::from(quantity))
            .ok_or_else(|| AppError::Validation("Order total overflows".to_string()))?;

        let mut promo_code = None;
        let mut discount_cents = 0;
        let requested_code = request
            .promo_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty());
        if let Some(code) = requested_code {
            let code = code.to_uppercase();
            let promotion = uow
                .find_promotion(&code)
                .await?
                .filter(|p| p.is_usable_at(Utc::now()))
                .ok_or_else(|| {
                    AppError::Validation(format!("Promotion code {code} is not valid"))
                })?;
            discount_cents = promotion.discount_for(total_cents);
            promo_code = Some(code);
        }

        let order = uow
            .insert_order(NewOrder {
                order_number: generate_order_number(Utc::now()),
                user_id: request.user_id,
                product_id: product.id,
                quantity,
                unit_price_cents: product.price_cents,
                total_cents,
                discount_cents,
                net_cents: total_cents - discount_cents,
                promo_code,
                notes: request.notes,
            })
            .await?;

        tracing::info!(
            order_number = %order.order_number,
            product = %product.name,
            quantity,
            net_cents = order.net_cents,
            actor = %actor,
            "Order created"
        );

        Ok(OrderDetails {
            order,
            codes: Vec::new(),
        })
    }

    /// Pay for an order from the buyer's balance and fulfil it.
    ///
    /// The debit, the payment status change and the delivery run in a single
    /// unit of work, so the purchase entry exists exactly when the codes
    /// were handed out. A shortfall discovered while reserving undoes the
    /// whole payment.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition`: already paid, cancelled or refunded
    /// - `OutOfStock`: not enough codes for the open slots
    /// - `InsufficientFunds`: balance lower than the net amount
    pub async fn pay_with_balance(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<OrderDetails, AppError> {
        let mut uow = self.store.begin().await?;
        let result = self.pay_in(&mut *uow, actor, order_id, Utc::now()).await;
        self.publish(finish(uow, result).await?)
    }

    async fn pay_in(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Outcome, AppError> {
        let mut order = uow.lock_order(order_id).await?;
        let product = load_product(uow, order.product_id).await?;
        let delivery = self.delivery_for(&product);

        let purchase = self
            .machine
            .pay(uow, &mut order, delivery, actor, now)
            .await?;

        let fulfilment = self.advance(uow, &mut order, delivery, now).await?;
        if let Some(Fulfilment::Partial { delivered, .. }) = fulfilment {
            return Err(AppError::OutOfStock {
                requested: i64::from(order.quantity),
                available: delivered,
            });
        }

        tracing::info!(
            order_number = %order.order_number,
            transaction = purchase.as_ref().map(|t| t.code.as_str()).unwrap_or("-"),
            status = %order.status,
            actor = %actor,
            "Order paid from balance"
        );

        let event = completion_event(&order, OrderStatus::Pending);
        Ok((self.details(uow, order).await?, event))
    }

    /// Move an order forward as far as it can go on its own.
    ///
    /// Safe to call repeatedly: a completed order is returned unchanged.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition`: order is cancelled or refunded
    pub async fn process_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<OrderDetails, AppError> {
        let mut uow = self.store.begin().await?;
        let result = self.process_in(&mut *uow, actor, order_id, Utc::now()).await;
        self.publish(finish(uow, result).await?)
    }

    async fn process_in(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Outcome, AppError> {
        let mut order = uow.lock_order(order_id).await?;
        let before = order.status;
        let product = load_product(uow, order.product_id).await?;
        let delivery = self.delivery_for(&product);

        let fulfilment = self.advance(uow, &mut order, delivery, now).await?;

        tracing::info!(
            order_number = %order.order_number,
            from = %before,
            to = %order.status,
            fulfilment = ?fulfilment,
            actor = %actor,
            "Order processed"
        );

        let event = completion_event(&order, before);
        Ok((self.details(uow, order).await?, event))
    }

    /// Shared processing step for `process_order` and `pay_with_balance`.
    ///
    /// Returns `None` when nothing was delivered (completed already, or
    /// not paid yet).
    async fn advance(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        delivery: &dyn DeliveryStrategy,
        now: DateTime<Utc>,
    ) -> Result<Option<Fulfilment>, AppError> {
        if order.status == OrderStatus::Completed {
            return Ok(None);
        }
        if order.status != OrderStatus::Processing {
            self.machine.mark_processing(uow, order, now).await?;
        }
        if !order.is_paid() {
            return Ok(None);
        }
        let fulfilment = self.machine.deliver(uow, order, delivery, now).await?;
        Ok(Some(fulfilment))
    }

    /// Staff completion of a manually delivered order.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition`: product uses automatic delivery, or the order
    ///   is not paid and processing
    pub async fn complete_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<OrderDetails, AppError> {
        let mut uow = self.store.begin().await?;
        let result = self.complete_in(&mut *uow, actor, order_id).await;
        self.publish(finish(uow, result).await?)
    }

    async fn complete_in(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<Outcome, AppError> {
        let mut order = uow.lock_order(order_id).await?;
        let product = load_product(uow, order.product_id).await?;
        if self.delivery_for(&product).mode() != DeliveryMode::Manual {
            return Err(AppError::InvalidTransition {
                from: order.status,
                payment: order.payment_status,
                action: OrderAction::Complete,
            });
        }

        let before = order.status;
        self.machine.complete(uow, &mut order, Utc::now()).await?;

        tracing::info!(
            order_number = %order.order_number,
            actor = %actor,
            "Manual order completed"
        );

        let event = completion_event(&order, before);
        Ok((self.details(uow, order).await?, event))
    }

    /// Cancel an order that has not completed yet.
    ///
    /// # Errors
    ///
    /// - `Validation`: blank reason
    /// - `InvalidTransition`: order completed, cancelled or refunded
    pub async fn cancel_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
        reason: &str,
    ) -> Result<OrderDetails, AppError> {
        let mut uow = self.store.begin().await?;
        let result = self.cancel_in(&mut *uow, actor, order_id, reason).await;
        self.publish(finish(uow, result).await?)
    }

    async fn cancel_in(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        order_id: Uuid,
        reason: &str,
    ) -> Result<Outcome, AppError> {
        let mut order = uow.lock_order(order_id).await?;
        let product = load_product(uow, order.product_id).await?;
        let delivery = self.delivery_for(&product);

        let refund = self
            .machine
            .cancel(uow, &mut order, reason, delivery, actor, Utc::now())
            .await?;
        let refunded_cents = refund.as_ref().map_or(0, |t| t.net_amount_cents);

        tracing::info!(
            order_number = %order.order_number,
            refunded_cents,
            actor = %actor,
            "Order cancelled"
        );

        let event = FulfillmentEvent::cancelled(&order, refunded_cents);
        Ok((self.details(uow, order).await?, Some(event)))
    }

    /// Refund part or all of a paid order to the buyer's balance.
    ///
    /// # Errors
    ///
    /// - `Validation`: amount not positive or above what is still refundable
    /// - `InvalidTransition`: order not paid, or not processing/completed
    pub async fn refund_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
        request: RefundOrderRequest,
    ) -> Result<OrderDetails, AppError> {
        let mut uow = self.store.begin().await?;
        let result = self.refund_in(&mut *uow, actor, order_id, request).await;
        self.publish(finish(uow, result).await?)
    }

    async fn refund_in(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        order_id: Uuid,
        request: RefundOrderRequest,
    ) -> Result<Outcome, AppError> {
        let mut order = uow.lock_order(order_id).await?;
        let product = load_product(uow, order.product_id).await?;
        let delivery = self.delivery_for(&product);

        let transaction = self
            .machine
            .refund(
                uow,
                &mut order,
                request.amount_cents,
                request.refund_type,
                request.reason,
                delivery,
                actor,
                Utc::now(),
            )
            .await?;

        let full = order.payment_status == PaymentStatus::Refunded;
        tracing::info!(
            order_number = %order.order_number,
            transaction = %transaction.code,
            amount_cents = request.amount_cents,
            full,
            actor = %actor,
            "Order refunded"
        );

        let event = FulfillmentEvent::refunded(&order, request.amount_cents, full);
        Ok((self.details(uow, order).await?, Some(event)))
    }

    /// Bind hand-picked codes to a paid, processing order.
    ///
    /// The order keeps its status; the next `process_order` delivers the
    /// codes and completes it once every slot is filled.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition`: manual delivery, or order not paid and processing
    /// - `Validation`: more codes than open slots, or repeated ids
    /// - `Conflict`: a code is missing, foreign, or already taken
    pub async fn assign_codes(
        &self,
        actor: &Actor,
        order_id: Uuid,
        code_ids: &[Uuid],
    ) -> Result<OrderDetails, AppError> {
        let mut uow = self.store.begin().await?;
        let result = self.assign_in(&mut *uow, actor, order_id, code_ids).await;
        finish(uow, result).await
    }

    async fn assign_in(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        order_id: Uuid,
        code_ids: &[Uuid],
    ) -> Result<OrderDetails, AppError> {
        let order = uow.lock_order(order_id).await?;
        let product = load_product(uow, order.product_id).await?;
        let delivery = self.delivery_for(&product);

        let assigned = self
            .machine
            .assign_codes(uow, &order, code_ids, delivery, Utc::now())
            .await?;

        tracing::info!(
            order_number = %order.order_number,
            assigned = assigned.len(),
            actor = %actor,
            "Codes assigned"
        );

        self.details(uow, order).await
    }

    /// Credit a user's balance with an external top-up.
    ///
    /// # Errors
    ///
    /// - `Validation`: non-positive amount, or fee outside `0..amount`
    /// - `NotFound`: user doesn't exist
    pub async fn deposit(
        &self,
        actor: &Actor,
        user_id: Uuid,
        request: DepositRequest,
    ) -> Result<Transaction, AppError> {
        let entry = LedgerEntry::new(user_id, request.amount_cents, TransactionType::Deposit)
            .with_fee(request.fee_cents)
            .with_gateway(request.gateway)
            .with_description(request.description.unwrap_or_else(|| "Deposit".to_string()))
            .by(actor);

        let mut uow = self.store.begin().await?;
        let result = self.ledger().credit(&mut *uow, entry).await;
        let transaction = finish(uow, result).await?;

        tracing::info!(
            transaction = %transaction.code,
            user_id = %user_id,
            net_cents = transaction.net_amount_cents,
            actor = %actor,
            "Deposit recorded"
        );

        Ok(transaction)
    }

    /// Undo a completed ledger entry.
    ///
    /// # Errors
    ///
    /// - `InvalidState`: not completed, already reversed, tied to an order,
    ///   or not reversible
    /// - `InsufficientFunds`: reversing a credit would overdraw the balance
    /// - `NotFound`: transaction doesn't exist
    pub async fn reverse_transaction(
        &self,
        actor: &Actor,
        transaction_id: Uuid,
    ) -> Result<Transaction, AppError> {
        let mut uow = self.store.begin().await?;
        let result = self.ledger().reverse(&mut *uow, transaction_id, actor).await;
        finish(uow, result).await
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<BalanceCheck, AppError> {
        let mut uow = self.store.begin().await?;
        let result = self.ledger().balance_check(&mut *uow, user_id).await;
        finish(uow, result).await
    }

    pub async fn order(&self, order_id: Uuid) -> Result<OrderDetails, AppError> {
        let mut uow = self.store.begin().await?;
        let result = async {
            let order = uow
                .find_order(order_id)
                .await?
                .ok_or(AppError::NotFound("Order"))?;
            self.details(&mut *uow, order).await
        }
        .await;
        finish(uow, result).await
    }

    pub async fn transaction(&self, transaction_id: Uuid) -> Result<Transaction, AppError> {
        let mut uow = self.store.begin().await?;
        let result = uow
            .find_transaction(transaction_id)
            .await
            .and_then(|t| t.ok_or(AppError::NotFound("Transaction")));
        finish(uow, result).await
    }

    pub async fn stock(&self, product_id: Uuid) -> Result<StockCounts, AppError> {
        let mut uow = self.store.begin().await?;
        let result = async {
            let product = load_product(&mut *uow, product_id).await?;
            self.inventory.stock(&mut *uow, product.id).await
        }
        .await;
        finish(uow, result).await
    }

    /// Add codes to an automatic-delivery product's pool.
    ///
    /// # Errors
    ///
    /// - `Validation`: manual product, no payloads, or a blank payload
    /// - `NotFound`: product doesn't exist
    pub async fn import_codes(
        &self,
        actor: &Actor,
        product_id: Uuid,
        payloads: &[String],
    ) -> Result<ImportCodesResponse, AppError> {
        let mut uow = self.store.begin().await?;
        let result = async {
            let product = load_product(&mut *uow, product_id).await?;
            let codes = self.inventory.import(&mut *uow, &product, payloads).await?;
            let stock = self.inventory.stock(&mut *uow, product.id).await?;
            tracing::info!(
                product = %product.name,
                imported = codes.len(),
                available = stock.available,
                actor = %actor,
                "Access codes imported"
            );
            Ok(ImportCodesResponse {
                imported: codes.len(),
                stock,
            })
        }
        .await;
        finish(uow, result).await
    }

    async fn details(
        &self,
        uow: &mut dyn UnitOfWork,
        order: Order,
    ) -> Result<OrderDetails, AppError> {
        let codes = uow.order_codes(order.id).await?;
        Ok(OrderDetails { order, codes })
    }

    fn publish(&self, (details, event): Outcome) -> Result<OrderDetails, AppError> {
        if let Some(event) = event {
            self.notifier.notify(details.order.user_id, event);
        }
        Ok(details)
    }
}

async fn load_product(uow: &mut dyn UnitOfWork, product_id: Uuid) -> Result<Product, AppError> {
    uow.find_product(product_id)
        .await?
        .ok_or(AppError::NotFound("Product"))
}

/// Completion event if the order reached `completed` during this operation.
fn completion_event(order: &Order, before: OrderStatus) -> Option<FulfillmentEvent> {
    (order.status == OrderStatus::Completed && before != OrderStatus::Completed)
        .then(|| FulfillmentEvent::completed(order))
}

/// Generate a human-readable order number.
///
/// # Output
///
/// `ORD-YYYYMMDD-XXXXXXXX`: the UTC date plus 8 upper-case hex characters
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let bytes: [u8; 4] = rand::random();
    format!("ORD-{}-{}", now.format("%Y%m%d"), hex::encode_upper(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn order_numbers_carry_the_date() {
        let now = Utc.with_ymd_and_hms(2025, 3, 7, 12, 0, 0).unwrap();
        let number = generate_order_number(now);

        assert!(number.starts_with("ORD-20250307-"));
        assert_eq!(number.len(), "ORD-20250307-".len() + 8);
        assert!(
            number[13..]
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
    }
}
