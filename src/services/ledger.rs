//! Ledger - balance-affecting events and the cached user balance.
//!
//! This service handles:
//! - Recording credits and debits as completed transactions
//! - Keeping `users.balance_cents` equal to the sum of completed entries
//! - Reversing completed entries exactly once
//!
//! # Atomicity Guarantees
//!
//! Every method works inside the caller's unit of work. The balance row is
//! locked before the new value is computed, and the ledger entry and the
//! balance update commit or roll back together.

use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    actor::Actor,
    transaction::{NewTransaction, Transaction, TransactionStatus, TransactionType},
    user::BalanceCheck,
};
use crate::store::UnitOfWork;

/// How far administrative operations may push a balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerPolicy {
    /// Allow `BalanceGate::Overdraft` debits and credit reversals to leave
    /// a negative balance.
    pub allow_overdraft: bool,
}

/// Whether a debit must be covered by the current balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceGate {
    /// Reject the debit if the balance would go negative.
    Enforce,
    /// Administrative debit; may go negative only if the policy allows it.
    Overdraft,
}

/// One balance movement requested by a caller.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub user_id: Uuid,
    /// Positive gross amount in cents; the ledger applies the sign
    pub amount_cents: i64,
    /// Fee withheld from a credit; must be zero for debits
    pub fee_cents: i64,
    pub transaction_type: TransactionType,
    pub order_id: Option<Uuid>,
    pub gateway: Option<String>,
    pub description: Option<String>,
    pub performed_by: Option<Uuid>,
}

impl LedgerEntry {
    pub fn new(user_id: Uuid, amount_cents: i64, transaction_type: TransactionType) -> Self {
        Self {
            user_id,
            amount_cents,
            fee_cents: 0,
            transaction_type,
            order_id: None,
            gateway: None,
            description: None,
            performed_by: None,
        }
    }

    pub fn for_order(mut self, order_id: Uuid) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn with_fee(mut self, fee_cents: i64) -> Self {
        self.fee_cents = fee_cents;
        self
    }

    pub fn with_gateway(mut self, gateway: Option<String>) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn by(mut self, actor: &Actor) -> Self {
        self.performed_by = Some(actor.id);
        self
    }
}

/// Append-only ledger over the transactions table.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    policy: LedgerPolicy,
}

impl Ledger {
    pub fn new(policy: LedgerPolicy) -> Self {
        Self { policy }
    }

    /// Add money to a user's balance.
    ///
    /// # Process
    ///
    /// 1. Validate amount and fee
    /// 2. Lock the balance row
    /// 3. Record a completed transaction with `net = amount - fee`
    /// 4. Store the new balance
    ///
    /// # Errors
    ///
    /// - `Validation`: amount is zero or negative, or the fee is negative or
    ///   swallows the whole amount
    /// - `NotFound`: user doesn't exist
    pub async fn credit(
        &self,
        uow: &mut dyn UnitOfWork,
        entry: LedgerEntry,
    ) -> Result<Transaction, AppError> {
        if entry.amount_cents <= 0 {
            return Err(AppError::Validation(
                "Amount must be positive".to_string(),
            ));
        }
        if entry.fee_cents < 0 || entry.fee_cents >= entry.amount_cents {
            return Err(AppError::Validation(
                "Fee must be non-negative and smaller than the amount".to_string(),
            ));
        }

        let balance = uow.lock_balance(entry.user_id).await?;
        let net = entry.amount_cents - entry.fee_cents;
        let new_balance = balance
            .checked_add(net)
            .ok_or_else(|| AppError::Validation("Balance overflow".to_string()))?;

        let transaction = uow
            .insert_transaction(completed(entry, 1))
            .await?;
        uow.store_balance(transaction.user_id, new_balance).await?;

        tracing::debug!(
            code = %transaction.code,
            user_id = %transaction.user_id,
            net_cents = transaction.net_amount_cents,
            balance_cents = new_balance,
            "ledger credit"
        );

        Ok(transaction)
    }

    /// Remove money from a user's balance.
    ///
    /// # Errors
    ///
    /// - `Validation`: amount is zero or negative, or a fee was given
    /// - `InsufficientFunds`: the balance would go negative and `gate`
    ///   together with the policy does not allow it
    /// - `NotFound`: user doesn't exist
    pub async fn debit(
        &self,
        uow: &mut dyn UnitOfWork,
        entry: LedgerEntry,
        gate: BalanceGate,
    ) -> Result<Transaction, AppError> {
        if entry.amount_cents <= 0 {
            return Err(AppError::Validation(
                "Amount must be positive".to_string(),
            ));
        }
        if entry.fee_cents != 0 {
            return Err(AppError::Validation(
                "Debits cannot carry a fee".to_string(),
            ));
        }

        let balance = uow.lock_balance(entry.user_id).await?;
        let new_balance = balance
            .checked_sub(entry.amount_cents)
            .ok_or_else(|| AppError::Validation("Balance overflow".to_string()))?;

        if new_balance < 0 && !self.overdraft_allowed(gate) {
            return Err(AppError::InsufficientFunds {
                balance_cents: balance,
                required_cents: entry.amount_cents,
            });
        }

        let transaction = uow
            .insert_transaction(completed(entry, -1))
            .await?;
        uow.store_balance(transaction.user_id, new_balance).await?;

        tracing::debug!(
            code = %transaction.code,
            user_id = %transaction.user_id,
            net_cents = transaction.net_amount_cents,
            balance_cents = new_balance,
            "ledger debit"
        );

        Ok(transaction)
    }

    /// Undo a completed transaction and mark it cancelled.
    ///
    /// Entries tied to an order move money only through the order's refund
    /// and cancel transitions, which keep `refunded_cents` and the payment
    /// status in step with the ledger.
    ///
    /// The inverse of `net_amount_cents` is applied to the balance, so a
    /// reversed entry no longer contributes to the user's balance.
    ///
    /// # Errors
    ///
    /// - `InvalidState`: the transaction is not completed (including one
    ///   that was already reversed), belongs to an order, or its type
    ///   cannot be reversed
    /// - `InsufficientFunds`: reversing a credit would leave a negative
    ///   balance and the policy forbids overdrafts
    /// - `NotFound`: transaction doesn't exist
    pub async fn reverse(
        &self,
        uow: &mut dyn UnitOfWork,
        transaction_id: Uuid,
        actor: &Actor,
    ) -> Result<Transaction, AppError> {
        let transaction = uow.lock_transaction(transaction_id).await?;

        if transaction.status != TransactionStatus::Completed {
            return Err(AppError::InvalidState(format!(
                "transaction {} is {:?}, only completed transactions can be reversed",
                transaction.code, transaction.status
            )));
        }
        if transaction.order_id.is_some() {
            return Err(AppError::InvalidState(format!(
                "transaction {} belongs to an order; refund or cancel the order instead",
                transaction.code
            )));
        }
        match transaction.transaction_type {
            TransactionType::Deposit | TransactionType::Refund | TransactionType::Purchase => {}
            TransactionType::ReferralCommission => {
                return Err(AppError::InvalidState(format!(
                    "{} transactions cannot be reversed",
                    transaction.transaction_type.as_str()
                )));
            }
        }

        let balance = uow.lock_balance(transaction.user_id).await?;
        let new_balance = balance
            .checked_sub(transaction.net_amount_cents)
            .ok_or_else(|| AppError::Validation("Balance overflow".to_string()))?;

        if new_balance < 0 && transaction.net_amount_cents > 0 && !self.policy.allow_overdraft {
            return Err(AppError::InsufficientFunds {
                balance_cents: balance,
                required_cents: transaction.net_amount_cents,
            });
        }

        uow.set_transaction_status(transaction.id, TransactionStatus::Cancelled)
            .await?;
        uow.store_balance(transaction.user_id, new_balance).await?;

        tracing::info!(
            code = %transaction.code,
            actor = %actor,
            balance_cents = new_balance,
            "Transaction reversed"
        );

        Ok(Transaction {
            status: TransactionStatus::Cancelled,
            ..transaction
        })
    }

    /// Compare the cached balance with the sum of completed entries.
    pub async fn balance_check(
        &self,
        uow: &mut dyn UnitOfWork,
        user_id: Uuid,
    ) -> Result<BalanceCheck, AppError> {
        let user = uow
            .find_user(user_id)
            .await?
            .ok_or(AppError::NotFound("User"))?;
        let ledger_cents = uow.ledger_sum(user_id).await?;

        if user.balance_cents != ledger_cents {
            tracing::warn!(
                user_id = %user_id,
                balance_cents = user.balance_cents,
                ledger_cents,
                "Cached balance disagrees with ledger"
            );
        }

        Ok(BalanceCheck {
            user_id,
            balance_cents: user.balance_cents,
            ledger_cents,
            consistent: user.balance_cents == ledger_cents,
        })
    }

    fn overdraft_allowed(&self, gate: BalanceGate) -> bool {
        gate == BalanceGate::Overdraft && self.policy.allow_overdraft
    }
}

/// Build a completed ledger row; `sign` is +1 for credits, -1 for debits.
fn completed(entry: LedgerEntry, sign: i64) -> NewTransaction {
    let amount_cents = sign * entry.amount_cents;
    NewTransaction {
        code: generate_transaction_code(),
        user_id: entry.user_id,
        order_id: entry.order_id,
        transaction_type: entry.transaction_type,
        amount_cents,
        fee_cents: entry.fee_cents,
        net_amount_cents: amount_cents - entry.fee_cents,
        status: TransactionStatus::Completed,
        gateway: entry.gateway,
        description: entry.description,
        performed_by: entry.performed_by,
    }
}

/// Generate an external-facing transaction code.
///
/// # Output
///
/// `TRX-` followed by 16 upper-case hex characters (8 random bytes)
pub fn generate_transaction_code() -> String {
    let bytes: [u8; 8] = rand::random();
    format!("TRX-{}", hex::encode_upper(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::User;
    use crate::store::{Store, memory::MemoryStore};

    fn admin() -> Actor {
        Actor::new(Uuid::new_v4(), "admin")
    }

    async fn store_with_user(balance_cents: i64) -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let user_id = store.insert_user(User::new("buyer", balance_cents)).await;
        (store, user_id)
    }

    #[tokio::test]
    async fn credit_applies_net_of_fee() {
        let (store, user_id) = store_with_user(0).await;
        let ledger = Ledger::default();

        let mut uow = store.begin().await.unwrap();
        let tx = ledger
            .credit(
                &mut *uow,
                LedgerEntry::new(user_id, 1_000, TransactionType::Deposit).with_fee(25),
            )
            .await
            .unwrap();
        uow.commit().await.unwrap();
        drop(uow);

        assert_eq!(tx.net_amount_cents, 975);
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert!(tx.code.starts_with("TRX-"));
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.user(user_id).unwrap().balance_cents, 975);
        assert_eq!(snapshot.ledger_sum(user_id), 975);
    }

    #[tokio::test]
    async fn credit_rejects_non_positive_amounts() {
        let (store, user_id) = store_with_user(0).await;
        let ledger = Ledger::default();
        let mut uow = store.begin().await.unwrap();

        for amount in [0, -5] {
            let err = ledger
                .credit(
                    &mut *uow,
                    LedgerEntry::new(user_id, amount, TransactionType::Deposit),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }

        let err = ledger
            .credit(
                &mut *uow,
                LedgerEntry::new(user_id, 100, TransactionType::Deposit).with_fee(100),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn enforced_debit_cannot_overdraw() {
        let (store, user_id) = store_with_user(500).await;
        let ledger = Ledger::new(LedgerPolicy {
            allow_overdraft: true,
        });
        let mut uow = store.begin().await.unwrap();

        let err = ledger
            .debit(
                &mut *uow,
                LedgerEntry::new(user_id, 600, TransactionType::Purchase),
                BalanceGate::Enforce,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientFunds {
                balance_cents: 500,
                required_cents: 600
            }
        ));
    }

    #[tokio::test]
    async fn overdraft_debit_depends_on_policy() {
        let (store, user_id) = store_with_user(100).await;

        let strict = Ledger::default();
        let mut uow = store.begin().await.unwrap();
        let err = strict
            .debit(
                &mut *uow,
                LedgerEntry::new(user_id, 300, TransactionType::Purchase),
                BalanceGate::Overdraft,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds { .. }));
        uow.rollback().await.unwrap();
        drop(uow);

        let lenient = Ledger::new(LedgerPolicy {
            allow_overdraft: true,
        });
        let mut uow = store.begin().await.unwrap();
        let tx = lenient
            .debit(
                &mut *uow,
                LedgerEntry::new(user_id, 300, TransactionType::Purchase),
                BalanceGate::Overdraft,
            )
            .await
            .unwrap();
        uow.commit().await.unwrap();
        drop(uow);

        assert_eq!(tx.amount_cents, -300);
        assert_eq!(tx.net_amount_cents, -300);
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.user(user_id).unwrap().balance_cents, -200);
        assert_eq!(snapshot.ledger_sum(user_id), -300);
    }

    #[tokio::test]
    async fn reversing_twice_is_rejected() {
        let (store, user_id) = store_with_user(0).await;
        let ledger = Ledger::default();
        let actor = admin();

        let mut uow = store.begin().await.unwrap();
        let deposit = ledger
            .credit(
                &mut *uow,
                LedgerEntry::new(user_id, 800, TransactionType::Deposit),
            )
            .await
            .unwrap();
        let reversed = ledger.reverse(&mut *uow, deposit.id, &actor).await.unwrap();
        assert_eq!(reversed.status, TransactionStatus::Cancelled);

        let err = ledger
            .reverse(&mut *uow, deposit.id, &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        assert_eq!(uow.lock_balance(user_id).await.unwrap(), 0);
        assert_eq!(uow.ledger_sum(user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reversing_a_spent_credit_needs_funds() {
        let (store, user_id) = store_with_user(0).await;
        let ledger = Ledger::default();

        let mut uow = store.begin().await.unwrap();
        let deposit = ledger
            .credit(
                &mut *uow,
                LedgerEntry::new(user_id, 1_000, TransactionType::Deposit),
            )
            .await
            .unwrap();
        ledger
            .debit(
                &mut *uow,
                LedgerEntry::new(user_id, 700, TransactionType::Purchase),
                BalanceGate::Enforce,
            )
            .await
            .unwrap();

        let err = ledger
            .reverse(&mut *uow, deposit.id, &admin())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn reversing_a_purchase_restores_balance() {
        let (store, user_id) = store_with_user(1_000).await;
        let ledger = Ledger::default();

        let mut uow = store.begin().await.unwrap();
        let purchase = ledger
            .debit(
                &mut *uow,
                LedgerEntry::new(user_id, 400, TransactionType::Purchase),
                BalanceGate::Enforce,
            )
            .await
            .unwrap();
        ledger
            .reverse(&mut *uow, purchase.id, &admin())
            .await
            .unwrap();

        assert_eq!(uow.lock_balance(user_id).await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn referral_commissions_are_not_reversible() {
        let (store, user_id) = store_with_user(0).await;
        let ledger = Ledger::default();

        let mut uow = store.begin().await.unwrap();
        let commission = ledger
            .credit(
                &mut *uow,
                LedgerEntry::new(user_id, 50, TransactionType::ReferralCommission),
            )
            .await
            .unwrap();

        let err = ledger
            .reverse(&mut *uow, commission.id, &admin())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn order_entries_are_not_reversible() {
        let (store, user_id) = store_with_user(1_000).await;
        let ledger = Ledger::default();

        let mut uow = store.begin().await.unwrap();
        let purchase = ledger
            .debit(
                &mut *uow,
                LedgerEntry::new(user_id, 600, TransactionType::Purchase)
                    .for_order(Uuid::new_v4()),
                BalanceGate::Enforce,
            )
            .await
            .unwrap();

        let err = ledger
            .reverse(&mut *uow, purchase.id, &admin())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(uow.lock_balance(user_id).await.unwrap(), 400);
    }

    #[tokio::test]
    async fn balance_check_detects_drift() {
        let (store, user_id) = store_with_user(0).await;
        let ledger = Ledger::default();

        let mut uow = store.begin().await.unwrap();
        ledger
            .credit(
                &mut *uow,
                LedgerEntry::new(user_id, 300, TransactionType::Deposit),
            )
            .await
            .unwrap();
        let check = ledger.balance_check(&mut *uow, user_id).await.unwrap();
        assert!(check.consistent);
        assert_eq!(check.ledger_cents, 300);

        uow.store_balance(user_id, 999).await.unwrap();
        let check = ledger.balance_check(&mut *uow, user_id).await.unwrap();
        assert!(!check.consistent);
        assert_eq!(check.balance_cents, 999);
    }

    #[test]
    fn transaction_codes_are_unique_and_well_formed() {
        let a = generate_transaction_code();
        let b = generate_transaction_code();
        assert_ne!(a, b);
        assert_eq!(a.len(), 20);
        assert!(a[4..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }
}
