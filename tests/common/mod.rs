//! Shared fixtures for integration tests: an in-memory shop with a
//! recording notifier.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use storefront_fulfillment_server::{
    models::{
        actor::Actor,
        order::{CreateOrderRequest, OrderDetails},
        product::{DeliveryMode, Product},
        transaction::DepositRequest,
        user::User,
    },
    services::{
        fulfillment::FulfillmentService,
        ledger::LedgerPolicy,
        notifier::{FulfillmentEvent, Notifier},
    },
    store::memory::{MemoryState, MemoryStore},
};

/// Keeps every notification for later assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(Uuid, FulfillmentEvent)>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<(Uuid, FulfillmentEvent)> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, user_id: Uuid, event: FulfillmentEvent) {
        self.events.lock().unwrap().push((user_id, event));
    }
}

pub struct Shop {
    pub store: MemoryStore,
    pub service: Arc<FulfillmentService>,
    pub notifier: Arc<RecordingNotifier>,
    pub admin: Actor,
}

impl Shop {
    pub fn new() -> Self {
        Self::with_policy(LedgerPolicy::default())
    }

    pub fn with_policy(policy: LedgerPolicy) -> Self {
        let store = MemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let service = Arc::new(
            FulfillmentService::new(Arc::new(store.clone()), policy)
                .with_notifier(notifier.clone()),
        );
        Self {
            store,
            service,
            notifier,
            admin: Actor::new(Uuid::new_v4(), "admin"),
        }
    }

    /// A user whose balance was funded through the ledger.
    pub async fn funded_user(&self, balance_cents: i64) -> Uuid {
        let user_id = self.store.insert_user(User::new("buyer", 0)).await;
        if balance_cents > 0 {
            self.service
                .deposit(
                    &self.admin,
                    user_id,
                    DepositRequest {
                        amount_cents: balance_cents,
                        fee_cents: 0,
                        gateway: Some("test".to_string()),
                        description: None,
                    },
                )
                .await
                .unwrap();
        }
        user_id
    }

    /// An automatic-delivery product with `codes` codes in its pool.
    pub async fn stocked_product(&self, price_cents: i64, codes: usize) -> Uuid {
        let product = Product::new("Streaming account", price_cents, DeliveryMode::Automatic);
        let product_id = self.store.insert_product(product).await;
        if codes > 0 {
            let payloads: Vec<String> = (0..codes).map(|i| format!("login{i}:pw{i}")).collect();
            self.service
                .import_codes(&self.admin, product_id, &payloads)
                .await
                .unwrap();
        }
        product_id
    }

    pub async fn manual_product(&self, price_cents: i64) -> Uuid {
        let product = Product::new("Rank boosting", price_cents, DeliveryMode::Manual);
        self.store.insert_product(product).await
    }

    pub async fn order(&self, user_id: Uuid, product_id: Uuid, quantity: i32) -> OrderDetails {
        self.service
            .create_order(
                &self.admin,
                CreateOrderRequest {
                    user_id,
                    product_id,
                    quantity,
                    promo_code: None,
                    notes: None,
                },
            )
            .await
            .unwrap()
    }

    pub async fn balance(&self, user_id: Uuid) -> i64 {
        self.store
            .snapshot()
            .await
            .user(user_id)
            .unwrap()
            .balance_cents
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.store.snapshot().await
    }

    /// Cached balance matches the ledger for every given user.
    pub async fn assert_balances_consistent(&self, users: &[Uuid]) {
        let snapshot = self.snapshot().await;
        for user_id in users {
            let cached = snapshot.user(*user_id).unwrap().balance_cents;
            assert_eq!(
                cached,
                snapshot.ledger_sum(*user_id),
                "balance of {user_id} drifted from ledger"
            );
        }
    }
}
