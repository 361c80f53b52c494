//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They run inside a unit of work handed to them by [`fulfillment`], which
//! owns commit and rollback.

pub mod delivery;
pub mod fulfillment;
pub mod inventory;
pub mod ledger;
pub mod notifier;
pub mod order_machine;
pub mod retry;
