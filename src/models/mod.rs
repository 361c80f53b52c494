//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables.

/// Redeemable credential inventory
pub mod access_code;
/// Operation attribution
pub mod actor;
/// Order entity and lifecycle enums
pub mod order;
/// Catalog data read during ordering
pub mod product;
/// Ledger entries
pub mod transaction;
/// Balance holders
pub mod user;
