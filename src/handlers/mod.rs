//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, actor extension)
//! 2. Calls the fulfillment service
//! 3. Returns HTTP response (JSON, status code)

/// Service health
pub mod health;
/// Order lifecycle endpoints
pub mod orders;
/// Code pool endpoints
pub mod products;
/// Ledger entry endpoints
pub mod transactions;
/// Balance endpoints
pub mod users;
