//! HTTP middleware components.
//!
//! Middleware are functions that run before route handlers.
//! They can:
//! - Attach request context (who is acting)
//! - Short-circuit requests (reject malformed headers)

/// Actor header extraction
pub mod actor;
