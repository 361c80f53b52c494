//! Who is performing an operation.

use std::fmt;

use uuid::Uuid;

/// The user or staff member on whose behalf an operation runs.
///
/// Passed explicitly into every mutating fulfillment operation so ledger
/// entries and logs can be attributed without ambient request state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub name: String,
}

impl Actor {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}
