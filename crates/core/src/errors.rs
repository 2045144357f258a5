use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::step::ApprovalRole;

/// Failure taxonomy shared by every core operation.
///
/// Each variant carries enough structured context to render a user-facing
/// message without re-querying the store. No operation leaves partial state
/// behind any of these: validation errors fire before any write, and the
/// mutating paths are single conditional statements.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient budget: requested {requested}, available {available}")]
    InsufficientBudget { available: Decimal, requested: Decimal },

    #[error("role mismatch: step requires {required:?}, actor has {actual:?}")]
    RoleMismatch { required: ApprovalRole, actual: ApprovalRole },

    #[error("already processed: {0}")]
    AlreadyProcessed(String),

    #[error("dangling reference: {entity} `{id}` not found")]
    Referential { entity: &'static str, id: String },

    #[error("storage unavailable: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn referential(entity: &'static str, id: impl Into<String>) -> Self {
        Self::Referential { entity, id: id.into() }
    }

    /// Transient errors are safe to retry wholesale; nothing was written.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
