//! # Planning Error Types Module
//!
//! This module defines the error types returned by the planning engine.
//! Every failure is local to the operation that raised it.

/// Errors raised by ordering, ingredient resolution and shopping list operations
#[derive(Debug, Clone, PartialEq)]
pub enum PlanningError {
    /// A referenced item or service does not exist
    NotFound(String),
    /// The ingredient generator failed or produced no usable ingredients
    GenerationFailed(String),
    /// A reorder request did not list exactly the members of the service
    MembershipMismatch(String),
    /// The request itself is unusable (empty dish name, bad serving count)
    InvalidInput(String),
    /// Storage or transaction failure; nothing was committed
    Storage(String),
}

impl PlanningError {
    /// Whether the caller may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlanningError::GenerationFailed(_) | PlanningError::Storage(_))
    }
}

impl std::fmt::Display for PlanningError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanningError::NotFound(msg) => write!(f, "Not found: {msg}"),
            PlanningError::GenerationFailed(msg) => write!(f, "Generation failed: {msg}"),
            PlanningError::MembershipMismatch(msg) => write!(f, "Membership mismatch: {msg}"),
            PlanningError::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
            PlanningError::Storage(msg) => write!(f, "Storage error: {msg}"),
        }
    }
}

impl std::error::Error for PlanningError {}

impl From<sqlx::Error> for PlanningError {
    fn from(err: sqlx::Error) -> Self {
        PlanningError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for PlanningError {
    fn from(err: serde_json::Error) -> Self {
        PlanningError::Storage(format!("cache payload: {err}"))
    }
}

impl From<anyhow::Error> for PlanningError {
    fn from(err: anyhow::Error) -> Self {
        PlanningError::Storage(err.to_string())
    }
}

/// Result alias used across the planning engine
pub type PlanningResult<T> = Result<T, PlanningError>;
