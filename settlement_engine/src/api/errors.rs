use thiserror::Error;

use crate::{
    state_machine::InvalidTransition,
    traits::{GatewayError, SettlementDbError},
};

/// The error taxonomy surfaced by the workflow APIs. The server layer maps these onto HTTP
/// status codes; nothing in here is retryable without either a state change or fixed input,
/// except `GatewayFailure` (explicit retry operation) and `RateLimited` (wait out the window).
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
    #[error("This action requires approval, but no requester is on record")]
    ApprovalRequired,
    #[error("The requesting actor may not approve their own request")]
    SelfApprovalForbidden,
    #[error("Rate limit exceeded; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Settlement gateway failure: {0}")]
    GatewayFailure(String),
    #[error("Invalid input: {0}")]
    ValidationFailure(String),
    #[error("Conflicting concurrent operation: {0}")]
    Conflict(String),
    #[error("Backend failure: {0}")]
    DatabaseError(String),
}

impl From<InvalidTransition> for WorkflowError {
    fn from(e: InvalidTransition) -> Self {
        WorkflowError::InvalidTransition(e.to_string())
    }
}

impl From<GatewayError> for WorkflowError {
    fn from(e: GatewayError) -> Self {
        WorkflowError::GatewayFailure(e.to_string())
    }
}

impl From<SettlementDbError> for WorkflowError {
    fn from(e: SettlementDbError) -> Self {
        use SettlementDbError::*;
        match e {
            OrderNotFound(_) | OrderIdNotFound(_) | RefundNotFound(_) | PayoutNotFound(_) | EventNotFound(_) => {
                WorkflowError::NotFound(e.to_string())
            },
            InvalidTransition(inner) => inner.into(),
            RefundAlreadySettled(_) | PayoutAlreadySettled(_) => WorkflowError::InvalidTransition(e.to_string()),
            ConcurrentUpdate(msg) => WorkflowError::Conflict(msg),
            DatabaseError(msg) => WorkflowError::DatabaseError(msg),
        }
    }
}
