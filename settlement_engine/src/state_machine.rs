//! Pure order-status transition rules. No I/O lives here; every status change anywhere in the
//! engine goes through [`apply`], so the full lifecycle is checkable in one table.

use thiserror::Error;

use crate::db_types::{MappedStatus, OrderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid order transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// Returns whether the edge `from -> to` exists in the lifecycle table.
pub fn validate(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Paid)
            | (Pending, Canceled)
            | (Pending, Failed)
            | (Failed, Paid)
            | (Failed, Canceled)
            | (Paid, Packed)
            | (Paid, Canceled)
            | (Packed, Shipped)
            | (Packed, Canceled)
            | (Shipped, Delivered)
            | (Delivered, Refunded)
            | (Delivered, ReturnRequested)
            | (ReturnRequested, ReturnApproved)
            | (ReturnRequested, Returned)
            | (ReturnApproved, Returned)
    )
}

/// Validates and applies a transition, returning the new status. Rejected edges leave no side
/// effects anywhere: callers must check this before writing.
pub fn apply(from: OrderStatus, to: OrderStatus) -> Result<OrderStatus, InvalidTransition> {
    if validate(from, to) {
        Ok(to)
    } else {
        Err(InvalidTransition { from, to })
    }
}

/// States with no outgoing edges. `Delivered` is deliberately absent: it is quiescent, not
/// terminal, because a delivered order can still be refunded or returned.
pub fn is_terminal(status: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(status, Canceled | Refunded | Returned)
}

/// The promote-only edge a payment notification is allowed to take, or `None` when the event must
/// leave the status untouched. A `paid` event only ever promotes toward `Paid`; a `failed` event
/// only parks a still-pending order, and never reverts one that is paid or further along.
pub fn payment_edge(from: OrderStatus, mapped: MappedStatus) -> Option<OrderStatus> {
    use OrderStatus::*;
    match (mapped, from) {
        (MappedStatus::Paid, Pending | Failed) => Some(Paid),
        (MappedStatus::Failed, Pending) => Some(Failed),
        _ => None,
    }
}
