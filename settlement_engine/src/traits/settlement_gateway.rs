use settle_common::Money;
use thiserror::Error;

use crate::db_types::OrderId;

/// The external system that actually moves money. Treated as opaque, fallible and retryable:
/// implementations must bound every call with a timeout, and callers must leave the local record
/// in a retryable state whenever a call does not return success.
#[allow(async_fn_in_trait)]
pub trait SettlementGateway: Clone {
    /// Instructs the gateway to return `amount` to the buyer of `order_id`. Returns the
    /// provider's reference for the refund transaction.
    async fn execute_refund(
        &self,
        order_id: &OrderId,
        amount: Money,
        currency: &str,
    ) -> Result<String, GatewayError>;

    /// Instructs the gateway to pay `amount` out to `seller_id`. Returns the provider's
    /// reference for the payout transaction.
    async fn execute_payout(
        &self,
        seller_id: &str,
        order_id: &OrderId,
        amount: Money,
        currency: &str,
    ) -> Result<String, GatewayError>;
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("The gateway declined the instruction. {0}")]
    Declined(String),
    #[error("The gateway did not respond within {0}s")]
    Timeout(u64),
    #[error("Could not reach the gateway. {0}")]
    Transport(String),
    #[error("The gateway returned an unintelligible response. {0}")]
    Protocol(String),
}
