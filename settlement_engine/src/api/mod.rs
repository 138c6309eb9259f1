use std::time::Duration;

use settle_common::Money;

pub mod audit;
pub mod errors;
pub mod payment_events;
pub mod payouts;
pub mod rate_limit;
pub mod refunds;

/// Knobs shared by the money-movement workflows.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Refunds at or above this amount park in `pending` until a second person approves them.
    /// Smaller refunds execute at request time.
    pub large_refund_threshold: Money,
    /// Upper bound on any single settlement-gateway call. On expiry the request lands in
    /// `failed`, never optimistically in a settled status, so a retry is always safe.
    pub gateway_timeout: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self { large_refund_threshold: Money::from_whole(500), gateway_timeout: Duration::from_secs(30) }
    }
}
