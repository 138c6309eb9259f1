//! Settlement Engine
//!
//! The settlement engine is the core of the marketplace payment service. It owns the order
//! lifecycle, ingestion of payment-provider notifications, the dual-control refund and payout
//! workflows, and the audit trail, all independent of any particular web framework or payment
//! provider.
//!
//! The library is divided into two main sections:
//! 1. Database management ([`mod@sqlite`] behind the `sqlite` feature). You should never need to
//!    access the database directly; use the public APIs instead. The exception is the data types,
//!    which live in [`db_types`] and are public.
//! 2. The engine public API (`api`). Backends implement the traits in [`traits`] to serve these
//!    APIs; the [`SqliteDatabase`] implementation is the one deployed in production.
//!
//! All order status changes, by webhook, replay, reconciliation or admin action, funnel through
//! the transition table in [`state_machine`], so the whole lifecycle is checkable in one place.
mod api;
pub mod db_types;
pub mod state_machine;
pub mod traits;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use sqlite::{db_url, SqliteDatabase};

pub use api::{
    audit::AuditApi,
    errors::WorkflowError,
    payment_events::{plan_event, system_actor, EventPlan, PaymentEventApi},
    payouts::{PayoutApi, MIN_MARK_PAID_REASON_LEN},
    rate_limit::{InMemoryStore, RateLimiter, RateLimiterStore, Window},
    refunds::RefundApi,
    WorkflowConfig,
};
