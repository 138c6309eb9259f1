//! HTTP client for the settlement-gateway provider.
//!
//! The provider exposes a small JSON REST API for moving money: refunds back to buyers and
//! payouts to sellers. This crate wraps it behind [`GatewayApi`], which also implements the
//! engine's `SettlementGateway` trait so the server can plug it straight into the refund and
//! payout workflows.
mod api;
mod config;
mod data_objects;
mod error;

pub use api::GatewayApi;
pub use config::GatewayConfig;
pub use data_objects::{InstructionResponse, PayoutInstruction, RefundInstruction};
pub use error::GatewayClientError;
