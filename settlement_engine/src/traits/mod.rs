mod settlement_database;
mod settlement_gateway;

pub use settlement_database::{ExecutionResult, SettlementDatabase, SettlementDbError};
pub use settlement_gateway::{GatewayError, SettlementGateway};
