use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayClientError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("The gateway did not respond within {0}s")]
    Timeout(u64),
    #[error("Could not reach the gateway: {0}")]
    Transport(String),
    #[error("Could not deserialize JSON: {0}")]
    JsonError(String),
    #[error("Instruction declined. Error {status}. {message}")]
    Declined { status: u16, message: String },
    #[error("Instruction failed. Error {status}. {message}")]
    QueryError { status: u16, message: String },
}
