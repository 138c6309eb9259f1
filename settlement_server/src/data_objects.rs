use std::fmt::Display;

use serde::{Deserialize, Serialize};
use settle_common::Money;
use settlement_engine::db_types::OrderId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRefundParams {
    pub order_id: OrderId,
    pub amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayoutParams {
    pub order_id: OrderId,
    pub amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkFailedParams {
    pub reason_code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonParams {
    pub reason: String,
}
