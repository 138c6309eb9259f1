use serde::{Deserialize, Serialize};
use settle_common::Money;

#[derive(Debug, Clone, Serialize)]
pub struct RefundInstruction {
    pub order_id: String,
    /// Amount in minor units.
    pub amount: i64,
    pub currency: String,
}

impl RefundInstruction {
    pub fn new(order_id: &str, amount: Money, currency: &str) -> Self {
        Self { order_id: order_id.to_string(), amount: amount.value(), currency: currency.to_string() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PayoutInstruction {
    pub seller_id: String,
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
}

impl PayoutInstruction {
    pub fn new(seller_id: &str, order_id: &str, amount: Money, currency: &str) -> Self {
        Self {
            seller_id: seller_id.to_string(),
            order_id: order_id.to_string(),
            amount: amount.value(),
            currency: currency.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstructionResponse {
    /// The provider's reference for the money movement.
    pub reference: String,
    pub status: String,
}
