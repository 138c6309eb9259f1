//! A scriptable stand-in for the settlement gateway. Responses are queued ahead of time; when the
//! queue is empty every call succeeds with a generated reference.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use settle_common::Money;

use crate::{
    db_types::OrderId,
    traits::{GatewayError, SettlementGateway},
};

#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Succeed(String),
    Fail(GatewayError),
    /// Never responds. Use together with a short workflow timeout to exercise the timeout path.
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Refund { order_id: OrderId, amount: Money, currency: String },
    Payout { seller_id: String, order_id: OrderId, amount: Money, currency: String },
}

#[derive(Debug, Default)]
struct Inner {
    responses: VecDeque<ScriptedResponse>,
    calls: Vec<GatewayCall>,
    counter: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MockGateway {
    inner: Arc<Mutex<Inner>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, response: ScriptedResponse) {
        self.inner.lock().unwrap().responses.push_back(response);
    }

    pub fn succeed_with<S: Into<String>>(&self, reference: S) {
        self.enqueue(ScriptedResponse::Succeed(reference.into()));
    }

    pub fn fail_with(&self, error: GatewayError) {
        self.enqueue(ScriptedResponse::Fail(error));
    }

    pub fn hang(&self) {
        self.enqueue(ScriptedResponse::Hang);
    }

    /// Every call the gateway has received, in order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.lock().unwrap().calls.len()
    }

    async fn respond(&self, call: GatewayCall) -> Result<String, GatewayError> {
        let response = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(call);
            inner.responses.pop_front().unwrap_or_else(|| {
                inner.counter += 1;
                ScriptedResponse::Succeed(format!("mock-ref-{}", inner.counter))
            })
        };
        match response {
            ScriptedResponse::Succeed(reference) => Ok(reference),
            ScriptedResponse::Fail(error) => Err(error),
            ScriptedResponse::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(GatewayError::Timeout(3600))
            },
        }
    }
}

impl SettlementGateway for MockGateway {
    async fn execute_refund(&self, order_id: &OrderId, amount: Money, currency: &str) -> Result<String, GatewayError> {
        self.respond(GatewayCall::Refund {
            order_id: order_id.clone(),
            amount,
            currency: currency.to_string(),
        })
        .await
    }

    async fn execute_payout(
        &self,
        seller_id: &str,
        order_id: &OrderId,
        amount: Money,
        currency: &str,
    ) -> Result<String, GatewayError> {
        self.respond(GatewayCall::Payout {
            seller_id: seller_id.to_string(),
            order_id: order_id.clone(),
            amount,
            currency: currency.to_string(),
        })
        .await
    }
}
