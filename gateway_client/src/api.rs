use std::sync::Arc;

use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
    Method,
};
use serde::{de::DeserializeOwned, Serialize};
use settle_common::Money;
use settlement_engine::{
    db_types::OrderId,
    traits::{GatewayError, SettlementGateway},
};

use crate::{
    config::GatewayConfig,
    data_objects::{InstructionResponse, PayoutInstruction, RefundInstruction},
    GatewayClientError,
};

#[derive(Clone)]
pub struct GatewayApi {
    config: GatewayConfig,
    client: Arc<Client>,
}

impl GatewayApi {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayClientError> {
        let mut headers = HeaderMap::with_capacity(2);
        let val = HeaderValue::from_str(&format!("Bearer {}", config.api_key.reveal()))
            .map_err(|e| GatewayClientError::Initialization(e.to_string()))?;
        headers.insert("Authorization", val);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayClientError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}{path}", self.config.base_url, self.config.api_version)
    }

    pub async fn rest_query<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<B>,
    ) -> Result<T, GatewayClientError> {
        let url = self.url(path);
        trace!("Sending gateway query: {url}");
        let mut req = self.client.request(method, url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayClientError::Timeout(self.config.request_timeout.as_secs())
            } else {
                GatewayClientError::Transport(e.to_string())
            }
        })?;
        if response.status().is_success() {
            trace!("Gateway query successful. {}", response.status());
            response.json::<T>().await.map_err(|e| GatewayClientError::JsonError(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| GatewayClientError::Transport(e.to_string()))?;
            // 4xx means the provider understood and refused; anything else is an upstream fault.
            if (400..500).contains(&status) {
                Err(GatewayClientError::Declined { status, message })
            } else {
                Err(GatewayClientError::QueryError { status, message })
            }
        }
    }

    pub async fn refund(&self, instruction: RefundInstruction) -> Result<InstructionResponse, GatewayClientError> {
        debug!("Instructing refund of {} {} for order {}", instruction.amount, instruction.currency, instruction.order_id);
        let response: InstructionResponse = self.rest_query(Method::POST, "/refunds", Some(instruction)).await?;
        info!("Refund accepted by the gateway as [{}]", response.reference);
        Ok(response)
    }

    pub async fn payout(&self, instruction: PayoutInstruction) -> Result<InstructionResponse, GatewayClientError> {
        debug!(
            "Instructing payout of {} {} to seller {}",
            instruction.amount, instruction.currency, instruction.seller_id
        );
        let response: InstructionResponse = self.rest_query(Method::POST, "/payouts", Some(instruction)).await?;
        info!("Payout accepted by the gateway as [{}]", response.reference);
        Ok(response)
    }
}

impl From<GatewayClientError> for GatewayError {
    fn from(e: GatewayClientError) -> Self {
        match e {
            GatewayClientError::Timeout(secs) => GatewayError::Timeout(secs),
            GatewayClientError::Transport(msg) | GatewayClientError::Initialization(msg) => {
                GatewayError::Transport(msg)
            },
            GatewayClientError::JsonError(msg) => GatewayError::Protocol(msg),
            GatewayClientError::Declined { status, message } => {
                GatewayError::Declined(format!("HTTP {status}: {message}"))
            },
            GatewayClientError::QueryError { status, message } => {
                GatewayError::Protocol(format!("HTTP {status}: {message}"))
            },
        }
    }
}

impl SettlementGateway for GatewayApi {
    async fn execute_refund(&self, order_id: &OrderId, amount: Money, currency: &str) -> Result<String, GatewayError> {
        let instruction = RefundInstruction::new(order_id.as_str(), amount, currency);
        let response = self.refund(instruction).await?;
        Ok(response.reference)
    }

    async fn execute_payout(
        &self,
        seller_id: &str,
        order_id: &OrderId,
        amount: Money,
        currency: &str,
    ) -> Result<String, GatewayError> {
        let instruction = PayoutInstruction::new(seller_id, order_id.as_str(), amount, currency);
        let response = self.payout(instruction).await?;
        Ok(response.reference)
    }
}
