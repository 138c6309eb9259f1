use std::time::Duration;

use log::*;
use settle_common::Secret;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: Secret<String>,
    pub api_version: String,
    /// Hard cap on a single HTTP round trip. The workflow layer applies its own timeout on top.
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gateway.example.com".to_string(),
            api_key: Secret::new("gw_test_00000000".to_string()),
            api_version: "v1".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    pub fn new_from_env_or_default() -> Self {
        let base_url = std::env::var("SSC_GATEWAY_URL").unwrap_or_else(|_| {
            warn!("SSC_GATEWAY_URL not set, using (probably useless) default");
            GatewayConfig::default().base_url
        });
        let api_key = Secret::new(std::env::var("SSC_GATEWAY_API_KEY").unwrap_or_else(|_| {
            warn!("SSC_GATEWAY_API_KEY not set, using (probably useless) default");
            "gw_test_00000000".to_string()
        }));
        let api_version = std::env::var("SSC_GATEWAY_API_VERSION").unwrap_or_else(|_| "v1".to_string());
        let request_timeout = std::env::var("SSC_GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| GatewayConfig::default().request_timeout);
        Self { base_url, api_key, api_version, request_timeout }
    }
}
