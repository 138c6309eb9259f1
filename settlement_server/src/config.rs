use std::{env, time::Duration};

use gateway_client::GatewayConfig;
use log::*;
use settle_common::{Money, Secret};
use settlement_engine::WorkflowConfig;

const DEFAULT_SSC_HOST: &str = "127.0.0.1";
const DEFAULT_SSC_PORT: u16 = 8360;
const DEFAULT_RATE_LIMIT_MAX: u32 = 30;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub auth: AuthConfig,
    /// Refunds at or above this amount require second-person approval.
    pub large_refund_threshold: Money,
    /// Upper bound on a single settlement-gateway call as seen by the workflows.
    pub gateway_timeout: Duration,
    /// Maximum mutating admin calls per `(action, actor)` within one window.
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub gateway: GatewayConfig,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: Secret<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { jwt_secret: Secret::new("change-me-in-production".to_string()) }
    }
}

impl AuthConfig {
    pub fn from_env_or_default() -> Self {
        match env::var("SSC_JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => Self { jwt_secret: Secret::new(secret) },
            _ => {
                warn!("🪛️ SSC_JWT_SECRET is not set. Using an insecure default. Do NOT do this in production.");
                Self::default()
            },
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let workflow = WorkflowConfig::default();
        Self {
            host: DEFAULT_SSC_HOST.to_string(),
            port: DEFAULT_SSC_PORT,
            database_url: String::default(),
            auth: AuthConfig::default(),
            large_refund_threshold: workflow.large_refund_threshold,
            gateway_timeout: workflow.gateway_timeout,
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let defaults = ServerConfig::default();
        let host = env::var("SSC_HOST").ok().unwrap_or_else(|| DEFAULT_SSC_HOST.into());
        let port = env::var("SSC_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!("🪛️ {s} is not a valid port for SSC_PORT. {e} Using the default, {DEFAULT_SSC_PORT}, instead.");
                    DEFAULT_SSC_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_SSC_PORT);
        let database_url = env::var("SSC_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ SSC_DATABASE_URL is not set. Please set it to the URL for the settlement database.");
            String::default()
        });
        let auth = AuthConfig::from_env_or_default();
        let large_refund_threshold = env::var("SSC_LARGE_REFUND_THRESHOLD")
            .ok()
            .and_then(|s| {
                s.parse::<Money>()
                    .map_err(|e| {
                        error!("🪛️ {s} is not a valid amount for SSC_LARGE_REFUND_THRESHOLD. {e}");
                        e
                    })
                    .ok()
            })
            .unwrap_or(defaults.large_refund_threshold);
        let gateway_timeout = env::var("SSC_GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.gateway_timeout);
        let rate_limit_max = env::var("SSC_RATE_LIMIT_MAX")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_MAX);
        let rate_limit_window = env::var("SSC_RATE_LIMIT_WINDOW_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS));
        let gateway = GatewayConfig::new_from_env_or_default();
        Self {
            host,
            port,
            database_url,
            auth,
            large_refund_threshold,
            gateway_timeout,
            rate_limit_max,
            rate_limit_window,
            gateway,
        }
    }

    /// The workflow knobs the engine APIs take, derived from the server configuration.
    pub fn workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig { large_refund_threshold: self.large_refund_threshold, gateway_timeout: self.gateway_timeout }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use settle_common::Money;

    use super::ServerConfig;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8360);
        assert_eq!(config.large_refund_threshold, Money::from_whole(500));
        assert_eq!(config.gateway_timeout, Duration::from_secs(30));
        assert_eq!(config.rate_limit_max, 30);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
    }

    #[test]
    fn workflow_config_mirrors_the_server_config() {
        let mut config = ServerConfig::default();
        config.large_refund_threshold = Money::from_whole(250);
        config.gateway_timeout = Duration::from_secs(5);
        let workflow = config.workflow_config();
        assert_eq!(workflow.large_refund_threshold, Money::from_whole(250));
        assert_eq!(workflow.gateway_timeout, Duration::from_secs(5));
    }
}
