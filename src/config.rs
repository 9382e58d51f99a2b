//! Gateway configuration.
//!
//! Loaded from an optional `payment-gateway.yaml`, an optional explicit file
//! and `PAYMENT_GATEWAY__*` environment variables, in increasing priority.

use crate::error::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "payment-gateway";
pub const CONFIG_ENV_PREFIX: &str = "PAYMENT_GATEWAY";
pub const LOG_ENV_VAR: &str = "PAYMENT_GATEWAY_LOG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub topics: TopicConfig,
    pub consumer: ConsumerConfig,
    pub otp: OtpConfig,
    pub settlement: SettlementConfig,
    pub checkout: CheckoutConfig,
    pub bus: BusConfig,
    pub storage: StorageConfig,
    pub redis: Option<RedisConfig>,
    pub kafka: Option<KafkaConfig>,
}

/// Topic names for the consumed and produced streams.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub order_created: String,
    pub success: String,
    pub failed: String,
    pub refunded: String,
    pub events: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            order_created: "order.created".to_string(),
            success: "payment-success".to_string(),
            failed: "payment-failed".to_string(),
            refunded: "payment-refunded".to_string(),
            events: "payment-events".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub group_id: String,
    /// Delay before retrying a message whose payment could not be persisted.
    pub retry_delay_ms: u64,
}

impl ConsumerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: "payment-gateway".to_string(),
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OtpConfig {
    pub ttl_secs: u64,
    pub key_prefix: String,
}

impl OtpConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            key_prefix: "otp-lock".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Used when a settlement request names no currency.
    pub currency: String,
    /// Upper bound on how long one charge or refund holds its payment.
    pub lock_ttl_secs: u64,
}

impl SettlementConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            currency: "usd".to_string(),
            lock_ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckoutConfig {
    pub base_url: String,
}

impl CheckoutConfig {
    /// The deterministic checkout link for an order.
    pub fn url_for(&self, order_id: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), order_id)
    }
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            base_url: "https://payment.gateway.com/checkout".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub partitions: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { partitions: 4 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
}

impl GatewayConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        use ::config::{Config, Environment, File};

        let mut builder =
            Config::builder().add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
