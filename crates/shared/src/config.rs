//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::observability::ObservabilityConfig;

/// 无位点时的消费起点策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    /// librdkafka `auto.offset.reset` 取值
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

/// Kafka 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// 逗号分隔的 host:port 列表
    pub brokers: String,
    pub consumer_group: String,
    pub auto_offset_reset: OffsetReset,
    pub enable_auto_commit: bool,
    pub idempotent: bool,
    /// 生产者逻辑身份，仅记录，不用于开启 broker 事务
    pub transactional_id: Option<String>,
    pub message_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            consumer_group: "payment-service-group".to_string(),
            auto_offset_reset: OffsetReset::Earliest,
            enable_auto_commit: false,
            idempotent: true,
            transactional_id: None,
            message_timeout_ms: 5000,
        }
    }
}

/// 服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// 重投退避配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 200,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

/// 处理循环配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub poll_timeout_ms: u64,
    /// 为 true 时等待 broker 投递回执后才提交源位点
    pub wait_for_delivery: bool,
    pub delivery_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1000,
            wait_for_delivery: false,
            delivery_timeout_ms: 10_000,
            shutdown_timeout_ms: 10_000,
            retry: RetryConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub server: ServerConfig,
    pub kafka: KafkaConfig,
    pub pipeline: PipelineConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. `defaults` 中的服务级默认值
    /// 2. config/default.toml、config/{environment}.toml、config/{service_name}.toml
    /// 3. 环境变量（PIPELINE_ 前缀，层级用双下划线，如
    ///    PIPELINE_KAFKA__CONSUMER_GROUP -> kafka.consumer_group）
    /// 4. KAFKA_BOOTSTRAP_SERVERS 与服务端口环境变量（如 ORDER_SERVICE_PORT）
    pub fn load(service_name: &str, defaults: &[(&str, &str)]) -> Result<Self, ConfigError> {
        let env = std::env::var("PIPELINE_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let mut builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?;

        for (key, value) in defaults {
            builder = builder.set_default(*key, *value)?;
        }

        let builder = builder
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("PIPELINE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: Self = builder.build()?.try_deserialize()?;

        if let Some(brokers) = Self::bootstrap_servers_from_env() {
            config.kafka.brokers = brokers;
        }

        if let Some(port) = Self::service_port_from_env(service_name) {
            config.server.port = port;
        }

        Ok(config)
    }

    /// 兼容部署脚本中沿用的 KAFKA_BOOTSTRAP_SERVERS
    fn bootstrap_servers_from_env() -> Option<String> {
        std::env::var("KAFKA_BOOTSTRAP_SERVERS")
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    /// 将 "order-service" 转换为 "ORDER_SERVICE_PORT" 并读取
    fn service_port_from_env(service_name: &str) -> Option<u16> {
        let env_var_name = format!("{}_PORT", service_name.to_uppercase().replace('-', "_"));
        std::env::var(&env_var_name)
            .ok()
            .and_then(|v| v.parse().ok())
    }

    /// 获取服务地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.kafka.consumer_group, "payment-service-group");
        assert_eq!(config.kafka.auto_offset_reset, OffsetReset::Earliest);
        assert!(!config.kafka.enable_auto_commit);
        assert!(config.kafka.idempotent);
        assert_eq!(config.pipeline.poll_timeout(), Duration::from_secs(1));
        assert!(!config.pipeline.wait_for_delivery);
    }

    #[test]
    fn test_server_addr() {
        let config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            ..Default::default()
        };
        assert_eq!(config.server_addr(), "127.0.0.1:3000");
    }

    #[test]
    fn test_offset_reset_str() {
        assert_eq!(OffsetReset::Earliest.as_str(), "earliest");
        assert_eq!(OffsetReset::Latest.as_str(), "latest");
    }

    #[test]
    fn test_load_applies_service_defaults() {
        // 指向不存在的目录，只验证默认值与服务级默认值的合并
        let config = AppConfig::load(
            "config-test-service",
            &[
                ("kafka.consumer_group", "config-test-group"),
                ("kafka.auto_offset_reset", "latest"),
            ],
        )
        .unwrap();

        assert_eq!(config.service_name, "config-test-service");
        assert_eq!(config.kafka.consumer_group, "config-test-group");
        assert_eq!(config.kafka.auto_offset_reset, OffsetReset::Latest);
        // 未覆盖的字段保持默认值
        assert_eq!(config.kafka.message_timeout_ms, 5000);
        assert_eq!(config.pipeline.retry.max_retries, 5);
    }

    #[test]
    fn test_service_port_env_var() {
        // SAFETY: 变量名仅本测试使用，不会与其他测试并发读写
        unsafe {
            std::env::set_var("PORT_PROBE_SERVICE_PORT", "18080");
        }
        assert_eq!(
            AppConfig::service_port_from_env("port-probe-service"),
            Some(18080)
        );
        unsafe {
            std::env::remove_var("PORT_PROBE_SERVICE_PORT");
        }
        assert_eq!(AppConfig::service_port_from_env("port-probe-service"), None);
    }
}
