//! 支付服务入口

use std::sync::Arc;

use payment_service::consumer::PaymentConsumer;
use pipeline_shared::{
    config::AppConfig, kafka::KafkaProducer, observability, shutdown::shutdown_signal,
};
use tokio::sync::watch;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "payment-service";

/// 与订单服务错开的默认端口及消费组、生产者身份
const SERVICE_DEFAULTS: &[(&str, &str)] = &[
    ("server.port", "8081"),
    ("observability.metrics_port", "9091"),
    ("kafka.consumer_group", "payment-service-group"),
    ("kafka.auto_offset_reset", "earliest"),
    ("kafka.transactional_id", "payment-service"),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, load_error) = match AppConfig::load(SERVICE_NAME, SERVICE_DEFAULTS) {
        Ok(config) => (config, None),
        Err(e) => (
            AppConfig {
                service_name: SERVICE_NAME.to_string(),
                ..Default::default()
            },
            Some(e),
        ),
    };

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    if let Some(e) = load_error {
        warn!(error = %e, "加载配置失败，使用默认配置");
    }

    info!(brokers = %config.kafka.brokers, "Starting {}", SERVICE_NAME);

    let producer = Arc::new(KafkaProducer::new(&config.kafka)?);
    let consumer = PaymentConsumer::new(&config, producer.clone())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(consumer.run(shutdown_rx));

    shutdown_signal().await;
    // 接收端已退出时发送失败，无需处理
    let _ = shutdown_tx.send(true);

    if let Err(e) = worker.await {
        error!(error = %e, "处理循环异常退出");
    }

    if let Err(e) = producer.shutdown(config.pipeline.shutdown_timeout()).await {
        error!(error = %e, "生产者关闭未完成");
    }

    info!("Payment Service shutdown complete");
    Ok(())
}
