//! 订单服务入口

use std::sync::Arc;

use order_service::{routes, state::AppState};
use pipeline_shared::{
    config::AppConfig, kafka::KafkaProducer, observability, shutdown::shutdown_signal,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "order-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, load_error) = match AppConfig::load(
        SERVICE_NAME,
        &[("server.port", "8080"), ("observability.metrics_port", "9090")],
    ) {
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

    info!(
        brokers = %config.kafka.brokers,
        "Starting {} on {}",
        SERVICE_NAME,
        config.server_addr()
    );

    let producer = Arc::new(KafkaProducer::new(&config.kafka)?);
    let app = routes::router(AppState::new(producer.clone()));

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = producer.shutdown(config.pipeline.shutdown_timeout()).await {
        error!(error = %e, "生产者关闭未完成");
    }

    info!("Server shutdown complete");
    Ok(())
}
