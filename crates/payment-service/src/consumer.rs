//! 订单事件消费者
//!
//! 组合 KafkaConsumer（拉取 orders.created）、PaymentProcessor（支付处理）
//! 和 KafkaProducer（发布 payments.completed），形成完整的处理循环。

use std::sync::Arc;

use pipeline_shared::config::AppConfig;
use pipeline_shared::idempotency::{InMemoryProcessedStore, ProcessedStore};
use pipeline_shared::kafka::{EventPublisher, KafkaConsumer, KafkaProducer, MessageSource, topics};
use pipeline_shared::pipeline::{LoopSettings, ProcessingLoop};
use tokio::sync::watch;
use tracing::info;

use crate::error::PaymentError;
use crate::processor::PaymentProcessor;

/// 组装支付处理循环，来源与发布端可替换为测试实现
pub fn build_loop<S, P>(
    source: S,
    publisher: P,
    store: Arc<dyn ProcessedStore>,
    settings: LoopSettings,
) -> ProcessingLoop<S, P, PaymentProcessor>
where
    S: MessageSource,
    P: EventPublisher,
{
    ProcessingLoop::new(source, publisher, PaymentProcessor::new(), store, settings)
}

pub struct PaymentConsumer {
    pipeline: ProcessingLoop<KafkaConsumer, Arc<KafkaProducer>, PaymentProcessor>,
}

impl PaymentConsumer {
    /// 创建消费者并订阅 orders.created，订阅失败直接返回错误
    pub fn new(config: &AppConfig, producer: Arc<KafkaProducer>) -> Result<Self, PaymentError> {
        let consumer = KafkaConsumer::new(&config.kafka, None)?;
        consumer.subscribe(&[topics::ORDERS_CREATED])?;

        let pipeline = build_loop(
            consumer,
            producer,
            Arc::new(InMemoryProcessedStore::default()),
            LoopSettings::from_config(&config.pipeline),
        );

        Ok(Self { pipeline })
    }

    /// 运行直到收到关闭信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(
            topic = topics::ORDERS_CREATED,
            output_topic = topics::PAYMENTS_COMPLETED,
            "支付事件消费者已启动"
        );

        self.pipeline.run(shutdown).await;

        info!("支付事件消费者已停止");
    }
}
