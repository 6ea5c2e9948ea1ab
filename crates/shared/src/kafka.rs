//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为管道需要的两类抽象：
//! - `KafkaProducer`：非阻塞入队，后台任务统一消费投递回执；
//! - `KafkaConsumer`：有界等待的拉取、显式位点提交与回退重投。
//!
//! 处理循环只依赖 `EventPublisher` / `MessageSource` 两个 trait，
//! 测试中可替换为内存实现或 mockall 生成的 mock。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::{PipelineError, Result};
use crate::events::EventEnvelope;
use crate::observability::metrics;

/// 回退位点时 seek 的最长阻塞时间
const SEEK_TIMEOUT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

pub mod topics {
    pub const ORDERS_CREATED: &str = "orders.created";
    pub const PAYMENTS_COMPLETED: &str = "payments.completed";
}

// ---------------------------------------------------------------------------
// ConsumedMessage
// ---------------------------------------------------------------------------

/// 消息在 broker 中的位置
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessagePosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for MessagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// 消费到的消息句柄
///
/// 从 `poll` 返回起由处理循环独占，直到被提交、回退或丢弃。
/// 不实现 Clone，`commit_message` 按值接收，同一句柄至多提交一次。
#[derive(Debug)]
pub struct ConsumedMessage {
    pub envelope: EventEnvelope,
    pub partition: i32,
    pub offset: i64,
    /// broker 时间戳（毫秒）
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumedMessage {
    pub fn new(envelope: EventEnvelope, partition: i32, offset: i64) -> Self {
        Self {
            envelope,
            partition,
            offset,
            timestamp: None,
            headers: HashMap::new(),
        }
    }

    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .unwrap_or_default()
            .to_string();

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            envelope: EventEnvelope::new(msg.topic(), key, payload),
            partition: msg.partition(),
            offset: msg.offset(),
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    pub fn topic(&self) -> &str {
        &self.envelope.topic
    }

    pub fn key(&self) -> &str {
        &self.envelope.key
    }

    pub fn payload(&self) -> &[u8] {
        &self.envelope.payload
    }

    pub fn position(&self) -> MessagePosition {
        MessagePosition {
            topic: self.envelope.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }
}

// ---------------------------------------------------------------------------
// 投递回执
// ---------------------------------------------------------------------------

/// broker 确认的写入位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub key: String,
    pub partition: i32,
    pub offset: i64,
}

/// 单次发布的投递结果句柄
///
/// `publish` 成功只代表本地入队，broker 的最终确认通过该句柄异步获得。
/// 不关心确认结果的调用方可以直接丢弃句柄，投递失败仍会由后台任务记录。
#[derive(Debug)]
pub struct DeliveryHandle {
    state: HandleState,
}

#[derive(Debug)]
enum HandleState {
    Pending(oneshot::Receiver<Result<DeliveryReport>>),
    Ready(Result<DeliveryReport>),
}

impl DeliveryHandle {
    /// 创建一对尚未完成的通知端与句柄
    pub fn pending() -> (DeliveryNotifier, Self) {
        let (tx, rx) = oneshot::channel();
        (
            DeliveryNotifier { tx },
            Self {
                state: HandleState::Pending(rx),
            },
        )
    }

    /// 已确认的句柄
    pub fn acknowledged(report: DeliveryReport) -> Self {
        Self {
            state: HandleState::Ready(Ok(report)),
        }
    }

    /// 已失败的句柄
    pub fn failed(error: PipelineError) -> Self {
        Self {
            state: HandleState::Ready(Err(error)),
        }
    }

    /// 等待 broker 确认，超时或回执通道关闭均视为投递失败
    pub async fn wait(self, timeout: Duration) -> Result<DeliveryReport> {
        let rx = match self.state {
            HandleState::Ready(result) => return result,
            HandleState::Pending(rx) => rx,
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PipelineError::Delivery("投递回执通道已关闭".to_string())),
            Err(_) => Err(PipelineError::Delivery(format!(
                "等待投递回执超时 ({}ms)",
                timeout.as_millis()
            ))),
        }
    }
}

/// 投递回执的通知端，由后台任务持有
#[derive(Debug)]
pub struct DeliveryNotifier {
    tx: oneshot::Sender<Result<DeliveryReport>>,
}

impl DeliveryNotifier {
    pub fn notify(self, result: Result<DeliveryReport>) {
        // 调用方已丢弃句柄时无需通知
        let _ = self.tx.send(result);
    }
}

// ---------------------------------------------------------------------------
// 传输层抽象
// ---------------------------------------------------------------------------

/// 事件发布端
///
/// `publish` 只负责入队，不等待 broker；成功返回后信封的所有权已交给传输层。
#[cfg_attr(test, mockall::automock)]
pub trait EventPublisher: Send + Sync {
    fn publish(&self, envelope: EventEnvelope) -> Result<DeliveryHandle>;
}

impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    fn publish(&self, envelope: EventEnvelope) -> Result<DeliveryHandle> {
        (**self).publish(envelope)
    }
}

/// 消息来源
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// 最多等待 `timeout`，期间无消息返回 `Ok(None)`
    async fn poll(&self, timeout: Duration) -> Result<Option<ConsumedMessage>>;

    /// 记录 `offset + 1` 为该分区的消费进度
    async fn commit_message(&self, message: ConsumedMessage) -> Result<()>;

    /// 将分区回退到该消息，使下一次拉取重新返回它
    ///
    /// 失败时消息仍由调用方持有，调用方不得越过它继续拉取。
    async fn rewind(&self, message: &ConsumedMessage) -> Result<()>;
}

#[async_trait]
impl<T: MessageSource + ?Sized> MessageSource for Arc<T> {
    async fn poll(&self, timeout: Duration) -> Result<Option<ConsumedMessage>> {
        (**self).poll(timeout).await
    }

    async fn commit_message(&self, message: ConsumedMessage) -> Result<()> {
        (**self).commit_message(message).await
    }

    async fn rewind(&self, message: &ConsumedMessage) -> Result<()> {
        (**self).rewind(message).await
    }
}

// ---------------------------------------------------------------------------
// 客户端配置
// ---------------------------------------------------------------------------

/// 校验 broker 列表：逗号分隔，每项均为 host:port
pub fn validate_brokers(brokers: &str) -> Result<()> {
    if brokers.trim().is_empty() {
        return Err(PipelineError::Connection("broker 列表为空".to_string()));
    }

    for entry in brokers.split(',').map(str::trim) {
        let valid = entry
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !valid {
            return Err(PipelineError::Connection(format!(
                "broker 地址格式错误: '{entry}'，应为 host:port"
            )));
        }
    }

    Ok(())
}

/// 生产者 librdkafka 配置
///
/// 可靠性参数固定：全副本确认、有限重试、保序的在途请求数。
/// `transactional_id` 不下发给 librdkafka，未调用 init_transactions 时设置它会使所有发送失败。
pub fn producer_client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.brokers)
        .set("acks", "all")
        .set("enable.idempotence", config.idempotent.to_string())
        .set("retries", "5")
        .set("linger.ms", "5")
        .set("max.in.flight.requests.per.connection", "5")
        .set("message.timeout.ms", config.message_timeout_ms.to_string());
    client
}

/// 消费者 librdkafka 配置
pub fn consumer_client_config(config: &KafkaConfig, group_id: &str) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", group_id)
        .set("auto.offset.reset", config.auto_offset_reset.as_str())
        .set("enable.auto.commit", config.enable_auto_commit.to_string())
        .set("enable.partition.eof", "false");

    if config.enable_auto_commit {
        // 自动提交只提交处理循环显式 store 过的位点
        client.set("enable.auto.offset.store", "false");
    }
    client
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 待确认的投递
struct PendingDelivery {
    topic: String,
    key: String,
    future: DeliveryFuture,
    notifier: DeliveryNotifier,
}

/// Kafka 生产者
///
/// 每个生产者持有一个后台回执任务，消费所有在途投递的确认结果。
/// 必须在 tokio 运行时内创建。
pub struct KafkaProducer {
    producer: FutureProducer,
    pending_tx: Mutex<Option<mpsc::UnboundedSender<PendingDelivery>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        validate_brokers(&config.brokers)?;

        let producer: FutureProducer = producer_client_config(config)
            .create()
            .map_err(|e| PipelineError::Connection(format!("创建生产者失败: {e}")))?;

        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let drain = tokio::spawn(drain_deliveries(pending_rx));

        info!(
            brokers = %config.brokers,
            idempotent = config.idempotent,
            transactional_id = config.transactional_id.as_deref().unwrap_or("-"),
            "Kafka 生产者已初始化"
        );

        Ok(Self {
            producer,
            pending_tx: Mutex::new(Some(pending_tx)),
            drain: Mutex::new(Some(drain)),
        })
    }

    /// 优雅关闭
    ///
    /// 停止接受新的发布，flush 本地队列，等待后台任务处理完全部回执。
    /// 重复调用直接返回。
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        let Some(pending_tx) = self.pending_tx.lock().take() else {
            debug!("Kafka 生产者已关闭，忽略重复调用");
            return Ok(());
        };
        drop(pending_tx);

        // flush 与等待回执任务共用同一截止时间
        let deadline = tokio::time::Instant::now() + timeout;
        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| PipelineError::Delivery(format!("flush 任务异常: {e}")))
            .and_then(|r| {
                r.map_err(|e| {
                    PipelineError::Delivery(format!(
                        "flush 未完成: {e}，仍有 {} 条消息在途",
                        self.producer.in_flight_count()
                    ))
                })
            });

        let drain = self.drain.lock().take();
        if let Some(drain) = drain {
            match tokio::time::timeout_at(deadline, drain).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "投递回执任务异常退出"),
                Err(_) => warn!("等待投递回执任务超时"),
            }
        }

        match &flushed {
            Ok(()) => info!("Kafka 生产者已关闭"),
            Err(e) => error!(error = %e, "Kafka 生产者关闭时存在未确认消息"),
        }
        flushed
    }
}

impl EventPublisher for KafkaProducer {
    fn publish(&self, envelope: EventEnvelope) -> Result<DeliveryHandle> {
        let guard = self.pending_tx.lock();
        let Some(pending_tx) = guard.as_ref() else {
            return Err(PipelineError::Shutdown);
        };

        let record = FutureRecord::to(&envelope.topic)
            .key(&envelope.key)
            .payload(&envelope.payload);
        let enqueued = self.producer.send_result(record).map_err(|(e, _)| e);

        let future = match enqueued {
            Ok(future) => future,
            Err(e) => {
                metrics::record_publish(&envelope.topic, "rejected");
                warn!(topic = %envelope.topic, key = %envelope.key, error = %e, "消息入队失败");
                return Err(enqueue_error(&envelope.topic, e));
            }
        };

        let (notifier, handle) = DeliveryHandle::pending();
        let EventEnvelope { topic, key, .. } = envelope;
        metrics::record_publish(&topic, "enqueued");
        debug!(topic = %topic, key = %key, "消息已入队");

        pending_tx
            .send(PendingDelivery {
                topic,
                key,
                future,
                notifier,
            })
            .map_err(|_| PipelineError::Shutdown)?;

        Ok(handle)
    }
}

impl Drop for KafkaProducer {
    fn drop(&mut self) {
        if self.pending_tx.get_mut().is_some() {
            warn!(
                in_flight = self.producer.in_flight_count(),
                "Kafka 生产者未经 shutdown 即被释放，在途消息可能丢失"
            );
        }
    }
}

fn enqueue_error(topic: &str, e: KafkaError) -> PipelineError {
    match e.rdkafka_error_code() {
        Some(RDKafkaErrorCode::QueueFull) => PipelineError::QueueFull(topic.to_string()),
        _ => PipelineError::Delivery(format!("{topic}: {e}")),
    }
}

/// 回执后台任务
///
/// 发送端关闭且在途回执全部完成后退出。不做重试，重试预算属于 librdkafka。
async fn drain_deliveries(mut pending_rx: mpsc::UnboundedReceiver<PendingDelivery>) {
    let mut in_flight = FuturesUnordered::new();
    let mut accepting = true;

    loop {
        tokio::select! {
            pending = pending_rx.recv(), if accepting => match pending {
                Some(pending) => in_flight.push(resolve_delivery(pending)),
                None => accepting = false,
            },
            Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
            else => break,
        }
    }

    debug!("投递回执任务退出");
}

async fn resolve_delivery(pending: PendingDelivery) {
    let PendingDelivery {
        topic,
        key,
        future,
        notifier,
    } = pending;

    let result = match future.await {
        Ok(Ok(delivery)) => {
            metrics::record_delivery(&topic, "success");
            debug!(
                topic = %topic,
                key = %key,
                partition = delivery.partition,
                offset = delivery.offset,
                "消息已确认"
            );
            Ok(DeliveryReport {
                topic,
                key,
                partition: delivery.partition,
                offset: delivery.offset,
            })
        }
        Ok(Err((e, _))) => {
            metrics::record_delivery(&topic, "failure");
            error!(topic = %topic, key = %key, error = %e, "消息投递失败");
            Err(PipelineError::Delivery(format!("{topic}: {e}")))
        }
        Err(_) => {
            metrics::record_delivery(&topic, "canceled");
            error!(topic = %topic, key = %key, "投递回执被取消");
            Err(PipelineError::Delivery(format!("{topic}: 投递回执被取消")))
        }
    };

    notifier.notify(result);
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// Kafka 消费者
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    group_id: String,
    auto_commit: bool,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// `group_suffix` 允许同一服务内不同消费逻辑使用独立的消费组。
    pub fn new(config: &KafkaConfig, group_suffix: Option<&str>) -> Result<Self> {
        validate_brokers(&config.brokers)?;

        let group_id = match group_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = consumer_client_config(config, &group_id)
            .create()
            .map_err(|e| PipelineError::Connection(format!("创建消费者失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id,
            auto_offset_reset = config.auto_offset_reset.as_str(),
            auto_commit = config.enable_auto_commit,
            "Kafka 消费者已初始化"
        );

        Ok(Self {
            consumer,
            group_id,
            auto_commit: config.enable_auto_commit,
        })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<()> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| PipelineError::Connection(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, group_id = %self.group_id, "已订阅 Kafka topics");
        Ok(())
    }
}

#[async_trait]
impl MessageSource for KafkaConsumer {
    async fn poll(&self, timeout: Duration) -> Result<Option<ConsumedMessage>> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(msg)) => {
                let msg = ConsumedMessage::from_borrowed(&msg);
                debug!(
                    topic = %msg.topic(),
                    partition = msg.partition,
                    offset = msg.offset,
                    "收到 Kafka 消息"
                );
                Ok(Some(msg))
            }
            Ok(Err(e)) => Err(PipelineError::BrokerTransient(e.to_string())),
        }
    }

    async fn commit_message(&self, message: ConsumedMessage) -> Result<()> {
        let position = message.position();

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &position.topic,
            position.partition,
            Offset::Offset(position.offset + 1),
        )
        .map_err(|e| PipelineError::Commit(format!("{position}: {e}")))?;

        let committed = if self.auto_commit {
            self.consumer.store_offsets(&tpl)
        } else {
            self.consumer.commit(&tpl, CommitMode::Sync)
        };
        committed.map_err(|e| PipelineError::Commit(format!("{position}: {e}")))?;

        debug!(%position, "位点已提交");
        Ok(())
    }

    async fn rewind(&self, message: &ConsumedMessage) -> Result<()> {
        let position = message.position();

        self.consumer
            .seek(
                &position.topic,
                position.partition,
                Offset::Offset(position.offset),
                SEEK_TIMEOUT,
            )
            .map_err(|e| PipelineError::Commit(format!("回退 {position} 失败: {e}")))?;

        debug!(%position, "位点已回退");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OffsetReset;

    #[test]
    fn test_topic_constants() {
        assert_eq!(topics::ORDERS_CREATED, "orders.created");
        assert_eq!(topics::PAYMENTS_COMPLETED, "payments.completed");
    }

    #[test]
    fn test_validate_brokers() {
        assert!(validate_brokers("localhost:9092").is_ok());
        assert!(validate_brokers("kafka-1:9092, kafka-2:9093").is_ok());

        for bad in ["", "   ", "localhost", "localhost:", ":9092", "host:port", "a:9092,"] {
            let err = validate_brokers(bad).unwrap_err();
            assert_eq!(err.code(), "CONNECTION_ERROR", "输入: {bad:?}");
        }
    }

    #[test]
    fn test_producer_reliability_knobs() {
        let config = KafkaConfig {
            transactional_id: Some("payment-service".to_string()),
            message_timeout_ms: 7000,
            ..Default::default()
        };
        let client = producer_client_config(&config);

        assert_eq!(client.get("acks"), Some("all"));
        assert_eq!(client.get("enable.idempotence"), Some("true"));
        assert_eq!(client.get("retries"), Some("5"));
        assert_eq!(client.get("linger.ms"), Some("5"));
        assert_eq!(
            client.get("max.in.flight.requests.per.connection"),
            Some("5")
        );
        assert_eq!(client.get("message.timeout.ms"), Some("7000"));
        assert_eq!(client.get("transactional.id"), None);
    }

    #[test]
    fn test_consumer_config_manual_commit() {
        let config = KafkaConfig::default();
        let client = consumer_client_config(&config, "payment-service-group");

        assert_eq!(client.get("group.id"), Some("payment-service-group"));
        assert_eq!(client.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(client.get("enable.auto.commit"), Some("false"));
        assert_eq!(client.get("enable.partition.eof"), Some("false"));
        assert_eq!(client.get("enable.auto.offset.store"), None);
    }

    #[test]
    fn test_consumer_config_auto_commit_uses_offset_store() {
        let config = KafkaConfig {
            enable_auto_commit: true,
            auto_offset_reset: OffsetReset::Latest,
            ..Default::default()
        };
        let client = consumer_client_config(&config, "g");

        assert_eq!(client.get("enable.auto.commit"), Some("true"));
        assert_eq!(client.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(client.get("auto.offset.reset"), Some("latest"));
    }

    #[test]
    fn test_consumed_message_accessors() {
        let msg = ConsumedMessage::new(
            EventEnvelope::new("orders.created", "A", b"payload".to_vec()),
            2,
            41,
        );

        assert_eq!(msg.topic(), "orders.created");
        assert_eq!(msg.key(), "A");
        assert_eq!(msg.payload(), b"payload");
        assert_eq!(msg.position().to_string(), "orders.created[2]@41");
    }

    #[tokio::test]
    async fn test_delivery_handle_resolves_from_notifier() {
        let (notifier, handle) = DeliveryHandle::pending();
        notifier.notify(Ok(DeliveryReport {
            topic: "payments.completed".to_string(),
            key: "A".to_string(),
            partition: 0,
            offset: 7,
        }));

        let report = handle.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(report.offset, 7);
    }

    #[tokio::test]
    async fn test_delivery_handle_dropped_notifier_is_failure() {
        let (notifier, handle) = DeliveryHandle::pending();
        drop(notifier);

        let err = handle.wait(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.code(), "DELIVERY_ERROR");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_handle_times_out() {
        let (_notifier, handle) = DeliveryHandle::pending();

        let err = handle.wait(Duration::from_millis(50)).await.unwrap_err();
        assert!(err.to_string().contains("超时"));
    }

    #[tokio::test]
    async fn test_producer_rejects_malformed_brokers() {
        let config = KafkaConfig {
            brokers: "not-a-broker".to_string(),
            ..Default::default()
        };
        let err = KafkaProducer::new(&config).err().unwrap();
        assert_eq!(err.code(), "CONNECTION_ERROR");
    }

    #[tokio::test]
    async fn test_producer_shutdown_is_idempotent() {
        // librdkafka 创建客户端时不连接 broker，可离线验证关闭语义
        let producer = KafkaProducer::new(&KafkaConfig::default()).unwrap();

        producer.shutdown(Duration::from_millis(200)).await.unwrap();
        producer.shutdown(Duration::from_millis(200)).await.unwrap();

        let err = producer
            .publish(EventEnvelope::new("orders.created", "A", vec![1]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Shutdown));
    }

    #[tokio::test]
    async fn test_producer_shutdown_respects_single_deadline() {
        let config = KafkaConfig {
            message_timeout_ms: 30_000,
            ..Default::default()
        };
        let producer = KafkaProducer::new(&config).unwrap();
        // 无 broker 时消息一直在途，flush 与回执任务都会等到截止时间
        let _handle = producer
            .publish(EventEnvelope::new("orders.created", "A", vec![1]))
            .unwrap();

        let timeout = Duration::from_millis(300);
        let started = std::time::Instant::now();
        let _ = producer.shutdown(timeout).await;

        assert!(started.elapsed() < timeout * 2 - Duration::from_millis(100));
    }
}
