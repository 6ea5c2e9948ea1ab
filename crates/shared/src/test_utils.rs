//! 测试工具模块
//!
//! 提供无需 broker 的消息来源与发布端内存实现、统一的调用记录，
//! 以及构造测试消息的辅助函数。

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline_proto::order::OrderCreated;
use pipeline_proto::payment::{PaymentCompleted, PaymentStatus};
use prost::Message;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::events::{EventEnvelope, unix_now};
use crate::kafka::{
    ConsumedMessage, DeliveryHandle, DeliveryReport, EventPublisher, MessagePosition,
    MessageSource, topics,
};
use crate::pipeline::EventHandler;

// ==================== 测试数据 ====================

/// 生成唯一的测试订单 ID
pub fn test_order_id() -> String {
    format!("test-order-{}", Uuid::new_v4())
}

/// 构造分区 0 上的消费消息
pub fn consumed(topic: &str, key: &str, payload: Vec<u8>, offset: i64) -> ConsumedMessage {
    ConsumedMessage::new(EventEnvelope::new(topic, key, payload), 0, offset)
}

/// 构造 orders.created 上的 OrderCreated 消息
pub fn order_created_message(
    order_id: &str,
    user_id: &str,
    amount: i64,
    offset: i64,
) -> ConsumedMessage {
    let event = OrderCreated {
        order_id: order_id.to_string(),
        user_id: user_id.to_string(),
        amount,
        created_at: unix_now(),
    };
    consumed(topics::ORDERS_CREATED, order_id, event.encode_to_vec(), offset)
}

// ==================== 调用记录 ====================

/// 传输层调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Poll,
    Publish { topic: String, key: String },
    Commit(MessagePosition),
    Rewind(MessagePosition),
}

/// 多个测试替身共享的有序调用记录
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    pub fn snapshot(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// 所有发布尝试（含失败）的 (topic, key)
    pub fn publishes(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Publish { topic, key } => Some((topic.clone(), key.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn commits(&self) -> Vec<MessagePosition> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Commit(position) => Some(position.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn rewinds(&self) -> Vec<MessagePosition> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Rewind(position) => Some(position.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn polls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, Call::Poll))
            .count()
    }
}

// ==================== 内存消息来源 ====================

/// 按脚本返回消息的来源
///
/// `rewind` 把消息放回队首，下一次 `poll` 会再次返回它，与 broker 的 seek 语义一致。
/// 队列为空时等待完整的超时时间后返回 `None`。
#[derive(Debug, Default)]
pub struct ScriptedSource {
    queue: Mutex<VecDeque<ConsumedMessage>>,
    log: CallLog,
}

impl ScriptedSource {
    pub fn new(log: CallLog) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            log,
        }
    }

    pub fn with_messages(log: CallLog, messages: Vec<ConsumedMessage>) -> Self {
        Self {
            queue: Mutex::new(messages.into()),
            log,
        }
    }

    pub fn push(&self, message: ConsumedMessage) {
        self.queue.lock().push_back(message);
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().len()
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn poll(&self, timeout: Duration) -> Result<Option<ConsumedMessage>> {
        self.log.record(Call::Poll);

        let next = self.queue.lock().pop_front();
        if next.is_none() {
            tokio::time::sleep(timeout).await;
        }
        Ok(next)
    }

    async fn commit_message(&self, message: ConsumedMessage) -> Result<()> {
        self.log.record(Call::Commit(message.position()));
        Ok(())
    }

    async fn rewind(&self, message: &ConsumedMessage) -> Result<()> {
        self.log.record(Call::Rewind(message.position()));
        self.queue.lock().push_front(ConsumedMessage {
            envelope: message.envelope.clone(),
            partition: message.partition,
            offset: message.offset,
            timestamp: message.timestamp,
            headers: message.headers.clone(),
        });
        Ok(())
    }
}

// ==================== 内存发布端 ====================

/// 本地入队的失败模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishFailure {
    #[default]
    Never,
    Always,
    /// 前 N 次发布失败
    FirstN(usize),
}

/// 记录所有发布尝试的发布端
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    log: CallLog,
    failure: PublishFailure,
    fail_delivery: bool,
    attempts: AtomicUsize,
    accepted: Mutex<Vec<EventEnvelope>>,
}

impl RecordingPublisher {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn failing(mut self, failure: PublishFailure) -> Self {
        self.failure = failure;
        self
    }

    /// 入队成功，但投递回执报告失败
    pub fn with_delivery_failure(mut self) -> Self {
        self.fail_delivery = true;
        self
    }

    /// 已被接受的信封
    pub fn accepted(&self) -> Vec<EventEnvelope> {
        self.accepted.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, envelope: EventEnvelope) -> Result<DeliveryHandle> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        self.log.record(Call::Publish {
            topic: envelope.topic.clone(),
            key: envelope.key.clone(),
        });

        let rejected = match self.failure {
            PublishFailure::Never => false,
            PublishFailure::Always => true,
            PublishFailure::FirstN(n) => attempt < n,
        };
        if rejected {
            return Err(PipelineError::QueueFull(envelope.topic));
        }

        let mut accepted = self.accepted.lock();
        let offset = accepted.len() as i64;
        let report = DeliveryReport {
            topic: envelope.topic.clone(),
            key: envelope.key.clone(),
            partition: 0,
            offset,
        };
        accepted.push(envelope);

        if self.fail_delivery {
            return Ok(DeliveryHandle::failed(PipelineError::Delivery(format!(
                "{}: broker 未确认",
                report.topic
            ))));
        }
        Ok(DeliveryHandle::acknowledged(report))
    }
}

// ==================== 测试处理器 ====================

/// 将 OrderCreated 直接转换为成功的 PaymentCompleted
#[derive(Debug, Default)]
pub struct EchoPaymentHandler {
    failure: Option<fn() -> PipelineError>,
}

impl EchoPaymentHandler {
    /// 每次处理都返回 `make_error` 生成的错误
    pub fn failing(make_error: fn() -> PipelineError) -> Self {
        Self {
            failure: Some(make_error),
        }
    }
}

#[async_trait]
impl EventHandler for EchoPaymentHandler {
    type Input = OrderCreated;
    type Output = PaymentCompleted;

    async fn handle(&self, event: &OrderCreated) -> Result<PaymentCompleted> {
        if let Some(make_error) = self.failure {
            return Err(make_error());
        }

        Ok(PaymentCompleted {
            order_id: event.order_id.clone(),
            transaction_id: format!("tx-{}", event.order_id),
            status: PaymentStatus::Success as i32,
            processed_at: unix_now(),
        })
    }
}
