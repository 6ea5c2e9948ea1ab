//! 事件信封与领域事件编解码
//!
//! `EventEnvelope` 是管道的 wire 单元：topic + 分区路由 key + 不透明负载。
//! `DomainEvent` 把 Protobuf 消息与其所属 topic、分区 key 绑定，
//! 解码结果以 `Decoded` 显式区分"可解析"与"毒消息"，让跳过分支成为普通控制流。

use chrono::Utc;
use pipeline_proto::order::OrderCreated;
use pipeline_proto::payment::PaymentCompleted;

use crate::error::PipelineError;
use crate::kafka::topics;

// ---------------------------------------------------------------------------
// EventEnvelope
// ---------------------------------------------------------------------------

/// 事件信封
///
/// 每次发布调用创建一次，传输层接受后即不再存在。
/// 同一逻辑事件的重试必须使用相同的 `key`，保证重投落在同一分区。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

impl EventEnvelope {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// DomainEvent
// ---------------------------------------------------------------------------

/// 可在管道中流转的领域事件
pub trait DomainEvent: prost::Message + Default + 'static {
    /// 事件发布到的 topic
    const TOPIC: &'static str;

    /// 分区路由 key，同时作为天然的去重 key
    fn partition_key(&self) -> &str;

    /// 解码后的语义校验，失败的事件按毒消息处理
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

impl DomainEvent for OrderCreated {
    const TOPIC: &'static str = topics::ORDERS_CREATED;

    fn partition_key(&self) -> &str {
        &self.order_id
    }

    fn validate(&self) -> Result<(), String> {
        if self.order_id.is_empty() {
            return Err("order_id 为空".to_string());
        }
        Ok(())
    }
}

impl DomainEvent for PaymentCompleted {
    const TOPIC: &'static str = topics::PAYMENTS_COMPLETED;

    fn partition_key(&self) -> &str {
        &self.order_id
    }

    fn validate(&self) -> Result<(), String> {
        if self.order_id.is_empty() {
            return Err("order_id 为空".to_string());
        }
        if self.transaction_id.is_empty() {
            return Err("transaction_id 为空".to_string());
        }
        Ok(())
    }
}

/// 当前 Unix 秒，事件时间戳统一使用
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

// ---------------------------------------------------------------------------
// 编解码
// ---------------------------------------------------------------------------

/// 将领域事件编码为发往其 topic 的信封
///
/// 校验失败同样视为序列化错误：不合法的事件不允许离开进程。
pub fn encode_envelope<E: DomainEvent>(event: &E) -> Result<EventEnvelope, PipelineError> {
    event.validate().map_err(PipelineError::Serialization)?;

    let mut payload = Vec::with_capacity(event.encoded_len());
    event
        .encode(&mut payload)
        .map_err(|e| PipelineError::Serialization(format!("Protobuf 编码失败: {e}")))?;

    Ok(EventEnvelope::new(E::TOPIC, event.partition_key(), payload))
}

/// 反序列化结果
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<E> {
    Parsed(E),
    /// 负载无法解析或未通过校验，携带原因用于日志
    Malformed { reason: String },
}

impl<E> Decoded<E> {
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

/// 将负载解码为目标领域事件
pub fn decode<E: DomainEvent>(payload: &[u8]) -> Decoded<E> {
    let event = match E::decode(payload) {
        Ok(event) => event,
        Err(e) => {
            return Decoded::Malformed {
                reason: format!("Protobuf 解码失败: {e}"),
            };
        }
    };

    match event.validate() {
        Ok(()) => Decoded::Parsed(event),
        Err(reason) => Decoded::Malformed { reason },
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_proto::payment::PaymentStatus;

    fn order(order_id: &str) -> OrderCreated {
        OrderCreated {
            order_id: order_id.to_string(),
            user_id: "U1".to_string(),
            amount: 500,
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_encode_envelope_routes_by_order_id() {
        let envelope = encode_envelope(&order("A")).unwrap();

        assert_eq!(envelope.topic, "orders.created");
        assert_eq!(envelope.key, "A");
        assert!(!envelope.payload.is_empty());
    }

    #[test]
    fn test_payment_envelope_topic() {
        let event = PaymentCompleted {
            order_id: "A".to_string(),
            transaction_id: "tx-1".to_string(),
            status: PaymentStatus::Success as i32,
            processed_at: 1,
        };
        let envelope = encode_envelope(&event).unwrap();
        assert_eq!(envelope.topic, "payments.completed");
        assert_eq!(envelope.key, "A");
    }

    #[test]
    fn test_encode_rejects_invalid_event() {
        let result = encode_envelope(&order(""));
        assert!(matches!(result, Err(PipelineError::Serialization(_))));
    }

    #[test]
    fn test_decode_valid_payload() {
        let envelope = encode_envelope(&order("A")).unwrap();

        match decode::<OrderCreated>(&envelope.payload) {
            Decoded::Parsed(event) => {
                assert_eq!(event.order_id, "A");
                assert_eq!(event.user_id, "U1");
                assert_eq!(event.amount, 500);
            }
            Decoded::Malformed { reason } => panic!("不应解析失败: {reason}"),
        }
    }

    #[test]
    fn test_decode_truncated_payload_is_malformed() {
        let decoded = decode::<OrderCreated>(&[0x0A, 0x05, b'a']);
        assert!(decoded.is_malformed());
    }

    #[test]
    fn test_decode_invalid_utf8_is_malformed() {
        // field 1 为 string，内容不是合法 UTF-8
        let decoded = decode::<OrderCreated>(&[0x0A, 0x02, 0xFF, 0xFE]);
        assert!(decoded.is_malformed());
    }

    #[test]
    fn test_decode_empty_payload_fails_validation() {
        // 空负载可解码为默认值，但 order_id 为空不允许进入处理
        match decode::<OrderCreated>(&[]) {
            Decoded::Malformed { reason } => assert!(reason.contains("order_id")),
            Decoded::Parsed(_) => panic!("空负载不应通过校验"),
        }
    }
}
