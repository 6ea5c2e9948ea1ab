//! `payment.PaymentCompleted`

/// 支付结果状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PaymentStatus {
    Unspecified = 0,
    Success = 1,
    Failed = 2,
}

impl PaymentStatus {
    /// proto 枚举名，与其他语言生成代码的字符串表示一致
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Self::Unspecified => "PAYMENT_STATUS_UNSPECIFIED",
            Self::Success => "PAYMENT_STATUS_SUCCESS",
            Self::Failed => "PAYMENT_STATUS_FAILED",
        }
    }
}

/// 支付完成事件
///
/// `order_id` 引用上游 `OrderCreated.order_id`，本地不做校验。
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PaymentCompleted {
    #[prost(string, tag = "1")]
    pub order_id: String,
    #[prost(string, tag = "2")]
    pub transaction_id: String,
    #[prost(enumeration = "PaymentStatus", tag = "3")]
    pub status: i32,
    /// Unix 秒
    #[prost(int64, tag = "4")]
    pub processed_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_status_accessor() {
        let mut event = PaymentCompleted {
            order_id: "A".to_string(),
            transaction_id: "tx-1".to_string(),
            status: PaymentStatus::Success as i32,
            processed_at: 1_700_000_000,
        };
        assert_eq!(event.status(), PaymentStatus::Success);

        event.set_status(PaymentStatus::Failed);
        assert_eq!(event.status, 2);

        // 未知枚举值回落为默认值
        event.status = 99;
        assert_eq!(event.status(), PaymentStatus::Unspecified);
    }

    #[test]
    fn test_status_names() {
        assert_eq!(PaymentStatus::Success.as_str_name(), "PAYMENT_STATUS_SUCCESS");
        assert_eq!(PaymentStatus::Failed.as_str_name(), "PAYMENT_STATUS_FAILED");
    }

    #[test]
    fn test_payment_completed_decode() {
        let event = PaymentCompleted {
            order_id: "order-1".to_string(),
            transaction_id: "tx-1".to_string(),
            status: PaymentStatus::Success as i32,
            processed_at: 42,
        };
        let decoded = PaymentCompleted::decode(event.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.order_id, "order-1");
        assert_eq!(decoded.status(), PaymentStatus::Success);
    }
}
