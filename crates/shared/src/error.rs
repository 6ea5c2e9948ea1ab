//! 统一错误处理模块
//!
//! 定义发布/消费管道中共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 管道错误类型
#[derive(Debug, Error)]
pub enum PipelineError {
    // ==================== 连接错误 ====================
    /// 传输层无法初始化或订阅失败，启动阶段致命，不重试
    #[error("Kafka 连接失败: {0}")]
    Connection(String),

    // ==================== 序列化错误 ====================
    #[error("序列化失败: {0}")]
    Serialization(String),

    // ==================== 投递错误 ====================
    /// broker 拒绝或未确认消息，经投递回执异步上报
    #[error("消息投递失败: {0}")]
    Delivery(String),

    #[error("本地发送队列已满: {0}")]
    QueueFull(String),

    /// 拉取阶段的 broker 错误（如 leader 选举中），记录后继续拉取
    #[error("Kafka 瞬时错误: {0}")]
    BrokerTransient(String),

    #[error("位点提交失败: {0}")]
    Commit(String),

    // ==================== 业务处理错误 ====================
    #[error("事件处理失败: {0}")]
    Processing(String),

    #[error("外部依赖不可用: {service} - {message}")]
    Unavailable { service: String, message: String },

    #[error("幂等存储错误: {0}")]
    Idempotency(String),

    // ==================== 通用错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    #[error("生产者已关闭")]
    Shutdown,
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Delivery(_) => "DELIVERY_ERROR",
            Self::QueueFull(_) => "QUEUE_FULL",
            Self::BrokerTransient(_) => "BROKER_TRANSIENT",
            Self::Commit(_) => "COMMIT_ERROR",
            Self::Processing(_) => "PROCESSING_ERROR",
            Self::Unavailable { .. } => "UNAVAILABLE",
            Self::Idempotency(_) => "IDEMPOTENCY_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Shutdown => "SHUTDOWN",
        }
    }

    /// 是否为可重试错误
    ///
    /// 处理循环据此决定保留位点等待重投，还是按毒消息提交跳过。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Delivery(_)
                | Self::QueueFull(_)
                | Self::BrokerTransient(_)
                | Self::Commit(_)
                | Self::Unavailable { .. }
                | Self::Idempotency(_)
                | Self::Shutdown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = PipelineError::QueueFull("orders.created".to_string());
        assert_eq!(err.code(), "QUEUE_FULL");
        assert_eq!(err.to_string(), "本地发送队列已满: orders.created");
    }

    #[test]
    fn test_is_retryable() {
        assert!(PipelineError::Delivery("leader not available".to_string()).is_retryable());
        assert!(
            PipelineError::Unavailable {
                service: "gateway".to_string(),
                message: "timeout".to_string(),
            }
            .is_retryable()
        );

        assert!(!PipelineError::Serialization("bad bytes".to_string()).is_retryable());
        assert!(!PipelineError::Processing("金额无效".to_string()).is_retryable());
        assert!(!PipelineError::Connection("no brokers".to_string()).is_retryable());
    }
}
