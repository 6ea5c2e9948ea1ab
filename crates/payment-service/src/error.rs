//! 支付服务错误类型

use pipeline_shared::error::PipelineError;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// 金额非正，订单按支付失败处理
    #[error("订单金额无效: order_id={order_id}, amount={amount}")]
    InvalidAmount { order_id: String, amount: i64 },

    #[error(transparent)]
    Shared(#[from] PipelineError),
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidAmount { .. } => false,
            Self::Shared(e) => e.is_retryable(),
        }
    }
}

impl From<PaymentError> for PipelineError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Shared(e) => e,
            other => PipelineError::Processing(other.to_string()),
        }
    }
}
