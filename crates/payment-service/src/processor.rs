//! 支付处理
//!
//! 由 OrderCreated 生成 PaymentCompleted。金额非正的订单生成失败状态的结果事件，
//! 而不是跳过，下游据此感知支付失败。

use async_trait::async_trait;
use pipeline_proto::order::OrderCreated;
use pipeline_proto::payment::{PaymentCompleted, PaymentStatus};
use pipeline_shared::error::PipelineError;
use pipeline_shared::events::unix_now;
use pipeline_shared::pipeline::EventHandler;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PaymentError;

#[derive(Debug, Default, Clone, Copy)]
pub struct PaymentProcessor;

impl PaymentProcessor {
    pub fn new() -> Self {
        Self
    }

    fn settle(&self, order: &OrderCreated) -> Result<(), PaymentError> {
        if order.amount <= 0 {
            return Err(PaymentError::InvalidAmount {
                order_id: order.order_id.clone(),
                amount: order.amount,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for PaymentProcessor {
    type Input = OrderCreated;
    type Output = PaymentCompleted;

    async fn handle(&self, order: &OrderCreated) -> Result<PaymentCompleted, PipelineError> {
        info!(order_id = %order.order_id, user_id = %order.user_id, amount = order.amount, "处理订单支付");

        let status = match self.settle(order) {
            Ok(()) => PaymentStatus::Success,
            Err(e @ PaymentError::InvalidAmount { .. }) => {
                warn!(order_id = %order.order_id, error = %e, "支付失败");
                PaymentStatus::Failed
            }
            Err(e) => return Err(e.into()),
        };

        let mut payment = PaymentCompleted {
            order_id: order.order_id.clone(),
            transaction_id: Uuid::now_v7().to_string(),
            status: 0,
            processed_at: unix_now(),
        };
        payment.set_status(status);
        Ok(payment)
    }
}
