//! 订单创建

use std::sync::Arc;

use pipeline_proto::order::OrderCreated;
use pipeline_shared::events::{encode_envelope, unix_now};
use pipeline_shared::kafka::EventPublisher;
use tracing::info;
use uuid::Uuid;

use crate::error::OrderError;

pub struct OrderService {
    publisher: Arc<dyn EventPublisher>,
}

impl OrderService {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    /// 生成订单号并发布 OrderCreated，返回订单号
    ///
    /// 不校验 user_id 与 amount，金额是否有效由支付服务判定。
    pub fn create_order(&self, user_id: &str, amount: i64) -> Result<String, OrderError> {
        let event = OrderCreated {
            order_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            amount,
            created_at: unix_now(),
        };

        let envelope = encode_envelope(&event)?;
        // 投递结果由生产者后台任务记录
        let _delivery = self.publisher.publish(envelope)?;

        info!(
            order_id = %event.order_id,
            user_id = %event.user_id,
            amount,
            "订单已创建"
        );
        Ok(event.order_id)
    }
}
