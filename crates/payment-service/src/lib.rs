//! 支付服务
//!
//! 消费 orders.created 上的 OrderCreated，完成支付处理后发布 PaymentCompleted。
//! 源位点只在派生事件发布成功后提交，发布失败的订单会被重新拉取处理。

pub mod consumer;
pub mod error;
pub mod processor;
