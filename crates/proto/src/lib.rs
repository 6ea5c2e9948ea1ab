//! 事件 Protobuf 消息定义
//!
//! 订单与支付两个领域事件的 wire 格式。字段编号与 `order.proto` /
//! `payment.proto` 保持一致，手写 prost 派生而非 build.rs 生成，
//! 避免构建环境依赖 protoc。

pub mod order;
pub mod payment;
