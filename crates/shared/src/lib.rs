//! 共享库
//!
//! 包含订单与支付服务共用的配置、错误处理、事件编解码、Kafka 传输层和处理循环。

pub mod config;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod kafka;
pub mod observability;
pub mod pipeline;
pub mod retry;
pub mod shutdown;
pub mod test_utils;
