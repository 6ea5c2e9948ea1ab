//! 订单服务
//!
//! 通过 HTTP 接收下单请求，生成订单号并发布 OrderCreated 事件到 orders.created。
//! 发布只等待本地入队，broker 确认由生产者后台任务异步处理。

pub mod error;
pub mod routes;
pub mod service;
pub mod state;
