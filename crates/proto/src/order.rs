//! `order.OrderCreated`

/// 订单创建事件
///
/// 由订单服务在 `POST /orders` 成功后发布到 `orders.created`，
/// 金额以最小货币单位（分）表示。
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OrderCreated {
    #[prost(string, tag = "1")]
    pub order_id: String,
    #[prost(string, tag = "2")]
    pub user_id: String,
    #[prost(int64, tag = "3")]
    pub amount: i64,
    /// Unix 秒
    #[prost(int64, tag = "4")]
    pub created_at: i64,
}
