//! 路由配置
//!
//! - `POST /orders`：创建订单，202 返回订单号
//! - `GET /health`：存活探针

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use pipeline_shared::observability::middleware::http_tracing;
use serde::Deserialize;

use crate::error::OrderError;
use crate::state::AppState;

/// 下单请求体
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    /// 最小货币单位
    pub amount: i64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/health", get(health_check))
        .layer(middleware::from_fn(http_tracing))
        .with_state(state)
}

/// 请求体按原始字节解析，不依赖 Content-Type
async fn create_order(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, String), OrderError> {
    let request: CreateOrderRequest =
        serde_json::from_slice(&body).map_err(|e| OrderError::BadRequest(e.to_string()))?;

    let order_id = state
        .orders
        .create_order(&request.user_id, request.amount)?;
    tracing::Span::current().record("order_id", order_id.as_str());

    Ok((StatusCode::ACCEPTED, order_id))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "order-service"
    }))
}
