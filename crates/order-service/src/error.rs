//! 订单服务错误类型

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pipeline_shared::error::PipelineError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    /// 请求体不是合法 JSON 或字段类型不符
    #[error("请求参数无效: {0}")]
    BadRequest(String),

    /// 事件编码或入队失败
    #[error(transparent)]
    Publish(#[from] PipelineError),
}

impl OrderError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Publish(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Publish(e) => e.code(),
        }
    }
}

impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 发布失败的细节只记录日志
        let message = match &self {
            Self::Publish(e) => {
                tracing::error!(error = %e, code = e.code(), "发布订单事件失败");
                "订单创建失败，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
