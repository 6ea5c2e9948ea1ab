//! Axum 路由共享状态

use std::sync::Arc;

use pipeline_shared::kafka::EventPublisher;

use crate::service::OrderService;

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
}

impl AppState {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            orders: Arc::new(OrderService::new(publisher)),
        }
    }
}
