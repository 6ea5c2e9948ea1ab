//! 已处理事件的去重存储
//!
//! broker 只保证至少一次投递，重投的消息在业务层按事件 key 去重。
//! 这里只提供进程内实现，重启后去重记录丢失，重复消息会再次处理并重新发布。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::Result;

/// 去重记录默认保留 24 小时
pub const DEFAULT_PROCESSED_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// 已处理事件存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessedStore: Send + Sync {
    async fn has_processed(&self, key: &str) -> Result<bool>;

    async fn mark_processed(&self, key: &str) -> Result<()>;
}

/// 不做去重，每条消息都交给业务处理
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProcessedStore;

#[async_trait]
impl ProcessedStore for NoopProcessedStore {
    async fn has_processed(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn mark_processed(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// 进程内去重存储，记录按 TTL 过期
#[derive(Debug)]
pub struct InMemoryProcessedStore {
    entries: DashMap<String, Instant>,
    ttl: Duration,
}

impl Default for InMemoryProcessedStore {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESSED_TTL)
    }
}

impl InMemoryProcessedStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// 未过期的记录数
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) < self.ttl)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 清理过期记录，返回清理数量
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, marked_at| now.duration_since(*marked_at) < self.ttl);
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl ProcessedStore for InMemoryProcessedStore {
    async fn has_processed(&self, key: &str) -> Result<bool> {
        let Some(marked_at) = self.entries.get(key).map(|entry| *entry.value()) else {
            return Ok(false);
        };

        if marked_at.elapsed() < self.ttl {
            debug!(key, "事件已处理，跳过");
            return Ok(true);
        }

        self.entries.remove(key);
        Ok(false)
    }

    async fn mark_processed(&self, key: &str) -> Result<()> {
        self.entries.insert(key.to_string(), Instant::now());

        // 写入时顺带清理，避免长期运行时无限增长
        if self.entries.len() % 1024 == 0 {
            let pruned = self.prune_expired();
            if pruned > 0 {
                debug!(pruned, "已清理过期去重记录");
            }
        }

        debug!(key, "事件已标记为已处理");
        Ok(())
    }
}
