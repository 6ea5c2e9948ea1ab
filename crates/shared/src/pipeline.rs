//! 消费-处理-发布循环
//!
//! 单条消息依次经过：拉取 -> 解码 -> 去重 -> 业务处理 -> 发布派生事件 -> 提交位点。
//! 位点只在派生事件发布成功之后提交；发布失败时不提交并回退分区，
//! 消息会被重新拉取，保证至少一次。无法解码的消息直接提交跳过，避免毒消息阻塞分区。
//!
//! 循环是串行的：一条消息处理完毕后才会拉取下一条。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::events::{Decoded, DomainEvent, decode, encode_envelope};
use crate::idempotency::ProcessedStore;
use crate::kafka::{ConsumedMessage, EventPublisher, MessagePosition, MessageSource};
use crate::observability::metrics;
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// 配置
// ---------------------------------------------------------------------------

/// 源位点的提交时机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitPolicy {
    /// 派生事件本地入队成功即提交
    #[default]
    AfterPublish,
    /// 等待 broker 确认派生事件后再提交，确认失败或超时按发布失败处理
    AfterDelivery { timeout: Duration },
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub poll_timeout: Duration,
    pub commit_policy: CommitPolicy,
    pub retry_policy: RetryPolicy,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl LoopSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let commit_policy = if config.wait_for_delivery {
            CommitPolicy::AfterDelivery {
                timeout: config.delivery_timeout(),
            }
        } else {
            CommitPolicy::AfterPublish
        };

        Self {
            poll_timeout: config.poll_timeout(),
            commit_policy,
            retry_policy: RetryPolicy::from(&config.retry),
        }
    }
}

// ---------------------------------------------------------------------------
// 业务处理
// ---------------------------------------------------------------------------

/// 业务处理器：由源事件构造派生事件
///
/// 可重试错误（`PipelineError::is_retryable`）使消息保留等待重投，
/// 其余错误视为该消息永远无法处理，提交后跳过。
#[async_trait]
pub trait EventHandler: Send + Sync {
    type Input: DomainEvent;
    type Output: DomainEvent;

    async fn handle(&self, event: &Self::Input) -> Result<Self::Output>;
}

// ---------------------------------------------------------------------------
// 单步结果
// ---------------------------------------------------------------------------

/// 提交后跳过的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// 负载无法解码或未通过校验
    Malformed(String),
    /// 去重存储中已有记录
    Duplicate,
    /// 业务处理返回不可重试错误
    Rejected(String),
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::Duplicate => "duplicate",
            Self::Rejected(_) => "rejected",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(reason) | Self::Rejected(reason) => {
                write!(f, "{}: {}", self.as_str(), reason)
            }
            Self::Duplicate => f.write_str(self.as_str()),
        }
    }
}

/// 一次循环迭代的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// 等待超时，没有消息
    Idle,
    /// 拉取时的 broker 瞬时错误
    Transient,
    /// 派生事件已发布，源位点已提交
    Committed(MessagePosition),
    /// 消息已处理，但位点提交失败，之后可能重投
    CommitFailed(MessagePosition),
    Skipped {
        position: MessagePosition,
        reason: SkipReason,
    },
    /// 未提交并已回退，`attempt` 为同一位置连续失败次数
    Withheld {
        position: MessagePosition,
        attempt: u32,
        retry_in: Duration,
    },
}

impl StepOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Transient => "transient",
            Self::Committed(_) => "committed",
            Self::CommitFailed(_) => "commit_failed",
            Self::Skipped { reason, .. } => reason.as_str(),
            Self::Withheld { .. } => "withheld",
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessingLoop
// ---------------------------------------------------------------------------

/// 消费-处理-发布循环
pub struct ProcessingLoop<S, P, H> {
    source: S,
    publisher: P,
    handler: H,
    store: Arc<dyn ProcessedStore>,
    settings: LoopSettings,
    /// 最近一次保留的位置及其连续失败次数
    retrying: Option<(MessagePosition, u32)>,
    /// 回退失败的消息，下一次迭代直接重新处理，不再拉取
    stalled: Option<ConsumedMessage>,
}

impl<S, P, H> ProcessingLoop<S, P, H>
where
    S: MessageSource,
    P: EventPublisher,
    H: EventHandler,
{
    pub fn new(
        source: S,
        publisher: P,
        handler: H,
        store: Arc<dyn ProcessedStore>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            source,
            publisher,
            handler,
            store,
            settings,
            retrying: None,
            stalled: None,
        }
    }

    /// 运行直到关闭信号变为 `true` 或发送端被释放
    ///
    /// 关闭信号只与拉取等待和退避等待竞争，已拉取的消息总会处理完。
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_timeout_ms = self.settings.poll_timeout.as_millis() as u64,
            commit_policy = ?self.settings.commit_policy,
            "处理循环已启动"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let polled = if let Some(message) = self.stalled.take() {
                Ok(Some(message))
            } else {
                tokio::select! {
                    biased;

                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }

                    polled = self.source.poll(self.settings.poll_timeout) => polled,
                }
            };

            let pause = match self.handle_polled(polled).await {
                StepOutcome::Withheld { retry_in, .. } => retry_in,
                StepOutcome::Transient => self.settings.retry_policy.initial_delay,
                _ => Duration::ZERO,
            };

            if !pause.is_zero() {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        info!("收到关闭信号，处理循环退出");
    }

    /// 执行一次完整迭代
    pub async fn step(&mut self) -> StepOutcome {
        if let Some(message) = self.stalled.take() {
            return self.process_polled(message).await;
        }

        let polled = self.source.poll(self.settings.poll_timeout).await;
        self.handle_polled(polled).await
    }

    async fn handle_polled(&mut self, polled: Result<Option<ConsumedMessage>>) -> StepOutcome {
        match polled {
            Ok(Some(message)) => self.process_polled(message).await,
            Ok(None) => StepOutcome::Idle,
            Err(e) => {
                warn!(error = %e, "拉取消息失败，继续拉取");
                StepOutcome::Transient
            }
        }
    }

    /// 处理一条已拉取的消息
    pub async fn process_polled(&mut self, message: ConsumedMessage) -> StepOutcome {
        let topic = message.topic().to_string();
        let outcome = self.process_inner(message).await;
        metrics::record_message(&topic, outcome.metric_label());
        outcome
    }

    async fn process_inner(&mut self, message: ConsumedMessage) -> StepOutcome {
        let event = match decode::<H::Input>(message.payload()) {
            Decoded::Parsed(event) => event,
            Decoded::Malformed { reason } => {
                warn!(
                    position = %message.position(),
                    key = %message.key(),
                    reason = %reason,
                    "消息无法解析，提交后跳过"
                );
                return self.skip(message, SkipReason::Malformed(reason)).await;
            }
        };

        let dedup_key = event.partition_key().to_string();

        match self.store.has_processed(&dedup_key).await {
            Ok(true) => {
                info!(position = %message.position(), key = %dedup_key, "重复消息，提交后跳过");
                return self.skip(message, SkipReason::Duplicate).await;
            }
            Ok(false) => {}
            // 去重存储不可用时继续处理，重复发布由下游按 key 去重
            Err(e) => warn!(key = %dedup_key, error = %e, "去重查询失败，继续处理"),
        }

        let derived = match self.handler.handle(&event).await {
            Ok(derived) => derived,
            Err(e) if e.is_retryable() => return self.withhold(message, &e).await,
            Err(e) => {
                warn!(
                    position = %message.position(),
                    key = %dedup_key,
                    error = %e,
                    "业务处理失败且不可重试，提交后跳过"
                );
                return self.skip(message, SkipReason::Rejected(e.to_string())).await;
            }
        };

        if let Err(e) = self.publish(&derived).await {
            return self.withhold(message, &e).await;
        }

        if let Err(e) = self.store.mark_processed(&dedup_key).await {
            warn!(key = %dedup_key, error = %e, "标记事件为已处理失败，后续可能重复处理");
        }

        self.retrying = None;
        let position = message.position();
        match self.source.commit_message(message).await {
            Ok(()) => {
                info!(%position, key = %dedup_key, "消息处理完成");
                StepOutcome::Committed(position)
            }
            Err(e) => {
                error!(%position, error = %e, "派生事件已发布但位点提交失败，消息可能重投");
                StepOutcome::CommitFailed(position)
            }
        }
    }

    /// 编码并发布派生事件，按提交策略决定是否等待确认
    async fn publish(&self, derived: &H::Output) -> Result<()> {
        let envelope = encode_envelope(derived)?;
        let handle = self.publisher.publish(envelope)?;

        match self.settings.commit_policy {
            CommitPolicy::AfterPublish => Ok(()),
            CommitPolicy::AfterDelivery { timeout } => {
                let report = handle.wait(timeout).await?;
                debug!(
                    topic = %report.topic,
                    partition = report.partition,
                    offset = report.offset,
                    "派生事件已确认"
                );
                Ok(())
            }
        }
    }

    async fn skip(&mut self, message: ConsumedMessage, reason: SkipReason) -> StepOutcome {
        self.retrying = None;
        let position = message.position();

        match self.source.commit_message(message).await {
            Ok(()) => StepOutcome::Skipped { position, reason },
            Err(e) => {
                error!(%position, %reason, error = %e, "跳过消息时位点提交失败");
                StepOutcome::CommitFailed(position)
            }
        }
    }

    /// 不提交，回退分区并计算退避时间
    async fn withhold(&mut self, message: ConsumedMessage, cause: &PipelineError) -> StepOutcome {
        let position = message.position();
        let attempt = match &self.retrying {
            Some((last, failures)) if *last == position => failures + 1,
            _ => 1,
        };
        self.retrying = Some((position.clone(), attempt));

        let policy = &self.settings.retry_policy;
        let retry_in = policy.delay_for_attempt(attempt - 1);
        if policy.should_retry(attempt - 1) {
            warn!(
                %position,
                key = %message.key(),
                attempt,
                retry_in_ms = retry_in.as_millis() as u64,
                error = %cause,
                "派生事件发布失败，保留位点等待重投"
            );
        } else {
            error!(
                %position,
                key = %message.key(),
                attempt,
                max_retries = policy.max_retries,
                error = %cause,
                "重投次数已超过上限，继续重试，需人工介入"
            );
        }

        if let Err(e) = self.source.rewind(&message).await {
            error!(%position, error = %e, "回退位点失败，消息保留在循环内重新处理");
            self.stalled = Some(message);
        }

        StepOutcome::Withheld {
            position,
            attempt,
            retry_in,
        }
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
