//! 支付处理流程测试
//!
//! 以内存来源/发布端驱动真实的 PaymentProcessor，覆盖成功、发布失败与重复投递场景。
//! `broker_round_trip` 需要本地 Kafka，默认忽略。

use std::sync::Arc;
use std::time::Duration;

use payment_service::consumer::build_loop;
use pipeline_proto::payment::{PaymentCompleted, PaymentStatus};
use pipeline_shared::idempotency::{InMemoryProcessedStore, NoopProcessedStore};
use pipeline_shared::kafka::topics;
use pipeline_shared::pipeline::{CommitPolicy, LoopSettings, StepOutcome};
use pipeline_shared::retry::RetryPolicy;
use pipeline_shared::test_utils::{
    Call, CallLog, PublishFailure, RecordingPublisher, ScriptedSource, order_created_message,
};
use prost::Message;
use tokio::sync::watch;
use tokio_test::assert_ok;

fn settings() -> LoopSettings {
    LoopSettings {
        poll_timeout: Duration::from_millis(20),
        commit_policy: CommitPolicy::AfterPublish,
        retry_policy: RetryPolicy::immediate(),
    }
}

#[tokio::test]
async fn order_created_produces_successful_payment() {
    let log = CallLog::default();
    let source = Arc::new(ScriptedSource::new(log.clone()));
    let publisher = Arc::new(RecordingPublisher::new(log.clone()));
    let mut pipeline = build_loop(
        source.clone(),
        publisher.clone(),
        Arc::new(NoopProcessedStore),
        settings(),
    );
    source.push(order_created_message("A", "U1", 500, 0));

    assert!(matches!(pipeline.step().await, StepOutcome::Committed(_)));

    let accepted = publisher.accepted();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].topic, topics::PAYMENTS_COMPLETED);
    assert_eq!(accepted[0].key, "A");

    let payment = PaymentCompleted::decode(accepted[0].payload.as_slice()).unwrap();
    assert_eq!(payment.order_id, "A");
    assert_eq!(payment.status(), PaymentStatus::Success);
    assert!(!payment.transaction_id.is_empty());

    // 源位点在发布之后提交
    let calls = log.snapshot();
    let publish_at = calls
        .iter()
        .position(|c| matches!(c, Call::Publish { .. }))
        .unwrap();
    let commit_at = calls
        .iter()
        .position(|c| matches!(c, Call::Commit(p) if p.topic == topics::ORDERS_CREATED && p.offset == 0))
        .unwrap();
    assert!(publish_at < commit_at);
}

#[tokio::test]
async fn invalid_amount_publishes_failed_payment() {
    let log = CallLog::default();
    let source = Arc::new(ScriptedSource::new(log.clone()));
    let publisher = Arc::new(RecordingPublisher::new(log.clone()));
    let mut pipeline = build_loop(
        source.clone(),
        publisher.clone(),
        Arc::new(NoopProcessedStore),
        settings(),
    );
    source.push(order_created_message("B", "U1", 0, 4));

    assert!(matches!(pipeline.step().await, StepOutcome::Committed(_)));

    let payment = PaymentCompleted::decode(publisher.accepted()[0].payload.as_slice()).unwrap();
    assert_eq!(payment.order_id, "B");
    assert_eq!(payment.status(), PaymentStatus::Failed);
}

#[tokio::test]
async fn failing_producer_never_commits() {
    let log = CallLog::default();
    let source = Arc::new(ScriptedSource::new(log.clone()));
    let publisher = Arc::new(RecordingPublisher::new(log.clone()).failing(PublishFailure::Always));
    let mut pipeline = build_loop(
        source.clone(),
        publisher.clone(),
        Arc::new(NoopProcessedStore),
        settings(),
    );
    source.push(order_created_message("A", "U1", 500, 0));

    for _ in 0..10 {
        assert!(matches!(
            pipeline.step().await,
            StepOutcome::Withheld { .. }
        ));
    }

    assert!(log.commits().is_empty());
    assert_eq!(publisher.attempts(), 10);
    assert!(log.publishes().iter().all(|(_, key)| key == "A"));
}

#[tokio::test]
async fn recovered_producer_commits_after_redelivery() {
    let log = CallLog::default();
    let source = Arc::new(ScriptedSource::new(log.clone()));
    let publisher = Arc::new(RecordingPublisher::new(log.clone()).failing(PublishFailure::FirstN(2)));
    let mut pipeline = build_loop(
        source.clone(),
        publisher.clone(),
        Arc::new(NoopProcessedStore),
        settings(),
    );
    source.push(order_created_message("A", "U1", 500, 0));
    source.push(order_created_message("B", "U2", 700, 1));

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        outcomes.push(pipeline.step().await);
    }

    assert!(matches!(outcomes[0], StepOutcome::Withheld { attempt: 1, .. }));
    assert!(matches!(outcomes[1], StepOutcome::Withheld { attempt: 2, .. }));
    assert!(matches!(&outcomes[2], StepOutcome::Committed(p) if p.offset == 0));
    assert!(matches!(&outcomes[3], StepOutcome::Committed(p) if p.offset == 1));

    let keys: Vec<String> = publisher
        .accepted()
        .into_iter()
        .map(|envelope| envelope.key)
        .collect();
    assert_eq!(keys, vec!["A".to_string(), "B".to_string()]);
}

#[tokio::test]
async fn redelivered_order_is_not_paid_twice() {
    let log = CallLog::default();
    let source = Arc::new(ScriptedSource::new(log.clone()));
    let publisher = Arc::new(RecordingPublisher::new(log.clone()));
    let mut pipeline = build_loop(
        source.clone(),
        publisher.clone(),
        Arc::new(InMemoryProcessedStore::default()),
        settings(),
    );
    source.push(order_created_message("A", "U1", 500, 0));
    source.push(order_created_message("A", "U1", 500, 0));

    pipeline.step().await;
    pipeline.step().await;

    assert_eq!(publisher.accepted().len(), 1);
    assert_eq!(log.commits().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn run_processes_until_shutdown() {
    let log = CallLog::default();
    let source = Arc::new(ScriptedSource::new(log.clone()));
    let publisher = Arc::new(RecordingPublisher::new(log.clone()));
    let pipeline = build_loop(
        source.clone(),
        publisher.clone(),
        Arc::new(NoopProcessedStore),
        settings(),
    );
    for offset in 0..3 {
        source.push(order_created_message(&format!("order-{offset}"), "U1", 100, offset));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(pipeline.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    assert_ok!(tokio::time::timeout(Duration::from_secs(1), task).await.unwrap());

    assert_eq!(publisher.accepted().len(), 3);
    assert_eq!(log.commits().len(), 3);
}

/// 需要 localhost:9092 上的 Kafka，且 orders.created / payments.completed 已创建
#[tokio::test]
#[ignore]
async fn broker_round_trip() {
    use pipeline_shared::config::KafkaConfig;
    use pipeline_shared::kafka::{EventPublisher, KafkaConsumer, KafkaProducer};

    let config = KafkaConfig {
        consumer_group: format!("payment-flow-test-{}", uuid::Uuid::new_v4()),
        ..Default::default()
    };

    let producer = Arc::new(KafkaProducer::new(&config).unwrap());
    let consumer = KafkaConsumer::new(&config, None).unwrap();
    consumer.subscribe(&[topics::ORDERS_CREATED]).unwrap();

    let order = pipeline_proto::order::OrderCreated {
        order_id: pipeline_shared::test_utils::test_order_id(),
        user_id: "U1".to_string(),
        amount: 500,
        created_at: pipeline_shared::events::unix_now(),
    };
    let envelope = pipeline_shared::events::encode_envelope(&order).unwrap();
    producer
        .publish(envelope)
        .unwrap()
        .wait(Duration::from_secs(10))
        .await
        .unwrap();

    let mut pipeline = build_loop(
        consumer,
        producer.clone(),
        Arc::new(NoopProcessedStore),
        LoopSettings {
            commit_policy: CommitPolicy::AfterDelivery {
                timeout: Duration::from_secs(10),
            },
            ..LoopSettings::default()
        },
    );

    let mut committed = false;
    for _ in 0..30 {
        if let StepOutcome::Committed(_) = pipeline.step().await {
            committed = true;
            break;
        }
    }
    assert!(committed);

    producer.shutdown(Duration::from_secs(5)).await.unwrap();
}
