//! Drain worker tests against a real database file

use async_trait::async_trait;
use crouton_common::db::outbox;
use crouton_common::db::{init_database, DrainSettings, OutboxEvent, OutboxStatus};
use crouton_drain::{
    drain_once, maintenance_pass, run_pool, DrainWorker, MergeProjector, Projector, ProjectorError,
};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

async fn setup() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("crouton.db")).await.unwrap();
    (dir, pool)
}

fn fast_settings() -> DrainSettings {
    DrainSettings {
        batch_size: 5,
        poll_interval: Duration::from_millis(10),
        max_attempts: 3,
        processing_timeout: Duration::from_secs(60),
        retry_backoff_base: Duration::from_millis(0),
        retry_backoff_max: Duration::from_millis(0),
        workers: 3,
    }
}

async fn insert_facts(pool: &SqlitePool, count: usize) {
    for i in 0..count {
        sqlx::query(
            "INSERT INTO croutons (id, source_url, content_hash, text, triple) VALUES (?, 'u', ?, ?, NULL)",
        )
        .bind(format!("fact-{}", i))
        .bind(format!("hash-{}", i))
        .bind(format!("text {}", i))
        .execute(pool)
        .await
        .unwrap();
    }
}

async fn count_status(pool: &SqlitePool, status: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE status = ?")
        .bind(status)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Records every applied event id
#[derive(Default)]
struct RecordingProjector {
    seen: Mutex<Vec<i64>>,
}

#[async_trait]
impl Projector for RecordingProjector {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn apply(&self, event: &OutboxEvent) -> Result<(), ProjectorError> {
        self.seen.lock().unwrap().push(event.id);
        tokio::task::yield_now().await;
        Ok(())
    }
}

/// Fails the first `failures` calls, then succeeds
struct FlakyProjector {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl Projector for FlakyProjector {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn apply(&self, _event: &OutboxEvent) -> Result<(), ProjectorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(ProjectorError::Rejected {
                status: 503,
                body: "graph index unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn test_worker_applies_and_acks_everything() {
    let (_dir, pool) = setup().await;
    insert_facts(&pool, 12).await;

    let projector = Arc::new(MergeProjector::new());
    let stats = drain_once(&pool, projector.clone(), &fast_settings()).await.unwrap();

    assert_eq!(stats.claimed, 12);
    assert_eq!(stats.applied, 12);
    assert_eq!(count_status(&pool, "done").await, 12);
    assert_eq!(projector.snapshot().await.facts.len(), 12);
}

#[tokio::test]
async fn test_pool_partitions_events_between_workers() {
    let (_dir, pool) = setup().await;
    insert_facts(&pool, 40).await;

    let projector = Arc::new(RecordingProjector::default());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run_pool(
        pool.clone(),
        projector.clone(),
        fast_settings(),
        cancel.clone(),
    ));

    for _ in 0..200 {
        if count_status(&pool, "done").await == 40 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cancel.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(stats.applied, 40);
    let seen = projector.seen.lock().unwrap().clone();
    let unique: HashSet<i64> = seen.iter().copied().collect();
    assert_eq!(seen.len(), 40, "an event was applied twice");
    assert_eq!(unique.len(), 40);
}

#[tokio::test]
async fn test_failure_then_retry_then_success() {
    let (_dir, pool) = setup().await;
    insert_facts(&pool, 1).await;
    let settings = fast_settings();

    let projector = Arc::new(FlakyProjector {
        failures: 2,
        calls: AtomicU32::new(0),
    });
    let worker = DrainWorker::new(0, pool.clone(), projector, settings.clone());

    for _ in 0..2 {
        let stats = worker.run_once().await.unwrap();
        assert_eq!(stats.failed, 1);
        let event = outbox::fetch_event(&pool, 1).await.unwrap().unwrap();
        assert_eq!(event.status, OutboxStatus::Failed);
        assert!(event.error.unwrap().contains("503"));

        let maintenance = maintenance_pass(&pool, &settings).await.unwrap();
        assert_eq!(maintenance.retry.requeued, 1);
    }

    let stats = worker.run_once().await.unwrap();
    assert_eq!(stats.applied, 1);

    let event = outbox::fetch_event(&pool, 1).await.unwrap().unwrap();
    assert_eq!(event.status, OutboxStatus::Done);
    assert_eq!(event.attempts, 2);
}

#[tokio::test]
async fn test_persistent_failure_is_quarantined() {
    let (_dir, pool) = setup().await;
    insert_facts(&pool, 1).await;
    let settings = fast_settings();

    let projector = Arc::new(FlakyProjector {
        failures: u32::MAX,
        calls: AtomicU32::new(0),
    });
    let worker = DrainWorker::new(0, pool.clone(), projector, settings.clone());

    let mut dead = 0;
    for _ in 0..settings.max_attempts {
        dead += worker.run_once().await.unwrap().dead;
        maintenance_pass(&pool, &settings).await.unwrap();
    }

    assert_eq!(dead, 1);
    let event = outbox::fetch_event(&pool, 1).await.unwrap().unwrap();
    assert_eq!(event.status, OutboxStatus::Dead);
    assert_eq!(event.attempts, i64::from(settings.max_attempts));

    // Nothing left to claim
    assert_eq!(worker.run_once().await.unwrap().claimed, 0);
}

#[tokio::test]
async fn test_abandoned_claim_is_redelivered_idempotently() {
    let (_dir, pool) = setup().await;
    insert_facts(&pool, 3).await;
    let settings = fast_settings();

    // A worker claims and applies, then dies before acking
    let projector = Arc::new(MergeProjector::new());
    let claimed = outbox::claim_batch(&pool, 3).await.unwrap();
    for event in &claimed {
        projector.apply(event).await.unwrap();
    }
    let before = projector.snapshot().await;

    sqlx::query("UPDATE outbox_events SET claimed_at = '2000-01-01T00:00:00.000Z'")
        .execute(&pool)
        .await
        .unwrap();

    let maintenance = maintenance_pass(&pool, &settings).await.unwrap();
    assert_eq!(maintenance.reclaimed, 3);
    assert_eq!(maintenance.retry.requeued, 3);

    let stats = drain_once(&pool, projector.clone(), &settings).await.unwrap();
    assert_eq!(stats.applied, 3);
    assert_eq!(projector.snapshot().await, before);

    // The dead worker's late acks are refused
    for event in &claimed {
        let token = event.claim_token.as_deref().unwrap();
        assert!(!outbox::ack(&pool, event.id, token).await.unwrap());
    }
    assert_eq!(count_status(&pool, "done").await, 3);
}

#[tokio::test]
async fn test_cancelled_pool_stops_promptly() {
    let (_dir, pool) = setup().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let stats = tokio::time::timeout(
        Duration::from_secs(5),
        run_pool(pool, Arc::new(MergeProjector::new()), fast_settings(), cancel),
    )
    .await
    .expect("pool should stop once cancelled");

    assert_eq!(stats.claimed, 0);
}

#[tokio::test]
async fn test_settle_error_does_not_strand_rest_of_batch() {
    let (_dir, pool) = setup().await;
    insert_facts(&pool, 3).await;

    sqlx::query(
        r#"CREATE TRIGGER refuse_ack_two BEFORE UPDATE OF status ON outbox_events
           WHEN NEW.status = 'done' AND OLD.id = 2
           BEGIN SELECT RAISE(ABORT, 'ack refused'); END"#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let projector = Arc::new(RecordingProjector::default());
    let worker = DrainWorker::new(0, pool.clone(), projector.clone(), fast_settings());

    let stats = worker.run_once().await.unwrap();
    assert_eq!(stats.claimed, 3);
    assert_eq!(stats.applied, 2);
    assert_eq!(stats.unsettled, 1);
    assert_eq!(projector.seen.lock().unwrap().len(), 3);

    for id in [1, 3] {
        let event = outbox::fetch_event(&pool, id).await.unwrap().unwrap();
        assert_eq!(event.status, OutboxStatus::Done);
    }
    let stuck = outbox::fetch_event(&pool, 2).await.unwrap().unwrap();
    assert_eq!(stuck.status, OutboxStatus::Processing);
    assert_eq!(stuck.attempts, 0);
}
