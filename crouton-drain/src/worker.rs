//! Drain worker pool
//!
//! N workers poll the outbox independently; the claim statement
//! partitions pending events between them without any in-process
//! coordination. A separate maintenance task recovers abandoned claims
//! and requeues failed events whose backoff has elapsed.
//!
//! Shutdown is cooperative: a cancelled worker finishes (acks or nacks)
//! the batch it holds before exiting, so no claim is left behind.

use std::sync::Arc;
use std::time::Duration;

use crouton_common::db::outbox::{self, RetrySweep};
use crouton_common::db::{DrainSettings, OutboxEvent, OutboxStatus};
use crouton_common::Result;
use rand::Rng;
use sqlx::SqlitePool;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::projector::Projector;

/// Outcome of one claim-apply-settle pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub claimed: u64,
    pub applied: u64,
    pub failed: u64,
    pub dead: u64,
    /// Settle calls that found the claim already taken back
    pub lost: u64,
    /// Events whose ack/nack hit a store error; left for stale reclaim
    pub unsettled: u64,
}

impl PassStats {
    fn add(&mut self, other: PassStats) {
        self.claimed += other.claimed;
        self.applied += other.applied;
        self.failed += other.failed;
        self.dead += other.dead;
        self.lost += other.lost;
        self.unsettled += other.unsettled;
    }
}

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceStats {
    pub reclaimed: u64,
    pub retry: RetrySweep,
}

/// A single polling worker
pub struct DrainWorker {
    id: usize,
    db: SqlitePool,
    projector: Arc<dyn Projector>,
    settings: DrainSettings,
}

impl DrainWorker {
    pub fn new(id: usize, db: SqlitePool, projector: Arc<dyn Projector>, settings: DrainSettings) -> Self {
        Self {
            id,
            db,
            projector,
            settings,
        }
    }

    /// Claim one batch, apply each event and settle it
    ///
    /// Projector failures are nacked, never returned. Only a failed claim
    /// surfaces as `Err`; a store error while settling one event is logged
    /// and the rest of the batch is still settled.
    pub async fn run_once(&self) -> Result<PassStats> {
        let events = outbox::claim_batch(&self.db, self.settings.batch_size).await?;
        let mut stats = PassStats {
            claimed: events.len() as u64,
            ..Default::default()
        };

        for event in &events {
            if let Err(e) = self.process(event, &mut stats).await {
                error!(
                    worker = self.id,
                    event_id = event.id,
                    error = %e,
                    "Failed to settle event"
                );
                stats.unsettled += 1;
            }
        }

        Ok(stats)
    }

    async fn process(&self, event: &OutboxEvent, stats: &mut PassStats) -> Result<()> {
        let token = event.claim_token.as_deref().unwrap_or_default();

        match self.projector.apply(event).await {
            Ok(()) => {
                if outbox::ack(&self.db, event.id, token).await? {
                    stats.applied += 1;
                } else {
                    stats.lost += 1;
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    worker = self.id,
                    event_id = event.id,
                    event_type = %event.event_type,
                    attempts = event.attempts + 1,
                    projector = self.projector.name(),
                    error = %message,
                    "Event apply failed"
                );

                match outbox::nack(&self.db, event.id, token, &message, self.settings.max_attempts).await? {
                    Some(OutboxStatus::Dead) => stats.dead += 1,
                    Some(_) => stats.failed += 1,
                    None => stats.lost += 1,
                }
            }
        }

        Ok(())
    }

    /// Poll until cancelled
    ///
    /// A full batch is followed immediately by the next claim; an empty or
    /// partial one waits for the poll interval.
    pub async fn run(self, cancel: CancellationToken) -> PassStats {
        info!(worker = self.id, projector = self.projector.name(), "Drain worker started");
        let mut totals = PassStats::default();

        while !cancel.is_cancelled() {
            let idle = match self.run_once().await {
                Ok(stats) => {
                    if stats.claimed > 0 {
                        debug!(worker = self.id, ?stats, "Drain pass complete");
                    }
                    let idle = stats.claimed < u64::from(self.settings.batch_size);
                    totals.add(stats);
                    idle
                }
                Err(e) => {
                    error!(worker = self.id, error = %e, "Drain pass failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(jittered(self.settings.poll_interval)) => {}
                }
            }
        }

        info!(
            worker = self.id,
            applied = totals.applied,
            failed = totals.failed,
            dead = totals.dead,
            "Drain worker stopped"
        );
        totals
    }
}

/// Recover abandoned claims and requeue due failures
pub async fn maintenance_pass(db: &SqlitePool, settings: &DrainSettings) -> Result<MaintenanceStats> {
    let reclaimed =
        outbox::reclaim_stale(db, settings.processing_timeout, settings.max_attempts).await?;
    let retry = outbox::retry_failed(db, &settings.retry_policy()).await?;

    Ok(MaintenanceStats { reclaimed, retry })
}

async fn run_maintenance(db: SqlitePool, settings: DrainSettings, cancel: CancellationToken) {
    while !cancel.is_cancelled() {
        if let Err(e) = maintenance_pass(&db, &settings).await {
            error!(error = %e, "Outbox maintenance pass failed");
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(jittered(settings.poll_interval)) => {}
        }
    }
}

/// Run `settings.workers` workers plus maintenance until `cancel` fires
///
/// Returns the summed worker statistics.
pub async fn run_pool(
    db: SqlitePool,
    projector: Arc<dyn Projector>,
    settings: DrainSettings,
    cancel: CancellationToken,
) -> PassStats {
    info!(
        workers = settings.workers,
        batch_size = settings.batch_size,
        max_attempts = settings.max_attempts,
        "Starting drain pool"
    );

    let maintenance = tokio::spawn(run_maintenance(db.clone(), settings.clone(), cancel.clone()));

    let mut workers = JoinSet::new();
    for id in 0..settings.workers as usize {
        let worker = DrainWorker::new(id, db.clone(), projector.clone(), settings.clone());
        workers.spawn(worker.run(cancel.clone()));
    }

    let mut totals = PassStats::default();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(stats) => totals.add(stats),
            Err(e) => error!(error = %e, "Drain worker task panicked"),
        }
    }

    if let Err(e) = maintenance.await {
        error!(error = %e, "Maintenance task panicked");
    }

    totals
}

/// Drain until no pending event remains, without sleeping
///
/// Used by `crouton-drain run --once`. Failed events stay failed.
pub async fn drain_once(
    db: &SqlitePool,
    projector: Arc<dyn Projector>,
    settings: &DrainSettings,
) -> Result<PassStats> {
    let worker = DrainWorker::new(0, db.clone(), projector, settings.clone());
    let mut totals = PassStats::default();

    loop {
        let stats = worker.run_once().await?;
        totals.add(stats);
        if stats.claimed == 0 {
            break;
        }
    }

    Ok(totals)
}

/// Poll interval with up to ±10% jitter so workers do not poll in lockstep
fn jittered(interval: Duration) -> Duration {
    let millis = interval.as_millis() as u64;
    let spread = millis / 10;
    if spread == 0 {
        return interval;
    }
    let offset = rand::thread_rng().gen_range(0..=2 * spread);
    Duration::from_millis(millis - spread + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        for _ in 0..100 {
            let d = jittered(Duration::from_millis(1000));
            assert!(d >= Duration::from_millis(900) && d <= Duration::from_millis(1100));
        }
        assert_eq!(jittered(Duration::from_millis(5)), Duration::from_millis(5));
    }

    #[test]
    fn test_pass_stats_accumulate() {
        let mut total = PassStats::default();
        total.add(PassStats { claimed: 3, applied: 2, failed: 1, ..Default::default() });
        total.add(PassStats { claimed: 1, dead: 1, ..Default::default() });
        assert_eq!(total.claimed, 4);
        assert_eq!(total.applied, 2);
        assert_eq!(total.failed, 1);
        assert_eq!(total.dead, 1);
    }
}
