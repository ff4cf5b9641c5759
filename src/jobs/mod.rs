//! Scheduled Jobs
//!
//! Background jobs for periodic maintenance tasks: idempotency key upkeep,
//! the event stream relay and account cache eviction.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::cache::AccountCache;
use crate::idempotency::{IdempotencyError, IdempotencyRepository};
use crate::stream::{OutboxRelay, RelayError};

// =========================================================================
// Idempotency Key Timeout Reset Job
// =========================================================================

/// Reset idempotency keys stuck in 'processing' so that clients may retry
pub async fn reset_stale_idempotency_keys(repo: &IdempotencyRepository) -> Result<u64, JobError> {
    let rows_affected = repo.reset_stale().await?;

    if rows_affected > 0 {
        tracing::warn!(
            rows_affected = rows_affected,
            "Reset stale processing idempotency keys"
        );
    }

    Ok(rows_affected)
}

// =========================================================================
// Expired Idempotency Key Deletion Job
// =========================================================================

/// Delete idempotency keys past their expiry (24 hours after creation)
pub async fn delete_expired_idempotency_keys(repo: &IdempotencyRepository) -> Result<u64, JobError> {
    let rows_deleted = repo.cleanup_expired().await?;

    if rows_deleted > 0 {
        tracing::info!(
            rows_deleted = rows_deleted,
            "Deleted expired idempotency keys"
        );
    }

    Ok(rows_deleted)
}

// =========================================================================
// Event Stream Relay Job
// =========================================================================

/// Publish committed events until the relay has caught up
pub async fn relay_events(relay: &OutboxRelay) -> Result<usize, JobError> {
    let mut total = 0;
    loop {
        let published = relay.run_once().await?;
        total += published;
        if published == 0 || published < relay.batch_size() {
            break;
        }
    }
    Ok(total)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for idempotency key maintenance (default: 1 minute)
    pub idempotency_maintenance_interval: Duration,
    /// Interval for the event stream relay (default: 1 second)
    pub relay_interval: Duration,
    /// Interval for cache eviction (default: 1 minute)
    pub cache_eviction_interval: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            idempotency_maintenance_interval: Duration::from_secs(60),
            relay_interval: Duration::from_secs(1),
            cache_eviction_interval: Duration::from_secs(60),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    idempotency: IdempotencyRepository,
    relay: OutboxRelay,
    cache: Arc<dyn AccountCache>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(
        idempotency: IdempotencyRepository,
        relay: OutboxRelay,
        cache: Arc<dyn AccountCache>,
    ) -> Self {
        Self {
            idempotency,
            relay,
            cache,
            config: JobSchedulerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: JobSchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the job scheduler in the background. It stops when `shutdown`
    /// turns true.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            relay_interval_ms = self.config.relay_interval.as_millis() as u64,
            "Job scheduler started"
        );

        let mut idempotency_interval = interval(self.config.idempotency_maintenance_interval);
        let mut relay_interval = interval(self.config.relay_interval);
        let mut cache_interval = interval(self.config.cache_eviction_interval);
        relay_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = idempotency_interval.tick() => {
                    if let Err(e) = reset_stale_idempotency_keys(&self.idempotency).await {
                        tracing::error!(error = %e, "Idempotency key reset failed");
                    }
                    if let Err(e) = delete_expired_idempotency_keys(&self.idempotency).await {
                        tracing::error!(error = %e, "Idempotency key deletion failed");
                    }
                }
                _ = relay_interval.tick() => {
                    if let Err(e) = relay_events(&self.relay).await {
                        tracing::error!(error = %e, "Event stream relay failed");
                    }
                }
                _ = cache_interval.tick() => {
                    let evicted = self.cache.evict_expired().await;
                    if evicted > 0 {
                        tracing::debug!(evicted, "Evicted expired account cache entries");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Hand over whatever committed before shutdown
        if let Err(e) = relay_events(&self.relay).await {
            tracing::warn!(error = %e, "Final event stream relay failed");
        }
        tracing::info!("Job scheduler stopped");
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match reset_stale_idempotency_keys(&self.idempotency).await {
            Ok(count) => report.idempotency_keys_reset = count,
            Err(e) => report.errors.push(format!("Idempotency reset: {}", e)),
        }

        match delete_expired_idempotency_keys(&self.idempotency).await {
            Ok(count) => report.idempotency_keys_deleted = count,
            Err(e) => report.errors.push(format!("Idempotency deletion: {}", e)),
        }

        match relay_events(&self.relay).await {
            Ok(count) => report.events_published = count,
            Err(e) => report.errors.push(format!("Event relay: {}", e)),
        }

        report.cache_entries_evicted = self.cache.evict_expired().await;
        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub idempotency_keys_reset: u64,
    pub idempotency_keys_deleted: u64,
    pub events_published: usize,
    pub cache_entries_evicted: usize,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Idempotency maintenance error: {0}")]
    Idempotency(#[from] IdempotencyError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::PublishError;

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.idempotency_maintenance_interval, Duration::from_secs(60));
        assert_eq!(config.relay_interval, Duration::from_secs(1));
        assert_eq!(config.cache_eviction_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_maintenance_report_default() {
        let report = MaintenanceReport::default();
        assert_eq!(report.events_published, 0);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_job_error_display() {
        let err = JobError::from(RelayError::Publish {
            sequence: 3,
            source: PublishError::Unavailable("closed".to_string()),
        });
        assert_eq!(
            err.to_string(),
            "Relay error: Publish failed at sequence 3: Publisher unavailable: closed"
        );
    }
}
