//! Verification scheduling loop
//!
//! Holds the active job table and ticks every job on a fixed interval.
//! Jobs remove themselves through [`JobRegistry`] once terminal; their last
//! snapshot stays queryable.

use crate::collaborators::{async_trait, JobRegistry};
use crate::error::RegistrationError;
use crate::health::{components, HealthRegistry};
use crate::job::{Collaborators, JobSettings, JobSnapshot, TickReport, VerificationJob};
use crate::models::{ExecutionContext, JobStatus};
use crate::observability::{StructuredLogger, VerifierMetrics};
use anyhow::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::interval;
use tracing::{debug, info};

/// Default interval between scheduling passes
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Finished snapshots kept for the jobs API before the oldest are evicted
pub const DEFAULT_FINISHED_RETENTION: usize = 1000;

/// Active and finished jobs keyed by state execution id
pub struct JobTable {
    active: DashMap<String, Arc<Mutex<VerificationJob>>>,
    finished: DashMap<String, JobSnapshot>,
    finished_retention: usize,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::with_finished_retention(DEFAULT_FINISHED_RETENTION)
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retention` finished snapshots; the least recently
    /// updated are dropped first
    pub fn with_finished_retention(retention: usize) -> Self {
        Self {
            active: DashMap::new(),
            finished: DashMap::new(),
            finished_retention: retention,
        }
    }

    fn record_finished(&self, snapshot: JobSnapshot) {
        self.finished
            .insert(snapshot.state_execution_id.clone(), snapshot);

        while self.finished.len() > self.finished_retention {
            let oldest = self
                .finished
                .iter()
                .min_by(|a, b| {
                    (a.value().updated_at, a.key()).cmp(&(b.value().updated_at, b.key()))
                })
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.finished.remove(&key);
                }
                None => break,
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.active.contains_key(key)
    }

    fn get(&self, key: &str) -> Option<Arc<Mutex<VerificationJob>>> {
        self.active.get(key).map(|entry| entry.value().clone())
    }

    fn handles(&self) -> Vec<(String, Arc<Mutex<VerificationJob>>)> {
        self.active
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[async_trait]
impl JobRegistry for JobTable {
    async fn delete_job(&self, job_key: &str) -> Result<bool> {
        Ok(self.active.remove(job_key).is_some())
    }
}

/// Counts reported by the jobs API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub active: usize,
    pub finished: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errored: usize,
}

/// Scheduler that drives every registered verification job
pub struct VerificationScheduler {
    table: Arc<JobTable>,
    collaborators: Collaborators,
    settings: Arc<JobSettings>,
    health: HealthRegistry,
    metrics: VerifierMetrics,
    logger: StructuredLogger,
    tick_interval: Duration,
}

impl VerificationScheduler {
    /// `collaborators.registry` should be `table` so terminal jobs leave it
    pub fn new(
        table: Arc<JobTable>,
        collaborators: Collaborators,
        settings: JobSettings,
        health: HealthRegistry,
    ) -> Self {
        let logger = StructuredLogger::new(settings.service_name.clone());
        Self {
            table,
            collaborators,
            settings: Arc::new(settings),
            health,
            metrics: VerifierMetrics::new(),
            logger,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Register a job for a state execution
    pub fn register(&self, context: ExecutionContext) -> Result<JobSnapshot, RegistrationError> {
        let key = context.job_key().to_string();
        if self.table.contains(&key) {
            return Err(RegistrationError::AlreadyRegistered(key));
        }

        let job = VerificationJob::new(context, self.collaborators.clone(), self.settings.clone())?;
        let snapshot = job.snapshot();
        let ctx = job.context();
        self.logger.log_job_registered(
            &ctx.state_execution_id,
            &ctx.workflow_execution_id,
            ctx.comparison_strategy,
            ctx.window.start_minute,
            ctx.window.duration_minutes,
        );

        match self.table.active.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(RegistrationError::AlreadyRegistered(key));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Mutex::new(job)));
            }
        }
        self.table.finished.remove(&key);

        self.metrics.inc_jobs_registered();
        self.metrics.set_jobs_active(self.table.active_count() as i64);
        Ok(snapshot)
    }

    /// Tick one job immediately; None when no active job has this key
    pub async fn tick_job(&self, key: &str) -> Option<TickReport> {
        let handle = self.table.get(key)?;
        let mut job = handle.lock().await;
        let report = job.tick().await;
        self.after_tick(&job, &report).await;
        Some(report)
    }

    /// Tick every active job once, skipping jobs already mid-tick
    pub async fn tick_all(&self) -> Vec<TickReport> {
        let mut reports = Vec::new();

        for (key, handle) in self.table.handles() {
            let Ok(mut job) = handle.try_lock() else {
                debug!(state_execution_id = %key, "Job busy, skipping this pass");
                continue;
            };
            let report = job.tick().await;
            self.after_tick(&job, &report).await;
            reports.push(report);
        }

        self.metrics.set_jobs_active(self.table.active_count() as i64);
        reports
    }

    async fn after_tick(&self, job: &VerificationJob, report: &TickReport) {
        if report.became_terminal {
            self.table.record_finished(job.snapshot());
        }

        match &report.failed_component {
            Some(component) => {
                let failure: Result<(), &str> =
                    Err(report.message.as_deref().unwrap_or("collaborator call failed"));
                self.health.record_outcome(component, &failure).await;
            }
            None if report.did_work() => {
                for component in [components::MANAGER, components::STORE, components::LEARNING_ENGINE] {
                    self.health
                        .record_outcome::<(), &str>(component, &Ok(()))
                        .await;
                }
            }
            None => {}
        }
    }

    /// Active jobs first, then finished ones, each ordered by key
    pub async fn list_jobs(&self) -> Vec<JobSnapshot> {
        let mut active = Vec::new();
        for (_, handle) in self.table.handles() {
            active.push(handle.lock().await.snapshot());
        }
        active.sort_by(|a, b| a.state_execution_id.cmp(&b.state_execution_id));

        let mut finished: Vec<JobSnapshot> = self
            .table
            .finished
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        finished.sort_by(|a, b| a.state_execution_id.cmp(&b.state_execution_id));

        active.extend(finished);
        active
    }

    pub async fn job_snapshot(&self, key: &str) -> Option<JobSnapshot> {
        if let Some(handle) = self.table.get(key) {
            return Some(handle.lock().await.snapshot());
        }
        self.table.finished.get(key).map(|entry| entry.value().clone())
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            active: self.table.active_count(),
            finished: self.table.finished.len(),
            ..Default::default()
        };
        for entry in self.table.finished.iter() {
            match entry.value().status {
                JobStatus::Success => stats.succeeded += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Error => stats.errored += 1,
                _ => {}
            }
        }
        stats
    }

    /// Run the scheduling loop until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.tick_interval.as_secs(),
            "Starting verification scheduler"
        );
        self.health.set_healthy(components::SCHEDULER).await;

        let mut ticker = interval(self.tick_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reports = self.tick_all().await;
                    if !reports.is_empty() {
                        debug!(jobs = reports.len(), "Scheduling pass complete");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down verification scheduler");
                    break;
                }
            }
        }

        self.health
            .set_unhealthy(components::SCHEDULER, "Scheduler loop stopped")
            .await;
    }
}
