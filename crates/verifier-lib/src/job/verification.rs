//! Per state-execution verification job

use super::decision::{decide, AnalysisDecision};
use super::task::build_task;
use super::{Collaborators, JobSettings};
use crate::analysis::LocalComparator;
use crate::collaborators::{RecordQuery, RecordScope};
use crate::cursor::CursorKey;
use crate::error::{JobError, RegistrationError};
use crate::health::components;
use crate::models::{
    ComparisonStrategy, ExecutionContext, JobStatus, MetricGroup, RiskLevel, StateNotification,
};
use crate::observability::{StructuredLogger, VerifierMetrics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// What happened to one metric group during a tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GroupOutcome {
    /// The cursor had already reached the end of the analysis window
    Complete,
    /// No heartbeat newer than the cursor; retried next tick
    NoNewData,
    /// A task was accepted by the learning engine
    Enqueued { minute: i64, task_id: String },
    /// The learning engine declined the task; retried next tick
    Declined { minute: i64 },
    /// A local analysis was saved
    AnalyzedLocally { minute: i64, risk: RiskLevel },
    /// Work was done but another tick had already advanced the cursor
    StaleCursor { minute: i64 },
}

impl GroupOutcome {
    /// True when the group's cursor now sits at the end of the window
    pub fn covers_window(&self, window_end: i64) -> bool {
        match self {
            GroupOutcome::Complete => true,
            GroupOutcome::Enqueued { minute, .. } | GroupOutcome::AnalyzedLocally { minute, .. } => {
                *minute >= window_end
            }
            GroupOutcome::NoNewData
            | GroupOutcome::Declined { .. }
            | GroupOutcome::StaleCursor { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReport {
    pub group_name: String,
    #[serde(flatten)]
    pub outcome: GroupOutcome,
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub state_execution_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub groups: Vec<GroupReport>,
    /// True only on the tick that moved the job into a terminal status
    pub became_terminal: bool,
    /// Health component of the collaborator that failed this tick
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_component: Option<String>,
}

impl TickReport {
    /// True when the tick ran against collaborators without error
    pub fn did_work(&self) -> bool {
        self.failed_component.is_none() && (self.became_terminal || !self.status.is_terminal())
    }
}

/// Point-in-time view of a job for APIs and the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub state_execution_id: String,
    pub workflow_execution_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub context: ExecutionContext,
    pub ticks: u64,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<TickReport>,
}

enum TickProgress {
    Continue(Vec<GroupReport>),
    Finished {
        status: JobStatus,
        message: String,
        groups: Vec<GroupReport>,
    },
}

/// Verification job for one state execution
pub struct VerificationJob {
    context: ExecutionContext,
    status: JobStatus,
    message: Option<String>,
    notified: bool,
    ticks: u64,
    created_at: i64,
    updated_at: i64,
    last_report: Option<TickReport>,
    collaborators: Collaborators,
    settings: Arc<JobSettings>,
    comparator: LocalComparator,
    metrics: VerifierMetrics,
    logger: StructuredLogger,
}

impl VerificationJob {
    /// Create a queued job; the context is validated and normalized first
    pub fn new(
        context: ExecutionContext,
        collaborators: Collaborators,
        settings: Arc<JobSettings>,
    ) -> Result<Self, RegistrationError> {
        context.validate()?;
        let now = chrono::Utc::now().timestamp();

        Ok(Self {
            context: context.normalized(),
            status: JobStatus::Queued,
            message: None,
            notified: false,
            ticks: 0,
            created_at: now,
            updated_at: now,
            last_report: None,
            comparator: LocalComparator::new(settings.thresholds),
            logger: StructuredLogger::new(settings.service_name.clone()),
            metrics: VerifierMetrics::new(),
            collaborators,
            settings,
        })
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn key(&self) -> &str {
        self.context.job_key()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            state_execution_id: self.context.state_execution_id.clone(),
            workflow_execution_id: self.context.workflow_execution_id.clone(),
            status: self.status,
            message: self.message.clone(),
            context: self.context.clone(),
            ticks: self.ticks,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_report: self.last_report.clone(),
        }
    }

    /// Run one scheduling tick
    ///
    /// Never returns an error: collaborator failures turn the job terminal
    /// with status `Error`, and terminal jobs ignore further ticks.
    pub async fn tick(&mut self) -> TickReport {
        if self.status.is_terminal() {
            return self.report(Vec::new(), false, None);
        }

        let started = Instant::now();
        if self.status == JobStatus::Queued {
            self.set_status(JobStatus::Running, None);
            self.logger.log_job_started(self.key());
        }
        self.ticks += 1;

        let report = match self.run_tick().await {
            Ok(TickProgress::Continue(groups)) => self.report(groups, false, None),
            Ok(TickProgress::Finished {
                status,
                message,
                groups,
            }) => {
                self.finish(status, message).await;
                self.report(groups, true, None)
            }
            Err(err) => {
                let component = err.component();
                self.finish(JobStatus::Error, err.to_string()).await;
                self.report(Vec::new(), true, Some(component))
            }
        };

        self.metrics.observe_tick(started.elapsed().as_secs_f64());
        self.last_report = Some(report.clone());
        report
    }

    fn report(
        &self,
        groups: Vec<GroupReport>,
        became_terminal: bool,
        failed_component: Option<&str>,
    ) -> TickReport {
        TickReport {
            state_execution_id: self.context.state_execution_id.clone(),
            status: self.status,
            message: self.message.clone(),
            groups,
            became_terminal,
            failed_component: failed_component.map(str::to_string),
        }
    }

    fn set_status(&mut self, status: JobStatus, message: Option<String>) {
        self.status = status;
        self.message = message;
        self.updated_at = chrono::Utc::now().timestamp();
    }

    async fn run_tick(&mut self) -> Result<TickProgress, JobError> {
        let ctx = &self.context;
        let c = &self.collaborators;

        let valid = c
            .oracle
            .is_state_valid(&ctx.app_id, &ctx.state_execution_id)
            .await
            .map_err(|e| JobError::collaborator("state validity check", components::MANAGER, e))?;
        if !valid {
            return Ok(TickProgress::Finished {
                status: JobStatus::Success,
                message: "state execution is no longer valid, stopping verification".to_string(),
                groups: Vec::new(),
            });
        }

        let fail_fast = c
            .analysis_store
            .fail_fast_record(&ctx.state_execution_id)
            .await
            .map_err(|e| JobError::collaborator("fail-fast lookup", components::STORE, e))?;
        if let Some(record) = fail_fast.filter(|r| r.should_fail_fast) {
            let message = if record.message.is_empty() {
                "verification failed fast".to_string()
            } else {
                record.message
            };
            return Ok(TickProgress::Finished {
                status: JobStatus::Error,
                message,
                groups: Vec::new(),
            });
        }

        let timed_out = c
            .learning_engine
            .has_analysis_timed_out(
                &ctx.app_id,
                &ctx.workflow_execution_id,
                &ctx.state_execution_id,
            )
            .await
            .map_err(|e| JobError::collaborator("analysis timeout check", components::LEARNING_ENGINE, e))?;
        if timed_out {
            return Ok(TickProgress::Finished {
                status: JobStatus::Error,
                message: "analysis timed out in the learning engine".to_string(),
                groups: Vec::new(),
            });
        }

        let mut groups = c
            .metric_store
            .metric_groups(&ctx.state_execution_id)
            .await
            .map_err(|e| JobError::collaborator("metric group lookup", components::STORE, e))?;
        if groups.is_empty() {
            groups.push(MetricGroup::default_group());
        }
        groups.sort_by(|a, b| a.name.cmp(&b.name));

        let window_end = ctx.window.end_minute();
        let mut reports = Vec::with_capacity(groups.len());
        for group in &groups {
            let outcome = self.process_group(group).await?;
            let complete = outcome.covers_window(window_end);
            reports.push(GroupReport {
                group_name: group.name.clone(),
                outcome,
            });

            if complete {
                let (status, message) = self.completion_verdict().await?;
                return Ok(TickProgress::Finished {
                    status,
                    message,
                    groups: reports,
                });
            }
        }

        Ok(TickProgress::Continue(reports))
    }

    /// Analyze the newest unprocessed minute of one group
    ///
    /// The cursor moves only after the task is accepted or the local analysis
    /// is saved, so duplicates are detected, not prevented: a concurrent tick
    /// on the same group loses the compare-and-set and reports `StaleCursor`
    /// after its task or analysis already went out. Ticks through one
    /// `JobTable` are serialized by the job's mutex.
    async fn process_group(&self, group: &MetricGroup) -> Result<GroupOutcome, JobError> {
        let ctx = &self.context;
        let c = &self.collaborators;
        let key = CursorKey::new(&ctx.state_execution_id, &group.name);
        let window_end = ctx.window.end_minute();

        let cursor = c
            .cursors
            .current(&key)
            .await
            .map_err(|e| JobError::collaborator("cursor read", components::STORE, e))?;
        if cursor.map(|minute| minute >= window_end).unwrap_or(false) {
            return Ok(GroupOutcome::Complete);
        }

        let floor = cursor.unwrap_or(ctx.window.start_minute.saturating_sub(1));
        let heartbeats = c
            .metric_store
            .heartbeat_minutes(&ctx.state_execution_id, &group.name)
            .await
            .map_err(|e| JobError::collaborator("heartbeat lookup", components::STORE, e))?;
        let next_minute = heartbeats
            .into_iter()
            .filter(|minute| *minute > floor && *minute <= window_end)
            .max();

        let Some(minute) = next_minute else {
            debug!(
                state_execution_id = %ctx.state_execution_id,
                group = %group.name,
                cursor = ?cursor,
                "No new heartbeat, skipping group"
            );
            self.metrics.inc_groups_skipped();
            return Ok(GroupOutcome::NoNewData);
        };

        let baseline_bounds = match (&ctx.baseline_execution_id, ctx.comparison_strategy) {
            (Some(baseline), ComparisonStrategy::CompareWithPrevious) => c
                .metric_store
                .execution_minute_bounds(baseline, &group.name)
                .await
                .map_err(|e| JobError::collaborator("baseline lookup", components::STORE, e))?,
            _ => None,
        };

        let decision = decide(ctx, group, minute, baseline_bounds);
        let processed = match &decision {
            AnalysisDecision::Delegate { analysis_type, .. } => {
                let Some(task) = build_task(ctx, group, minute, &decision, &self.settings) else {
                    return Ok(GroupOutcome::NoNewData);
                };
                let accepted = c.learning_engine.enqueue(&task).await.map_err(|e| {
                    JobError::collaborator("enqueue analysis task", components::LEARNING_ENGINE, e)
                })?;
                if !accepted {
                    warn!(
                        state_execution_id = %ctx.state_execution_id,
                        group = %group.name,
                        analysis_minute = minute,
                        "Learning engine declined task, retrying next tick"
                    );
                    self.metrics.inc_tasks_declined();
                    return Ok(GroupOutcome::Declined { minute });
                }

                let task_id = task.task_id.to_string();
                self.metrics.inc_tasks_enqueued();
                self.logger.log_analysis_enqueued(
                    &ctx.state_execution_id,
                    &group.name,
                    minute,
                    &task_id,
                    *analysis_type,
                );
                GroupOutcome::Enqueued { minute, task_id }
            }
            AnalysisDecision::Local {
                baseline_execution_id,
                reason,
            } => {
                let risk = self
                    .analyze_locally(group, minute, baseline_execution_id.as_deref())
                    .await?;
                self.metrics.inc_local_analyses();
                self.logger
                    .log_local_analysis(&ctx.state_execution_id, &group.name, minute, risk, reason);
                GroupOutcome::AnalyzedLocally { minute, risk }
            }
        };

        let advanced = c
            .cursors
            .advance(&key, minute)
            .await
            .map_err(|e| JobError::collaborator("cursor update", components::STORE, e))?;
        if !advanced {
            self.logger
                .log_stale_cursor(&ctx.state_execution_id, &group.name, minute);
            return Ok(GroupOutcome::StaleCursor { minute });
        }

        Ok(processed)
    }

    /// Compare test data against the baseline execution (or nothing) and save it
    async fn analyze_locally(
        &self,
        group: &MetricGroup,
        minute: i64,
        baseline_execution_id: Option<&str>,
    ) -> Result<RiskLevel, JobError> {
        let ctx = &self.context;
        let c = &self.collaborators;

        let test_query = RecordQuery {
            scope: RecordScope::StateExecution(ctx.state_execution_id.clone()),
            group_name: group.name.clone(),
            nodes: ctx.test_nodes.clone(),
            start_minute: ctx.window.start_minute,
            end_minute: minute,
        };
        let test = c
            .metric_store
            .records(&test_query)
            .await
            .map_err(|e| JobError::collaborator("test data read", components::STORE, e))?;

        let control = match baseline_execution_id {
            Some(baseline) => {
                let control_query = RecordQuery {
                    scope: RecordScope::WorkflowExecution(baseline.to_string()),
                    group_name: group.name.clone(),
                    nodes: BTreeSet::new(),
                    start_minute: ctx.window.start_minute,
                    end_minute: minute,
                };
                c.metric_store
                    .records(&control_query)
                    .await
                    .map_err(|e| JobError::collaborator("baseline data read", components::STORE, e))?
            }
            None => Vec::new(),
        };

        let record = self
            .comparator
            .compare(ctx, &group.name, minute, &test, &control);
        let risk = record.risk;
        c.analysis_store
            .save_analysis(record)
            .await
            .map_err(|e| JobError::collaborator("analysis save", components::STORE, e))?;

        Ok(risk)
    }

    /// Final status once the analysis window has been processed
    async fn completion_verdict(&self) -> Result<(JobStatus, String), JobError> {
        let Some(threshold) = self.settings.failure_risk_threshold else {
            return Ok((JobStatus::Success, "verification completed".to_string()));
        };

        let max_risk = self
            .collaborators
            .analysis_store
            .max_risk(&self.context.state_execution_id)
            .await
            .map_err(|e| JobError::collaborator("risk lookup", components::STORE, e))?;

        match max_risk {
            Some(risk) if risk >= threshold => Ok((
                JobStatus::Failed,
                format!("verification risk {} reached threshold {}", risk, threshold),
            )),
            _ => Ok((JobStatus::Success, "verification completed".to_string())),
        }
    }

    /// Enter a terminal status, then notify the manager once and delete the
    /// scheduler entry. Cleanup failures are logged and counted only.
    async fn finish(&mut self, status: JobStatus, message: String) {
        self.set_status(status, Some(message));
        self.metrics.inc_jobs_terminal(status);
        self.logger
            .log_job_terminal(self.key(), status, self.message.as_deref());

        if !self.notified {
            self.notified = true;
            let risk = match self
                .collaborators
                .analysis_store
                .max_risk(&self.context.state_execution_id)
                .await
            {
                Ok(risk) => risk,
                Err(e) => {
                    warn!(state_execution_id = %self.key(), error = %e, "Risk lookup for notification failed");
                    None
                }
            };

            let notification = StateNotification {
                account_id: self.context.account_id.clone(),
                app_id: self.context.app_id.clone(),
                workflow_execution_id: self.context.workflow_execution_id.clone(),
                state_execution_id: self.context.state_execution_id.clone(),
                status,
                message: self.message.clone(),
                risk,
                timestamp: chrono::Utc::now().timestamp(),
            };
            if let Err(e) = self.collaborators.notifier.notify(&notification).await {
                self.metrics.inc_cleanup_failures("notify");
                self.logger
                    .log_cleanup_failure(self.key(), "notify", &e.to_string());
            }
        }

        if let Err(e) = self.collaborators.registry.delete_job(self.key()).await {
            self.metrics.inc_cleanup_failures("delete_job");
            self.logger
                .log_cleanup_failure(self.key(), "delete_job", &e.to_string());
        }
    }
}
