//! Verification scheduling job
//!
//! One job exists per state execution. Each tick is driven externally and
//! moves the job through `Queued -> Running -> {Success, Failed, Error}`,
//! deciding per metric group whether to analyze locally or delegate to the
//! learning engine, and advancing the group's analysis-minute cursor.

mod decision;
mod task;
mod verification;


pub use decision::{decide, AnalysisDecision};
pub use task::build_task;
pub use verification::{GroupOutcome, GroupReport, JobSnapshot, TickReport, VerificationJob};

use crate::analysis::RiskThresholds;
use crate::collaborators::{
    AnalysisStore, JobRegistry, LearningEngine, ManagerNotifier, MetricDataStore,
    StateValidityOracle,
};
use crate::cursor::CursorStore;
use crate::models::RiskLevel;
use anyhow::{Context, Result};
use std::sync::Arc;
use url::Url;

/// Everything a job talks to outside its own state
#[derive(Clone)]
pub struct Collaborators {
    pub oracle: Arc<dyn StateValidityOracle>,
    pub learning_engine: Arc<dyn LearningEngine>,
    pub metric_store: Arc<dyn MetricDataStore>,
    pub analysis_store: Arc<dyn AnalysisStore>,
    pub notifier: Arc<dyn ManagerNotifier>,
    pub registry: Arc<dyn JobRegistry>,
    pub cursors: Arc<dyn CursorStore>,
}

impl Collaborators {
    pub fn builder() -> CollaboratorsBuilder {
        CollaboratorsBuilder::default()
    }
}

/// Builder for [`Collaborators`]
#[derive(Default)]
pub struct CollaboratorsBuilder {
    oracle: Option<Arc<dyn StateValidityOracle>>,
    learning_engine: Option<Arc<dyn LearningEngine>>,
    metric_store: Option<Arc<dyn MetricDataStore>>,
    analysis_store: Option<Arc<dyn AnalysisStore>>,
    notifier: Option<Arc<dyn ManagerNotifier>>,
    registry: Option<Arc<dyn JobRegistry>>,
    cursors: Option<Arc<dyn CursorStore>>,
}

impl CollaboratorsBuilder {
    pub fn oracle(mut self, oracle: Arc<dyn StateValidityOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn learning_engine(mut self, learning_engine: Arc<dyn LearningEngine>) -> Self {
        self.learning_engine = Some(learning_engine);
        self
    }

    pub fn metric_store(mut self, store: Arc<dyn MetricDataStore>) -> Self {
        self.metric_store = Some(store);
        self
    }

    pub fn analysis_store(mut self, store: Arc<dyn AnalysisStore>) -> Self {
        self.analysis_store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn ManagerNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn JobRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn cursors(mut self, cursors: Arc<dyn CursorStore>) -> Self {
        self.cursors = Some(cursors);
        self
    }

    pub fn build(self) -> Result<Collaborators> {
        Ok(Collaborators {
            oracle: self
                .oracle
                .ok_or_else(|| anyhow::anyhow!("State validity oracle is required"))?,
            learning_engine: self
                .learning_engine
                .ok_or_else(|| anyhow::anyhow!("Learning engine is required"))?,
            metric_store: self
                .metric_store
                .ok_or_else(|| anyhow::anyhow!("Metric data store is required"))?,
            analysis_store: self
                .analysis_store
                .ok_or_else(|| anyhow::anyhow!("Analysis store is required"))?,
            notifier: self
                .notifier
                .ok_or_else(|| anyhow::anyhow!("Manager notifier is required"))?,
            registry: self
                .registry
                .ok_or_else(|| anyhow::anyhow!("Job registry is required"))?,
            cursors: self
                .cursors
                .ok_or_else(|| anyhow::anyhow!("Cursor store is required"))?,
        })
    }
}

/// Service-wide settings shared by every job
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub service_name: String,
    service_base_url: Url,
    /// Completed jobs whose worst risk reaches this level end `Failed`
    pub failure_risk_threshold: Option<RiskLevel>,
    pub thresholds: RiskThresholds,
}

impl JobSettings {
    /// `service_base_url` is where the learning engine reads inputs and saves results
    pub fn new(service_name: impl Into<String>, service_base_url: &str) -> Result<Self> {
        let mut url = Url::parse(service_base_url)
            .with_context(|| format!("Invalid service base URL: {}", service_base_url))?;
        if url.cannot_be_a_base() {
            anyhow::bail!("Service base URL cannot carry paths: {}", service_base_url);
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(Self {
            service_name: service_name.into(),
            service_base_url: url,
            failure_risk_threshold: None,
            thresholds: RiskThresholds::default(),
        })
    }

    pub fn with_failure_risk_threshold(mut self, threshold: Option<RiskLevel>) -> Self {
        self.failure_risk_threshold = threshold;
        self
    }

    pub fn with_thresholds(mut self, thresholds: RiskThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Absolute URL of a service endpoint, `path` relative to the base
    pub fn endpoint(&self, path: &str) -> Url {
        let mut url = self.service_base_url.clone();
        let joined = format!("{}{}", url.path(), path.trim_start_matches('/'));
        url.set_path(&joined);
        url
    }
}
