//! Health check infrastructure for the verification service
//!
//! Tracks the scheduler loop and each collaborator. Collaborator health is
//! derived from call outcomes: a failure degrades the component, a streak of
//! failures marks it unhealthy, and any success restores it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures after which a collaborator is reported unhealthy
pub const UNHEALTHY_FAILURE_STREAK: u32 = 3;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still operational, but recent calls failed
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message.into()),
            consecutive_failures: 0,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
            consecutive_failures: 0,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Next state after a failed collaborator call
    fn after_failure(&self, message: String) -> Self {
        let consecutive_failures = self.consecutive_failures + 1;
        let status = if consecutive_failures >= UNHEALTHY_FAILURE_STREAK {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        Self {
            status,
            message: Some(message),
            consecutive_failures,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const SCHEDULER: &str = "scheduler";
    pub const STORE: &str = "store";
    pub const LEARNING_ENGINE: &str = "learning_engine";
    pub const MANAGER: &str = "manager";

    /// Components whose failure stops every job from progressing
    pub const CRITICAL: &[&str] = &[SCHEDULER, STORE];
}

/// Health registry for tracking component health
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Fold a collaborator call outcome into the component's health
    pub async fn record_outcome<T, E: std::fmt::Display>(&self, name: &str, outcome: &Result<T, E>) {
        let mut components = self.components.write().await;
        let next = match outcome {
            Ok(_) => ComponentHealth::healthy(),
            Err(e) => components
                .get(name)
                .cloned()
                .unwrap_or_else(ComponentHealth::healthy)
                .after_failure(e.to_string()),
        };
        components.insert(name.to_string(), next);
    }

    pub async fn set_ready(&self, ready: bool) {
        let mut r = self.ready.write().await;
        *r = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once initialized and no critical component is unhealthy
    ///
    /// An unhealthy learning engine or manager only degrades health; jobs
    /// turn terminal with an error instead of blocking readiness.
    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.ready.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("Service not yet initialized".to_string()),
            };
        }

        let current = self.components.read().await;
        let failing: Vec<&str> = components::CRITICAL
            .iter()
            .copied()
            .filter(|name| {
                current
                    .get(*name)
                    .map(|h| !h.status.is_operational())
                    .unwrap_or(false)
            })
            .collect();

        if failing.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Critical component unhealthy: {}", failing.join(", "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_component_registration() {
        let registry = HealthRegistry::new();
        registry.register(components::SCHEDULER).await;

        let health = registry.health().await;
        assert_eq!(
            health.components[components::SCHEDULER].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_failure_streak_turns_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register(components::LEARNING_ENGINE).await;
        let failure: Result<(), String> = Err("connection refused".to_string());

        registry.record_outcome(components::LEARNING_ENGINE, &failure).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        for _ in 1..UNHEALTHY_FAILURE_STREAK {
            registry.record_outcome(components::LEARNING_ENGINE, &failure).await;
        }
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert_eq!(
            health.components[components::LEARNING_ENGINE].consecutive_failures,
            UNHEALTHY_FAILURE_STREAK
        );
    }

    #[tokio::test]
    async fn test_success_resets_streak() {
        let registry = HealthRegistry::new();
        let failure: Result<(), String> = Err("timeout".to_string());
        registry.record_outcome(components::MANAGER, &failure).await;
        registry.record_outcome(components::MANAGER, &failure).await;
        registry
            .record_outcome::<(), String>(components::MANAGER, &Ok(()))
            .await;

        let health = registry.health().await;
        assert_eq!(health.components[components::MANAGER].consecutive_failures, 0);
        assert_eq!(health.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_readiness_not_ready_initially() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_readiness_ignores_non_critical_failures() {
        let registry = HealthRegistry::new();
        registry.register(components::SCHEDULER).await;
        registry.set_ready(true).await;
        registry
            .set_unhealthy(components::LEARNING_ENGINE, "unreachable")
            .await;

        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_readiness_not_ready_when_scheduler_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register(components::SCHEDULER).await;
        registry.set_ready(true).await;
        registry
            .set_unhealthy(components::SCHEDULER, "Scheduler loop stopped")
            .await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.unwrap().contains("scheduler"));
    }
}
