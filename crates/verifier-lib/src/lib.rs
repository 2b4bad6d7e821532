//! Continuous verification library
//!
//! This crate provides the core functionality for:
//! - Building ordered metadata trees from pipeline and workflow executions
//! - Scheduling per state-execution verification jobs
//! - Local metric comparison and learning engine delegation
//! - Collaborator traits with in-memory and HTTP implementations
//! - Health checks and observability

pub mod analysis;
pub mod collaborators;
pub mod cursor;
pub mod error;
pub mod health;
pub mod job;
pub mod metadata;
pub mod models;
pub mod observability;
pub mod scheduler;

pub use error::{JobError, MetadataError, RegistrationError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use metadata::{ExecutionMetadata, GraphNodeMetadata, MetadataGraphBuilder};
pub use models::*;
pub use observability::{StructuredLogger, VerifierMetrics};
pub use scheduler::{JobTable, SchedulerStats, VerificationScheduler};
