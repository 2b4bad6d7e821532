//! Error types shared across the verification service

use thiserror::Error;

/// Failures while projecting an execution tree into metadata
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The persisted snapshot is corrupted for this stage
    #[error(
        "stage '{stage}' has {definitions} element definitions but {executions} executions"
    )]
    StageExecutionMismatch {
        stage: String,
        definitions: usize,
        executions: usize,
    },

    #[error("execution tree exceeds the maximum depth of {limit}")]
    DepthExceeded { limit: usize },
}

/// Reasons a verification context is rejected at registration
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid analysis window (start {start_minute}, duration {duration_minutes})")]
    InvalidWindow {
        start_minute: i64,
        duration_minutes: i64,
    },

    #[error("no test nodes supplied")]
    NoTestNodes,

    #[error("no control nodes remain after removing test hosts")]
    NoControlNodes,

    #[error("tolerance {0} must be within [0, 1]")]
    InvalidTolerance(f64),

    #[error("a job is already registered for state execution '{0}'")]
    AlreadyRegistered(String),
}

/// Failures raised inside a verification tick
///
/// Every variant turns the job terminal with status `Error`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{operation} failed: {source}")]
    Collaborator {
        operation: &'static str,
        component: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation} timed out")]
    Timeout {
        operation: &'static str,
        component: &'static str,
    },
}

impl JobError {
    /// Wrap a collaborator failure, classifying HTTP timeouts separately
    ///
    /// `component` names the health component the collaborator reports to.
    pub fn collaborator(
        operation: &'static str,
        component: &'static str,
        source: anyhow::Error,
    ) -> Self {
        let timed_out = source.chain().any(|cause| {
            cause
                .downcast_ref::<reqwest::Error>()
                .map(|e| e.is_timeout())
                .unwrap_or(false)
        });
        if timed_out {
            JobError::Timeout {
                operation,
                component,
            }
        } else {
            JobError::Collaborator {
                operation,
                component,
                source,
            }
        }
    }

    pub fn component(&self) -> &'static str {
        match self {
            JobError::Collaborator { component, .. } | JobError::Timeout { component, .. } => {
                *component
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_message_names_stage() {
        let err = MetadataError::StageExecutionMismatch {
            stage: "deploy".to_string(),
            definitions: 3,
            executions: 2,
        };
        let message = err.to_string();
        assert!(message.contains("deploy"));
        assert!(message.contains('3'));
        assert!(message.contains('2'));
    }

    #[test]
    fn test_collaborator_error_keeps_operation() {
        let err = JobError::collaborator(
            "enqueue task",
            "learning_engine",
            anyhow::anyhow!("connection refused"),
        );
        assert_eq!(err.to_string(), "enqueue task failed: connection refused");
        assert_eq!(err.component(), "learning_engine");
    }
}
