//! Error types for planning and applying resource graphs.
//!
//! Errors are categorized so callers can tell structural problems (which
//! abort planning before anything is touched) from apply-time API failures
//! (which are scoped to one branch of the graph).

use crate::resource::ResourceId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Categories of engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The declarations do not form a valid graph
    Structural,
    /// A declaration violates its kind schema
    Validation,
    /// Live state diverged from the recorded state
    Drift,
    /// The control plane rejected or failed an operation
    Api,
    /// Applied state could not be read or written
    State,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this category aborts planning before any mutation.
    pub fn aborts_planning(&self) -> bool {
        matches!(self, Self::Structural | Self::Validation | Self::Drift)
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Structural => "Fix the references between resources in the stack file",
            Self::Validation => "Check the resource attributes against the kind's schema",
            Self::Drift => "Re-run with drift = \"overwrite\" or forget the resource with `state rm`",
            Self::Api => "Check credentials and the control plane error message",
            Self::State => "Check the state file path and permissions",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Error returned by a control plane operation.
///
/// Transient errors (rate limiting, eventual-consistency lag, timeouts)
/// are retried with backoff; permanent errors fail their branch immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ApiError {
    #[error("transient API error: {0}")]
    Transient(String),

    #[error("permanent API error: {0}")]
    Permanent(String),
}

impl ApiError {
    /// Whether the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// The underlying message without the transient/permanent prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(msg) | Self::Permanent(msg) => msg,
        }
    }
}

/// Errors that can occur while building, planning or applying a graph.
#[derive(Debug, Error)]
pub enum Error {
    /// The declarations contain a dependency cycle
    #[error("cyclic dependency: {}", format_cycle(.cycle))]
    CyclicDependency {
        /// The cycle, starting and ending with the same resource
        cycle: Vec<ResourceId>,
    },

    /// A reference points to a resource that is not declared
    #[error("{from} references undeclared resource {to}")]
    UnresolvedReference { from: ResourceId, to: ResourceId },

    /// A resource references one of its own attributes
    #[error("{id} references itself")]
    SelfReference { id: ResourceId },

    /// Two declarations share the same id
    #[error("resource {id} is declared more than once")]
    DuplicateResource { id: ResourceId },

    /// A resource removed from the declarations is still referenced
    #[error("cannot delete {target}: still referenced by {dependent}")]
    DeleteWhileReferenced {
        target: ResourceId,
        dependent: ResourceId,
    },

    /// Live state was modified outside of the engine
    #[error("drift detected on {id}: {details}")]
    DriftConflict { id: ResourceId, details: String },

    /// The declaration uses a kind with no registered schema
    #[error("unknown resource kind '{kind}' for {id}")]
    UnknownKind { id: ResourceId, kind: String },

    /// A required attribute is missing
    #[error("{id} is missing required attribute '{attribute}'")]
    MissingAttribute { id: ResourceId, attribute: String },

    /// A reference names an attribute the target does not expose
    #[error("{from} references unknown attribute '{attribute}' of {target}")]
    UnknownAttribute {
        from: ResourceId,
        target: ResourceId,
        attribute: String,
    },

    /// A reference or resource id could not be parsed
    #[error("invalid reference '{text}': {reason}")]
    InvalidReference { text: String, reason: String },

    /// A policy document is malformed
    #[error("invalid policy document: {0}")]
    InvalidPolicy(String),

    /// A plan target does not name a planned resource
    #[error("target {id} is not part of the plan")]
    UnknownTarget { id: ResourceId },

    /// A saved plan was computed against a different state serial
    #[error("plan is stale: computed against state serial {planned}, state is now at {current}")]
    StalePlan { planned: u64, current: u64 },

    /// Applied state could not be loaded or persisted
    #[error("state error: {0}")]
    State(String),

    /// Control plane error outside of a resource operation (e.g. refresh)
    #[error("{id}: {source}")]
    Api {
        id: ResourceId,
        #[source]
        source: ApiError,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::CyclicDependency { .. }
            | Error::UnresolvedReference { .. }
            | Error::SelfReference { .. }
            | Error::DuplicateResource { .. }
            | Error::DeleteWhileReferenced { .. }
            | Error::InvalidReference { .. } => ErrorCategory::Structural,
            Error::UnknownKind { .. }
            | Error::MissingAttribute { .. }
            | Error::UnknownAttribute { .. }
            | Error::UnknownTarget { .. }
            | Error::InvalidPolicy(_) => ErrorCategory::Validation,
            Error::DriftConflict { .. } => ErrorCategory::Drift,
            Error::Api { .. } => ErrorCategory::Api,
            Error::StalePlan { .. } | Error::State(_) | Error::Io(_) | Error::Json(_) => {
                ErrorCategory::State
            }
            Error::Other(_) => ErrorCategory::Other,
        }
    }
}

fn format_cycle(cycle: &[ResourceId]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message() {
        let err = Error::CyclicDependency {
            cycle: vec![
                ResourceId::new("iam_role", "a"),
                ResourceId::new("iam_policy", "b"),
                ResourceId::new("iam_role", "a"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "cyclic dependency: iam_role.a -> iam_policy.b -> iam_role.a"
        );
        assert!(err.category().aborts_planning());
    }

    #[test]
    fn test_api_error_retryable() {
        assert!(ApiError::Transient("Throttling".into()).is_retryable());
        assert!(!ApiError::Permanent("AccessDenied".into()).is_retryable());
        assert_eq!(ApiError::Permanent("AccessDenied".into()).message(), "AccessDenied");
    }

    #[test]
    fn test_api_category_does_not_abort_planning() {
        let err = Error::Api {
            id: ResourceId::new("glue_job", "transformer"),
            source: ApiError::Transient("timeout".into()),
        };
        assert_eq!(err.category(), ErrorCategory::Api);
        assert!(!err.category().aborts_planning());
    }
}
