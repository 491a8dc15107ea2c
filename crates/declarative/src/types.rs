//! Core types for planning and applying resource graphs

use crate::error::ApiError;
use crate::resource::ResourceId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What a plan does to a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    /// Delete and re-create because an immutable attribute changed
    Replace,
    Delete,
    NoOp,
}

impl Action {
    /// Symbol used in plan output.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "-/+",
            Self::Delete => "-",
            Self::NoOp => " ",
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    /// Past-tense verb for reports.
    pub fn past_tense(&self) -> &'static str {
        match self {
            Self::Create => "created",
            Self::Update => "updated",
            Self::Replace => "replaced",
            Self::Delete => "deleted",
            Self::NoOp => "unchanged",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        f.write_str(name)
    }
}

/// Why an operation did not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// A resource this one depends on failed or was skipped
    DependencyFailed(ResourceId),
    /// The apply was interrupted before this operation started
    Cancelled,
    DryRun,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DependencyFailed(id) => write!(f, "dependency {id} failed"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::DryRun => f.write_str("dry run"),
        }
    }
}

/// Result of applying a single planned change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApplyStatus {
    Succeeded,
    Failed { error: ApiError, attempts: u32 },
    Skipped { reason: SkipReason },
}

impl ApplyStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub id: ResourceId,
    pub action: Action,
    pub status: ApplyStatus,
}

impl ResourceOutcome {
    /// Whether this outcome actually changed something.
    pub fn is_change(&self) -> bool {
        self.status.is_success() && self.action.is_change()
    }
}

/// Per-resource report of an apply, in plan order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    pub outcomes: Vec<ResourceOutcome>,
}

impl ApplyReport {
    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for outcome in &self.outcomes {
            summary.add_outcome(outcome);
        }
        summary
    }

    pub fn is_success(&self) -> bool {
        !self.outcomes.iter().any(|o| o.status.is_failure())
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceOutcome> {
        self.outcomes.iter().find(|o| &o.id == id)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ResourceOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_failure())
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub no_change: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.skipped + self.failed + self.no_change
    }

    pub fn add_outcome(&mut self, outcome: &ResourceOutcome) {
        match &outcome.status {
            ApplyStatus::Failed { .. } => self.failed += 1,
            ApplyStatus::Skipped { .. } => self.skipped += 1,
            ApplyStatus::Succeeded => match outcome.action {
                Action::Create => self.created += 1,
                Action::Update => self.updated += 1,
                Action::Replace => self.replaced += 1,
                Action::Delete => self.deleted += 1,
                Action::NoOp => self.no_change += 1,
            },
        }
    }
}

impl fmt::Display for ExecuteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} replaced, {} deleted, {} failed, {} skipped",
            self.created, self.updated, self.replaced, self.deleted, self.failed, self.skipped
        )
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        // A NaN delay falls back to the cap; a negative one to no wait
        let capped = delay.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Don't make changes, just report what would happen
    pub dry_run: bool,
    /// Maximum number of operations in flight
    pub jobs: usize,
    pub retry: RetryConfig,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 4,
            retry: RetryConfig::default(),
        }
    }
}
