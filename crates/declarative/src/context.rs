//! Control plane and provider traits
//!
//! These traits allow the engine to be used without depending on a
//! specific cloud API, terminal UI or signal handling implementation.

use crate::error::ApiError;
use crate::resource::{Attributes, ResourceId};
use crate::types::{Action, ApplyStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Result of a successful create call.
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    /// Identifier assigned by the control plane
    pub physical_id: String,
    /// Attributes only known after creation (e.g. `arn`)
    pub outputs: Attributes,
}

/// An opaque API for creating, describing and deleting typed resources.
///
/// Inputs are always fully resolved: every reference has been replaced by
/// the referenced value before the call.
pub trait ControlPlane: Send + Sync {
    fn create(&self, id: &ResourceId, inputs: &Attributes) -> Result<Created, ApiError>;

    /// Update in place, returning the new outputs.
    fn update(
        &self,
        id: &ResourceId,
        physical_id: &str,
        inputs: &Attributes,
        previous: &Attributes,
    ) -> Result<Attributes, ApiError>;

    /// Delete the object. Deleting an object that is already gone succeeds.
    fn delete(&self, id: &ResourceId, physical_id: &str) -> Result<(), ApiError>;

    /// Live attributes of the object, or `None` if it no longer exists.
    fn describe(&self, id: &ResourceId, physical_id: &str) -> Result<Option<Attributes>, ApiError>;
}

/// Progress callback for execution operations
///
/// Called from worker threads, hence `&self`.
pub trait ProgressCallback: Send + Sync {
    /// Called before the first attempt of an operation
    fn on_start(&self, id: &ResourceId, action: Action);

    /// Called before an operation is retried
    fn on_retry(&self, id: &ResourceId, attempt: u32, max_attempts: u32, error: &ApiError);

    /// Called once per planned change, including skipped ones
    fn on_complete(&self, id: &ResourceId, action: Action, status: &ApplyStatus);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_start(&self, _id: &ResourceId, _action: Action) {}
    fn on_retry(&self, _id: &ResourceId, _attempt: u32, _max_attempts: u32, _error: &ApiError) {}
    fn on_complete(&self, _id: &ResourceId, _action: Action, _status: &ApplyStatus) {}
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback {
    /// Ask the user to confirm an action
    fn confirm(&mut self, prompt: &str) -> std::io::Result<bool>;
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> std::io::Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> std::io::Result<bool> {
        Ok(false)
    }
}

/// Cooperative cancellation flag.
///
/// Once cancelled, no new operation starts; operations already in flight
/// run to completion and are recorded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
