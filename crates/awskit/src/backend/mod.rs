//! Backend abstraction for AWS API calls.
//!
//! The [`Backend`] trait is the single seam between typed operations and
//! the transport, allowing for different implementations (the real `aws`
//! CLI, a recording double for tests).

pub mod cli;

use crate::error::Result;
use serde_json::Value;

/// Backend trait for AWS API calls.
pub trait Backend: Send + Sync {
    /// Invoke `operation` (kebab-case, e.g. `create-role`) of `service`
    /// with a request in the service's JSON shape, returning the response.
    ///
    /// Responses with no body are returned as `Value::Null`.
    fn call(&self, service: &str, operation: &str, input: &Value) -> Result<Value>;

    /// Check if the backend can reach its transport at all.
    fn is_available(&self) -> bool;
}
