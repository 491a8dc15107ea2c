//! # awskit
//!
//! Pure Rust library for the handful of AWS APIs a data-lake stack needs,
//! driven through the `aws` CLI.
//!
//! This crate provides functionality for:
//! - IAM roles, managed policies and role attachments
//! - Glue catalog databases, Python-shell jobs and crawlers
//! - S3 buckets and objects
//! - Classifying CLI failures into retryable and permanent categories
//!
//! ## Example
//!
//! ```no_run
//! use awskit::{Client, ClientConfig};
//!
//! let client = Client::new(ClientConfig {
//!     region: Some("us-east-1".into()),
//!     profile: None,
//! })
//! .expect("aws CLI not available");
//!
//! match client.get_role("lottery-glue-role") {
//!     Ok(role) => println!("{}", role.arn),
//!     Err(e) if e.is_not_found() => println!("no such role"),
//!     Err(e) => eprintln!("{e} ({})", e.category().advice()),
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod glue;
pub mod iam;
pub mod s3;
pub mod sts;

pub use error::{Error, ErrorCategory, Result};
pub use glue::{Crawler, CrawlerInput, Database, Job, JobInput, SchemaChangePolicy};
pub use iam::{AttachedPolicy, ManagedPolicy, PolicyVersion, Role};
pub use s3::ObjectHead;
pub use sts::CallerIdentity;

use backend::{Backend, cli::CliBackend};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Where and as whom requests are made.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    /// Region passed as `--region`; the CLI default applies when unset
    pub region: Option<String>,
    /// Named profile passed as `--profile`
    pub profile: Option<String>,
}

/// High-level client for AWS operations.
///
/// The client wraps a backend and exposes typed operations per service
/// (see the [`iam`], [`glue`], [`s3`] and [`sts`] modules).
pub struct Client {
    backend: Box<dyn Backend>,
    config: ClientConfig,
}

impl Client {
    /// Create a new Client with the CLI backend.
    ///
    /// Returns an error if the aws CLI is not installed.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let backend = CliBackend::new(config.region.clone(), config.profile.clone())?;
        Ok(Self {
            backend: Box::new(backend),
            config,
        })
    }

    /// Create a client with a custom backend (useful for testing).
    pub fn with_backend(backend: Box<dyn Backend>, config: ClientConfig) -> Self {
        Self { backend, config }
    }

    /// Check if the aws CLI is available.
    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    /// The configured region, if any.
    pub fn region(&self) -> Option<&str> {
        self.config.region.as_deref()
    }

    /// Send a typed request and discard the response body.
    pub(crate) fn send<I: Serialize>(&self, service: &str, operation: &str, input: &I) -> Result<()> {
        let input = serde_json::to_value(input)?;
        self.backend.call(service, operation, &input)?;
        Ok(())
    }

    /// Send a typed request and decode the response.
    pub(crate) fn request<I: Serialize, O: DeserializeOwned>(
        &self,
        service: &str,
        operation: &str,
        input: &I,
    ) -> Result<O> {
        let input = serde_json::to_value(input)?;
        let output = self.backend.call(service, operation, &input)?;
        Ok(serde_json::from_value(output)?)
    }

    /// Like [`Client::request`], unwrapping a single top-level member
    /// (`{"Role": {...}}` → the role).
    pub(crate) fn request_member<I: Serialize, O: DeserializeOwned>(
        &self,
        service: &str,
        operation: &str,
        input: &I,
        member: &str,
    ) -> Result<O> {
        let input = serde_json::to_value(input)?;
        let mut output = self.backend.call(service, operation, &input)?;
        let value = output
            .get_mut(member)
            .map(Value::take)
            .ok_or_else(|| Error::Other(format!("{service} {operation}: response has no {member}")))?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Turn a not-found error into `None`.
///
/// ```
/// use awskit::{optional, Error};
///
/// let missing: awskit::Result<u32> = Err(Error::NotFound { message: "gone".into() });
/// assert_eq!(optional(missing).unwrap(), None);
/// ```
pub fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
pub(crate) fn test_client() -> (Client, std::sync::Arc<backend::testing::RecordingBackend>) {
    test_client_in("us-east-1")
}

#[cfg(test)]
pub(crate) fn test_client_in(
    region: &str,
) -> (Client, std::sync::Arc<backend::testing::RecordingBackend>) {
    let backend = std::sync::Arc::new(backend::testing::RecordingBackend::default());
    let client = Client::with_backend(
        Box::new(SharedBackend(backend.clone())),
        ClientConfig {
            region: Some(region.into()),
            profile: None,
        },
    );
    (client, backend)
}

#[cfg(test)]
struct SharedBackend(std::sync::Arc<backend::testing::RecordingBackend>);

#[cfg(test)]
impl Backend for SharedBackend {
    fn call(&self, service: &str, operation: &str, input: &Value) -> Result<Value> {
        self.0.call(service, operation, input)
    }

    fn is_available(&self) -> bool {
        true
    }
}
