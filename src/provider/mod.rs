//! Control planes lakeform can apply against
//!
//! - `aws`: the real account, through the `aws` CLI
//! - `local`: a JSON file that behaves like the account, for offline runs

pub mod aws;
pub mod local;

use crate::kinds;
use crate::stack::Stack;
use anyhow::{Context, Result};
use clap::ValueEnum;
use declarative::{ApiError, Attributes, ControlPlane, ResourceId, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Which control plane to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// The AWS account configured for the aws CLI
    Aws,
    /// A simulated account stored in a local JSON file
    Local,
}

/// Open the control plane for a stack.
///
/// `cloud_file` is where the local backend keeps its objects.
pub fn connect(backend: BackendKind, stack: &Stack, cloud_file: &Path) -> Result<Box<dyn ControlPlane>> {
    match backend {
        BackendKind::Aws => {
            let config = awskit::ClientConfig {
                region: Some(stack.settings.region.clone()),
                profile: stack.settings.profile.clone(),
            };
            let client = awskit::Client::new(config).context("Failed to set up the aws CLI")?;
            Ok(Box::new(aws::AwsCloud::new(
                client,
                stack.settings.region.clone(),
                stack.base_dir(),
            )))
        }
        BackendKind::Local => {
            let cloud = local::LocalCloud::open(cloud_file, stack.settings.region.clone())?;
            log::info!("Using local control plane at {}", cloud_file.display());
            Ok(Box::new(cloud.with_base_dir(stack.base_dir())))
        }
    }
}

// ============================================================================
// Error mapping
// ============================================================================

/// Classify an AWS error for the executor's retry loop.
pub fn api_error(error: awskit::Error) -> ApiError {
    let message = format!("{error} ({})", error.category().advice());
    if error.is_retryable() {
        ApiError::Transient(message)
    } else {
        ApiError::Permanent(message)
    }
}

fn invalid(id: &ResourceId, message: impl std::fmt::Display) -> ApiError {
    ApiError::Permanent(format!("{id}: {message}"))
}

// ============================================================================
// Attribute access
// ============================================================================

/// Typed access to resolved inputs of one resource.
pub struct Inputs<'a> {
    id: &'a ResourceId,
    attributes: &'a Attributes,
}

impl<'a> Inputs<'a> {
    pub fn new(id: &'a ResourceId, attributes: &'a Attributes) -> Self {
        Self { id, attributes }
    }

    pub fn str(&self, name: &str) -> Result<String, ApiError> {
        self.opt_str(name)?
            .ok_or_else(|| invalid(self.id, format!("missing attribute '{name}'")))
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<String>, ApiError> {
        match self.attributes.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(v @ (Value::Int(_) | Value::Float(_) | Value::Bool(_))) => {
                Ok(Some(v.to_display_string()))
            }
            Some(_) => Err(invalid(self.id, format!("'{name}' must be a string"))),
        }
    }

    pub fn opt_f64(&self, name: &str) -> Result<Option<f64>, ApiError> {
        match self.attributes.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| invalid(self.id, format!("'{name}' must be a number"))),
        }
    }

    pub fn opt_i64(&self, name: &str) -> Result<Option<i64>, ApiError> {
        match self.attributes.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_i64()
                .map(Some)
                .ok_or_else(|| invalid(self.id, format!("'{name}' must be an integer"))),
        }
    }

    pub fn str_list(&self, name: &str) -> Result<Vec<String>, ApiError> {
        match self.attributes.get(name) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::List(items)) => Ok(items.iter().map(Value::to_display_string).collect()),
            Some(_) => Err(invalid(self.id, format!("'{name}' must be a list"))),
        }
    }

    pub fn str_map(&self, name: &str) -> Result<BTreeMap<String, String>, ApiError> {
        match self.attributes.get(name) {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(Value::Map(map)) => Ok(map
                .iter()
                .map(|(k, v)| (k.clone(), v.to_display_string()))
                .collect()),
            Some(_) => Err(invalid(self.id, format!("'{name}' must be a table"))),
        }
    }

    /// A policy document, validated and normalized to the IAM grammar.
    pub fn policy(&self, name: &str) -> Result<serde_json::Value, ApiError> {
        let value = self
            .attributes
            .get(name)
            .ok_or_else(|| invalid(self.id, format!("missing attribute '{name}'")))?;
        let document =
            declarative::PolicyDocument::from_value(value).map_err(|e| invalid(self.id, e))?;
        serde_json::to_value(&document).map_err(|e| invalid(self.id, e))
    }

    /// Whether `name` differs from the previously applied inputs.
    pub fn changed(&self, previous: &Attributes, name: &str) -> bool {
        self.attributes.get(name) != previous.get(name)
    }
}

// ============================================================================
// Identities
// ============================================================================

/// Physical id of an attachment, `role/policy-arn`.
pub fn attachment_id(role: &str, policy_arn: &str) -> String {
    format!("{role}/{policy_arn}")
}

/// Split an attachment id back into role name and policy ARN.
///
/// Role names cannot contain `/`, so the first one separates the parts.
pub fn split_attachment_id(physical_id: &str) -> Option<(&str, &str)> {
    physical_id.split_once('/')
}

/// ARN of a Glue catalog object or an S3 bucket.
pub fn arn(kind: &str, region: &str, account: &str, name: &str) -> String {
    match kind {
        kinds::S3_BUCKET => format!("arn:aws:s3:::{name}"),
        kinds::GLUE_DATABASE => format!("arn:aws:glue:{region}:{account}:database/{name}"),
        kinds::GLUE_JOB => format!("arn:aws:glue:{region}:{account}:job/{name}"),
        kinds::GLUE_CRAWLER => format!("arn:aws:glue:{region}:{account}:crawler/{name}"),
        kinds::IAM_ROLE => format!("arn:aws:iam::{account}:role/{name}"),
        kinds::IAM_POLICY => format!("arn:aws:iam::{account}:policy/{name}"),
        _ => format!("arn:aws:{kind}:{region}:{account}:{name}"),
    }
}

/// Build an attribute map from string pairs.
pub fn attributes<'a>(pairs: impl IntoIterator<Item = (&'a str, String)>) -> Attributes {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::String(v)))
        .collect()
}
