//! IAM roles, customer managed policies and role policy attachments.
//!
//! Policy documents are passed around as JSON values; the CLI expects them
//! as JSON text inside the request, which is handled here.

use crate::Client;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// IAM keeps at most this many versions per managed policy.
const MAX_POLICY_VERSIONS: usize = 5;

/// An IAM role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Role {
    /// Role name
    pub role_name: String,
    /// Unique id assigned by IAM
    pub role_id: String,
    /// Role ARN
    pub arn: String,
    /// Path prefix
    #[serde(default = "root_path")]
    pub path: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Trust policy
    #[serde(default)]
    pub assume_role_policy_document: Option<Value>,
    /// Maximum session duration in seconds
    #[serde(default)]
    pub max_session_duration: Option<i64>,
}

/// A customer managed policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManagedPolicy {
    /// Policy name
    pub policy_name: String,
    /// Unique id assigned by IAM
    pub policy_id: String,
    /// Policy ARN
    pub arn: String,
    /// Path prefix
    #[serde(default = "root_path")]
    pub path: String,
    /// Version id of the document in effect
    pub default_version_id: String,
    /// Number of principals the policy is attached to
    #[serde(default)]
    pub attachment_count: i64,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
}

/// One stored version of a managed policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyVersion {
    /// `v1`, `v2`, ...
    pub version_id: String,
    /// Whether this version is in effect
    pub is_default_version: bool,
    /// Creation timestamp as reported by IAM
    #[serde(default)]
    pub create_date: Option<String>,
    /// Document, only present on `get-policy-version`
    #[serde(default)]
    pub document: Option<Value>,
}

/// A managed policy attached to a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttachedPolicy {
    /// Policy name
    pub policy_name: String,
    /// Policy ARN
    pub policy_arn: String,
}

fn root_path() -> String {
    "/".to_string()
}

/// The CLI decodes policy documents into objects, but older versions and
/// some operations return them URL-encoded JSON text.
fn document_value(document: Value) -> Result<Value> {
    match document {
        Value::String(text) => {
            let decoded = percent_decode(&text);
            Ok(serde_json::from_str(&decoded)?)
        }
        other => Ok(other),
    }
}

fn percent_decode(text: &str) -> String {
    if !text.contains('%') {
        return text.to_string();
    }
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

impl Client {
    // =========================================================================
    // Roles
    // =========================================================================

    /// Create a role with a trust policy.
    pub fn create_role(
        &self,
        name: &str,
        path: &str,
        trust_policy: &Value,
        description: Option<&str>,
    ) -> Result<Role> {
        let mut input = json!({
            "RoleName": name,
            "Path": path,
            "AssumeRolePolicyDocument": serde_json::to_string(trust_policy)?,
        });
        if let Some(description) = description {
            input["Description"] = json!(description);
        }
        self.request_member("iam", "create-role", &input, "Role")
    }

    /// Look up a role by name.
    pub fn get_role(&self, name: &str) -> Result<Role> {
        let mut role: Role =
            self.request_member("iam", "get-role", &json!({ "RoleName": name }), "Role")?;
        if let Some(document) = role.assume_role_policy_document.take() {
            role.assume_role_policy_document = Some(document_value(document)?);
        }
        Ok(role)
    }

    /// Change a role's description.
    pub fn update_role(&self, name: &str, description: &str) -> Result<()> {
        self.send(
            "iam",
            "update-role",
            &json!({ "RoleName": name, "Description": description }),
        )
    }

    /// Replace a role's trust policy.
    pub fn update_assume_role_policy(&self, name: &str, trust_policy: &Value) -> Result<()> {
        self.send(
            "iam",
            "update-assume-role-policy",
            &json!({
                "RoleName": name,
                "PolicyDocument": serde_json::to_string(trust_policy)?,
            }),
        )
    }

    /// Delete a role. Attached policies must be detached first.
    pub fn delete_role(&self, name: &str) -> Result<()> {
        self.send("iam", "delete-role", &json!({ "RoleName": name }))
    }

    // =========================================================================
    // Managed policies
    // =========================================================================

    /// Create a customer managed policy.
    pub fn create_policy(
        &self,
        name: &str,
        path: &str,
        document: &Value,
        description: Option<&str>,
    ) -> Result<ManagedPolicy> {
        let mut input = json!({
            "PolicyName": name,
            "Path": path,
            "PolicyDocument": serde_json::to_string(document)?,
        });
        if let Some(description) = description {
            input["Description"] = json!(description);
        }
        self.request_member("iam", "create-policy", &input, "Policy")
    }

    /// Look up a managed policy by ARN.
    pub fn get_policy(&self, arn: &str) -> Result<ManagedPolicy> {
        self.request_member("iam", "get-policy", &json!({ "PolicyArn": arn }), "Policy")
    }

    /// Fetch the document of one policy version.
    pub fn get_policy_document(&self, arn: &str, version_id: &str) -> Result<Value> {
        let version: PolicyVersion = self.request_member(
            "iam",
            "get-policy-version",
            &json!({ "PolicyArn": arn, "VersionId": version_id }),
            "PolicyVersion",
        )?;
        let document = version
            .document
            .ok_or_else(|| Error::Other(format!("policy version {version_id} of {arn} has no document")))?;
        document_value(document)
    }

    /// List the stored versions of a managed policy.
    pub fn list_policy_versions(&self, arn: &str) -> Result<Vec<PolicyVersion>> {
        self.request_member(
            "iam",
            "list-policy-versions",
            &json!({ "PolicyArn": arn }),
            "Versions",
        )
    }

    /// Make `document` the policy's default version.
    ///
    /// IAM keeps at most five versions, so the oldest non-default version
    /// is deleted first when the limit is reached.
    pub fn replace_policy_document(&self, arn: &str, document: &Value) -> Result<()> {
        let mut versions = self.list_policy_versions(arn)?;
        if versions.len() >= MAX_POLICY_VERSIONS {
            versions.retain(|v| !v.is_default_version);
            versions.sort_by(|a, b| a.create_date.cmp(&b.create_date));
            if let Some(oldest) = versions.first() {
                log::debug!("pruning policy version {} of {arn}", oldest.version_id);
                self.delete_policy_version(arn, &oldest.version_id)?;
            }
        }
        self.send(
            "iam",
            "create-policy-version",
            &json!({
                "PolicyArn": arn,
                "PolicyDocument": serde_json::to_string(document)?,
                "SetAsDefault": true,
            }),
        )
    }

    fn delete_policy_version(&self, arn: &str, version_id: &str) -> Result<()> {
        self.send(
            "iam",
            "delete-policy-version",
            &json!({ "PolicyArn": arn, "VersionId": version_id }),
        )
    }

    /// Delete a managed policy together with its non-default versions.
    pub fn delete_policy(&self, arn: &str) -> Result<()> {
        for version in self.list_policy_versions(arn)? {
            if !version.is_default_version {
                self.delete_policy_version(arn, &version.version_id)?;
            }
        }
        self.send("iam", "delete-policy", &json!({ "PolicyArn": arn }))
    }

    // =========================================================================
    // Attachments
    // =========================================================================

    /// Attach a managed policy to a role.
    pub fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        self.send(
            "iam",
            "attach-role-policy",
            &json!({ "RoleName": role, "PolicyArn": policy_arn }),
        )
    }

    /// Detach a managed policy from a role.
    pub fn detach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        self.send(
            "iam",
            "detach-role-policy",
            &json!({ "RoleName": role, "PolicyArn": policy_arn }),
        )
    }

    /// List the managed policies attached to a role.
    pub fn list_attached_role_policies(&self, role: &str) -> Result<Vec<AttachedPolicy>> {
        self.request_member(
            "iam",
            "list-attached-role-policies",
            &json!({ "RoleName": role }),
            "AttachedPolicies",
        )
    }
}
