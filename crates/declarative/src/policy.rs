//! IAM-style policy documents
//!
//! Pure data: a version plus a list of statements. Documents are declared
//! as nested maps in the stack file and converted here so they can be
//! validated before they reach the control plane.

use crate::error::{Error, Result};
use crate::resource::Value;
use serde::{Deserialize, Serialize};

const SUPPORTED_VERSIONS: [&str; 2] = ["2012-10-17", "2008-10-17"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// A value that may be written as a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s.clone()],
            Self::Many(items) => items.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(s) => s.is_empty(),
            Self::Many(items) => items.is_empty(),
        }
    }
}

impl Default for OneOrMany {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "Sid", default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    #[serde(rename = "Effect")]
    pub effect: Effect,

    #[serde(rename = "Action", default)]
    pub actions: OneOrMany,

    #[serde(rename = "Resource", default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<OneOrMany>,

    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<serde_json::Value>,

    #[serde(rename = "Condition", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,

    #[serde(rename = "Statement")]
    pub statements: Vec<Statement>,
}

impl PolicyDocument {
    /// Convert a resolved attribute value into a policy document.
    pub fn from_value(value: &Value) -> Result<Self> {
        let json = value
            .to_plain_json()
            .ok_or_else(|| Error::InvalidPolicy("document contains unresolved references".into()))?;
        Self::from_json(json)
    }

    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        // A lone statement object is accepted the way IAM accepts it
        let json = match json {
            serde_json::Value::Object(mut map) => {
                if let Some(stmt) = map.remove("Statement") {
                    let stmt = match stmt {
                        obj @ serde_json::Value::Object(_) => serde_json::Value::Array(vec![obj]),
                        other => other,
                    };
                    map.insert("Statement".into(), stmt);
                }
                serde_json::Value::Object(map)
            }
            other => other,
        };
        let doc: PolicyDocument =
            serde_json::from_value(json).map_err(|e| Error::InvalidPolicy(e.to_string()))?;
        doc.validate()?;
        Ok(doc)
    }

    /// Convert back into an attribute value.
    pub fn to_value(&self) -> Result<Value> {
        Value::from_json(serde_json::to_value(self)?)
    }

    /// Compact JSON as sent to the control plane.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            return Err(Error::InvalidPolicy(format!(
                "unsupported version '{}'",
                self.version
            )));
        }
        if self.statements.is_empty() {
            return Err(Error::InvalidPolicy("no statements".into()));
        }
        for (i, statement) in self.statements.iter().enumerate() {
            if statement.actions.is_empty() {
                return Err(Error::InvalidPolicy(format!(
                    "statement {} has no actions",
                    statement.sid.clone().unwrap_or_else(|| i.to_string())
                )));
            }
        }
        Ok(())
    }

    /// All actions granted or denied across statements.
    pub fn actions(&self) -> Vec<String> {
        self.statements
            .iter()
            .flat_map(|s| s.actions.to_vec())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assume_role() -> serde_json::Value {
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": "glue.amazonaws.com" },
                "Action": "sts:AssumeRole"
            }]
        })
    }

    #[test]
    fn test_parse_assume_role_policy() {
        let doc = PolicyDocument::from_json(assume_role()).unwrap();
        assert_eq!(doc.statements.len(), 1);
        assert_eq!(doc.statements[0].effect, Effect::Allow);
        assert_eq!(doc.actions(), vec!["sts:AssumeRole".to_string()]);
    }

    #[test]
    fn test_single_statement_object() {
        let doc = PolicyDocument::from_json(json!({
            "Version": "2012-10-17",
            "Statement": {
                "Effect": "Allow",
                "Action": ["s3:GetObject", "s3:PutObject"],
                "Resource": "arn:aws:s3:::lottery-lake/*"
            }
        }))
        .unwrap();
        assert_eq!(doc.actions().len(), 2);
    }

    #[test]
    fn test_rejects_bad_documents() {
        assert!(PolicyDocument::from_json(json!({"Version": "2020-01-01", "Statement": []})).is_err());
        assert!(PolicyDocument::from_json(json!({"Version": "2012-10-17", "Statement": []})).is_err());
        assert!(
            PolicyDocument::from_json(json!({
                "Version": "2012-10-17",
                "Statement": [{ "Effect": "Maybe", "Action": "s3:*" }]
            }))
            .is_err()
        );
        assert!(
            PolicyDocument::from_json(json!({
                "Version": "2012-10-17",
                "Statement": [{ "Effect": "Allow", "Action": [] }]
            }))
            .is_err()
        );
    }

    #[test]
    fn test_unresolved_document_rejected() {
        let value = Value::from_json(json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": "s3:GetObject",
                "Resource": "arn:aws:s3:::${s3_bucket.lake.name}/*"
            }]
        }))
        .unwrap();
        assert!(matches!(
            PolicyDocument::from_value(&value),
            Err(Error::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_to_json_string_uses_aws_field_names() {
        let doc = PolicyDocument::from_json(assume_role()).unwrap();
        let text = doc.to_json_string().unwrap();
        assert!(text.contains("\"Version\":\"2012-10-17\""));
        assert!(text.contains("\"Effect\":\"Allow\""));
        assert!(!text.contains("Sid"));
    }
}
