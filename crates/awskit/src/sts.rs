//! Caller identity, used to build ARNs that IAM does not return directly.

use crate::Client;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// The principal the CLI is acting as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallerIdentity {
    /// Account number
    pub account: String,
    /// Principal ARN
    pub arn: String,
    /// Unique principal id
    pub user_id: String,
}

impl Client {
    /// Ask STS who the configured credentials belong to.
    pub fn caller_identity(&self) -> Result<CallerIdentity> {
        self.request("sts", "get-caller-identity", &json!({}))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_client;
    use serde_json::json;

    #[test]
    fn test_caller_identity() {
        let (client, backend) = test_client();
        backend.respond(
            "sts get-caller-identity",
            Ok(json!({
                "UserId": "AIDA1",
                "Account": "123456789012",
                "Arn": "arn:aws:iam::123456789012:user/deployer"
            })),
        );
        assert_eq!(client.caller_identity().unwrap().account, "123456789012");
    }
}
