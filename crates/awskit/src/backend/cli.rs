//! Real AWS backend using the `aws` CLI.

use crate::backend::Backend;
use crate::error::{Error, Result};
use serde_json::Value;
use std::process::Command;

/// Backend that executes `aws <service> <operation>` commands.
pub struct CliBackend {
    /// Path to the aws executable
    aws_path: String,
    region: Option<String>,
    profile: Option<String>,
}

impl CliBackend {
    /// Create a new CliBackend.
    ///
    /// Returns an error if the aws CLI is not installed.
    pub fn new(region: Option<String>, profile: Option<String>) -> Result<Self> {
        let aws_path = find_aws()?;
        Ok(Self {
            aws_path,
            region,
            profile,
        })
    }

    fn args<'a>(&'a self, service: &'a str, operation: &'a str, input: &'a str) -> Vec<&'a str> {
        let mut args = vec![
            service,
            operation,
            "--cli-input-json",
            input,
            "--output",
            "json",
            "--no-cli-pager",
        ];
        if let Some(region) = &self.region {
            args.extend(["--region", region.as_str()]);
        }
        if let Some(profile) = &self.profile {
            args.extend(["--profile", profile.as_str()]);
        }
        args
    }

    /// Run an aws command and return output.
    fn run_aws(&self, args: &[&str]) -> Result<std::process::Output> {
        let output = Command::new(&self.aws_path)
            .args(args)
            .output()
            .map_err(|e| Error::CommandFailed {
                message: format!("failed to execute aws: {e}"),
                stderr: String::new(),
            })?;
        Ok(output)
    }
}

impl Backend for CliBackend {
    fn call(&self, service: &str, operation: &str, input: &Value) -> Result<Value> {
        let input = serde_json::to_string(input)?;
        log::debug!("aws {service} {operation}");
        let output = self.run_aws(&self.args(service, operation, &input))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::from_cli_output(&stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&stdout)?)
    }

    fn is_available(&self) -> bool {
        self.run_aws(&["--version"])
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

/// Find the aws executable.
fn find_aws() -> Result<String> {
    let paths = ["/usr/local/bin/aws", "/opt/homebrew/bin/aws", "/usr/bin/aws"];

    for path in &paths {
        if std::path::Path::new(path).exists() {
            return Ok(path.to_string());
        }
    }

    let output = Command::new("which")
        .arg("aws")
        .output()
        .map_err(|_| Error::CliNotFound)?;

    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !path.is_empty() {
            return Ok(path);
        }
    }

    Err(Error::CliNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_include_region_and_profile() {
        let backend = CliBackend {
            aws_path: "aws".into(),
            region: Some("us-east-1".into()),
            profile: Some("lottery".into()),
        };
        let args = backend.args("iam", "get-role", "{}");
        assert_eq!(
            args,
            vec![
                "iam",
                "get-role",
                "--cli-input-json",
                "{}",
                "--output",
                "json",
                "--no-cli-pager",
                "--region",
                "us-east-1",
                "--profile",
                "lottery",
            ]
        );
    }

    #[test]
    fn test_args_without_overrides() {
        let backend = CliBackend {
            aws_path: "aws".into(),
            region: None,
            profile: None,
        };
        assert_eq!(backend.args("s3api", "head-bucket", "{}").len(), 7);
    }
}
