//! Error types for AWS CLI operations.
//!
//! Errors are categorized from the CLI's stderr so callers can tell
//! transient failures (throttling, eventual consistency, network) from
//! permanent ones (access denied, validation).

use thiserror::Error;

/// Categories of AWS errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Request rate exceeded (transient, retryable)
    Throttled,
    /// Connection, timeout or 5xx service errors (transient, retryable)
    Network,
    /// A concurrent change to the same object is in progress (retryable)
    ConcurrentModification,
    /// A freshly created IAM role is not usable yet (retryable)
    NotYetConsistent,
    /// The object does not exist
    NotFound,
    /// The object already exists
    AlreadyExists,
    /// Credentials missing, expired or lacking permissions
    AccessDenied,
    /// The request was rejected as invalid
    Validation,
    /// The object is still in use (e.g. policy attached)
    InUse,
    /// The aws CLI is not installed
    CliNotFound,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Throttled | Self::Network | Self::ConcurrentModification | Self::NotYetConsistent
        )
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Throttled => "Request throttled",
            Self::Network => "Network or service availability issue",
            Self::ConcurrentModification => "Concurrent modification",
            Self::NotYetConsistent => "Change not yet propagated",
            Self::NotFound => "Not found",
            Self::AlreadyExists => "Already exists",
            Self::AccessDenied => "Access denied",
            Self::Validation => "Invalid request",
            Self::InUse => "Still in use",
            Self::CliNotFound => "aws CLI not installed",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Throttled | Self::ConcurrentModification | Self::NotYetConsistent => {
                "Wait a moment and try again"
            }
            Self::Network => "Check your connection and the AWS service health dashboard",
            Self::NotFound => "The object may have been deleted outside of this tool",
            Self::AlreadyExists => "Import the existing object or choose another name",
            Self::AccessDenied => "Check the active profile's credentials and IAM permissions",
            Self::Validation => "Check the resource attributes in the stack file",
            Self::InUse => "Remove whatever still references the object first",
            Self::CliNotFound => "Install the AWS CLI v2 and make sure `aws` is on PATH",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur during AWS CLI operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("throttled: {message}")]
    Throttled { message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("concurrent modification: {message}")]
    ConcurrentModification { message: String },

    #[error("not yet consistent: {message}")]
    NotYetConsistent { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("already exists: {message}")]
    AlreadyExists { message: String },

    #[error("access denied: {message}")]
    AccessDenied { message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("in use: {message}")]
    InUse { message: String },

    /// The aws CLI is not installed or not found in PATH
    #[error("aws CLI not found. Install it from https://aws.amazon.com/cli/")]
    CliNotFound,

    /// Command execution failed
    #[error("command failed: {message}")]
    CommandFailed {
        /// Description of what command failed
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Throttled { .. } => ErrorCategory::Throttled,
            Error::Network { .. } => ErrorCategory::Network,
            Error::ConcurrentModification { .. } => ErrorCategory::ConcurrentModification,
            Error::NotYetConsistent { .. } => ErrorCategory::NotYetConsistent,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::AlreadyExists { .. } => ErrorCategory::AlreadyExists,
            Error::AccessDenied { .. } => ErrorCategory::AccessDenied,
            Error::Validation { .. } => ErrorCategory::Validation,
            Error::InUse { .. } => ErrorCategory::InUse,
            Error::CliNotFound => ErrorCategory::CliNotFound,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    /// Create an error from aws CLI output.
    ///
    /// The CLI reports service errors as
    /// `An error occurred (Code) when calling the Operation operation: message`;
    /// the code is matched first, then the message text.
    pub fn from_cli_output(stderr: &str) -> Self {
        let message = stderr.trim().to_string();
        let code = error_code(stderr).unwrap_or_default();
        let lower = stderr.to_lowercase();

        // IAM changes take a few seconds to reach Glue and STS
        if lower.contains("unable to assume")
            || lower.contains("cannot be assumed")
            || lower.contains("is not authorized to perform: sts:assumerole")
        {
            return Error::NotYetConsistent { message };
        }

        match code {
            "Throttling" | "ThrottlingException" | "RequestLimitExceeded" | "TooManyRequestsException"
            | "SlowDown" | "RequestThrottled" | "ProvisionedThroughputExceededException" => {
                return Error::Throttled { message };
            }
            "ConcurrentModification" | "ConcurrentModificationException" | "OperationAbortedException"
            | "ConcurrentRunsExceededException" => {
                return Error::ConcurrentModification { message };
            }
            "InternalError" | "InternalFailure" | "InternalServiceException" | "ServiceUnavailable"
            | "ServiceUnavailableException" | "ServiceFailure" | "OperationTimeoutException" => {
                return Error::Network { message };
            }
            "NoSuchEntity" | "EntityNotFoundException" | "NoSuchBucket" | "NoSuchKey" | "404"
            | "NotFound" => {
                return Error::NotFound { message };
            }
            "EntityAlreadyExists" | "AlreadyExistsException" | "BucketAlreadyOwnedByYou"
            | "BucketAlreadyExists" | "IdempotentParameterMismatchException" => {
                return Error::AlreadyExists { message };
            }
            "AccessDenied" | "AccessDeniedException" | "UnauthorizedOperation" | "ExpiredToken"
            | "ExpiredTokenException" | "InvalidClientTokenId" | "SignatureDoesNotMatch" | "403" => {
                return Error::AccessDenied { message };
            }
            "DeleteConflict" | "BucketNotEmpty" | "CrawlerRunningException" | "ResourceInUseException" => {
                return Error::InUse { message };
            }
            "ValidationError" | "ValidationException" | "InvalidInputException" | "MalformedPolicyDocument"
            | "InvalidParameterValue" | "InvalidBucketName" | "LimitExceeded" | "ResourceNumberLimitExceededException"
            | "IllegalLocationConstraintException" => {
                return Error::Validation { message };
            }
            _ => {}
        }

        // Transport failures have no error code
        if lower.contains("could not connect to the endpoint")
            || lower.contains("connect timeout")
            || lower.contains("read timeout")
            || lower.contains("connection was closed")
            || lower.contains("ssl validation failed")
            || lower.contains("name or service not known")
        {
            return Error::Network { message };
        }

        if lower.contains("unable to locate credentials")
            || lower.contains("the config profile")
            || lower.contains("token has expired")
        {
            return Error::AccessDenied { message };
        }

        if lower.contains("parameter validation failed") || lower.contains("usage: aws") {
            return Error::Validation { message };
        }

        Error::CommandFailed {
            message: if code.is_empty() {
                "aws command failed".to_string()
            } else {
                format!("aws command failed with {code}")
            },
            stderr: message,
        }
    }
}

/// Extract `Code` from `An error occurred (Code) when calling ...`.
fn error_code(stderr: &str) -> Option<&str> {
    let (_, rest) = stderr.split_once("An error occurred (")?;
    let (code, _) = rest.split_once(')')?;
    Some(code.trim())
}

/// Result type for AWS operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn service_error(code: &str, operation: &str, message: &str) -> String {
        format!("\nAn error occurred ({code}) when calling the {operation} operation: {message}\n")
    }

    #[test]
    fn test_error_code_extraction() {
        let stderr = service_error("NoSuchEntity", "GetRole", "The role with name x cannot be found.");
        assert_eq!(error_code(&stderr), Some("NoSuchEntity"));
        assert_eq!(error_code("plain failure"), None);
    }

    #[test]
    fn test_throttling_is_retryable() {
        let err = Error::from_cli_output(&service_error("Throttling", "CreateRole", "Rate exceeded"));
        assert_eq!(err.category(), ErrorCategory::Throttled);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_found() {
        let err = Error::from_cli_output(&service_error(
            "EntityNotFoundException",
            "GetJob",
            "Job lottery-transformer not found",
        ));
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_role_not_yet_assumable() {
        let err = Error::from_cli_output(&service_error(
            "InvalidInputException",
            "CreateCrawler",
            "Service is unable to assume provided role. Please verify role's TrustPolicy",
        ));
        assert_eq!(err.category(), ErrorCategory::NotYetConsistent);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_access_denied_is_permanent() {
        let err = Error::from_cli_output(&service_error(
            "AccessDenied",
            "CreatePolicy",
            "User is not authorized to perform: iam:CreatePolicy",
        ));
        assert_eq!(err.category(), ErrorCategory::AccessDenied);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_failure() {
        let err = Error::from_cli_output(
            "Could not connect to the endpoint URL: \"https://glue.us-east-1.amazonaws.com/\"",
        );
        assert_eq!(err.category(), ErrorCategory::Network);
    }

    #[test]
    fn test_missing_credentials() {
        let err = Error::from_cli_output("Unable to locate credentials. You can configure credentials by running \"aws configure\".");
        assert_eq!(err.category(), ErrorCategory::AccessDenied);
    }

    #[test]
    fn test_delete_conflict() {
        let err = Error::from_cli_output(&service_error(
            "DeleteConflict",
            "DeleteRole",
            "Cannot delete entity, must detach all policies first.",
        ));
        assert_eq!(err.category(), ErrorCategory::InUse);
    }

    #[test]
    fn test_unknown_falls_back_to_command_failed() {
        let err = Error::from_cli_output(&service_error("Weird", "GetRole", "?"));
        assert!(matches!(err, Error::CommandFailed { ref message, .. } if message.contains("Weird")));
        assert_eq!(err.category(), ErrorCategory::Other);
    }
}
