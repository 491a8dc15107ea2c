//! S3 buckets and objects, through the `s3api` command set.

use crate::Client;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

/// Metadata of an object, from `head-object`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectHead {
    /// Entity tag, quoted as S3 reports it
    #[serde(rename = "ETag")]
    pub etag: String,
    /// Size in bytes
    #[serde(default)]
    pub content_length: i64,
    /// Last modification time as reported by S3
    #[serde(default)]
    pub last_modified: Option<String>,
}

#[derive(Deserialize)]
struct PutObjectOutput {
    #[serde(rename = "ETag")]
    etag: String,
}

impl Client {
    /// Create a bucket in the client's region.
    ///
    /// `us-east-1` rejects an explicit location constraint.
    pub fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut input = json!({ "Bucket": bucket });
        if let Some(region) = self.region().filter(|r| *r != "us-east-1") {
            input["CreateBucketConfiguration"] = json!({ "LocationConstraint": region });
        }
        self.send("s3api", "create-bucket", &input)
    }

    /// Check that a bucket exists and is accessible.
    pub fn head_bucket(&self, bucket: &str) -> Result<()> {
        self.send("s3api", "head-bucket", &json!({ "Bucket": bucket }))
    }

    /// Delete an empty bucket.
    pub fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.send("s3api", "delete-bucket", &json!({ "Bucket": bucket }))
    }

    /// Upload a local file, returning the object's ETag.
    pub fn put_object(&self, bucket: &str, key: &str, source: &Path) -> Result<String> {
        let output: PutObjectOutput = self.request(
            "s3api",
            "put-object",
            &json!({ "Bucket": bucket, "Key": key, "Body": source.display().to_string() }),
        )?;
        Ok(output.etag)
    }

    /// Fetch an object's metadata.
    pub fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead> {
        self.request("s3api", "head-object", &json!({ "Bucket": bucket, "Key": key }))
    }

    /// Delete an object. Deleting a missing key succeeds.
    pub fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.send("s3api", "delete-object", &json!({ "Bucket": bucket, "Key": key }))
    }
}
