//! Glue Data Catalog databases, Python-shell jobs and crawlers.

use crate::Client;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// A Data Catalog database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Database {
    /// Database name
    pub name: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Default S3 location for tables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_uri: Option<String>,
}

/// Desired definition of a Python-shell job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInput {
    /// Job name
    pub name: String,
    /// ARN or name of the execution role
    pub role: String,
    /// `s3://` location of the script
    pub script_location: String,
    /// Python version of the shell (`3.9`)
    pub python_version: String,
    /// Arguments passed to every run
    pub default_arguments: BTreeMap<String, String>,
    /// DPUs, `0.0625` or `1` for Python-shell jobs
    pub max_capacity: f64,
    /// Glue version
    pub glue_version: Option<String>,
    /// Timeout in minutes
    pub timeout: Option<i64>,
    /// Free-form description
    pub description: Option<String>,
}

impl JobInput {
    fn definition(&self) -> serde_json::Value {
        let mut definition = json!({
            "Role": self.role,
            "Command": {
                "Name": "pythonshell",
                "ScriptLocation": self.script_location,
                "PythonVersion": self.python_version,
            },
            "DefaultArguments": self.default_arguments,
            "MaxCapacity": self.max_capacity,
        });
        if let Some(glue_version) = &self.glue_version {
            definition["GlueVersion"] = json!(glue_version);
        }
        if let Some(timeout) = self.timeout {
            definition["Timeout"] = json!(timeout);
        }
        if let Some(description) = &self.description {
            definition["Description"] = json!(description);
        }
        definition
    }
}

/// The `Command` block of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobCommand {
    /// `pythonshell`, `glueetl`, ...
    pub name: String,
    /// `s3://` location of the script
    pub script_location: String,
    /// Python version
    #[serde(default)]
    pub python_version: Option<String>,
}

/// A job as reported by `get-job`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Job {
    /// Job name
    pub name: String,
    /// Execution role
    pub role: String,
    /// Script and runtime
    pub command: JobCommand,
    /// Arguments passed to every run
    #[serde(default)]
    pub default_arguments: BTreeMap<String, String>,
    /// DPUs
    #[serde(default)]
    pub max_capacity: Option<f64>,
    /// Glue version
    #[serde(default)]
    pub glue_version: Option<String>,
    /// Timeout in minutes
    #[serde(default)]
    pub timeout: Option<i64>,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
}

/// What a crawler does when the schema of its data changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SchemaChangePolicy {
    /// `UPDATE_IN_DATABASE` or `LOG`
    pub update_behavior: String,
    /// `DEPRECATE_IN_DATABASE`, `DELETE_FROM_DATABASE` or `LOG`
    pub delete_behavior: String,
}

impl Default for SchemaChangePolicy {
    fn default() -> Self {
        Self {
            update_behavior: "UPDATE_IN_DATABASE".to_string(),
            delete_behavior: "DEPRECATE_IN_DATABASE".to_string(),
        }
    }
}

/// Desired definition of a crawler over S3 prefixes.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlerInput {
    /// Crawler name
    pub name: String,
    /// ARN or name of the execution role
    pub role: String,
    /// Catalog database tables are written to
    pub database_name: String,
    /// `s3://bucket/prefix/` paths to crawl
    pub s3_targets: Vec<String>,
    /// Cron expression, e.g. `cron(0 6 * * ? *)`
    pub schedule: Option<String>,
    /// Prefix for created table names
    pub table_prefix: Option<String>,
    /// Schema change handling
    pub schema_change_policy: SchemaChangePolicy,
    /// Free-form description
    pub description: Option<String>,
}

impl CrawlerInput {
    fn definition(&self) -> serde_json::Value {
        let targets: Vec<_> = self.s3_targets.iter().map(|path| json!({ "Path": path })).collect();
        let mut definition = json!({
            "Name": self.name,
            "Role": self.role,
            "DatabaseName": self.database_name,
            "Targets": { "S3Targets": targets },
            "SchemaChangePolicy": self.schema_change_policy,
        });
        if let Some(schedule) = &self.schedule {
            definition["Schedule"] = json!(schedule);
        }
        if let Some(prefix) = &self.table_prefix {
            definition["TablePrefix"] = json!(prefix);
        }
        if let Some(description) = &self.description {
            definition["Description"] = json!(description);
        }
        definition
    }
}

/// One S3 target of a crawler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct S3Target {
    /// `s3://bucket/prefix/`
    pub path: String,
}

/// Targets of a crawler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CrawlerTargets {
    /// S3 targets
    #[serde(default)]
    pub s3_targets: Vec<S3Target>,
}

/// Crawler schedule as reported by `get-crawler`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CrawlerSchedule {
    /// Cron expression
    pub schedule_expression: String,
    /// `SCHEDULED`, `NOT_SCHEDULED` or `TRANSITIONING`
    #[serde(default)]
    pub state: Option<String>,
}

/// A crawler as reported by `get-crawler`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Crawler {
    /// Crawler name
    pub name: String,
    /// Execution role
    pub role: String,
    /// Catalog database
    #[serde(default)]
    pub database_name: Option<String>,
    /// What is crawled
    #[serde(default)]
    pub targets: CrawlerTargets,
    /// Schedule, if any
    #[serde(default)]
    pub schedule: Option<CrawlerSchedule>,
    /// Table name prefix
    #[serde(default)]
    pub table_prefix: Option<String>,
    /// Schema change handling
    #[serde(default)]
    pub schema_change_policy: Option<SchemaChangePolicy>,
    /// `READY`, `RUNNING` or `STOPPING`
    #[serde(default)]
    pub state: Option<String>,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
}

impl Crawler {
    /// Target paths in order.
    pub fn s3_paths(&self) -> Vec<String> {
        self.targets.s3_targets.iter().map(|t| t.path.clone()).collect()
    }
}

impl Client {
    // =========================================================================
    // Databases
    // =========================================================================

    /// Create a catalog database.
    pub fn create_database(&self, database: &Database) -> Result<()> {
        self.send("glue", "create-database", &json!({ "DatabaseInput": database }))
    }

    /// Look up a catalog database.
    pub fn get_database(&self, name: &str) -> Result<Database> {
        self.request_member("glue", "get-database", &json!({ "Name": name }), "Database")
    }

    /// Replace a catalog database's definition.
    pub fn update_database(&self, database: &Database) -> Result<()> {
        self.send(
            "glue",
            "update-database",
            &json!({ "Name": database.name, "DatabaseInput": database }),
        )
    }

    /// Delete a catalog database and its tables.
    pub fn delete_database(&self, name: &str) -> Result<()> {
        self.send("glue", "delete-database", &json!({ "Name": name }))
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Create a Python-shell job.
    pub fn create_job(&self, job: &JobInput) -> Result<()> {
        let mut input = job.definition();
        input["Name"] = json!(job.name);
        self.send("glue", "create-job", &input)
    }

    /// Look up a job.
    pub fn get_job(&self, name: &str) -> Result<Job> {
        self.request_member("glue", "get-job", &json!({ "JobName": name }), "Job")
    }

    /// Replace a job's definition.
    ///
    /// `update-job` resets anything not given, so the full definition is sent.
    pub fn update_job(&self, job: &JobInput) -> Result<()> {
        self.send(
            "glue",
            "update-job",
            &json!({ "JobName": job.name, "JobUpdate": job.definition() }),
        )
    }

    /// Delete a job.
    pub fn delete_job(&self, name: &str) -> Result<()> {
        self.send("glue", "delete-job", &json!({ "JobName": name }))
    }

    // =========================================================================
    // Crawlers
    // =========================================================================

    /// Create a crawler.
    pub fn create_crawler(&self, crawler: &CrawlerInput) -> Result<()> {
        self.send("glue", "create-crawler", &crawler.definition())
    }

    /// Look up a crawler.
    pub fn get_crawler(&self, name: &str) -> Result<Crawler> {
        self.request_member("glue", "get-crawler", &json!({ "Name": name }), "Crawler")
    }

    /// Replace a crawler's definition.
    pub fn update_crawler(&self, crawler: &CrawlerInput) -> Result<()> {
        self.send("glue", "update-crawler", &crawler.definition())
    }

    /// Delete a crawler.
    pub fn delete_crawler(&self, name: &str) -> Result<()> {
        self.send("glue", "delete-crawler", &json!({ "Name": name }))
    }

    /// Start a crawler run.
    pub fn start_crawler(&self, name: &str) -> Result<()> {
        self.send("glue", "start-crawler", &json!({ "Name": name }))
    }
}
