//! AWS control plane
//!
//! Maps each resource kind onto the awskit operations that create, update,
//! delete and describe it. Physical ids are the names AWS keys objects by
//! (role name, bucket, job name) except for managed policies, which are
//! keyed by ARN.

use super::{Inputs, api_error, arn, attachment_id, attributes, split_attachment_id};
use crate::kinds::{self, DEFAULT_MAX_CAPACITY, DEFAULT_PYTHON_VERSION};
use awskit::{Client, CrawlerInput, Database, JobInput, SchemaChangePolicy, optional};
use declarative::{ApiError, Attributes, ControlPlane, Created, ResourceId, Value};
use std::path::PathBuf;
use std::sync::OnceLock;

pub struct AwsCloud {
    client: Client,
    region: String,
    /// Account id, looked up once for Glue ARNs
    account: OnceLock<String>,
    /// Directory `s3_object` sources are relative to
    base_dir: PathBuf,
}

impl AwsCloud {
    pub fn new(client: Client, region: String, base_dir: PathBuf) -> Self {
        Self {
            client,
            region,
            account: OnceLock::new(),
            base_dir,
        }
    }

    fn account(&self) -> Result<String, ApiError> {
        if let Some(account) = self.account.get() {
            return Ok(account.clone());
        }
        let identity = self.client.caller_identity().map_err(api_error)?;
        Ok(self.account.get_or_init(|| identity.account).clone())
    }

    fn glue_outputs(&self, kind: &str, name: &str) -> Result<Attributes, ApiError> {
        let account = self.account()?;
        Ok(attributes([
            ("name", name.to_string()),
            ("arn", arn(kind, &self.region, &account, name)),
        ]))
    }

    fn upload(&self, inputs: &Inputs<'_>) -> Result<Attributes, ApiError> {
        let bucket = inputs.str("bucket")?;
        let key = inputs.str("key")?;
        let source = self.base_dir.join(inputs.str("source")?);
        let etag = self
            .client
            .put_object(&bucket, &key, &source)
            .map_err(api_error)?;
        Ok(attributes([("etag", etag), ("uri", format!("s3://{bucket}/{key}"))]))
    }

    fn role_outputs(role: &awskit::Role) -> Attributes {
        attributes([
            ("arn", role.arn.clone()),
            ("name", role.role_name.clone()),
            ("id", role.role_id.clone()),
        ])
    }
}

fn job_input(inputs: &Inputs<'_>) -> Result<JobInput, ApiError> {
    Ok(JobInput {
        name: inputs.str("job_name")?,
        role: inputs.str("role")?,
        script_location: inputs.str("script_location")?,
        python_version: inputs
            .opt_str("python_version")?
            .unwrap_or_else(|| DEFAULT_PYTHON_VERSION.to_string()),
        default_arguments: inputs.str_map("default_arguments")?,
        max_capacity: inputs.opt_f64("max_capacity")?.unwrap_or(DEFAULT_MAX_CAPACITY),
        glue_version: inputs.opt_str("glue_version")?,
        timeout: inputs.opt_i64("timeout")?,
        description: inputs.opt_str("description")?,
    })
}

fn crawler_input(inputs: &Inputs<'_>) -> Result<CrawlerInput, ApiError> {
    let defaults = SchemaChangePolicy::default();
    Ok(CrawlerInput {
        name: inputs.str("crawler_name")?,
        role: inputs.str("role")?,
        database_name: inputs.str("database_name")?,
        s3_targets: inputs.str_list("s3_targets")?,
        schedule: inputs.opt_str("schedule")?,
        table_prefix: inputs.opt_str("table_prefix")?,
        schema_change_policy: SchemaChangePolicy {
            update_behavior: inputs
                .opt_str("update_behavior")?
                .unwrap_or(defaults.update_behavior),
            delete_behavior: inputs
                .opt_str("delete_behavior")?
                .unwrap_or(defaults.delete_behavior),
        },
        description: inputs.opt_str("description")?,
    })
}

fn database_input(inputs: &Inputs<'_>) -> Result<Database, ApiError> {
    Ok(Database {
        name: inputs.str("database_name")?,
        description: inputs.opt_str("description")?,
        location_uri: inputs.opt_str("location_uri")?,
    })
}

fn unsupported(id: &ResourceId) -> ApiError {
    ApiError::Permanent(format!("{id}: kind '{}' is not supported by the aws backend", id.kind))
}

/// Treat "already gone" as success when deleting.
fn gone_ok(result: awskit::Result<()>) -> Result<(), ApiError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other.map_err(api_error),
    }
}

fn plain(pairs: Vec<(&str, Value)>) -> Attributes {
    pairs
        .into_iter()
        .filter(|(_, v)| *v != Value::Null)
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn opt(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::String)
}

impl ControlPlane for AwsCloud {
    fn create(&self, id: &ResourceId, inputs: &Attributes) -> Result<Created, ApiError> {
        let inputs = Inputs::new(id, inputs);
        match id.kind.as_str() {
            kinds::S3_BUCKET => {
                let bucket = inputs.str("bucket")?;
                self.client.create_bucket(&bucket).map_err(api_error)?;
                Ok(Created {
                    outputs: attributes([
                        ("arn", arn(kinds::S3_BUCKET, &self.region, "", &bucket)),
                        ("name", bucket.clone()),
                    ]),
                    physical_id: bucket,
                })
            }
            kinds::S3_OBJECT => {
                let outputs = self.upload(&inputs)?;
                Ok(Created {
                    physical_id: format!("{}/{}", inputs.str("bucket")?, inputs.str("key")?),
                    outputs,
                })
            }
            kinds::IAM_ROLE => {
                let role = self
                    .client
                    .create_role(
                        &inputs.str("role_name")?,
                        &inputs.opt_str("path")?.unwrap_or_else(|| "/".to_string()),
                        &inputs.policy("assume_role_policy")?,
                        inputs.opt_str("description")?.as_deref(),
                    )
                    .map_err(api_error)?;
                Ok(Created {
                    outputs: Self::role_outputs(&role),
                    physical_id: role.role_name,
                })
            }
            kinds::IAM_POLICY => {
                let policy = self
                    .client
                    .create_policy(
                        &inputs.str("policy_name")?,
                        &inputs.opt_str("path")?.unwrap_or_else(|| "/".to_string()),
                        &inputs.policy("document")?,
                        inputs.opt_str("description")?.as_deref(),
                    )
                    .map_err(api_error)?;
                Ok(Created {
                    outputs: attributes([
                        ("arn", policy.arn.clone()),
                        ("name", policy.policy_name),
                    ]),
                    physical_id: policy.arn,
                })
            }
            kinds::IAM_ROLE_POLICY_ATTACHMENT => {
                let role = inputs.str("role")?;
                let policy_arn = inputs.str("policy_arn")?;
                self.client
                    .attach_role_policy(&role, &policy_arn)
                    .map_err(api_error)?;
                let physical_id = attachment_id(&role, &policy_arn);
                Ok(Created {
                    outputs: attributes([("id", physical_id.clone())]),
                    physical_id,
                })
            }
            kinds::GLUE_DATABASE => {
                let database = database_input(&inputs)?;
                self.client.create_database(&database).map_err(api_error)?;
                Ok(Created {
                    outputs: self.glue_outputs(kinds::GLUE_DATABASE, &database.name)?,
                    physical_id: database.name,
                })
            }
            kinds::GLUE_JOB => {
                let job = job_input(&inputs)?;
                self.client.create_job(&job).map_err(api_error)?;
                Ok(Created {
                    outputs: self.glue_outputs(kinds::GLUE_JOB, &job.name)?,
                    physical_id: job.name,
                })
            }
            kinds::GLUE_CRAWLER => {
                let crawler = crawler_input(&inputs)?;
                self.client.create_crawler(&crawler).map_err(api_error)?;
                Ok(Created {
                    outputs: self.glue_outputs(kinds::GLUE_CRAWLER, &crawler.name)?,
                    physical_id: crawler.name,
                })
            }
            _ => Err(unsupported(id)),
        }
    }

    fn update(
        &self,
        id: &ResourceId,
        physical_id: &str,
        inputs: &Attributes,
        previous: &Attributes,
    ) -> Result<Attributes, ApiError> {
        let inputs = Inputs::new(id, inputs);
        match id.kind.as_str() {
            kinds::S3_BUCKET => Ok(attributes([
                ("arn", arn(kinds::S3_BUCKET, &self.region, "", physical_id)),
                ("name", physical_id.to_string()),
            ])),
            kinds::S3_OBJECT => self.upload(&inputs),
            kinds::IAM_ROLE => {
                if inputs.changed(previous, "description") {
                    let description = inputs.opt_str("description")?.unwrap_or_default();
                    self.client
                        .update_role(physical_id, &description)
                        .map_err(api_error)?;
                }
                if inputs.changed(previous, "assume_role_policy") {
                    self.client
                        .update_assume_role_policy(physical_id, &inputs.policy("assume_role_policy")?)
                        .map_err(api_error)?;
                }
                let role = self.client.get_role(physical_id).map_err(api_error)?;
                Ok(Self::role_outputs(&role))
            }
            kinds::IAM_POLICY => {
                if inputs.changed(previous, "document") {
                    self.client
                        .replace_policy_document(physical_id, &inputs.policy("document")?)
                        .map_err(api_error)?;
                }
                Ok(attributes([
                    ("arn", physical_id.to_string()),
                    ("name", inputs.str("policy_name")?),
                ]))
            }
            kinds::IAM_ROLE_POLICY_ATTACHMENT => Ok(attributes([("id", physical_id.to_string())])),
            kinds::GLUE_DATABASE => {
                self.client
                    .update_database(&database_input(&inputs)?)
                    .map_err(api_error)?;
                self.glue_outputs(kinds::GLUE_DATABASE, physical_id)
            }
            kinds::GLUE_JOB => {
                self.client
                    .update_job(&job_input(&inputs)?)
                    .map_err(api_error)?;
                self.glue_outputs(kinds::GLUE_JOB, physical_id)
            }
            kinds::GLUE_CRAWLER => {
                self.client
                    .update_crawler(&crawler_input(&inputs)?)
                    .map_err(api_error)?;
                self.glue_outputs(kinds::GLUE_CRAWLER, physical_id)
            }
            _ => Err(unsupported(id)),
        }
    }

    fn delete(&self, id: &ResourceId, physical_id: &str) -> Result<(), ApiError> {
        match id.kind.as_str() {
            kinds::S3_BUCKET => gone_ok(self.client.delete_bucket(physical_id)),
            kinds::S3_OBJECT => {
                let (bucket, key) = physical_id
                    .split_once('/')
                    .ok_or_else(|| ApiError::Permanent(format!("{id}: malformed id '{physical_id}'")))?;
                gone_ok(self.client.delete_object(bucket, key))
            }
            kinds::IAM_ROLE => gone_ok(self.client.delete_role(physical_id)),
            kinds::IAM_POLICY => gone_ok(self.client.delete_policy(physical_id)),
            kinds::IAM_ROLE_POLICY_ATTACHMENT => {
                let (role, policy_arn) = split_attachment_id(physical_id)
                    .ok_or_else(|| ApiError::Permanent(format!("{id}: malformed id '{physical_id}'")))?;
                gone_ok(self.client.detach_role_policy(role, policy_arn))
            }
            kinds::GLUE_DATABASE => gone_ok(self.client.delete_database(physical_id)),
            kinds::GLUE_JOB => gone_ok(self.client.delete_job(physical_id)),
            kinds::GLUE_CRAWLER => gone_ok(self.client.delete_crawler(physical_id)),
            _ => Err(unsupported(id)),
        }
    }

    fn describe(&self, id: &ResourceId, physical_id: &str) -> Result<Option<Attributes>, ApiError> {
        let observed = match id.kind.as_str() {
            kinds::S3_BUCKET => optional(self.client.head_bucket(physical_id))
                .map_err(api_error)?
                .map(|()| plain(vec![("bucket", Value::from(physical_id))])),
            kinds::S3_OBJECT => {
                let Some((bucket, key)) = physical_id.split_once('/') else {
                    return Ok(None);
                };
                optional(self.client.head_object(bucket, key))
                    .map_err(api_error)?
                    .map(|head| {
                        plain(vec![
                            ("bucket", Value::from(bucket)),
                            ("key", Value::from(key)),
                            ("etag", Value::String(head.etag)),
                        ])
                    })
            }
            kinds::IAM_ROLE => optional(self.client.get_role(physical_id))
                .map_err(api_error)?
                .map(|role| {
                    plain(vec![
                        ("role_name", Value::String(role.role_name)),
                        ("path", Value::String(role.path)),
                        ("description", opt(role.description)),
                        (
                            "assume_role_policy",
                            role.assume_role_policy_document
                                .map_or(Value::Null, Value::from_plain_json),
                        ),
                    ])
                }),
            kinds::IAM_POLICY => {
                let Some(policy) = optional(self.client.get_policy(physical_id)).map_err(api_error)?
                else {
                    return Ok(None);
                };
                let document = self
                    .client
                    .get_policy_document(physical_id, &policy.default_version_id)
                    .map_err(api_error)?;
                Some(plain(vec![
                    ("policy_name", Value::String(policy.policy_name)),
                    ("path", Value::String(policy.path)),
                    ("document", Value::from_plain_json(document)),
                ]))
            }
            kinds::IAM_ROLE_POLICY_ATTACHMENT => {
                let Some((role, policy_arn)) = split_attachment_id(physical_id) else {
                    return Ok(None);
                };
                let attached = optional(self.client.list_attached_role_policies(role))
                    .map_err(api_error)?
                    .unwrap_or_default();
                attached
                    .iter()
                    .any(|p| p.policy_arn == policy_arn)
                    .then(|| {
                        plain(vec![
                            ("role", Value::from(role)),
                            ("policy_arn", Value::from(policy_arn)),
                        ])
                    })
            }
            kinds::GLUE_DATABASE => optional(self.client.get_database(physical_id))
                .map_err(api_error)?
                .map(|db| {
                    plain(vec![
                        ("database_name", Value::String(db.name)),
                        ("description", opt(db.description)),
                        ("location_uri", opt(db.location_uri)),
                    ])
                }),
            kinds::GLUE_JOB => optional(self.client.get_job(physical_id))
                .map_err(api_error)?
                .map(|job| {
                    plain(vec![
                        ("job_name", Value::String(job.name)),
                        ("role", Value::String(job.role)),
                        ("script_location", Value::String(job.command.script_location)),
                        ("python_version", opt(job.command.python_version)),
                        ("max_capacity", job.max_capacity.map_or(Value::Null, Value::Float)),
                        (
                            "default_arguments",
                            Value::Map(
                                job.default_arguments
                                    .into_iter()
                                    .map(|(k, v)| (k, Value::String(v)))
                                    .collect(),
                            ),
                        ),
                        ("glue_version", opt(job.glue_version)),
                        ("timeout", job.timeout.map_or(Value::Null, Value::Int)),
                        ("description", opt(job.description)),
                    ])
                }),
            kinds::GLUE_CRAWLER => optional(self.client.get_crawler(physical_id))
                .map_err(api_error)?
                .map(|crawler| {
                    let targets = crawler.s3_paths().into_iter().map(Value::String).collect();
                    plain(vec![
                        ("crawler_name", Value::String(crawler.name)),
                        ("role", Value::String(crawler.role)),
                        ("database_name", opt(crawler.database_name)),
                        ("s3_targets", Value::List(targets)),
                        (
                            "schedule",
                            opt(crawler.schedule.map(|s| s.schedule_expression)),
                        ),
                        ("table_prefix", opt(crawler.table_prefix)),
                        ("description", opt(crawler.description)),
                    ])
                }),
            _ => return Err(unsupported(id)),
        };
        Ok(observed)
    }
}
