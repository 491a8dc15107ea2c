//! Local control plane
//!
//! Simulates the account in a JSON file so a stack can be planned, applied
//! and destroyed without credentials. It enforces the ordering rules AWS
//! does (a bucket must exist before its objects, a role cannot be deleted
//! while policies are attached) so dependency mistakes surface offline.

use super::{Inputs, arn, attachment_id, attributes, split_attachment_id};
use crate::kinds;
use anyhow::{Context, Result};
use declarative::{ApiError, Attributes, ControlPlane, Created, ResourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Account id reported by the local control plane
pub const LOCAL_ACCOUNT: &str = "000000000000";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Account {
    /// Objects keyed by `kind:physical-id`
    #[serde(default)]
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredObject {
    kind: String,
    attributes: Attributes,
    outputs: Attributes,
}

fn key(kind: &str, physical_id: &str) -> String {
    format!("{kind}:{physical_id}")
}

fn conflict(message: impl Into<String>) -> ApiError {
    ApiError::Permanent(message.into())
}

pub struct LocalCloud {
    /// Where the account is persisted; `None` keeps it in memory
    path: Option<PathBuf>,
    region: String,
    base_dir: PathBuf,
    account: Mutex<Account>,
    #[cfg(test)]
    throttle: std::sync::atomic::AtomicU32,
}

impl LocalCloud {
    /// Open (or start) the account stored at `path`.
    pub fn open(path: &Path, region: String) -> Result<Self> {
        let account = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Account::default()
        };
        Ok(Self::build(Some(path.to_path_buf()), region, account))
    }

    /// An account that lives only as long as this value.
    pub fn in_memory(region: impl Into<String>) -> Self {
        Self::build(None, region.into(), Account::default())
    }

    fn build(path: Option<PathBuf>, region: String, account: Account) -> Self {
        Self {
            path,
            region,
            base_dir: PathBuf::from("."),
            account: Mutex::new(account),
            #[cfg(test)]
            throttle: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Resolve `s3_object` sources relative to `dir`.
    pub fn with_base_dir(mut self, dir: PathBuf) -> Self {
        self.base_dir = dir;
        self
    }

    fn account(&self) -> MutexGuard<'_, Account> {
        match self.account.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, account: &Account) -> Result<(), ApiError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let write = || -> std::io::Result<()> {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            let content = serde_json::to_string_pretty(account).map_err(std::io::Error::other)?;
            let temp = path.with_extension("json.tmp");
            fs::write(&temp, content)?;
            fs::rename(&temp, path)
        };
        write().map_err(|e| ApiError::Transient(format!("Failed to write {}: {e}", path.display())))
    }

    /// Fail the next `count` calls with a throttling error.
    #[cfg(test)]
    pub fn throttle_next(&self, count: u32) {
        self.throttle.store(count, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_throttle(&self) -> Result<(), ApiError> {
        #[cfg(test)]
        {
            use std::sync::atomic::Ordering;
            if self
                .throttle
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ApiError::Transient("Throttling: Rate exceeded".into()));
            }
        }
        Ok(())
    }

    /// Change a stored attribute behind lakeform's back.
    #[cfg(test)]
    pub fn tamper(&self, id: &ResourceId, physical_id: &str, attribute: &str, value: declarative::Value) {
        let mut account = self.account();
        if let Some(object) = account.objects.get_mut(&key(&id.kind, physical_id)) {
            object.attributes.insert(attribute.to_string(), value);
        }
    }

    fn etag(&self, id: &ResourceId, source: &str) -> Result<String, ApiError> {
        let path = self.base_dir.join(source);
        let content = fs::read(&path)
            .map_err(|e| conflict(format!("{id}: cannot read {}: {e}", path.display())))?;
        Ok(format!("\"{}\"", &blake3::hash(&content).to_hex()[..32]))
    }

    /// Physical id and outputs of a new object. Checks that whatever the
    /// object lives in already exists.
    fn provision(
        &self,
        account: &Account,
        id: &ResourceId,
        inputs: &Inputs<'_>,
    ) -> Result<(String, Attributes), ApiError> {
        let exists = |kind: &str, physical_id: &str| account.objects.contains_key(&key(kind, physical_id));
        let glue = |name: String, kind: &str| {
            let outputs = attributes([
                ("name", name.clone()),
                ("arn", arn(kind, &self.region, LOCAL_ACCOUNT, &name)),
            ]);
            (name, outputs)
        };

        match id.kind.as_str() {
            kinds::S3_BUCKET => {
                let bucket = inputs.str("bucket")?;
                let outputs = attributes([
                    ("arn", arn(kinds::S3_BUCKET, &self.region, "", &bucket)),
                    ("name", bucket.clone()),
                ]);
                Ok((bucket, outputs))
            }
            kinds::S3_OBJECT => {
                let bucket = inputs.str("bucket")?;
                if !exists(kinds::S3_BUCKET, &bucket) {
                    return Err(conflict(format!("NoSuchBucket: {bucket}")));
                }
                let object_key = inputs.str("key")?;
                let outputs = attributes([
                    ("etag", self.etag(id, &inputs.str("source")?)?),
                    ("uri", format!("s3://{bucket}/{object_key}")),
                ]);
                Ok((format!("{bucket}/{object_key}"), outputs))
            }
            kinds::IAM_ROLE => {
                let name = inputs.str("role_name")?;
                let role_id = blake3::hash(name.as_bytes()).to_hex()[..17].to_uppercase();
                let outputs = attributes([
                    ("arn", arn(kinds::IAM_ROLE, &self.region, LOCAL_ACCOUNT, &name)),
                    ("name", name.clone()),
                    ("id", format!("AROA{role_id}")),
                ]);
                Ok((name, outputs))
            }
            kinds::IAM_POLICY => {
                let name = inputs.str("policy_name")?;
                let path = inputs.opt_str("path")?.unwrap_or_else(|| "/".to_string());
                inputs.policy("document")?;
                let policy_arn = format!("arn:aws:iam::{LOCAL_ACCOUNT}:policy{path}{name}");
                let outputs = attributes([("arn", policy_arn.clone()), ("name", name)]);
                Ok((policy_arn, outputs))
            }
            kinds::IAM_ROLE_POLICY_ATTACHMENT => {
                let role = inputs.str("role")?;
                let policy_arn = inputs.str("policy_arn")?;
                if !exists(kinds::IAM_ROLE, &role) {
                    return Err(conflict(format!("NoSuchEntity: role {role} not found")));
                }
                if !exists(kinds::IAM_POLICY, &policy_arn) {
                    return Err(conflict(format!("NoSuchEntity: policy {policy_arn} not found")));
                }
                let physical_id = attachment_id(&role, &policy_arn);
                Ok((physical_id.clone(), attributes([("id", physical_id)])))
            }
            kinds::GLUE_DATABASE => Ok(glue(inputs.str("database_name")?, kinds::GLUE_DATABASE)),
            kinds::GLUE_JOB => Ok(glue(inputs.str("job_name")?, kinds::GLUE_JOB)),
            kinds::GLUE_CRAWLER => {
                let database = inputs.str("database_name")?;
                if !exists(kinds::GLUE_DATABASE, &database) {
                    return Err(conflict(format!("EntityNotFoundException: database {database} not found")));
                }
                Ok(glue(inputs.str("crawler_name")?, kinds::GLUE_CRAWLER))
            }
            _ => Err(conflict(format!("{id}: kind '{}' is not supported", id.kind))),
        }
    }

    /// Refuse to delete objects that others still hang off.
    fn check_deletable(account: &Account, kind: &str, physical_id: &str) -> Result<(), ApiError> {
        let attachments = || {
            account
                .objects
                .iter()
                .filter(|(_, o)| o.kind == kinds::IAM_ROLE_POLICY_ATTACHMENT)
                .filter_map(|(k, _)| split_attachment_id(k.split_once(':').map_or("", |(_, id)| id)))
        };
        match kind {
            kinds::S3_BUCKET => {
                let prefix = key(kinds::S3_OBJECT, &format!("{physical_id}/"));
                if account.objects.keys().any(|k| k.starts_with(&prefix)) {
                    return Err(conflict(format!("BucketNotEmpty: {physical_id}")));
                }
            }
            kinds::IAM_ROLE => {
                if attachments().any(|(role, _)| role == physical_id) {
                    return Err(conflict(format!(
                        "DeleteConflict: role {physical_id} has attached policies"
                    )));
                }
            }
            kinds::IAM_POLICY => {
                if attachments().any(|(_, policy)| policy == physical_id) {
                    return Err(conflict(format!(
                        "DeleteConflict: policy {physical_id} is attached to a role"
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl ControlPlane for LocalCloud {
    fn create(&self, id: &ResourceId, inputs: &Attributes) -> Result<Created, ApiError> {
        self.check_throttle()?;
        let mut account = self.account();
        let (physical_id, outputs) = self.provision(&account, id, &Inputs::new(id, inputs))?;

        let object_key = key(&id.kind, &physical_id);
        if account.objects.contains_key(&object_key) {
            return Err(conflict(format!("EntityAlreadyExists: {} {physical_id}", id.kind)));
        }
        account.objects.insert(
            object_key,
            StoredObject {
                kind: id.kind.clone(),
                attributes: inputs.clone(),
                outputs: outputs.clone(),
            },
        );
        self.persist(&account)?;
        log::debug!("local: created {id} as {physical_id}");

        Ok(Created {
            physical_id,
            outputs,
        })
    }

    fn update(
        &self,
        id: &ResourceId,
        physical_id: &str,
        inputs: &Attributes,
        _previous: &Attributes,
    ) -> Result<Attributes, ApiError> {
        self.check_throttle()?;
        let mut account = self.account();
        let object_key = key(&id.kind, physical_id);
        if !account.objects.contains_key(&object_key) {
            return Err(conflict(format!("NoSuchEntity: {} {physical_id}", id.kind)));
        }
        let (_, outputs) = self.provision(&account, id, &Inputs::new(id, inputs))?;
        if let Some(object) = account.objects.get_mut(&object_key) {
            object.attributes = inputs.clone();
            object.outputs = outputs.clone();
        }
        self.persist(&account)?;
        log::debug!("local: updated {id}");
        Ok(outputs)
    }

    fn delete(&self, id: &ResourceId, physical_id: &str) -> Result<(), ApiError> {
        self.check_throttle()?;
        let mut account = self.account();
        Self::check_deletable(&account, &id.kind, physical_id)?;
        if account.objects.remove(&key(&id.kind, physical_id)).is_some() {
            self.persist(&account)?;
            log::debug!("local: deleted {id}");
        }
        Ok(())
    }

    fn describe(&self, id: &ResourceId, physical_id: &str) -> Result<Option<Attributes>, ApiError> {
        self.check_throttle()?;
        let account = self.account();
        Ok(account
            .objects
            .get(&key(&id.kind, physical_id))
            .map(|object| object.attributes.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::Stack;
    use declarative::{
        Action, CancelToken, DriftPolicy, Error, ExecuteOptions, MemoryStateStore, NoProgress,
        PlanOptions, RetryConfig, StateStore, Value, execute, plan, refresh,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    const LAKE: &str = r#"
[settings]
name = "lottery"

[[resource]]
kind = "s3_bucket"
name = "raw"
[resource.attributes]
bucket = "lottery-raw"

[[resource]]
kind = "s3_object"
name = "transform_script"
[resource.attributes]
bucket = "${s3_bucket.raw.name}"
key = "scripts/transform.py"
source = "transform.py"

[[resource]]
kind = "iam_role"
name = "glue_role"
[resource.attributes]
role_name = "lottery-glue-role"
assume_role_policy = { Version = "2012-10-17", Statement = [{ Effect = "Allow", Action = "sts:AssumeRole", Principal = { Service = "glue.amazonaws.com" } }] }

[[resource]]
kind = "iam_policy"
name = "lake_access"
[resource.attributes]
policy_name = "lottery-lake-access"
document = { Version = "2012-10-17", Statement = [{ Effect = "Allow", Action = ["s3:GetObject", "s3:PutObject"], Resource = "${s3_bucket.raw.arn}/*" }] }

[[resource]]
kind = "iam_role_policy_attachment"
name = "glue_lake_access"
[resource.attributes]
role = "${iam_role.glue_role.name}"
policy_arn = "${iam_policy.lake_access.arn}"

[[resource]]
kind = "glue_job"
name = "transformer"
depends_on = ["iam_role_policy_attachment.glue_lake_access"]
[resource.attributes]
job_name = "lottery-transformer"
role = "${iam_role.glue_role.arn}"
script_location = "${s3_object.transform_script.uri}"
"#;

    fn fast_options(jobs: usize) -> ExecuteOptions {
        ExecuteOptions {
            dry_run: false,
            jobs,
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                backoff_factor: 1.0,
                max_delay: Duration::from_millis(5),
            },
        }
    }

    fn lake(dir: &TempDir) -> Stack {
        fs::write(dir.path().join("transform.py"), "print('transform')\n").unwrap();
        let path = dir.path().join("lakeform.toml");
        Stack::parse(LAKE, &path).unwrap()
    }

    fn apply(stack: &Stack, store: &MemoryStateStore, cloud: &LocalCloud, options: &PlanOptions) -> declarative::ApplyReport {
        let current = store.load().unwrap();
        let planned = plan(&stack.resources, &current, None, &kinds::registry(), options).unwrap();
        execute(&planned, store, cloud, &fast_options(4), &NoProgress, &CancelToken::new()).unwrap()
    }

    #[test]
    fn test_apply_then_noop_then_destroy() {
        let dir = TempDir::new().unwrap();
        let stack = lake(&dir);
        let store = MemoryStateStore::new();
        let cloud = LocalCloud::in_memory("us-east-1").with_base_dir(dir.path().to_path_buf());

        let report = apply(&stack, &store, &cloud, &PlanOptions::default());
        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.summary().created, 6);

        let state = store.load().unwrap();
        let job = state.get(&ResourceId::new("glue_job", "transformer")).unwrap();
        assert_eq!(
            job.inputs["script_location"],
            Value::from("s3://lottery-raw/scripts/transform.py")
        );
        assert_eq!(job.inputs["role"], Value::from("arn:aws:iam::000000000000:role/lottery-glue-role"));

        let again = plan(&stack.resources, &state, None, &kinds::registry(), &PlanOptions::default()).unwrap();
        assert!(again.is_noop());

        let destroy = PlanOptions {
            destroy: true,
            ..PlanOptions::default()
        };
        let report = apply(&stack, &store, &cloud, &destroy);
        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.summary().deleted, 6);
        assert!(store.load().unwrap().is_empty());
        assert!(cloud.account().objects.is_empty());
    }

    #[test]
    fn test_renamed_role_is_replaced_with_attachments_released() {
        let dir = TempDir::new().unwrap();
        let stack = lake(&dir);
        let store = MemoryStateStore::new();
        let cloud = LocalCloud::in_memory("us-east-1").with_base_dir(dir.path().to_path_buf());
        assert!(apply(&stack, &store, &cloud, &PlanOptions::default()).is_success());

        let renamed = LAKE.replace("\"lottery-glue-role\"", "\"lottery-glue-role-v2\"");
        let stack = Stack::parse(&renamed, &dir.path().join("lakeform.toml")).unwrap();
        let report = apply(&stack, &store, &cloud, &PlanOptions::default());
        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.summary().replaced, 2);

        let state = store.load().unwrap();
        let role = state.get(&ResourceId::new("iam_role", "glue_role")).unwrap();
        assert_eq!(role.inputs["role_name"], Value::from("lottery-glue-role-v2"));
        let job = state.get(&ResourceId::new("glue_job", "transformer")).unwrap();
        assert_eq!(job.inputs["role"], Value::from("arn:aws:iam::000000000000:role/lottery-glue-role-v2"));
        assert!(!cloud.account().objects.contains_key(&key("iam_role", "lottery-glue-role")));
    }

    #[test]
    fn test_throttling_is_retried() {
        let dir = TempDir::new().unwrap();
        let stack = lake(&dir);
        let store = MemoryStateStore::new();
        let cloud = LocalCloud::in_memory("us-east-1").with_base_dir(dir.path().to_path_buf());
        cloud.throttle_next(2);

        let report = apply(&stack, &store, &cloud, &PlanOptions::default());
        assert!(report.is_success(), "{report:?}");
    }

    #[test]
    fn test_missing_source_fails_only_its_branch() {
        let dir = TempDir::new().unwrap();
        let stack = Stack::parse(LAKE, &dir.path().join("lakeform.toml"));
        // The stack hashes sources while loading
        assert!(stack.is_err());

        let stack = lake(&dir);
        fs::remove_file(dir.path().join("transform.py")).unwrap();
        let store = MemoryStateStore::new();
        let cloud = LocalCloud::in_memory("us-east-1").with_base_dir(dir.path().to_path_buf());

        let report = apply(&stack, &store, &cloud, &PlanOptions::default());
        assert!(!report.is_success());
        let failed: Vec<_> = report.failed().map(|o| o.id.to_string()).collect();
        assert_eq!(failed, vec!["s3_object.transform_script"]);
        let job = report.get(&ResourceId::new("glue_job", "transformer")).unwrap();
        assert!(matches!(job.status, declarative::ApplyStatus::Skipped { .. }));
        let attachment = report
            .get(&ResourceId::new("iam_role_policy_attachment", "glue_lake_access"))
            .unwrap();
        assert!(attachment.status.is_success());
    }

    #[test]
    fn test_drift_detected_after_tampering() {
        let dir = TempDir::new().unwrap();
        let stack = lake(&dir);
        let store = MemoryStateStore::new();
        let cloud = LocalCloud::in_memory("us-east-1").with_base_dir(dir.path().to_path_buf());
        assert!(apply(&stack, &store, &cloud, &PlanOptions::default()).is_success());

        let job_id = ResourceId::new("glue_job", "transformer");
        cloud.tamper(
            &job_id,
            "lottery-transformer",
            "script_location",
            Value::from("s3://elsewhere/transform.py"),
        );

        let state = store.load().unwrap();
        let observed = refresh(&state, &cloud, 2, &RetryConfig::no_retry()).unwrap();
        let err = plan(&stack.resources, &state, Some(&observed), &kinds::registry(), &PlanOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::DriftConflict { ref id, .. } if *id == job_id));

        let overwrite = PlanOptions {
            drift: DriftPolicy::Overwrite,
            ..PlanOptions::default()
        };
        let planned = plan(&stack.resources, &state, Some(&observed), &kinds::registry(), &overwrite).unwrap();
        let change = planned.get(&job_id).unwrap();
        assert_eq!(change.action, Action::Update);
        assert!(change.drifted);
        assert_eq!(change.changes[0].attribute, "script_location");
    }

    #[test]
    fn test_dependency_rules_enforced() {
        let cloud = LocalCloud::in_memory("us-east-1");
        let attachment = ResourceId::new(kinds::IAM_ROLE_POLICY_ATTACHMENT, "a");
        let inputs: Attributes = [
            ("role".to_string(), Value::from("lottery-glue-role")),
            ("policy_arn".to_string(), Value::from("arn:aws:iam::000000000000:policy/p")),
        ]
        .into_iter()
        .collect();
        assert!(matches!(cloud.create(&attachment, &inputs), Err(ApiError::Permanent(_))));

        let bucket = ResourceId::new(kinds::S3_BUCKET, "raw");
        let bucket_inputs: Attributes = [("bucket".to_string(), Value::from("lottery-raw"))].into_iter().collect();
        cloud.create(&bucket, &bucket_inputs).unwrap();
        let err = cloud.create(&bucket, &bucket_inputs).unwrap_err();
        assert!(err.message().contains("EntityAlreadyExists"));

        // Deleting what is already gone succeeds
        cloud.delete(&bucket, "lottery-raw").unwrap();
        cloud.delete(&bucket, "lottery-raw").unwrap();
    }

    #[test]
    fn test_account_persisted_between_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lottery.cloud.json");
        let bucket = ResourceId::new(kinds::S3_BUCKET, "raw");
        let inputs: Attributes = [("bucket".to_string(), Value::from("lottery-raw"))].into_iter().collect();

        LocalCloud::open(&path, "us-east-1".into())
            .unwrap()
            .create(&bucket, &inputs)
            .unwrap();

        let reopened = LocalCloud::open(&path, "us-east-1".into()).unwrap();
        assert_eq!(reopened.describe(&bucket, "lottery-raw").unwrap(), Some(inputs));
    }
}
