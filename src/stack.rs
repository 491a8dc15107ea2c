//! Stack file loading
//!
//! A stack is a TOML file with a `[settings]` table, any number of
//! `[[resource]]` declarations and optional `[[hook]]` commands that run
//! after an apply.

use anyhow::{Context, Result, bail};
use declarative::{DriftPolicy, ResourceDecl, ResourceId, RetryConfig, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// File format
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StackFile {
    #[serde(default)]
    settings: Settings,
    #[serde(default, rename = "resource")]
    resources: Vec<ResourceEntry>,
    #[serde(default, rename = "hook")]
    hooks: Vec<HookEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceEntry {
    kind: String,
    name: String,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HookEntry {
    name: String,
    #[serde(default)]
    after: Vec<String>,
    command: Vec<String>,
}

/// Stack-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Stack name, used for the default state file name
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    /// Named AWS CLI profile
    #[serde(default)]
    pub profile: Option<String>,

    /// Concurrent operations during apply and refresh
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    #[serde(default)]
    pub drift: DriftPolicy,

    #[serde(default)]
    pub retry: RetrySettings,

    /// State file, relative to the stack file
    #[serde(default)]
    pub state_file: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: None,
            region: default_region(),
            profile: None,
            jobs: default_jobs(),
            drift: DriftPolicy::default(),
            retry: RetrySettings::default(),
            state_file: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_jobs() -> usize {
    4
}

/// Retry tuning for transient API errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl RetrySettings {
    pub fn to_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

// ============================================================================
// Loaded stack
// ============================================================================

/// A command run after apply once the resources it waits for changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Hook {
    pub name: String,
    pub after: Vec<ResourceId>,
    /// Program and arguments; may reference applied outputs
    pub command: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct Stack {
    pub path: PathBuf,
    pub name: String,
    pub settings: Settings,
    pub resources: Vec<ResourceDecl>,
    pub hooks: Vec<Hook>,
}

impl Stack {
    /// Load and validate a stack file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read stack file: {}", path.display()))?;
        Self::parse(&content, path)
            .with_context(|| format!("Invalid stack file: {}", path.display()))
    }

    /// Parse stack content; `path` locates files the stack refers to.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let file: StackFile = toml::from_str(content).context("Failed to parse TOML")?;
        let factor = file.settings.retry.backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            bail!("retry backoff_factor must be a finite number of at least 1.0, got {factor}");
        }
        let base_dir = base_dir_of(path);

        let mut resources = Vec::with_capacity(file.resources.len());
        for entry in file.resources {
            resources.push(to_decl(entry, &base_dir)?);
        }

        let declared: HashSet<&ResourceId> = resources.iter().map(|d| &d.id).collect();
        let mut hooks = Vec::with_capacity(file.hooks.len());
        let mut hook_names = HashSet::new();
        for entry in file.hooks {
            if !hook_names.insert(entry.name.clone()) {
                bail!("hook '{}' is declared more than once", entry.name);
            }
            let hook = to_hook(entry)?;
            for id in hook.after.iter().chain(hook.command.iter().flat_map(|arg| {
                arg.references().into_iter().map(|r| &r.target)
            })) {
                if !declared.contains(id) {
                    bail!("hook '{}' refers to undeclared resource {id}", hook.name);
                }
            }
            hooks.push(hook);
        }

        let name = file
            .settings
            .name
            .clone()
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "lakeform".to_string());

        Ok(Self {
            path: path.to_path_buf(),
            name,
            settings: file.settings,
            resources,
            hooks,
        })
    }

    /// Directory relative paths in the stack are resolved against.
    pub fn base_dir(&self) -> PathBuf {
        base_dir_of(&self.path)
    }
}

fn base_dir_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn to_decl(entry: ResourceEntry, base_dir: &Path) -> Result<ResourceDecl> {
    let id = ResourceId::parse(&format!("{}.{}", entry.kind, entry.name))?;

    let mut decl = ResourceDecl::new(id.kind.clone(), id.name.clone());
    for (attribute, json) in entry.attributes {
        let value = Value::from_json(json)
            .with_context(|| format!("{id}: invalid value for '{attribute}'"))?;
        decl = decl.with(attribute, value);
    }
    for dependency in &entry.depends_on {
        decl = decl.after(
            ResourceId::parse(dependency)
                .with_context(|| format!("{id}: invalid depends_on entry '{dependency}'"))?,
        );
    }

    if id.kind == "s3_object" {
        add_source_hash(&mut decl, base_dir)?;
    }

    Ok(decl)
}

/// Objects are uploaded from local files; hashing the file makes a content
/// change show up as an attribute change.
fn add_source_hash(decl: &mut ResourceDecl, base_dir: &Path) -> Result<()> {
    let Some(source) = decl.attributes.get("source").and_then(Value::as_str) else {
        return Ok(());
    };
    let path = base_dir.join(source);
    let content = fs::read(&path)
        .with_context(|| format!("{}: failed to read source {}", decl.id, path.display()))?;
    let hash = blake3::hash(&content).to_hex().to_string();
    decl.attributes.insert("source_hash".into(), Value::String(hash));
    Ok(())
}

fn to_hook(entry: HookEntry) -> Result<Hook> {
    if entry.command.is_empty() {
        bail!("hook '{}' has an empty command", entry.name);
    }
    let after = entry
        .after
        .iter()
        .map(|id| ResourceId::parse(id))
        .collect::<declarative::Result<Vec<_>>>()
        .with_context(|| format!("hook '{}': invalid after entry", entry.name))?;
    let command = entry
        .command
        .iter()
        .map(|arg| Value::parse_string(arg))
        .collect::<declarative::Result<Vec<_>>>()
        .with_context(|| format!("hook '{}': invalid command", entry.name))?;

    Ok(Hook {
        name: entry.name,
        after,
        command,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::Reference;
    use tempfile::TempDir;

    const STACK: &str = r#"
[settings]
name = "lottery"
jobs = 2
drift = "overwrite"

[settings.retry]
max_attempts = 3
base_delay_ms = 10

[[resource]]
kind = "iam_role"
name = "glue_role"
[resource.attributes]
role_name = "lottery-glue-role"
assume_role_policy = { Version = "2012-10-17", Statement = [{ Effect = "Allow", Action = "sts:AssumeRole", Principal = { Service = "glue.amazonaws.com" } }] }

[[resource]]
kind = "glue_job"
name = "transformer"
depends_on = ["iam_role.glue_role"]
[resource.attributes]
job_name = "lottery-transformer"
role = "${iam_role.glue_role.arn}"
script_location = "s3://lottery-scripts/transform.py"
max_capacity = 0.0625

[[hook]]
name = "announce"
after = ["glue_job.transformer"]
command = ["echo", "${glue_job.transformer.name}"]
"#;

    #[test]
    fn test_parse_stack() {
        let stack = Stack::parse(STACK, Path::new("/lake/lakeform.toml")).unwrap();
        assert_eq!(stack.name, "lottery");
        assert_eq!(stack.settings.jobs, 2);
        assert_eq!(stack.settings.region, "us-east-1");
        assert_eq!(stack.settings.drift, DriftPolicy::Overwrite);

        let retry = stack.settings.retry.to_config();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.base_delay, Duration::from_millis(10));
        assert_eq!(retry.max_delay, Duration::from_secs(30));

        assert_eq!(stack.resources.len(), 2);
        let job = &stack.resources[1];
        assert_eq!(job.id, ResourceId::new("glue_job", "transformer"));
        assert_eq!(
            job.attributes["role"],
            Value::Ref(Reference::new(ResourceId::new("iam_role", "glue_role"), "arn"))
        );
        assert_eq!(job.depends_on, vec![ResourceId::new("iam_role", "glue_role")]);
        assert_eq!(job.attributes["max_capacity"], Value::Float(0.0625));

        assert_eq!(stack.hooks.len(), 1);
        assert_eq!(stack.hooks[0].command[1].references().len(), 1);
        assert_eq!(stack.base_dir(), PathBuf::from("/lake"));
    }

    #[test]
    fn test_defaults_without_settings() {
        let stack = Stack::parse("", Path::new("lakeform.toml")).unwrap();
        assert_eq!(stack.name, "lakeform");
        assert_eq!(stack.settings, Settings::default());
        assert!(stack.resources.is_empty());
        assert_eq!(stack.base_dir(), PathBuf::from("."));
    }

    #[test]
    fn test_unknown_settings_key_rejected() {
        let err = Stack::parse("[settings]\nregoin = \"x\"\n", Path::new("s.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("regoin"));
    }

    #[test]
    fn test_backoff_factor_below_one_rejected() {
        for factor in ["-2.0", "0.5", "nan", "inf"] {
            let content = format!("[settings.retry]\nbackoff_factor = {factor}\n");
            let err = Stack::parse(&content, Path::new("s.toml")).unwrap_err();
            assert!(format!("{err:#}").contains("backoff_factor"), "{factor}");
        }
        let content = "[settings.retry]\nbackoff_factor = 1.0\n";
        assert!(Stack::parse(content, Path::new("s.toml")).is_ok());
    }

    #[test]
    fn test_invalid_kind_rejected() {
        let err = Stack::parse(
            "[[resource]]\nkind = \"GlueJob\"\nname = \"x\"\n",
            Path::new("s.toml"),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("snake_case"));
    }

    #[test]
    fn test_hook_after_must_be_declared() {
        let content = r#"
[[hook]]
name = "start-crawlers"
after = ["glue_crawler.bronze"]
command = ["aws", "glue", "start-crawler"]
"#;
        let err = Stack::parse(content, Path::new("s.toml")).unwrap_err();
        assert!(err.to_string().contains("undeclared resource glue_crawler.bronze"));
    }

    #[test]
    fn test_empty_hook_command_rejected() {
        let content = "[[hook]]\nname = \"noop\"\ncommand = []\n";
        assert!(Stack::parse(content, Path::new("s.toml")).is_err());
    }

    #[test]
    fn test_s3_object_gets_source_hash() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("transform.py"), "print('sorteos')\n").unwrap();
        let content = r#"
[[resource]]
kind = "s3_object"
name = "script"
[resource.attributes]
bucket = "lottery-scripts"
key = "transform.py"
source = "transform.py"
"#;
        let path = dir.path().join("lakeform.toml");
        fs::write(&path, content).unwrap();

        let first = Stack::load(&path).unwrap();
        let hash = first.resources[0].attributes["source_hash"].clone();
        assert_eq!(
            hash,
            Value::String(blake3::hash(b"print('sorteos')\n").to_hex().to_string())
        );

        fs::write(dir.path().join("transform.py"), "print('premios')\n").unwrap();
        let second = Stack::load(&path).unwrap();
        assert_ne!(second.resources[0].attributes["source_hash"], hash);
    }

    #[test]
    fn test_missing_source_file_fails() {
        let content = r#"
[[resource]]
kind = "s3_object"
name = "script"
[resource.attributes]
bucket = "b"
key = "k"
source = "does-not-exist.py"
"#;
        let err = Stack::parse(content, Path::new("/nowhere/lakeform.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("failed to read source"));
    }

    #[test]
    fn test_demo_stack_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/lakeform.toml");
        let stack = Stack::load(&path).unwrap();
        crate::kinds::validate(&stack.resources).unwrap();
        crate::kinds::registry().validate(&stack.resources).unwrap();
        declarative::ResourceGraph::build(stack.resources.clone()).unwrap();
        assert_eq!(stack.hooks.len(), 2);
    }
}
