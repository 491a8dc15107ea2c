//! Resource kinds of the data-lake stack
//!
//! Each kind lists the attributes it accepts, which of them are required,
//! which force replacement and which outputs exist once it is created.

use anyhow::{Result, bail};
use declarative::{KindSchema, PolicyDocument, ResourceDecl, SchemaRegistry, Value};

pub const S3_BUCKET: &str = "s3_bucket";
pub const S3_OBJECT: &str = "s3_object";
pub const IAM_ROLE: &str = "iam_role";
pub const IAM_POLICY: &str = "iam_policy";
pub const IAM_ROLE_POLICY_ATTACHMENT: &str = "iam_role_policy_attachment";
pub const GLUE_DATABASE: &str = "glue_database";
pub const GLUE_JOB: &str = "glue_job";
pub const GLUE_CRAWLER: &str = "glue_crawler";

/// Python version of Glue Python-shell jobs when not declared
pub const DEFAULT_PYTHON_VERSION: &str = "3.9";

/// Smallest Python-shell capacity (1/16 DPU)
pub const DEFAULT_MAX_CAPACITY: f64 = 0.0625;

struct KindDef {
    kind: &'static str,
    required: &'static [&'static str],
    optional: &'static [&'static str],
    immutable: &'static [&'static str],
    outputs: &'static [&'static str],
}

const KINDS: &[KindDef] = &[
    KindDef {
        kind: S3_BUCKET,
        required: &["bucket"],
        optional: &[],
        immutable: &["bucket"],
        outputs: &["arn", "name"],
    },
    KindDef {
        kind: S3_OBJECT,
        required: &["bucket", "key", "source"],
        optional: &["source_hash"],
        immutable: &["bucket", "key"],
        outputs: &["etag", "uri"],
    },
    KindDef {
        kind: IAM_ROLE,
        required: &["role_name", "assume_role_policy"],
        optional: &["path", "description"],
        immutable: &["role_name", "path"],
        outputs: &["arn", "name", "id"],
    },
    KindDef {
        kind: IAM_POLICY,
        required: &["policy_name", "document"],
        optional: &["path", "description"],
        // IAM cannot change a policy's description after creation
        immutable: &["policy_name", "path", "description"],
        outputs: &["arn", "name"],
    },
    KindDef {
        kind: IAM_ROLE_POLICY_ATTACHMENT,
        required: &["role", "policy_arn"],
        optional: &[],
        immutable: &["role", "policy_arn"],
        outputs: &["id"],
    },
    KindDef {
        kind: GLUE_DATABASE,
        required: &["database_name"],
        optional: &["description", "location_uri"],
        immutable: &["database_name"],
        outputs: &["name", "arn"],
    },
    KindDef {
        kind: GLUE_JOB,
        required: &["job_name", "role", "script_location"],
        optional: &[
            "python_version",
            "max_capacity",
            "default_arguments",
            "glue_version",
            "timeout",
            "description",
        ],
        immutable: &["job_name"],
        outputs: &["name", "arn"],
    },
    KindDef {
        kind: GLUE_CRAWLER,
        required: &["crawler_name", "role", "database_name", "s3_targets"],
        optional: &[
            "schedule",
            "table_prefix",
            "update_behavior",
            "delete_behavior",
            "description",
        ],
        immutable: &["crawler_name"],
        outputs: &["name", "arn"],
    },
];

/// Schemas for every supported kind.
pub fn registry() -> SchemaRegistry {
    KINDS.iter().fold(SchemaRegistry::new(), |registry, def| {
        registry.with(
            KindSchema::new(def.kind)
                .required(def.required)
                .immutable(def.immutable)
                .outputs(def.outputs),
        )
    })
}

/// Checks the engine cannot make: attribute names and shapes.
///
/// Values containing references are checked structurally; the referenced
/// parts are only known at apply time.
pub fn validate(decls: &[ResourceDecl]) -> Result<()> {
    for decl in decls {
        let Some(def) = KINDS.iter().find(|k| k.kind == decl.id.kind) else {
            // Unknown kinds are reported by the schema registry
            continue;
        };

        for attribute in decl.attributes.keys() {
            if !def.required.contains(&attribute.as_str()) && !def.optional.contains(&attribute.as_str()) {
                bail!(
                    "{} has unknown attribute '{attribute}' (expected one of: {})",
                    decl.id,
                    def.required.iter().chain(def.optional).copied().collect::<Vec<_>>().join(", ")
                );
            }
        }

        let policy_attribute = match def.kind {
            IAM_ROLE => Some("assume_role_policy"),
            IAM_POLICY => Some("document"),
            _ => None,
        };
        if let Some(attribute) = policy_attribute
            && let Some(value) = decl.attributes.get(attribute)
        {
            PolicyDocument::from_json(value.to_json())
                .map_err(|e| anyhow::anyhow!("{}.{attribute}: {e}", decl.id))?;
        }

        match def.kind {
            GLUE_CRAWLER => expect_shape(decl, "s3_targets", Shape::List)?,
            GLUE_JOB => {
                expect_shape(decl, "default_arguments", Shape::Map)?;
                expect_shape(decl, "max_capacity", Shape::Number)?;
                expect_shape(decl, "timeout", Shape::Number)?;
            }
            _ => {}
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    List,
    Map,
    Number,
}

fn expect_shape(decl: &ResourceDecl, attribute: &str, shape: Shape) -> Result<()> {
    let Some(value) = decl.attributes.get(attribute) else {
        return Ok(());
    };
    let ok = match (shape, value) {
        (_, Value::Ref(_)) => true,
        (Shape::List, Value::List(_)) => true,
        (Shape::Map, Value::Map(_)) => true,
        (Shape::Number, Value::Int(_) | Value::Float(_)) => true,
        _ => false,
    };
    if !ok {
        bail!(
            "{}.{attribute} must be a {}",
            decl.id,
            match shape {
                Shape::List => "list",
                Shape::Map => "table",
                Shape::Number => "number",
            }
        );
    }
    Ok(())
}
