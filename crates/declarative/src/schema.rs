//! Kind schemas
//!
//! The engine itself knows nothing about concrete resource kinds. Callers
//! register a [`KindSchema`] per kind describing which attributes are
//! required, which force replacement when changed, and which outputs the
//! control plane produces on create.

use crate::error::{Error, Result};
use crate::resource::ResourceDecl;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct KindSchema {
    pub kind: String,
    /// Attributes that must be declared
    pub required: Vec<String>,
    /// Attributes that cannot be changed in place
    pub immutable: Vec<String>,
    /// Attributes produced by the control plane (e.g. `arn`)
    pub outputs: Vec<String>,
}

impl KindSchema {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn required(mut self, attributes: &[&str]) -> Self {
        self.required.extend(attributes.iter().map(ToString::to_string));
        self
    }

    pub fn immutable(mut self, attributes: &[&str]) -> Self {
        self.immutable.extend(attributes.iter().map(ToString::to_string));
        self
    }

    pub fn outputs(mut self, attributes: &[&str]) -> Self {
        self.outputs.extend(attributes.iter().map(ToString::to_string));
        self
    }

    pub fn is_immutable(&self, attribute: &str) -> bool {
        self.immutable.iter().any(|a| a == attribute)
    }

    pub fn is_output(&self, attribute: &str) -> bool {
        self.outputs.iter().any(|a| a == attribute)
    }
}

/// Registry of kind schemas, keyed by kind.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    kinds: HashMap<String, KindSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: KindSchema) -> &mut Self {
        self.kinds.insert(schema.kind.clone(), schema);
        self
    }

    pub fn with(mut self, schema: KindSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn get(&self, kind: &str) -> Option<&KindSchema> {
        self.kinds.get(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Validate declarations against their schemas.
    ///
    /// References must name either an output of the target's kind or an
    /// attribute the target declares. Targets that are not declared are
    /// the graph builder's concern and are skipped here.
    pub fn validate(&self, decls: &[ResourceDecl]) -> Result<()> {
        let by_id: HashMap<_, _> = decls.iter().map(|d| (&d.id, d)).collect();

        for decl in decls {
            let schema = self.get(&decl.id.kind).ok_or_else(|| Error::UnknownKind {
                id: decl.id.clone(),
                kind: decl.id.kind.clone(),
            })?;

            for attribute in &schema.required {
                if !decl.attributes.contains_key(attribute) {
                    return Err(Error::MissingAttribute {
                        id: decl.id.clone(),
                        attribute: attribute.clone(),
                    });
                }
            }

            for reference in decl.references() {
                let Some(target) = by_id.get(&reference.target) else {
                    continue;
                };
                let exposes = target.attributes.contains_key(&reference.attribute)
                    || self
                        .get(&target.id.kind)
                        .is_some_and(|s| s.is_output(&reference.attribute));
                if !exposes {
                    return Err(Error::UnknownAttribute {
                        from: decl.id.clone(),
                        target: target.id.clone(),
                        attribute: reference.attribute.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Value;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .with(
                KindSchema::new("iam_role")
                    .required(&["role_name"])
                    .immutable(&["role_name"])
                    .outputs(&["arn"]),
            )
            .with(KindSchema::new("glue_job").required(&["role"]))
    }

    fn reference(text: &str) -> Value {
        Value::parse_string(text).unwrap()
    }

    #[test]
    fn test_valid_declarations() {
        let decls = vec![
            ResourceDecl::new("iam_role", "glue").with("role_name", "lottery-glue"),
            ResourceDecl::new("glue_job", "transformer")
                .with("role", reference("${iam_role.glue.arn}"))
                .with("description", reference("job for ${iam_role.glue.role_name}")),
        ];
        registry().validate(&decls).unwrap();
    }

    #[test]
    fn test_unknown_kind() {
        let decls = vec![ResourceDecl::new("lambda_function", "x")];
        assert!(matches!(
            registry().validate(&decls),
            Err(Error::UnknownKind { .. })
        ));
    }

    #[test]
    fn test_missing_required_attribute() {
        let decls = vec![ResourceDecl::new("iam_role", "glue")];
        let err = registry().validate(&decls).unwrap_err();
        assert!(
            matches!(err, Error::MissingAttribute { ref attribute, .. } if attribute == "role_name")
        );
    }

    #[test]
    fn test_unknown_attribute_reference() {
        let decls = vec![
            ResourceDecl::new("iam_role", "glue").with("role_name", "lottery-glue"),
            ResourceDecl::new("glue_job", "transformer").with("role", reference("${iam_role.glue.id}")),
        ];
        assert!(matches!(
            registry().validate(&decls),
            Err(Error::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_immutable_lookup() {
        let registry = registry();
        let schema = registry.get("iam_role").unwrap();
        assert!(schema.is_immutable("role_name"));
        assert!(!schema.is_immutable("description"));
        assert_eq!(registry.kinds(), vec!["glue_job", "iam_role"]);
    }
}
