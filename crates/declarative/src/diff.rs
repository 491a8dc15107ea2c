//! Diff computation for resources
//!
//! Compares desired attributes against the applied record of a resource and
//! optionally against what the control plane currently reports (drift).

use crate::error::{Error, Result};
use crate::resource::{Attributes, ResourceId, Value};
use crate::schema::KindSchema;
use crate::state::{AppliedResource, fingerprint};
use crate::types::Action;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What to do when live state diverged from the recorded state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftPolicy {
    /// Refuse to plan and surface the drift to the operator
    #[default]
    Fail,
    /// Plan changes that bring the object back to the declared state
    Overwrite,
}

/// What `describe` reported for an applied resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Missing,
    Present(Attributes),
}

/// Observed snapshot from a refresh, keyed by resource id.
pub type Observed = BTreeMap<ResourceId, Observation>;

/// A change to a single attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub attribute: String,
    /// Compact JSON of the recorded value
    pub before: Option<String>,
    /// Compact JSON of the desired value
    pub after: Option<String>,
    /// The desired value depends on something only known after apply
    #[serde(default)]
    pub unknown: bool,
    /// Changing this attribute requires delete and re-create
    #[serde(default)]
    pub forces_replacement: bool,
}

/// A diff between desired and applied state of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDiff {
    pub id: ResourceId,
    pub action: Action,
    pub changes: Vec<AttributeChange>,
    /// Live state diverged and the plan overwrites it
    #[serde(default)]
    pub drifted: bool,
}

impl ResourceDiff {
    /// Diff for a resource that is recorded but no longer declared.
    pub fn delete(applied: &AppliedResource) -> Self {
        Self {
            id: applied.id.clone(),
            action: Action::Delete,
            changes: applied
                .inputs
                .iter()
                .map(|(k, v)| AttributeChange {
                    attribute: k.clone(),
                    before: Some(render(v)),
                    after: None,
                    unknown: false,
                    forces_replacement: false,
                })
                .collect(),
            drifted: false,
        }
    }
}

fn render(value: &Value) -> String {
    value.to_json().to_string()
}

/// Attribute names whose observed value differs from the recorded one.
pub fn drifted_attributes(recorded: &Attributes, observed: &Attributes) -> Vec<String> {
    let keys: BTreeSet<&String> = recorded.keys().chain(observed.keys()).collect();
    keys.into_iter()
        .filter(|k| recorded.get(*k) != observed.get(*k))
        .cloned()
        .collect()
}

fn creation_changes(desired: &Attributes) -> Vec<AttributeChange> {
    desired
        .iter()
        .map(|(k, v)| AttributeChange {
            attribute: k.clone(),
            before: None,
            after: Some(render(v)),
            unknown: !v.references().is_empty(),
            forces_replacement: false,
        })
        .collect()
}

/// Compute the diff of one declared resource.
///
/// `desired` holds the declared attributes with every reference that is
/// already known substituted; remaining references are values only known
/// after apply and always compare as changed.
pub fn diff_resource(
    id: &ResourceId,
    desired: &Attributes,
    applied: Option<&AppliedResource>,
    schema: &KindSchema,
    observation: Option<&Observation>,
    drift: DriftPolicy,
) -> Result<ResourceDiff> {
    let Some(applied) = applied else {
        return Ok(ResourceDiff {
            id: id.clone(),
            action: Action::Create,
            changes: creation_changes(desired),
            drifted: false,
        });
    };

    let mut drifted = Vec::new();
    match observation {
        Some(Observation::Missing) => {
            if drift == DriftPolicy::Fail {
                return Err(Error::DriftConflict {
                    id: id.clone(),
                    details: format!("{} no longer exists", applied.physical_id),
                });
            }
            log::warn!("{id} was deleted out of band, planning re-create");
            return Ok(ResourceDiff {
                id: id.clone(),
                action: Action::Create,
                changes: creation_changes(desired),
                drifted: true,
            });
        }
        Some(Observation::Present(live)) => {
            if applied
                .fingerprint
                .as_ref()
                .is_some_and(|recorded| *recorded != fingerprint(live))
            {
                drifted = drifted_attributes(&applied.observed, live);
                if drift == DriftPolicy::Fail {
                    return Err(Error::DriftConflict {
                        id: id.clone(),
                        details: format!("modified out of band: {}", drifted.join(", ")),
                    });
                }
                log::warn!("{id} drifted ({}), overwriting", drifted.join(", "));
            }
        }
        None => {}
    }

    let keys: BTreeSet<&String> = desired.keys().chain(applied.inputs.keys()).collect();
    let mut changes = Vec::new();
    for key in keys {
        let after = desired.get(key);
        let before = applied.inputs.get(key);
        let unknown = after.is_some_and(|v| !v.references().is_empty());
        if !unknown && after == before {
            continue;
        }
        changes.push(AttributeChange {
            attribute: key.clone(),
            before: before.map(render),
            after: after.map(render),
            unknown,
            forces_replacement: schema.is_immutable(key),
        });
    }

    let action = if changes.iter().any(|c| c.forces_replacement) {
        Action::Replace
    } else if !changes.is_empty() {
        Action::Update
    } else if !drifted.is_empty() {
        // Re-send the declared inputs over the drifted object
        changes = drifted
            .iter()
            .filter_map(|attribute| {
                let recorded = applied.inputs.get(attribute)?;
                Some(AttributeChange {
                    attribute: attribute.clone(),
                    before: match observation {
                        Some(Observation::Present(live)) => live.get(attribute).map(render),
                        _ => None,
                    },
                    after: Some(render(recorded)),
                    unknown: false,
                    forces_replacement: false,
                })
            })
            .collect();
        Action::Update
    } else {
        Action::NoOp
    };

    Ok(ResourceDiff {
        id: id.clone(),
        action,
        changes,
        drifted: !drifted.is_empty(),
    })
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub creates: usize,
    pub updates: usize,
    pub replaces: usize,
    pub deletes: usize,
    pub no_ops: usize,
}

impl DiffSummary {
    pub fn from_actions<'a>(actions: impl IntoIterator<Item = &'a Action>) -> Self {
        let mut summary = Self::default();
        for action in actions {
            match action {
                Action::Create => summary.creates += 1,
                Action::Update => summary.updates += 1,
                Action::Replace => summary.replaces += 1,
                Action::Delete => summary.deletes += 1,
                Action::NoOp => summary.no_ops += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> KindSchema {
        KindSchema::new("glue_job")
            .required(&["job_name"])
            .immutable(&["job_name"])
            .outputs(&["arn"])
    }

    fn id() -> ResourceId {
        ResourceId::new("glue_job", "transformer")
    }

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    fn applied(inputs: Attributes) -> AppliedResource {
        let mut resource = AppliedResource::new(id(), "lottery-transformer");
        resource.inputs = inputs.clone();
        resource.set_observed(inputs);
        resource
    }

    fn declared() -> Attributes {
        attrs(&[
            ("job_name", "lottery-transformer".into()),
            ("max_capacity", Value::Float(0.0625)),
        ])
    }

    #[test]
    fn test_create_when_not_applied() {
        let diff = diff_resource(&id(), &declared(), None, &schema(), None, DriftPolicy::Fail).unwrap();
        assert_eq!(diff.action, Action::Create);
        assert_eq!(diff.changes.len(), 2);
        assert!(diff.changes.iter().all(|c| c.before.is_none()));
    }

    #[test]
    fn test_noop_when_equal() {
        let applied = applied(declared());
        let diff = diff_resource(&id(), &declared(), Some(&applied), &schema(), None, DriftPolicy::Fail).unwrap();
        assert_eq!(diff.action, Action::NoOp);
        assert!(diff.changes.is_empty());
    }

    #[test]
    fn test_update_in_place() {
        let applied = applied(declared());
        let mut desired = declared();
        desired.insert("max_capacity".into(), Value::Int(1));
        let diff = diff_resource(&id(), &desired, Some(&applied), &schema(), None, DriftPolicy::Fail).unwrap();
        assert_eq!(diff.action, Action::Update);
        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].before.as_deref(), Some("0.0625"));
        assert_eq!(diff.changes[0].after.as_deref(), Some("1"));
    }

    #[test]
    fn test_immutable_change_forces_replace() {
        let applied = applied(declared());
        let mut desired = declared();
        desired.insert("job_name".into(), "lottery-transformer-v2".into());
        let diff = diff_resource(&id(), &desired, Some(&applied), &schema(), None, DriftPolicy::Fail).unwrap();
        assert_eq!(diff.action, Action::Replace);
        assert!(diff.changes[0].forces_replacement);
    }

    #[test]
    fn test_unknown_value_compares_as_changed() {
        let applied = applied(declared());
        let mut desired = declared();
        desired.insert(
            "role".into(),
            Value::parse_string("${iam_role.glue.arn}").unwrap(),
        );
        let diff = diff_resource(&id(), &desired, Some(&applied), &schema(), None, DriftPolicy::Fail).unwrap();
        assert_eq!(diff.action, Action::Update);
        assert!(diff.changes[0].unknown);
    }

    #[test]
    fn test_drift_fails_by_default() {
        let applied = applied(declared());
        let mut live = declared();
        live.insert("max_capacity".into(), Value::Int(2));
        let observation = Observation::Present(live);
        let err = diff_resource(&id(), &declared(), Some(&applied), &schema(), Some(&observation), DriftPolicy::Fail)
            .unwrap_err();
        assert!(matches!(err, Error::DriftConflict { ref details, .. } if details.contains("max_capacity")));
    }

    #[test]
    fn test_drift_overwrite_plans_update() {
        let applied = applied(declared());
        let mut live = declared();
        live.insert("max_capacity".into(), Value::Int(2));
        let observation = Observation::Present(live);
        let diff = diff_resource(
            &id(),
            &declared(),
            Some(&applied),
            &schema(),
            Some(&observation),
            DriftPolicy::Overwrite,
        )
        .unwrap();
        assert_eq!(diff.action, Action::Update);
        assert!(diff.drifted);
        assert_eq!(diff.changes[0].before.as_deref(), Some("2"));
    }

    #[test]
    fn test_missing_object() {
        let applied = applied(declared());
        let missing = Observation::Missing;
        assert!(matches!(
            diff_resource(&id(), &declared(), Some(&applied), &schema(), Some(&missing), DriftPolicy::Fail),
            Err(Error::DriftConflict { .. })
        ));
        let diff = diff_resource(
            &id(),
            &declared(),
            Some(&applied),
            &schema(),
            Some(&missing),
            DriftPolicy::Overwrite,
        )
        .unwrap();
        assert_eq!(diff.action, Action::Create);
    }

    #[test]
    fn test_matching_observation_is_not_drift() {
        let applied = applied(declared());
        let observation = Observation::Present(declared());
        let diff = diff_resource(&id(), &declared(), Some(&applied), &schema(), Some(&observation), DriftPolicy::Fail)
            .unwrap();
        assert_eq!(diff.action, Action::NoOp);
    }

    #[test]
    fn test_summary() {
        let summary = DiffSummary::from_actions(&[Action::Create, Action::Delete, Action::NoOp]);
        assert_eq!(summary.total(), 2);
        assert_eq!(summary.no_ops, 1);
        assert!(summary.has_changes());
    }
}
