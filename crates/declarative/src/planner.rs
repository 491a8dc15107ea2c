//! Planner - computes what an apply would do
//!
//! `plan` is a pure function of the declarations, the applied state and an
//! optional observed snapshot. It never talks to the control plane, so
//! every structural or validation error surfaces before anything is touched.

use crate::diff::{AttributeChange, DiffSummary, DriftPolicy, Observed, ResourceDiff, diff_resource};
use crate::error::{Error, Result};
use crate::graph::ResourceGraph;
use crate::resolver::{creation_indices, order_applied};
use crate::resource::{Attributes, Reference, ResourceDecl, ResourceId, Value};
use crate::schema::SchemaRegistry;
use crate::state::{AppliedResource, AppliedState};
use crate::types::Action;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Options for planning
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    pub drift: DriftPolicy,
    /// Plan the deletion of every applied resource
    pub destroy: bool,
}

/// A single planned operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub id: ResourceId,
    pub action: Action,
    /// Declared attributes, references still unresolved (empty for deletes)
    #[serde(default)]
    pub inputs: Attributes,
    /// Resources referenced by `inputs` or `depends_on`
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    #[serde(default)]
    pub changes: Vec<AttributeChange>,
    #[serde(default)]
    pub drifted: bool,
    /// Indices into [`Plan::changes`] that must succeed before this one starts
    #[serde(default)]
    pub depends_on: Vec<usize>,
    /// Changes that must let go of the recorded object before it is deleted.
    /// Only deletes and replaces carry these.
    #[serde(default)]
    pub delete_after: Vec<usize>,
}

/// An ordered set of changes, consistent with the dependency graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub changes: Vec<PlannedChange>,
    /// Serial of the applied state the plan was computed against
    pub state_serial: u64,
}

impl Plan {
    /// Whether applying this plan would change nothing.
    pub fn is_noop(&self) -> bool {
        self.changes.iter().all(|c| !c.action.is_change())
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_actions(self.changes.iter().map(|c| &c.action))
    }

    pub fn get(&self, id: &ResourceId) -> Option<&PlannedChange> {
        self.changes.iter().find(|c| &c.id == id)
    }

    /// Actions in plan order, skipping no-ops.
    pub fn actions(&self) -> Vec<(ResourceId, Action)> {
        self.changes
            .iter()
            .filter(|c| c.action.is_change())
            .map(|c| (c.id.clone(), c.action))
            .collect()
    }

    /// Restrict the plan to `targets` plus everything they depend on.
    ///
    /// Changes that must release a target's recorded object before it is
    /// deleted are kept as well.
    pub fn filter_targets(&self, targets: &[ResourceId]) -> Result<Plan> {
        let index: HashMap<&ResourceId, usize> =
            self.changes.iter().enumerate().map(|(i, c)| (&c.id, i)).collect();

        let mut keep = BTreeSet::new();
        let mut stack = Vec::new();
        for target in targets {
            let &i = index
                .get(target)
                .ok_or_else(|| Error::UnknownTarget { id: target.clone() })?;
            stack.push(i);
        }
        while let Some(i) = stack.pop() {
            if keep.insert(i) {
                let change = &self.changes[i];
                stack.extend(change.depends_on.iter().chain(&change.delete_after).copied());
            }
        }

        let remap: HashMap<usize, usize> = keep.iter().enumerate().map(|(new, &old)| (old, new)).collect();
        let changes = keep
            .iter()
            .map(|&old| {
                let mut change = self.changes[old].clone();
                let remapped = |indices: &[usize]| -> Vec<usize> {
                    indices.iter().filter_map(|d| remap.get(d).copied()).collect()
                };
                change.depends_on = remapped(&change.depends_on);
                change.delete_after = remapped(&change.delete_after);
                change
            })
            .collect();

        Ok(Plan {
            changes,
            state_serial: self.state_serial,
        })
    }
}

/// Compute a plan.
///
/// Structural errors (cycles, dangling references, deleting a resource that
/// is still referenced) and schema violations abort planning.
pub fn plan(
    desired: &[ResourceDecl],
    applied: &AppliedState,
    observed: Option<&Observed>,
    registry: &SchemaRegistry,
    options: &PlanOptions,
) -> Result<Plan> {
    let mut changes: Vec<PlannedChange> = Vec::new();
    let mut declared: BTreeSet<ResourceId> = BTreeSet::new();

    if !options.destroy {
        let graph = ResourceGraph::build(desired.to_vec()).map_err(|e| match e {
            Error::UnresolvedReference { from, to } if applied.contains(&to) => Error::DeleteWhileReferenced {
                target: to,
                dependent: from,
            },
            other => other,
        })?;
        registry.validate(graph.decls())?;

        let order = creation_indices(&graph);
        let mut position = vec![0usize; graph.len()];
        let mut resolved: Vec<Attributes> = vec![Attributes::new(); graph.len()];
        let mut outputs_known = vec![false; graph.len()];

        for (pos, &i) in order.iter().enumerate() {
            let decl = graph.node(i);
            position[i] = pos;

            let lookup = |reference: &Reference| -> Option<Value> {
                let target = graph.position(&reference.target)?;
                if let Some(value) = resolved[target].get(&reference.attribute) {
                    return value.references().is_empty().then(|| value.clone());
                }
                if outputs_known[target] {
                    applied.lookup(reference)
                } else {
                    None
                }
            };
            let inputs: Attributes = decl
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.resolve(&lookup).unwrap_or_else(|| v.clone())))
                .collect();

            let schema = registry.get(&decl.id.kind).ok_or_else(|| Error::UnknownKind {
                id: decl.id.clone(),
                kind: decl.id.kind.clone(),
            })?;
            let diff: ResourceDiff = diff_resource(
                &decl.id,
                &inputs,
                applied.get(&decl.id),
                schema,
                observed.and_then(|o| o.get(&decl.id)),
                options.drift,
            )?;

            outputs_known[i] = !matches!(diff.action, Action::Create | Action::Replace);
            resolved[i] = inputs;
            declared.insert(decl.id.clone());

            changes.push(PlannedChange {
                id: decl.id.clone(),
                action: diff.action,
                inputs: decl.attributes.clone(),
                dependencies: decl.dependency_ids(),
                changes: diff.changes,
                drifted: diff.drifted,
                depends_on: Vec::new(),
                delete_after: Vec::new(),
            });
        }

        for (pos, &i) in order.iter().enumerate() {
            let mut deps: Vec<usize> = graph.dependencies(i).iter().map(|&d| position[d]).collect();
            deps.sort_unstable();
            changes[pos].depends_on = deps;
        }
    }

    // Most recently applied first, so untouched resources go in reverse creation order
    let mut removed: Vec<&AppliedResource> = applied
        .resources
        .values()
        .filter(|resource| !declared.contains(&resource.id))
        .collect();
    removed.sort_by(|a, b| b.applied_at.cmp(&a.applied_at).then_with(|| a.id.cmp(&b.id)));
    let removed: Vec<ResourceId> = removed.into_iter().map(|resource| resource.id.clone()).collect();
    for id in order_applied(applied, &removed)? {
        let Some(record) = applied.get(&id) else {
            continue;
        };
        let diff = ResourceDiff::delete(record);
        changes.push(PlannedChange {
            id,
            action: Action::Delete,
            inputs: Attributes::new(),
            dependencies: Vec::new(),
            changes: diff.changes,
            drifted: false,
            depends_on: Vec::new(),
            delete_after: Vec::new(),
        });
    }

    // An object is deleted only after everything that used to reference it
    // let go. A replaced object waits for dependents that are themselves
    // replaced or deleted; updated dependents are repointed to the new one.
    let index: HashMap<ResourceId, usize> = changes.iter().enumerate().map(|(i, c)| (c.id.clone(), i)).collect();
    for i in 0..changes.len() {
        let action = changes[i].action;
        if !matches!(action, Action::Delete | Action::Replace) {
            continue;
        }
        let mut deps: Vec<usize> = applied
            .dependents_of(&changes[i].id)
            .into_iter()
            .filter_map(|dependent| index.get(dependent).copied())
            .filter(|&d| d != i)
            .filter(|&d| action == Action::Delete || matches!(changes[d].action, Action::Delete | Action::Replace))
            .collect();
        deps.sort_unstable();
        deps.dedup();
        changes[i].delete_after = deps;
    }

    let plan = Plan {
        changes,
        state_serial: applied.serial,
    };
    log::debug!("planned {} changes", plan.summary().total());
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::KindSchema;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .with(
                KindSchema::new("iam_role")
                    .required(&["role_name"])
                    .immutable(&["role_name"])
                    .outputs(&["arn", "name"]),
            )
            .with(KindSchema::new("iam_policy").required(&["policy_name"]).outputs(&["arn"]))
            .with(
                KindSchema::new("iam_role_policy_attachment")
                    .required(&["role", "policy_arn"])
                    .immutable(&["role", "policy_arn"]),
            )
            .with(KindSchema::new("glue_job").outputs(&["arn"]))
    }

    fn r(text: &str) -> Value {
        Value::parse_string(text).unwrap()
    }

    fn role() -> ResourceDecl {
        ResourceDecl::new("iam_role", "r").with("role_name", "lottery-glue")
    }

    fn policy() -> ResourceDecl {
        ResourceDecl::new("iam_policy", "p")
            .with("policy_name", "lottery-lake")
            .with("description", r("used by ${iam_role.r.role_name}"))
    }

    fn attachment() -> ResourceDecl {
        ResourceDecl::new("iam_role_policy_attachment", "a")
            .with("role", r("${iam_role.r.name}"))
            .with("policy_arn", r("${iam_policy.p.arn}"))
    }

    fn id(text: &str) -> ResourceId {
        ResourceId::parse(text).unwrap()
    }

    /// Apply a plan in order, the way a trivial control plane would.
    fn apply(plan: &Plan, state: &mut AppliedState) {
        for change in &plan.changes {
            match change.action {
                Action::NoOp => {}
                Action::Delete => state.record(&change.id, None),
                _ => {
                    let inputs: Attributes = change
                        .inputs
                        .iter()
                        .map(|(k, v)| (k.clone(), v.resolve(&|r: &Reference| state.lookup(r)).unwrap()))
                        .collect();
                    let mut record = AppliedResource::new(change.id.clone(), change.id.name.clone());
                    record.outputs.insert("arn".into(), Value::from(format!("arn:{}", change.id)));
                    record.outputs.insert("name".into(), Value::from(change.id.name.clone()));
                    record.set_observed(inputs.clone());
                    record.inputs = inputs;
                    record.dependencies = change.dependencies.clone();
                    state.record(&change.id, Some(record));
                }
            }
        }
    }

    #[test]
    fn test_creates_in_dependency_order_regardless_of_input_order() {
        let plan = plan(
            &[attachment(), policy(), role()],
            &AppliedState::default(),
            None,
            &registry(),
            &PlanOptions::default(),
        )
        .unwrap();
        assert_eq!(
            plan.actions(),
            vec![
                (id("iam_role.r"), Action::Create),
                (id("iam_policy.p"), Action::Create),
                (id("iam_role_policy_attachment.a"), Action::Create),
            ]
        );
        assert_eq!(plan.changes[2].depends_on, vec![0, 1]);
    }

    #[test]
    fn test_reapply_is_noop() {
        let decls = [role(), policy(), attachment()];
        let mut state = AppliedState::default();
        let first = plan(&decls, &state, None, &registry(), &PlanOptions::default()).unwrap();
        apply(&first, &mut state);

        let second = plan(&decls, &state, None, &registry(), &PlanOptions::default()).unwrap();
        assert!(second.is_noop(), "{:?}", second.actions());
        assert_eq!(second.changes.len(), 3);
        assert_eq!(second.summary().no_ops, 3);
    }

    #[test]
    fn test_cycle_aborts_planning() {
        let decls = [
            ResourceDecl::new("iam_role", "r")
                .with("role_name", "x")
                .with("note", r("${iam_policy.p.arn}")),
            ResourceDecl::new("iam_policy", "p")
                .with("policy_name", "y")
                .with("note", r("${iam_role.r.arn}")),
        ];
        assert!(matches!(
            plan(&decls, &AppliedState::default(), None, &registry(), &PlanOptions::default()),
            Err(Error::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_delete_while_referenced_fails() {
        let mut state = AppliedState::default();
        let decls = [role(), policy(), attachment()];
        let first = plan(&decls, &state, None, &registry(), &PlanOptions::default()).unwrap();
        apply(&first, &mut state);

        let err = plan(&[policy(), attachment()], &state, None, &registry(), &PlanOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DeleteWhileReferenced { ref target, .. } if *target == id("iam_role.r")
        ));
    }

    #[test]
    fn test_removed_resources_deleted_dependents_first() {
        let mut state = AppliedState::default();
        let decls = [role(), policy(), attachment()];
        let first = plan(&decls, &state, None, &registry(), &PlanOptions::default()).unwrap();
        apply(&first, &mut state);

        let plan = plan(&[role()], &state, None, &registry(), &PlanOptions::default()).unwrap();
        assert_eq!(
            plan.actions(),
            vec![
                (id("iam_role_policy_attachment.a"), Action::Delete),
                (id("iam_policy.p"), Action::Delete),
            ]
        );
        // policy delete waits for the attachment delete
        assert_eq!(plan.changes[2].delete_after, vec![1]);
        assert!(plan.changes[2].depends_on.is_empty());
    }

    #[test]
    fn test_destroy_deletes_everything() {
        let mut state = AppliedState::default();
        let decls = [role(), policy(), attachment()];
        let first = plan(&decls, &state, None, &registry(), &PlanOptions::default()).unwrap();
        apply(&first, &mut state);

        let options = PlanOptions {
            destroy: true,
            ..Default::default()
        };
        let plan = plan(&decls, &state, None, &registry(), &options).unwrap();
        let ids: Vec<ResourceId> = plan.actions().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids.last(), Some(&id("iam_role.r")));
        assert_eq!(ids[0], id("iam_role_policy_attachment.a"));
        assert_eq!(plan.summary().deletes, 3);
    }

    #[test]
    fn test_replacement_makes_dependent_outputs_unknown() {
        let mut state = AppliedState::default();
        let decls = [role(), policy(), attachment()];
        let first = plan(&decls, &state, None, &registry(), &PlanOptions::default()).unwrap();
        apply(&first, &mut state);

        let renamed = ResourceDecl::new("iam_role", "r").with("role_name", "lottery-glue-v2");
        let plan = plan(&[renamed, policy(), attachment()], &state, None, &registry(), &PlanOptions::default())
            .unwrap();
        assert_eq!(plan.get(&id("iam_role.r")).unwrap().action, Action::Replace);
        // description interpolates the new role_name, known at plan time
        let policy_change = plan.get(&id("iam_policy.p")).unwrap();
        assert_eq!(policy_change.action, Action::Update);
        assert!(!policy_change.changes[0].unknown);
        // the attachment references the role's output, unknown until re-created
        let attachment_change = plan.get(&id("iam_role_policy_attachment.a")).unwrap();
        assert_eq!(attachment_change.action, Action::Replace);
        assert!(attachment_change.changes.iter().any(|c| c.unknown));
    }

    #[test]
    fn test_replaced_object_deleted_after_replaced_dependents() {
        let mut state = AppliedState::default();
        let job = ResourceDecl::new("glue_job", "j").with("role", r("${iam_role.r.arn}"));
        let decls = [role(), policy(), attachment(), job.clone()];
        let first = plan(&decls, &state, None, &registry(), &PlanOptions::default()).unwrap();
        apply(&first, &mut state);

        let renamed = ResourceDecl::new("iam_role", "r").with("role_name", "lottery-glue-v2");
        let plan = plan(&[renamed, policy(), attachment(), job], &state, None, &registry(), &PlanOptions::default())
            .unwrap();
        let position = |text: &str| plan.changes.iter().position(|c| c.id == id(text)).unwrap();
        let role_change = &plan.changes[position("iam_role.r")];
        assert_eq!(role_change.action, Action::Replace);
        // the attachment is replaced too and must detach first; the job is only repointed
        assert_eq!(plan.changes[position("glue_job.j")].action, Action::Update);
        assert_eq!(role_change.delete_after, vec![position("iam_role_policy_attachment.a")]);
        assert!(plan.changes[position("iam_role_policy_attachment.a")].delete_after.is_empty());
    }

    #[test]
    fn test_removed_resources_most_recent_first() {
        let mut state = AppliedState::default();
        let earlier = chrono::Utc::now() - chrono::Duration::minutes(5);
        for (name, applied_at) in [("a", earlier), ("z", chrono::Utc::now())] {
            let mut record = AppliedResource::new(id(&format!("iam_policy.{name}")), name);
            record.applied_at = applied_at;
            state.record(&record.id.clone(), Some(record));
        }

        let plan = plan(&[], &state, None, &registry(), &PlanOptions::default()).unwrap();
        assert_eq!(
            plan.actions(),
            vec![(id("iam_policy.z"), Action::Delete), (id("iam_policy.a"), Action::Delete)]
        );
    }

    #[test]
    fn test_unknown_kind_fails_validation() {
        let decls = [ResourceDecl::new("lambda_function", "f")];
        assert!(matches!(
            plan(&decls, &AppliedState::default(), None, &registry(), &PlanOptions::default()),
            Err(Error::UnknownKind { .. })
        ));
    }

    #[test]
    fn test_filter_targets_keeps_dependencies() {
        let decls = [
            role(),
            policy(),
            attachment(),
            ResourceDecl::new("glue_job", "j").with("role", r("${iam_role.r.arn}")),
        ];
        let plan = plan(&decls, &AppliedState::default(), None, &registry(), &PlanOptions::default()).unwrap();
        let filtered = plan.filter_targets(&[id("glue_job.j")]).unwrap();
        assert_eq!(filtered.changes.len(), 2);
        assert_eq!(filtered.changes[0].id, id("iam_role.r"));
        assert_eq!(filtered.changes[1].depends_on, vec![0]);

        assert!(matches!(
            plan.filter_targets(&[id("glue_job.missing")]),
            Err(Error::UnknownTarget { .. })
        ));
    }

    #[test]
    fn test_plan_json_round_trip() {
        let plan = plan(&[role(), policy()], &AppliedState::default(), None, &registry(), &PlanOptions::default())
            .unwrap();
        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }
}
