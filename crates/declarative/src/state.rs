//! Applied state
//!
//! The last known set of real-world objects, keyed by resource id. The
//! executor is the only writer: every successful operation is recorded and
//! persisted before the next dependent operation starts.

use crate::error::{Error, Result};
use crate::resource::{Attributes, Reference, ResourceId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Current on-disk format version.
pub const STATE_VERSION: u32 = 1;

/// A resource as it was last applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedResource {
    pub id: ResourceId,
    /// Identifier assigned by the control plane (name or ARN)
    pub physical_id: String,
    /// Fully resolved inputs last sent to the control plane
    #[serde(default)]
    pub inputs: Attributes,
    /// Attributes returned by the control plane
    #[serde(default)]
    pub outputs: Attributes,
    /// Resources this one referenced when it was applied
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    /// Hash of the observed attributes right after the last apply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Observed attributes right after the last apply
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub observed: Attributes,
    pub applied_at: DateTime<Utc>,
}

impl AppliedResource {
    pub fn new(id: ResourceId, physical_id: impl Into<String>) -> Self {
        Self {
            id,
            physical_id: physical_id.into(),
            inputs: Attributes::new(),
            outputs: Attributes::new(),
            dependencies: Vec::new(),
            fingerprint: None,
            observed: Attributes::new(),
            applied_at: Utc::now(),
        }
    }

    /// Outputs take precedence over inputs.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name).or_else(|| self.inputs.get(name))
    }

    /// Record an observation as the new drift baseline.
    pub fn set_observed(&mut self, observed: Attributes) {
        self.fingerprint = Some(fingerprint(&observed));
        self.observed = observed;
    }
}

/// The full applied state of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedState {
    pub version: u32,
    /// Incremented on every write
    pub serial: u64,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, AppliedResource>,
}

impl Default for AppliedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            updated_at: None,
            resources: BTreeMap::new(),
        }
    }
}

impl AppliedState {
    pub fn get(&self, id: &ResourceId) -> Option<&AppliedResource> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Look up the current value of a referenced attribute.
    pub fn lookup(&self, reference: &Reference) -> Option<Value> {
        self.resources
            .get(&reference.target)
            .and_then(|r| r.attribute(&reference.attribute))
            .cloned()
    }

    /// Applied resources that recorded `id` as a dependency.
    pub fn dependents_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.resources
            .values()
            .filter(|r| r.dependencies.contains(id))
            .map(|r| &r.id)
            .collect()
    }

    /// Apply a single change, bumping the serial.
    pub fn record(&mut self, id: &ResourceId, entry: Option<AppliedResource>) {
        match entry {
            Some(resource) => {
                self.resources.insert(id.clone(), resource);
            }
            None => {
                self.resources.remove(id);
            }
        }
        self.serial += 1;
        self.updated_at = Some(Utc::now());
    }
}

/// blake3 hash of the canonical JSON form of a set of attributes.
pub fn fingerprint(attributes: &Attributes) -> String {
    let json = serde_json::Value::Object(
        attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    );
    blake3::hash(json.to_string().as_bytes()).to_hex().to_string()
}

/// Persistence for applied state.
pub trait StateStore: Send + Sync {
    /// Load the state, returning an empty state if none was saved yet.
    fn load(&self) -> Result<AppliedState>;

    /// Persist the state.
    fn save(&self, state: &AppliedState) -> Result<()>;
}

/// In-memory store, mostly for tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<AppliedState>>,
    saves: Mutex<usize>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `save` was called.
    pub fn save_count(&self) -> usize {
        *lock(&self.saves)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<AppliedState> {
        Ok(lock(&self.state).clone().unwrap_or_default())
    }

    fn save(&self, state: &AppliedState) -> Result<()> {
        *lock(&self.state) = Some(state.clone());
        *lock(&self.saves) += 1;
        Ok(())
    }
}

/// Lock a mutex, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One lock per resource id, created on first use.
#[derive(Debug, Default)]
pub struct ResourceLocks {
    locks: Mutex<HashMap<ResourceId, Arc<Mutex<()>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ResourceId) -> Arc<Mutex<()>> {
        Arc::clone(lock(&self.locks).entry(id.clone()).or_default())
    }
}

/// Applied state shared between executor workers.
pub struct SharedState<'a> {
    state: Mutex<AppliedState>,
    store: &'a dyn StateStore,
    locks: ResourceLocks,
}

impl<'a> SharedState<'a> {
    pub fn new(state: AppliedState, store: &'a dyn StateStore) -> Self {
        Self {
            state: Mutex::new(state),
            store,
            locks: ResourceLocks::new(),
        }
    }

    /// Run `f` against the current state.
    pub fn read<R>(&self, f: impl FnOnce(&AppliedState) -> R) -> R {
        f(&lock(&self.state))
    }

    pub fn get(&self, id: &ResourceId) -> Option<AppliedResource> {
        self.read(|state| state.get(id).cloned())
    }

    pub fn serial(&self) -> u64 {
        self.read(|state| state.serial)
    }

    /// Lock held while an operation on `id` is in flight.
    pub fn resource_lock(&self, id: &ResourceId) -> Arc<Mutex<()>> {
        self.locks.get(id)
    }

    /// Record the outcome of one operation and persist it.
    ///
    /// `None` removes the resource.
    pub fn record(&self, id: &ResourceId, entry: Option<AppliedResource>) -> Result<()> {
        let mut state = lock(&self.state);
        state.record(id, entry);
        log::debug!("recording {} at serial {}", id, state.serial);
        self.store.save(&state).map_err(|e| match e {
            Error::State(_) => e,
            other => Error::State(format!("failed to persist {id}: {other}")),
        })
    }

    pub fn into_inner(self) -> AppliedState {
        match self.state.into_inner() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role_id() -> ResourceId {
        ResourceId::new("iam_role", "glue")
    }

    #[test]
    fn test_lookup_prefers_outputs() {
        let mut resource = AppliedResource::new(role_id(), "lottery-glue");
        resource.inputs.insert("role_name".into(), "lottery-glue".into());
        resource.inputs.insert("arn".into(), "declared".into());
        resource
            .outputs
            .insert("arn".into(), "arn:aws:iam::123:role/lottery-glue".into());

        let mut state = AppliedState::default();
        state.record(&role_id(), Some(resource));

        let arn = state.lookup(&Reference::new(role_id(), "arn"));
        assert_eq!(arn, Some(Value::from("arn:aws:iam::123:role/lottery-glue")));
        let name = state.lookup(&Reference::new(role_id(), "role_name"));
        assert_eq!(name, Some(Value::from("lottery-glue")));
        assert_eq!(state.lookup(&Reference::new(role_id(), "missing")), None);
        assert_eq!(state.serial, 1);
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let mut a = Attributes::new();
        a.insert("x".into(), Value::Int(1));
        a.insert("y".into(), "two".into());
        let mut b = Attributes::new();
        b.insert("y".into(), "two".into());
        b.insert("x".into(), Value::Int(1));
        assert_eq!(fingerprint(&a), fingerprint(&b));

        b.insert("x".into(), Value::Int(2));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_shared_state_persists_every_record() {
        let store = MemoryStateStore::new();
        let shared = SharedState::new(AppliedState::default(), &store);

        shared
            .record(&role_id(), Some(AppliedResource::new(role_id(), "lottery-glue")))
            .unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load().unwrap().serial, 1);

        shared.record(&role_id(), None).unwrap();
        assert_eq!(store.save_count(), 2);
        assert!(store.load().unwrap().resources.is_empty());
        assert_eq!(shared.into_inner().serial, 2);
    }

    #[test]
    fn test_resource_locks_are_per_id() {
        let locks = ResourceLocks::new();
        let a = locks.get(&role_id());
        let b = locks.get(&role_id());
        let c = locks.get(&ResourceId::new("iam_role", "other"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let _guard = lock(&a);
        assert!(c.try_lock().is_ok());
    }

    #[test]
    fn test_state_serde() {
        let mut state = AppliedState::default();
        let mut resource = AppliedResource::new(role_id(), "lottery-glue");
        resource.dependencies.push(ResourceId::new("iam_policy", "lake"));
        state.record(&role_id(), Some(resource));

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"iam_role.glue\""));
        let back: AppliedState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
