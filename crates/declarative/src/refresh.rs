//! Refresh - read live attributes of every applied resource

use crate::context::ControlPlane;
use crate::diff::{Observation, Observed, drifted_attributes};
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::resource::ResourceId;
use crate::state::{AppliedState, fingerprint};
use crate::types::RetryConfig;
use rayon::prelude::*;

/// Describe every applied resource, at most `jobs` at a time.
///
/// Transient describe errors are retried; anything else aborts the refresh.
pub fn refresh(
    state: &AppliedState,
    control_plane: &dyn ControlPlane,
    jobs: usize,
    retry: &RetryConfig,
) -> Result<Observed> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .map_err(|e| Error::Other(format!("Failed to create thread pool: {e}")))?;

    let resources: Vec<_> = state.resources.values().collect();
    let observed: Vec<(ResourceId, Observation)> = pool.install(|| {
        resources
            .par_iter()
            .map(|resource| {
                let attempted = with_retry(retry, None, || {
                    control_plane.describe(&resource.id, &resource.physical_id)
                });
                let observation = match attempted.result {
                    Ok(Some(attributes)) => Observation::Present(attributes),
                    Ok(None) => Observation::Missing,
                    Err(source) => {
                        return Err(Error::Api {
                            id: resource.id.clone(),
                            source,
                        });
                    }
                };
                Ok((resource.id.clone(), observation))
            })
            .collect::<Result<Vec<_>>>()
    })?;

    Ok(observed.into_iter().collect())
}

/// Drift found by a refresh, for reporting without planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    Missing(ResourceId),
    Modified {
        id: ResourceId,
        attributes: Vec<String>,
    },
}

/// Compare an observed snapshot against the recorded baselines.
pub fn detect_drift(state: &AppliedState, observed: &Observed) -> Vec<Drift> {
    state
        .resources
        .values()
        .filter_map(|resource| match observed.get(&resource.id)? {
            Observation::Missing => Some(Drift::Missing(resource.id.clone())),
            Observation::Present(live) => {
                let recorded = resource.fingerprint.as_ref()?;
                (*recorded != fingerprint(live)).then(|| Drift::Modified {
                    id: resource.id.clone(),
                    attributes: drifted_attributes(&resource.observed, live),
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Created;
    use crate::error::ApiError;
    use crate::resource::{Attributes, Value};
    use crate::state::AppliedResource;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ReadOnlyCloud {
        objects: HashMap<String, Attributes>,
        flaky: AtomicU32,
        broken: Mutex<Option<String>>,
    }

    impl ControlPlane for ReadOnlyCloud {
        fn create(&self, _: &ResourceId, _: &Attributes) -> std::result::Result<Created, ApiError> {
            Err(ApiError::Permanent("read only".into()))
        }

        fn update(
            &self,
            _: &ResourceId,
            _: &str,
            _: &Attributes,
            _: &Attributes,
        ) -> std::result::Result<Attributes, ApiError> {
            Err(ApiError::Permanent("read only".into()))
        }

        fn delete(&self, _: &ResourceId, _: &str) -> std::result::Result<(), ApiError> {
            Err(ApiError::Permanent("read only".into()))
        }

        fn describe(&self, _: &ResourceId, physical_id: &str) -> std::result::Result<Option<Attributes>, ApiError> {
            if self.broken.lock().unwrap().as_deref() == Some(physical_id) {
                return Err(ApiError::Permanent("AccessDenied".into()));
            }
            if self.flaky.load(Ordering::SeqCst) > 0 {
                self.flaky.fetch_sub(1, Ordering::SeqCst);
                return Err(ApiError::Transient("Throttling".into()));
            }
            Ok(self.objects.get(physical_id).cloned())
        }
    }

    fn attrs(capacity: i64) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert("max_capacity".into(), Value::Int(capacity));
        attributes
    }

    fn state() -> AppliedState {
        let mut state = AppliedState::default();
        for name in ["transformer", "loader", "gone"] {
            let id = ResourceId::new("glue_job", name);
            let mut resource = AppliedResource::new(id.clone(), name);
            resource.set_observed(attrs(1));
            state.record(&id, Some(resource));
        }
        state
    }

    fn cloud() -> ReadOnlyCloud {
        let mut objects = HashMap::new();
        objects.insert("transformer".to_string(), attrs(1));
        objects.insert("loader".to_string(), attrs(4));
        ReadOnlyCloud {
            objects,
            flaky: AtomicU32::new(2),
            broken: Mutex::new(None),
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig::new(5, std::time::Duration::from_millis(1), 1.0)
    }

    #[test]
    fn test_refresh_and_detect_drift() {
        let state = state();
        let observed = refresh(&state, &cloud(), 2, &fast()).unwrap();
        assert_eq!(observed.len(), 3);
        assert_eq!(
            observed[&ResourceId::new("glue_job", "gone")],
            Observation::Missing
        );

        let mut drift = detect_drift(&state, &observed);
        drift.sort_by_key(|d| format!("{d:?}"));
        assert_eq!(
            drift,
            vec![
                Drift::Missing(ResourceId::new("glue_job", "gone")),
                Drift::Modified {
                    id: ResourceId::new("glue_job", "loader"),
                    attributes: vec!["max_capacity".into()],
                },
            ]
        );
    }

    #[test]
    fn test_refresh_fails_on_permanent_error() {
        let cloud = cloud();
        *cloud.broken.lock().unwrap() = Some("loader".into());
        let err = refresh(&state(), &cloud, 1, &fast()).unwrap_err();
        assert!(matches!(err, Error::Api { ref id, .. } if id.name == "loader"));
    }
}
