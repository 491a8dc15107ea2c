//! Execution engine - applies a plan with bounded parallelism
//!
//! Every planned change becomes a task on a rayon pool once all of the
//! changes it depends on succeeded. A replace runs as two tasks: the old
//! object is deleted once its replaced dependents let go of it, and the new
//! one is created after its dependencies. A failed change marks its transitive
//! dependents as skipped; unrelated branches keep going. Applied state is
//! persisted after every successful operation.

use crate::context::{CancelToken, ControlPlane, ProgressCallback};
use crate::error::{ApiError, Error, Result};
use crate::planner::{Plan, PlannedChange};
use crate::resource::{Attributes, Reference, ResourceId};
use crate::retry::{Attempted, with_retry};
use crate::state::{AppliedResource, SharedState, StateStore, lock};
use crate::types::{Action, ApplyReport, ApplyStatus, ExecuteOptions, ResourceOutcome, SkipReason};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Failure of a single operation: the error and how many attempts were made.
type Failure = (ApiError, u32);

/// Execute a plan against a control plane.
///
/// The plan must have been computed against the state currently in `store`;
/// otherwise [`Error::StalePlan`] is returned before anything runs.
pub fn execute(
    plan: &Plan,
    store: &dyn StateStore,
    control_plane: &dyn ControlPlane,
    options: &ExecuteOptions,
    progress: &dyn ProgressCallback,
    cancel: &CancelToken,
) -> Result<ApplyReport> {
    let state = store.load()?;
    if state.serial != plan.state_serial {
        return Err(Error::StalePlan {
            planned: plan.state_serial,
            current: state.serial,
        });
    }

    if options.dry_run {
        return Ok(dry_run_report(plan, progress));
    }

    let graph = StepGraph::new(plan);
    let scheduler = Mutex::new(Scheduler::new(&graph));
    let worker = Worker {
        plan,
        graph,
        shared: SharedState::new(state, store),
        control_plane,
        options,
        progress,
        cancel,
        halted: AtomicBool::new(false),
        scheduler,
    };

    let ready = lock(&worker.scheduler).initially_ready();
    if !ready.is_empty() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs.max(1))
            .thread_name(|i| format!("apply-{i}"))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create thread pool: {e}")))?;

        log::debug!("applying {} changes with {} workers", plan.changes.len(), options.jobs.max(1));
        pool.scope(|scope| {
            for step in ready {
                spawn(scope, &worker, step);
            }
        });
    }

    Ok(worker.into_report())
}

fn dry_run_report(plan: &Plan, progress: &dyn ProgressCallback) -> ApplyReport {
    let outcomes = plan
        .changes
        .iter()
        .map(|change| {
            let status = if change.action.is_change() {
                ApplyStatus::Skipped {
                    reason: SkipReason::DryRun,
                }
            } else {
                ApplyStatus::Succeeded
            };
            progress.on_complete(&change.id, change.action, &status);
            ResourceOutcome {
                id: change.id.clone(),
                action: change.action,
                status,
            }
        })
        .collect();
    ApplyReport { outcomes }
}

fn spawn<'scope, 'a: 'scope>(scope: &rayon::Scope<'scope>, worker: &'scope Worker<'a>, step: usize) {
    scope.spawn(move |scope| {
        let status = if worker.cancel.is_cancelled() || worker.halted.load(Ordering::SeqCst) {
            ApplyStatus::Skipped {
                reason: SkipReason::Cancelled,
            }
        } else {
            worker.run(worker.graph.steps[step])
        };
        for next in worker.complete(step, status) {
            spawn(scope, worker, next);
        }
    });
}

/// What a step does with its change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Whole,
    /// Delete the object a replace supersedes
    Retire,
    /// Create the replacing object
    Recreate,
}

#[derive(Debug, Clone, Copy)]
struct Step {
    change: usize,
    phase: Phase,
}

/// Plan changes expanded into schedulable steps.
///
/// A replace becomes two steps so its old object can be deleted after the
/// dependents holding on to it, while the new one is still created after its
/// dependencies.
struct StepGraph {
    steps: Vec<Step>,
    /// Step after which a change no longer holds its recorded object
    release: Vec<usize>,
    /// Step that finishes a change
    done: Vec<usize>,
    prereqs: Vec<Vec<usize>>,
}

impl StepGraph {
    fn new(plan: &Plan) -> Self {
        let count = plan.changes.len();
        let mut steps = Vec::with_capacity(count);
        let mut release = Vec::with_capacity(count);
        let mut done = Vec::with_capacity(count);
        for (change, planned) in plan.changes.iter().enumerate() {
            release.push(steps.len());
            if planned.action == Action::Replace {
                steps.push(Step {
                    change,
                    phase: Phase::Retire,
                });
                steps.push(Step {
                    change,
                    phase: Phase::Recreate,
                });
            } else {
                steps.push(Step {
                    change,
                    phase: Phase::Whole,
                });
            }
            done.push(steps.len() - 1);
        }

        let mut prereqs = vec![Vec::new(); steps.len()];
        let in_plan = |i: usize, d: usize| d < count && d != i;
        for (i, planned) in plan.changes.iter().enumerate() {
            for &d in planned.delete_after.iter().filter(|&&d| in_plan(i, d)) {
                prereqs[release[i]].push(release[d]);
            }
            for &d in planned.depends_on.iter().filter(|&&d| in_plan(i, d)) {
                prereqs[done[i]].push(done[d]);
            }
            if done[i] != release[i] {
                prereqs[done[i]].push(release[i]);
            }
        }
        for before in &mut prereqs {
            before.sort_unstable();
            before.dedup();
        }

        Self {
            steps,
            release,
            done,
            prereqs,
        }
    }
}

/// Dependency bookkeeping shared by all tasks.
struct Scheduler {
    /// Number of unfinished prerequisites per step
    waiting: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    statuses: Vec<Option<ApplyStatus>>,
    /// Changes already passed to `on_complete`
    reported: Vec<bool>,
}

impl Scheduler {
    fn new(graph: &StepGraph) -> Self {
        let mut dependents = vec![Vec::new(); graph.steps.len()];
        for (step, before) in graph.prereqs.iter().enumerate() {
            for &b in before {
                dependents[b].push(step);
            }
        }
        Self {
            waiting: graph.prereqs.iter().map(Vec::len).collect(),
            dependents,
            statuses: vec![None; graph.steps.len()],
            reported: vec![false; graph.done.len()],
        }
    }

    fn initially_ready(&self) -> Vec<usize> {
        (0..self.waiting.len()).filter(|&i| self.waiting[i] == 0).collect()
    }
}

struct Worker<'a> {
    plan: &'a Plan,
    graph: StepGraph,
    shared: SharedState<'a>,
    control_plane: &'a dyn ControlPlane,
    options: &'a ExecuteOptions,
    progress: &'a dyn ProgressCallback,
    cancel: &'a CancelToken,
    /// Set when applied state could not be persisted
    halted: AtomicBool,
    scheduler: Mutex<Scheduler>,
}

impl Worker<'_> {
    /// Report a change once: when its last step finishes, or when any of its
    /// steps did not succeed.
    fn report(&self, scheduler: &mut Scheduler, step: usize, status: &ApplyStatus) {
        let Step { change, phase } = self.graph.steps[step];
        let finishes = phase != Phase::Retire || !status.is_success();
        if finishes && !scheduler.reported[change] {
            scheduler.reported[change] = true;
            let planned = &self.plan.changes[change];
            self.progress.on_complete(&planned.id, planned.action, status);
        }
    }

    /// Record a finished step and return the steps it unblocked.
    fn complete(&self, step: usize, status: ApplyStatus) -> Vec<usize> {
        let change = &self.plan.changes[self.graph.steps[step].change];

        let mut scheduler = lock(&self.scheduler);
        self.report(&mut scheduler, step, &status);
        let cascade = match &status {
            ApplyStatus::Succeeded => None,
            ApplyStatus::Failed { .. } => Some(SkipReason::DependencyFailed(change.id.clone())),
            ApplyStatus::Skipped { reason } => Some(reason.clone()),
        };
        scheduler.statuses[step] = Some(status);

        let Some(reason) = cascade else {
            let mut ready = Vec::new();
            for d in scheduler.dependents[step].clone() {
                scheduler.waiting[d] -= 1;
                if scheduler.waiting[d] == 0 && scheduler.statuses[d].is_none() {
                    ready.push(d);
                }
            }
            return ready;
        };

        // Nothing downstream of a failure may run
        let mut stack = scheduler.dependents[step].clone();
        while let Some(d) = stack.pop() {
            if scheduler.statuses[d].is_some() {
                continue;
            }
            let status = ApplyStatus::Skipped {
                reason: reason.clone(),
            };
            log::info!("skipping {}: {}", self.plan.changes[self.graph.steps[d].change].id, reason);
            self.report(&mut scheduler, d, &status);
            scheduler.statuses[d] = Some(status);
            stack.extend(scheduler.dependents[d].iter().copied());
        }
        Vec::new()
    }

    fn run(&self, step: Step) -> ApplyStatus {
        let change = &self.plan.changes[step.change];
        if !change.action.is_change() {
            return ApplyStatus::Succeeded;
        }

        let resource_lock = self.shared.resource_lock(&change.id);
        let _guard = lock(&resource_lock);

        if step.phase != Phase::Recreate {
            self.progress.on_start(&change.id, change.action);
        }
        log::info!("{} {} ({:?})", change.action, change.id, step.phase);

        let result = match (step.phase, change.action) {
            (Phase::Retire, _) | (Phase::Whole, Action::Delete) => self.delete(&change.id),
            (Phase::Recreate, _) | (Phase::Whole, Action::Create) => self.create(change),
            (Phase::Whole, Action::Update) => self.update(change),
            (Phase::Whole, Action::Replace) => self.delete(&change.id).and_then(|()| self.create(change)),
            (Phase::Whole, Action::NoOp) => Ok(()),
        };

        match result {
            Ok(()) => ApplyStatus::Succeeded,
            Err((error, attempts)) => {
                let error = give_up(error, attempts, self.options.retry.max_attempts);
                log::warn!("{} {} failed after {} attempt(s): {}", change.action, change.id, attempts, error);
                ApplyStatus::Failed { error, attempts }
            }
        }
    }

    fn retry<T>(&self, id: &ResourceId, op: impl FnMut() -> std::result::Result<T, ApiError>) -> Attempted<T> {
        let callback = |attempt: u32, max_attempts: u32, error: &ApiError| {
            self.progress.on_retry(id, attempt, max_attempts, error);
        };
        with_retry(&self.options.retry, Some(&callback), op)
    }

    /// Substitute references with values recorded by earlier operations.
    fn resolve_inputs(&self, change: &PlannedChange) -> std::result::Result<Attributes, Failure> {
        self.shared.read(|state| {
            change
                .inputs
                .iter()
                .map(|(name, value)| {
                    value
                        .resolve(&|reference: &Reference| state.lookup(reference))
                        .map(|resolved| (name.clone(), resolved))
                        .ok_or_else(|| {
                            let message = format!("attribute '{name}' has unresolved references");
                            (ApiError::Permanent(message), 0)
                        })
                })
                .collect()
        })
    }

    fn record(&self, id: &ResourceId, entry: Option<AppliedResource>) -> std::result::Result<(), Failure> {
        self.shared.record(id, entry).map_err(|e| {
            log::error!("{e}");
            self.halted.store(true, Ordering::SeqCst);
            (ApiError::Permanent(e.to_string()), 1)
        })
    }

    /// Take a drift baseline right after a successful write.
    fn observe(&self, record: &mut AppliedResource) {
        let attempted = self.retry(&record.id, || {
            self.control_plane.describe(&record.id, &record.physical_id)
        });
        match attempted.result {
            Ok(Some(observed)) => record.set_observed(observed),
            Ok(None) => log::warn!("{} not visible yet, drift baseline not recorded", record.id),
            Err(e) => log::warn!("could not describe {}: {}", record.id, e),
        }
    }

    fn create(&self, change: &PlannedChange) -> std::result::Result<(), Failure> {
        let inputs = self.resolve_inputs(change)?;
        let attempted = self.retry(&change.id, || self.control_plane.create(&change.id, &inputs));
        let attempts = attempted.attempts;
        let created = attempted.result.map_err(|e| (e, attempts))?;

        let mut record = AppliedResource::new(change.id.clone(), created.physical_id);
        record.inputs = inputs;
        record.outputs = created.outputs;
        record.dependencies = change.dependencies.clone();
        self.observe(&mut record);
        self.record(&change.id, Some(record))
    }

    fn update(&self, change: &PlannedChange) -> std::result::Result<(), Failure> {
        let Some(previous) = self.shared.get(&change.id) else {
            log::warn!("{} missing from state, creating instead", change.id);
            return self.create(change);
        };

        let inputs = self.resolve_inputs(change)?;
        let attempted = self.retry(&change.id, || {
            self.control_plane
                .update(&change.id, &previous.physical_id, &inputs, &previous.inputs)
        });
        let attempts = attempted.attempts;
        let outputs = attempted.result.map_err(|e| (e, attempts))?;

        let mut record = previous;
        record.inputs = inputs;
        record.outputs.extend(outputs);
        record.dependencies = change.dependencies.clone();
        record.applied_at = chrono::Utc::now();
        self.observe(&mut record);
        self.record(&change.id, Some(record))
    }

    fn delete(&self, id: &ResourceId) -> std::result::Result<(), Failure> {
        let Some(previous) = self.shared.get(id) else {
            log::debug!("{id} already absent from state");
            return Ok(());
        };

        let attempted = self.retry(id, || self.control_plane.delete(id, &previous.physical_id));
        let attempts = attempted.attempts;
        attempted.result.map_err(|e| (e, attempts))?;
        self.record(id, None)
    }

    fn into_report(self) -> ApplyReport {
        let mut scheduler = match self.scheduler.into_inner() {
            Ok(scheduler) => scheduler,
            Err(poisoned) => poisoned.into_inner(),
        };
        let outcomes = self
            .plan
            .changes
            .iter()
            .enumerate()
            .map(|(i, change)| {
                let (release, done) = (self.graph.release[i], self.graph.done[i]);
                let status = match &scheduler.statuses[release] {
                    Some(ApplyStatus::Succeeded) => scheduler.statuses[done].clone(),
                    other => other.clone(),
                };
                let status = status.unwrap_or_else(|| {
                    let status = ApplyStatus::Skipped {
                        reason: SkipReason::Cancelled,
                    };
                    if !scheduler.reported[i] {
                        scheduler.reported[i] = true;
                        self.progress.on_complete(&change.id, change.action, &status);
                    }
                    status
                });
                ResourceOutcome {
                    id: change.id.clone(),
                    action: change.action,
                    status,
                }
            })
            .collect();
        ApplyReport { outcomes }
    }
}

/// A transient error that used up every attempt is final.
fn give_up(error: ApiError, attempts: u32, max_attempts: u32) -> ApiError {
    match error {
        ApiError::Transient(message) if attempts >= max_attempts => {
            ApiError::Permanent(format!("gave up after {attempts} attempts: {message}"))
        }
        other => other,
    }
}
