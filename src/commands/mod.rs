//! Command implementations
//!
//! Every command starts from a [`Session`]: the loaded stack plus the state
//! file it is tracked in.

pub mod apply;
pub mod destroy;
pub mod graph;
pub mod plan;
pub mod refresh;
pub mod state;
pub mod validate;

use anyhow::{Context as AnyhowContext, Result};
use std::path::{Path, PathBuf};

use crate::Context;
use crate::kinds;
use crate::paths;
use crate::progress;
use crate::provider;
use crate::stack::Stack;
use crate::state::FileStateStore;
use declarative::{
    AppliedState, ControlPlane, ExecuteOptions, Observed, Plan, PlanOptions, ResourceId,
    StateStore,
};

/// Turn an engine error into a message with the category's advice.
pub fn engine_error(error: declarative::Error) -> anyhow::Error {
    anyhow::anyhow!("{error}\n  hint: {}", error.category().advice())
}

pub struct Session {
    pub stack: Stack,
    pub store: FileStateStore,
}

impl Session {
    /// Load and validate the stack, and locate its state file.
    pub fn open(ctx: &Context) -> Result<Self> {
        let stack_path = paths::stack_file(ctx.stack.as_deref());
        let stack = Stack::load(&stack_path)?;
        kinds::validate(&stack.resources)
            .with_context(|| format!("Invalid stack file: {}", stack_path.display()))?;

        let state_path = paths::state_file(
            ctx.state.as_deref(),
            stack.settings.state_file.as_deref(),
            &stack.base_dir(),
            &stack.name,
        )?;
        log::debug!("Stack {} uses state {}", stack.name, state_path.display());

        Ok(Self {
            stack,
            store: FileStateStore::new(state_path),
        })
    }

    pub fn load_state(&self) -> Result<AppliedState> {
        self.store.load().map_err(engine_error)
    }

    /// Where the local backend keeps its simulated account.
    pub fn cloud_file(&self) -> PathBuf {
        cloud_file_for(self.store.path())
    }

    pub fn connect(&self, ctx: &Context) -> Result<Box<dyn ControlPlane>> {
        provider::connect(ctx.backend, &self.stack, &self.cloud_file())
    }

    pub fn execute_options(&self, jobs: Option<usize>, dry_run: bool) -> ExecuteOptions {
        ExecuteOptions {
            dry_run,
            jobs: jobs.unwrap_or(self.stack.settings.jobs).max(1),
            retry: self.stack.settings.retry.to_config(),
        }
    }

    /// Describe every applied resource.
    pub fn observe(&self, ctx: &Context, state: &AppliedState, control_plane: &dyn ControlPlane) -> Result<Observed> {
        let spinner = if ctx.quiet {
            progress::hidden()
        } else {
            progress::spinner(&format!("Refreshing {} resources...", state.len()))
        };
        let observed = declarative::refresh(
            state,
            control_plane,
            self.stack.settings.jobs,
            &self.stack.settings.retry.to_config(),
        );
        spinner.finish_and_clear();
        observed.map_err(engine_error)
    }

    /// Plan the stack against `state`, optionally restricted to targets.
    pub fn plan(
        &self,
        state: &AppliedState,
        observed: Option<&Observed>,
        targets: &[String],
        destroy: bool,
    ) -> Result<Plan> {
        let options = PlanOptions {
            drift: self.stack.settings.drift,
            destroy,
        };
        let plan = declarative::plan(&self.stack.resources, state, observed, &kinds::registry(), &options)
            .map_err(engine_error)?;

        if targets.is_empty() {
            return Ok(plan);
        }
        let targets = parse_targets(targets)?;
        plan.filter_targets(&targets).map_err(engine_error)
    }
}

/// `lottery.state.json` keeps its simulated account in `lottery.cloud.json`.
fn cloud_file_for(state_path: &Path) -> PathBuf {
    let name = state_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(".state.json")
        .or_else(|| name.strip_suffix(".json"))
        .unwrap_or(&name);
    state_path.with_file_name(format!("{stem}.cloud.json"))
}

pub fn parse_targets(targets: &[String]) -> Result<Vec<ResourceId>> {
    targets
        .iter()
        .map(|t| ResourceId::parse(t).with_context(|| format!("Invalid target '{t}'")))
        .collect()
}
