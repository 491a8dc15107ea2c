use anyhow::{Context as AnyhowContext, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::Session;
use crate::Context;
use crate::cli::PlanArgs;
use crate::engine::display_plan;
use crate::ui;
use declarative::Plan;

/// A plan written by `plan --out`, applied later with `apply --plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedPlan {
    /// Name of the stack the plan was computed for
    pub stack: String,
    pub created_at: DateTime<Utc>,
    pub plan: Plan,
}

impl SavedPlan {
    pub fn write(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize plan")?;
        fs::write(path, content + "\n")
            .with_context(|| format!("Failed to write plan: {}", path.display()))
    }

    /// Read a saved plan and check it belongs to `stack`.
    pub fn read(path: &Path, stack: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan: {}", path.display()))?;
        let saved: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse plan: {}", path.display()))?;
        if saved.stack != stack {
            bail!(
                "{} was planned for stack '{}', not '{stack}'",
                path.display(),
                saved.stack
            );
        }
        Ok(saved)
    }
}

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let state = session.load_state()?;

    let observed = if args.refresh && !state.is_empty() {
        let control_plane = session.connect(ctx)?;
        Some(session.observe(ctx, &state, control_plane.as_ref())?)
    } else {
        None
    };

    let plan = session.plan(&state, observed.as_ref(), &args.targets, false)?;
    display_plan(&plan);

    if let Some(out) = &args.out {
        SavedPlan {
            stack: session.stack.name.clone(),
            created_at: Utc::now(),
            plan,
        }
        .write(out)?;
        println!();
        ui::success(&format!("Saved plan to {}", out.display()));
        ui::dim(&format!("Apply it with: lakeform apply --plan {}", out.display()));
    }
    Ok(())
}
