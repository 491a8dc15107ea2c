//! Apply with terminal progress, confirmation and a final report

use anyhow::Result;
use colored::Colorize;
use indicatif::ProgressBar;

use crate::progress;
use declarative::{
    Action, ApiError, ApplyReport, ApplyStatus, CancelToken, ConfirmCallback, ControlPlane,
    ExecuteOptions, Plan, ProgressCallback, ResourceId, StateStore,
};

use super::differ::display_plan;
use super::hooks::{HookOutcome, HookStatus};

/// Options for an interactive apply
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub execute: ExecuteOptions,
    /// Skip the confirmation prompt
    pub yes: bool,
    /// Hide the progress bar
    pub quiet: bool,
}

/// Progress reporting on an indicatif bar. Called from worker threads.
pub struct BarProgress {
    pb: ProgressBar,
}

impl BarProgress {
    pub fn new(pb: ProgressBar) -> Self {
        Self { pb }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl ProgressCallback for BarProgress {
    fn on_start(&self, id: &ResourceId, action: Action) {
        self.pb.set_message(format!("{action} {id}"));
    }

    fn on_retry(&self, id: &ResourceId, attempt: u32, max_attempts: u32, error: &ApiError) {
        self.pb.println(format!(
            "  {} {} attempt {}/{} failed, retrying: {}",
            "↻".yellow(),
            id,
            attempt,
            max_attempts,
            error.message().dimmed()
        ));
    }

    fn on_complete(&self, id: &ResourceId, action: Action, status: &ApplyStatus) {
        if action.is_change() || !status.is_success() {
            self.pb.println(status_line(id, action, status));
        }
        self.pb.inc(1);
    }
}

fn status_line(id: &ResourceId, action: Action, status: &ApplyStatus) -> String {
    match status {
        ApplyStatus::Succeeded if action.is_change() => {
            format!("  {} {} {}", "✓".green(), id, action.past_tense().dimmed())
        }
        ApplyStatus::Succeeded => format!("  {} {} {}", "○".dimmed(), id, "unchanged".dimmed()),
        ApplyStatus::Failed { error, attempts } => format!(
            "  {} {} {} after {} attempt(s): {}",
            "✗".red(),
            id,
            format!("{action} failed").red(),
            attempts,
            error.message()
        ),
        ApplyStatus::Skipped { reason } => {
            format!("  {} {} {}", "⊘".yellow(), id, format!("skipped ({reason})").dimmed())
        }
    }
}

/// Dialoguer-backed confirmation
pub struct PromptConfirm;

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> std::io::Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(std::io::Error::other)
    }
}

/// Show the plan, confirm and apply it.
///
/// Returns `None` when there was nothing to do or the user declined.
pub fn apply_plan(
    plan: &Plan,
    store: &dyn StateStore,
    control_plane: &dyn ControlPlane,
    options: &ApplyOptions,
    confirm: &mut dyn ConfirmCallback,
    cancel: &CancelToken,
) -> Result<Option<ApplyReport>> {
    display_plan(plan);
    if plan.is_noop() {
        return Ok(None);
    }

    if options.execute.dry_run {
        let report = declarative::execute(
            plan,
            store,
            control_plane,
            &options.execute,
            &declarative::NoProgress,
            cancel,
        )?;
        println!();
        println!("  {} Dry run - no changes made", "ℹ".blue());
        return Ok(Some(report));
    }

    let verb = if plan.changes.iter().any(|c| c.action == Action::Delete) {
        "Apply these changes? Resources will be deleted."
    } else {
        "Apply these changes?"
    };
    if !options.yes && !confirm.confirm(verb)? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(None);
    }

    let total = plan.changes.len() as u64;
    let pb = if options.quiet {
        progress::hidden()
    } else {
        progress::bar(total, "Applying")
    };
    let bar = BarProgress::new(pb);
    println!();
    let report = declarative::execute(plan, store, control_plane, &options.execute, &bar, cancel);
    bar.finish();
    let report = report?;

    print_summary(&report);
    Ok(Some(report))
}

/// Print final summary
pub fn print_summary(report: &ApplyReport) {
    let summary = report.summary();
    println!();
    if summary.is_success() {
        println!("  {} Apply complete! {}", "✓".green().bold(), summary);
    } else {
        println!("  {} Apply finished with errors: {}", "⚠".yellow().bold(), summary);
    }

    for outcome in report.failed() {
        if let ApplyStatus::Failed { error, .. } = &outcome.status {
            println!("    • {} {}: {}", outcome.id, "failed".red(), error.message());
        }
    }
    let skipped: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| matches!(o.status, ApplyStatus::Skipped { .. }))
        .collect();
    if !skipped.is_empty() {
        println!("    • {} resources skipped", skipped.len());
    }
}

/// Print hook results
pub fn print_hooks(outcomes: &[HookOutcome]) {
    if outcomes.is_empty() {
        return;
    }
    println!();
    println!("  {} Hooks", "→".cyan());
    for outcome in outcomes {
        let symbol = match outcome.status {
            HookStatus::Succeeded { .. } => "✓".green(),
            HookStatus::Failed { .. } => "✗".red(),
            HookStatus::Skipped(_) => "○".dimmed(),
        };
        println!("    {symbol} {outcome}");
    }
}
