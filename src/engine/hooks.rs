//! Post-apply hooks
//!
//! A hook is a command run once the resources it waits for are applied,
//! e.g. starting the catalog crawlers after they were created. It fires
//! only when all of those resources succeeded and at least one of them
//! changed, so re-applying an unchanged stack does not re-run it.

use crate::runner::CommandRunner;
use crate::stack::Hook;
use declarative::{
    ApiError, AppliedState, ApplyReport, CancelToken, Reference, RetryConfig, with_retry,
};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum HookStatus {
    Succeeded { attempts: u32 },
    Failed { error: String, attempts: u32 },
    /// Not triggered, with the reason
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HookOutcome {
    pub name: String,
    pub status: HookStatus,
}

impl HookOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, HookStatus::Failed { .. })
    }
}

impl fmt::Display for HookOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            HookStatus::Succeeded { attempts: 1 } => write!(f, "{}: ran", self.name),
            HookStatus::Succeeded { attempts } => {
                write!(f, "{}: ran after {attempts} attempts", self.name)
            }
            HookStatus::Failed { error, attempts } => {
                write!(f, "{}: failed after {attempts} attempt(s): {error}", self.name)
            }
            HookStatus::Skipped(reason) => write!(f, "{}: skipped ({reason})", self.name),
        }
    }
}

/// Why a hook should not fire, or `None` if it should.
fn skip_reason(hook: &Hook, report: &ApplyReport) -> Option<String> {
    let mut changed = false;
    for id in &hook.after {
        match report.get(id) {
            Some(outcome) if !outcome.status.is_success() => {
                return Some(format!("{id} did not apply"));
            }
            Some(outcome) => changed |= outcome.action.is_change(),
            None => {}
        }
    }
    (!changed).then(|| "nothing it waits for changed".to_string())
}

/// Substitute references in the command with applied values.
fn resolve_command(hook: &Hook, state: &AppliedState) -> Result<Vec<String>, String> {
    hook.command
        .iter()
        .map(|arg| {
            arg.resolve(&|reference: &Reference| state.lookup(reference))
                .map(|value| value.to_display_string())
                .ok_or_else(|| {
                    let missing: Vec<String> =
                        arg.references().iter().map(ToString::to_string).collect();
                    format!("unresolved reference {}", missing.join(", "))
                })
        })
        .collect()
}

/// Classify a failed run the way AWS CLI errors are classified.
fn classify(stderr: &str, status_message: &str) -> ApiError {
    let message = if stderr.is_empty() {
        status_message.to_string()
    } else {
        stderr.to_string()
    };
    if awskit::Error::from_cli_output(stderr).is_retryable() {
        ApiError::Transient(message)
    } else {
        ApiError::Permanent(message)
    }
}

/// Run the hooks whose resources changed in this apply.
pub fn run_hooks(
    hooks: &[Hook],
    report: &ApplyReport,
    state: &AppliedState,
    runner: &dyn CommandRunner,
    retry: &RetryConfig,
    cancel: &CancelToken,
) -> Vec<HookOutcome> {
    hooks
        .iter()
        .map(|hook| {
            let status = if cancel.is_cancelled() {
                HookStatus::Skipped("cancelled".to_string())
            } else if let Some(reason) = skip_reason(hook, report) {
                HookStatus::Skipped(reason)
            } else {
                run_hook(hook, state, runner, retry)
            };
            log::info!("hook {}: {status:?}", hook.name);
            HookOutcome {
                name: hook.name.clone(),
                status,
            }
        })
        .collect()
}

fn run_hook(hook: &Hook, state: &AppliedState, runner: &dyn CommandRunner, retry: &RetryConfig) -> HookStatus {
    let argv = match resolve_command(hook, state) {
        Ok(argv) => argv,
        Err(error) => return HookStatus::Failed { error, attempts: 0 },
    };
    log::debug!("hook {}: {}", hook.name, argv.join(" "));

    let attempted = with_retry(retry, None, || {
        let output = runner
            .run(&argv)
            .map_err(|e| ApiError::Permanent(format!("{e:#}")))?;
        if output.success {
            Ok(())
        } else {
            Err(classify(&output.stderr, "command exited with a non-zero status"))
        }
    });

    match attempted.result {
        Ok(()) => HookStatus::Succeeded {
            attempts: attempted.attempts,
        },
        Err(e) => HookStatus::Failed {
            error: e.message().to_string(),
            attempts: attempted.attempts,
        },
    }
}
