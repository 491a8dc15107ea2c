use crate::provider::BackendKind;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lakeform")]
#[command(author = "lakeform contributors")]
#[command(version)]
#[command(about = "Plan and apply the lottery data-lake stack", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Stack file [default: $LAKEFORM_STACK or ./lakeform.toml]
    #[arg(long, global = true, value_name = "FILE")]
    pub stack: Option<String>,

    /// State file [default: from the stack settings or the state directory]
    #[arg(long, global = true, value_name = "FILE")]
    pub state: Option<String>,

    /// Control plane to apply against
    #[arg(long, global = true, value_enum, default_value = "aws")]
    pub backend: BackendKind,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check the stack file without contacting the control plane
    Validate,

    /// Show what apply would change
    Plan(PlanArgs),

    /// Apply the stack (or a saved plan)
    Apply(ApplyArgs),

    /// Delete every resource recorded in state
    Destroy(DestroyArgs),

    /// Show the dependency graph
    Graph(GraphArgs),

    /// Inspect or edit applied state
    #[command(subcommand)]
    State(StateCommand),

    /// Compare applied state against the control plane
    Refresh,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Plan / Apply
// ============================================================================

#[derive(Parser)]
pub struct PlanArgs {
    /// Save the plan to a file for a later `apply --plan`
    #[arg(short, long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Limit the plan to these resources and what they depend on (kind.name)
    #[arg(short, long = "target", value_name = "ID")]
    pub targets: Vec<String>,

    /// Describe applied resources first and check for drift
    #[arg(short, long)]
    pub refresh: bool,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Apply a plan saved by `plan --out`
    #[arg(short, long, value_name = "FILE", conflicts_with_all = ["targets", "refresh"])]
    pub plan: Option<PathBuf>,

    /// Don't ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Maximum operations in flight [default: from the stack settings]
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Show what would happen without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Limit the apply to these resources and what they depend on (kind.name)
    #[arg(short, long = "target", value_name = "ID")]
    pub targets: Vec<String>,

    /// Describe applied resources first and check for drift
    #[arg(short, long)]
    pub refresh: bool,

    /// Don't run post-apply hooks
    #[arg(long)]
    pub no_hooks: bool,
}

#[derive(Parser)]
pub struct DestroyArgs {
    /// Don't ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Maximum operations in flight [default: from the stack settings]
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

// ============================================================================
// Graph / State
// ============================================================================

#[derive(Parser)]
pub struct GraphArgs {
    /// Print Graphviz DOT instead of levels
    #[arg(long)]
    pub dot: bool,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// List applied resources
    List,

    /// Show one applied resource
    Show {
        /// Resource id (kind.name)
        id: String,
    },

    /// Forget a resource without deleting it
    Rm {
        /// Resource id (kind.name)
        id: String,

        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::parse_from([
            "lakeform", "--backend", "local", "apply", "--yes", "-j", "2", "--target", "glue_job.transformer",
        ]);
        assert_eq!(cli.backend, BackendKind::Local);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert!(args.yes);
        assert_eq!(args.jobs, Some(2));
        assert_eq!(args.targets, vec!["glue_job.transformer"]);
    }

    #[test]
    fn test_saved_plan_excludes_targets() {
        assert!(
            Cli::try_parse_from(["lakeform", "apply", "--plan", "p.json", "--target", "s3_bucket.raw"])
                .is_err()
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["lakeform", "plan", "-vv", "--stack", "lake.toml"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.stack.as_deref(), Some("lake.toml"));
        assert_eq!(cli.backend, BackendKind::Aws);
    }
}
