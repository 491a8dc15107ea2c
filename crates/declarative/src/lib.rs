//! # Declarative
//!
//! A resource graph engine for declarative infrastructure.
//!
//! Declarations go in, a plan comes out, and the plan is applied against an
//! opaque control plane. Planning is pure; applying is the only step with
//! side effects.
//!
//! ## Core Concepts
//!
//! - **ResourceDecl**: a typed, named bag of attributes; attributes may
//!   reference other resources as `${kind.name.attribute}`
//! - **ResourceGraph**: the DAG of declarations and their references
//! - **Plan**: per-resource create/update/replace/delete/no-op, in an order
//!   consistent with the graph
//! - **Executor**: applies a plan with bounded parallelism, retrying
//!   transient failures and persisting applied state after every operation
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     plan, execute, AppliedState, CancelToken, ExecuteOptions, KindSchema,
//!     MemoryStateStore, NoProgress, PlanOptions, ResourceDecl, SchemaRegistry, Value,
//! };
//!
//! let registry = SchemaRegistry::new()
//!     .with(KindSchema::new("iam_role").required(&["role_name"]).outputs(&["arn"]))
//!     .with(KindSchema::new("glue_job").required(&["role"]));
//!
//! let decls = vec![
//!     ResourceDecl::new("iam_role", "glue").with("role_name", "lottery-glue"),
//!     ResourceDecl::new("glue_job", "transformer")
//!         .with("role", Value::parse_string("${iam_role.glue.arn}")?),
//! ];
//!
//! let store = MemoryStateStore::new();
//! let plan = plan(&decls, &store.load()?, None, &registry, &PlanOptions::default())?;
//! let report = execute(
//!     &plan,
//!     &store,
//!     &my_control_plane,
//!     &ExecuteOptions::default(),
//!     &NoProgress,
//!     &CancelToken::new(),
//! )?;
//! assert!(report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! - [`ControlPlane`]: creates, updates, deletes and describes objects
//! - [`StateStore`]: persists applied state
//! - [`ProgressCallback`]: receives progress updates from worker threads
//! - [`ConfirmCallback`]: handles user confirmations

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod policy;
pub mod refresh;
pub mod resolver;
pub mod resource;
pub mod retry;
pub mod schema;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use context::{
    AutoConfirm, AutoDecline, CancelToken, ConfirmCallback, ControlPlane, Created, NoProgress,
    ProgressCallback,
};
pub use diff::{AttributeChange, DiffSummary, DriftPolicy, Observation, Observed, ResourceDiff};
pub use error::{ApiError, Error, ErrorCategory, Result};
pub use executor::execute;
pub use graph::ResourceGraph;
pub use planner::{Plan, PlanOptions, PlannedChange, plan};
pub use policy::PolicyDocument;
pub use refresh::{Drift, detect_drift, refresh};
pub use resolver::{creation_order, deletion_order, levels};
pub use resource::{Attributes, Reference, ResourceDecl, ResourceId, Value};
pub use retry::{RetryCallback, with_retry};
pub use schema::{KindSchema, SchemaRegistry};
pub use state::{AppliedResource, AppliedState, MemoryStateStore, SharedState, StateStore};
pub use types::{
    Action, ApplyReport, ApplyStatus, ExecuteOptions, ExecuteSummary, ResourceOutcome,
    RetryConfig, SkipReason,
};
