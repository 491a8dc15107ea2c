//! Terminal side of the engine
//!
//! 1. Display - render plans and drift
//! 2. Apply - confirm, run the executor with progress, report
//! 3. Hooks - run post-apply commands for resources that changed

pub mod differ;
pub mod executor;
pub mod hooks;

pub use differ::{display_drift, display_plan};
pub use executor::{ApplyOptions, PromptConfirm, apply_plan, print_hooks};
pub use hooks::run_hooks;
