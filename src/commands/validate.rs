use anyhow::Result;

use super::{Session, engine_error};
use crate::Context;
use crate::kinds;
use crate::ui;
use declarative::ResourceGraph;

pub fn run(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let stack = &session.stack;

    let graph = ResourceGraph::build(stack.resources.clone()).map_err(engine_error)?;
    kinds::registry().validate(graph.decls()).map_err(engine_error)?;

    ui::success(&format!(
        "{} is valid: {} resources, {} hooks",
        stack.path.display(),
        graph.len(),
        stack.hooks.len()
    ));
    if !ctx.quiet {
        ui::kv("Stack", &stack.name);
        ui::kv("Region", &stack.settings.region);
        ui::kv("State", &session.store.path().display().to_string());
    }
    Ok(())
}
