use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;

use super::{Session, engine_error};
use crate::Context;
use crate::cli::StateCommand;
use crate::engine::PromptConfirm;
use crate::ui;
use declarative::{AppliedState, Attributes, ConfirmCallback, ResourceId, StateStore};

pub fn run(ctx: &Context, cmd: &StateCommand) -> Result<()> {
    let session = Session::open(ctx)?;
    match cmd {
        StateCommand::List => list(&session),
        StateCommand::Show { id } => show(&session, id),
        StateCommand::Rm { id, yes } => remove(&session, id, *yes, &mut PromptConfirm),
    }
}

fn list(session: &Session) -> Result<()> {
    let state = session.load_state()?;
    if state.is_empty() {
        ui::info("No resources in state.");
        return Ok(());
    }

    ui::header(&format!("{} (serial {})", session.stack.name, state.serial));
    for resource in state.resources.values() {
        println!(
            "  {:<45} {}",
            resource.id.to_string(),
            ui::truncate(&resource.physical_id, 60).dimmed()
        );
    }
    println!();
    ui::dim(&format!("{} resources in {}", state.len(), session.store.path().display()));
    Ok(())
}

fn show(session: &Session, id: &str) -> Result<()> {
    let id = ResourceId::parse(id).with_context(|| format!("Invalid resource id '{id}'"))?;
    let state = session.load_state()?;
    let Some(resource) = state.get(&id) else {
        bail!("{id} is not in state");
    };

    ui::header(&id.to_string());
    ui::kv("Physical id", &resource.physical_id);
    ui::kv("Applied at", &resource.applied_at.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    if !resource.dependencies.is_empty() {
        let deps: Vec<String> = resource.dependencies.iter().map(ToString::to_string).collect();
        ui::kv("Depends on", &deps.join(", "));
    }
    let dependents = state.dependents_of(&id);
    if !dependents.is_empty() {
        let names: Vec<String> = dependents.iter().map(ToString::to_string).collect();
        ui::kv("Used by", &names.join(", "));
    }
    print_attributes("Inputs", &resource.inputs);
    print_attributes("Outputs", &resource.outputs);
    if let Some(fingerprint) = &resource.fingerprint {
        ui::section("Drift baseline");
        ui::kv("Fingerprint", &fingerprint[..fingerprint.len().min(16)]);
    }
    println!();
    Ok(())
}

fn print_attributes(title: &str, attributes: &Attributes) {
    if attributes.is_empty() {
        return;
    }
    ui::section(title);
    for (name, value) in attributes {
        ui::kv(name, &ui::truncate(&value.to_display_string(), 100));
    }
}

/// Forget a resource. The object itself is left alone.
fn remove(session: &Session, id: &str, yes: bool, confirm: &mut dyn ConfirmCallback) -> Result<()> {
    let id = ResourceId::parse(id).with_context(|| format!("Invalid resource id '{id}'"))?;
    let mut state = session.load_state()?;
    forget(&mut state, &id, yes, confirm)?;
    session.store.save(&state).map_err(engine_error)?;
    ui::success(&format!("Removed {id} from state"));
    Ok(())
}

fn forget(state: &mut AppliedState, id: &ResourceId, yes: bool, confirm: &mut dyn ConfirmCallback) -> Result<()> {
    let Some(resource) = state.get(id) else {
        bail!("{id} is not in state");
    };

    let dependents: Vec<String> = state.dependents_of(id).iter().map(ToString::to_string).collect();
    if !dependents.is_empty() {
        ui::warn(&format!("{id} is used by {}", dependents.join(", ")));
    }
    let prompt = format!(
        "Forget {id}? {} will no longer be managed",
        resource.physical_id
    );
    if !yes && !confirm.confirm(&prompt)? {
        bail!("Aborted");
    }

    state.record(id, None);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{AppliedResource, AutoConfirm, AutoDecline};

    fn state() -> AppliedState {
        let mut state = AppliedState::default();
        let role = ResourceId::new("iam_role", "glue_role");
        state.record(&role, Some(AppliedResource::new(role.clone(), "lottery-glue-role")));
        state
    }

    #[test]
    fn test_forget_bumps_serial() {
        let mut state = state();
        let serial = state.serial;
        forget(&mut state, &ResourceId::new("iam_role", "glue_role"), false, &mut AutoConfirm).unwrap();
        assert!(state.is_empty());
        assert_eq!(state.serial, serial + 1);
    }

    #[test]
    fn test_forget_declined_keeps_resource() {
        let mut state = state();
        assert!(forget(&mut state, &ResourceId::new("iam_role", "glue_role"), false, &mut AutoDecline).is_err());
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_forget_unknown_resource() {
        let mut state = state();
        let err = forget(&mut state, &ResourceId::new("glue_job", "transformer"), true, &mut AutoConfirm).unwrap_err();
        assert!(err.to_string().contains("not in state"));
    }
}
