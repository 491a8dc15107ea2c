//! Plan and drift display

use crate::ui;
use colored::{ColoredString, Colorize};
use declarative::{Action, AttributeChange, Drift, Plan, PlannedChange};
use std::fmt::Write as _;

/// Values longer than this are shown as a line diff instead of inline
const INLINE_LIMIT: usize = 60;

fn kind_title(kind: &str) -> &str {
    match kind {
        "s3_bucket" => "Storage (S3 buckets)",
        "s3_object" => "Storage (S3 objects)",
        "iam_role" => "Access (IAM roles)",
        "iam_policy" => "Access (IAM policies)",
        "iam_role_policy_attachment" => "Access (policy attachments)",
        "glue_database" => "Catalog (Glue databases)",
        "glue_job" => "Processing (Glue jobs)",
        "glue_crawler" => "Catalog (Glue crawlers)",
        _ => kind,
    }
}

fn symbol(action: Action) -> ColoredString {
    match action {
        Action::Create => "+".green(),
        Action::Update => "~".yellow(),
        Action::Replace => "-/+".magenta(),
        Action::Delete => "-".red(),
        Action::NoOp => " ".normal(),
    }
}

/// Render a plan the way `plan` and `apply` print it.
pub fn render_plan(plan: &Plan) -> String {
    let mut out = String::new();
    let summary = plan.summary();

    if !summary.has_changes() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  {} No changes. The stack matches its state.", "✓".green());
        return out;
    }

    // Group by kind, keeping plan order within and across groups
    let mut groups: Vec<(&str, Vec<&PlannedChange>)> = Vec::new();
    for change in plan.changes.iter().filter(|c| c.action.is_change()) {
        match groups.iter_mut().find(|(kind, _)| *kind == change.id.kind) {
            Some((_, changes)) => changes.push(change),
            None => groups.push((&change.id.kind, vec![change])),
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "┌─ {} ─────────────────────────────────────────┐",
        "Execution Plan".bold()
    );
    let _ = writeln!(out, "│");

    for (kind, changes) in &groups {
        let _ = writeln!(out, "│ {}", kind_title(kind).bold());
        for change in changes {
            let drifted = if change.drifted {
                " [drifted]".yellow().to_string()
            } else {
                String::new()
            };
            let _ = writeln!(
                out,
                "│   {} {:<40} {}{}",
                symbol(change.action),
                change.id.to_string(),
                format!("({})", change.action).dimmed(),
                drifted
            );
            for attribute in &change.changes {
                render_attribute(&mut out, change.action, attribute);
            }
        }
        let _ = writeln!(out, "│");
    }

    let _ = writeln!(out, "├─────────────────────────────────────────────────────┤");
    let _ = writeln!(
        out,
        "│ Plan: {} to create, {} to update, {} to replace, {} to delete",
        summary.creates.to_string().green(),
        summary.updates.to_string().yellow(),
        summary.replaces.to_string().magenta(),
        summary.deletes.to_string().red()
    );
    let _ = writeln!(out, "└─────────────────────────────────────────────────────┘");
    out
}

fn render_attribute(out: &mut String, action: Action, change: &AttributeChange) {
    let replacement = if change.forces_replacement && action == Action::Replace {
        format!(" {}", "# forces replacement".magenta())
    } else {
        String::new()
    };
    let after = if change.unknown {
        "(known after apply)".dimmed().to_string()
    } else {
        change.after.clone().unwrap_or_else(|| "null".to_string())
    };

    match (action, &change.before) {
        (Action::Create, _) | (_, None) => {
            let _ = writeln!(
                out,
                "│       {} = {}{}",
                change.attribute,
                ui::truncate(&after, INLINE_LIMIT * 2),
                replacement
            );
        }
        (Action::Delete, Some(before)) => {
            let _ = writeln!(
                out,
                "│       {} = {}",
                change.attribute,
                ui::truncate(before, INLINE_LIMIT * 2).dimmed()
            );
        }
        (_, Some(before)) => {
            let document = (!change.unknown)
                .then(|| change.after.as_deref().and_then(|a| document_diff(before, a)))
                .flatten();
            match document {
                Some(lines) => {
                    let _ = writeln!(out, "│       {}:{}", change.attribute, replacement);
                    for line in lines {
                        let _ = writeln!(out, "│         {line}");
                    }
                }
                None => {
                    let _ = writeln!(
                        out,
                        "│       {}: {} → {}{}",
                        change.attribute,
                        ui::truncate(before, INLINE_LIMIT).dimmed(),
                        ui::truncate(&after, INLINE_LIMIT),
                        replacement
                    );
                }
            }
        }
    }
}

/// Line diff of two JSON documents, if either is too long to show inline.
fn document_diff(before: &str, after: &str) -> Option<Vec<String>> {
    if before.len() <= INLINE_LIMIT && after.len() <= INLINE_LIMIT {
        return None;
    }
    let pretty = |text: &str| -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        if !(value.is_object() || value.is_array()) {
            return None;
        }
        serde_json::to_string_pretty(&value).ok()
    };
    let (text_a, text_b) = (pretty(before)?, pretty(after)?);

    let diff = similar::TextDiff::from_lines(&text_a, &text_b);
    let lines = diff
        .iter_all_changes()
        .filter_map(|change| {
            let line = change.to_string_lossy();
            let line = line.trim_end_matches('\n');
            match change.tag() {
                similar::ChangeTag::Delete => Some(format!("- {line}").red().to_string()),
                similar::ChangeTag::Insert => Some(format!("+ {line}").green().to_string()),
                similar::ChangeTag::Equal => None,
            }
        })
        .collect();
    Some(lines)
}

/// Print a plan.
pub fn display_plan(plan: &Plan) {
    print!("{}", render_plan(plan));
}

/// Print drift found by a refresh.
pub fn display_drift(drift: &[Drift]) {
    if drift.is_empty() {
        println!();
        println!("  {} No drift detected", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Drift".yellow().bold()
    );
    println!("│");
    for entry in drift {
        match entry {
            Drift::Missing(id) => {
                println!("│  {} {:<40} {}", "-".red(), id.to_string(), "(deleted out of band)".dimmed());
            }
            Drift::Modified { id, attributes } => {
                println!(
                    "│  {} {:<40} {}",
                    "~".yellow(),
                    id.to_string(),
                    format!("({})", attributes.join(", ")).dimmed()
                );
            }
        }
    }
    println!("│");
    println!("└─────────────────────────────────────────────────────┘");
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{ResourceId, Value};

    fn change(id: &str, action: Action, changes: Vec<AttributeChange>) -> PlannedChange {
        PlannedChange {
            id: ResourceId::parse(id).unwrap(),
            action,
            inputs: declarative::Attributes::new(),
            dependencies: Vec::new(),
            changes,
            drifted: false,
            depends_on: Vec::new(),
            delete_after: Vec::new(),
        }
    }

    fn attribute(name: &str, before: Option<&str>, after: Option<&str>) -> AttributeChange {
        AttributeChange {
            attribute: name.to_string(),
            before: before.map(str::to_string),
            after: after.map(str::to_string),
            unknown: false,
            forces_replacement: false,
        }
    }

    #[test]
    fn test_noop_plan_says_no_changes() {
        let plan = Plan {
            changes: vec![change("s3_bucket.raw", Action::NoOp, Vec::new())],
            state_serial: 3,
        };
        assert!(render_plan(&plan).contains("No changes"));
    }

    #[test]
    fn test_plan_groups_by_kind_and_summarizes() {
        let mut role = attribute("role", None, None);
        role.unknown = true;
        let plan = Plan {
            changes: vec![
                change("s3_bucket.raw", Action::Create, vec![attribute("bucket", None, Some("\"lottery-raw\""))]),
                change("glue_job.transformer", Action::Create, vec![role]),
                change("s3_bucket.old", Action::Delete, Vec::new()),
                change("iam_role.glue", Action::NoOp, Vec::new()),
            ],
            state_serial: 0,
        };
        let rendered = render_plan(&plan);
        assert_eq!(rendered.matches("Storage (S3 buckets)").count(), 1);
        assert!(rendered.contains("Processing (Glue jobs)"));
        assert!(rendered.contains("known after apply"));
        assert!(!rendered.contains("iam_role.glue"));
        assert!(rendered.contains("to create"));
    }

    #[test]
    fn test_long_documents_shown_as_line_diff() {
        let before = Value::from_plain_json(serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{ "Effect": "Allow", "Action": "s3:GetObject", "Resource": "arn:aws:s3:::lottery-raw/*" }]
        }))
        .to_json()
        .to_string();
        let after = before.replace("s3:GetObject", "s3:PutObject");
        let lines = document_diff(&before, &after).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("s3:GetObject"));
        assert!(lines[1].contains("s3:PutObject"));
    }

    #[test]
    fn test_short_values_stay_inline() {
        assert!(document_diff("\"0.0625\"", "\"1\"").is_none());
        assert!(document_diff(&"x".repeat(80), &"y".repeat(80)).is_none());
    }
}
