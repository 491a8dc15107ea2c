use anyhow::Result;
use colored::Colorize;

use super::{Session, engine_error};
use crate::Context;
use crate::cli::GraphArgs;
use crate::ui;
use declarative::{ResourceGraph, levels};

pub fn run(ctx: &Context, args: &GraphArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let graph = ResourceGraph::build(session.stack.resources.clone()).map_err(engine_error)?;

    if args.dot {
        print!("{}", graph.to_dot());
        return Ok(());
    }

    ui::header(&format!("Creation order for {}", session.stack.name));
    for (depth, ids) in levels(&graph).iter().enumerate() {
        println!();
        println!("  {}", format!("Level {depth}").cyan().bold());
        for id in ids {
            let deps: Vec<String> = graph
                .position(id)
                .map(|i| {
                    graph
                        .dependencies(i)
                        .iter()
                        .map(|&d| graph.node(d).id.to_string())
                        .collect()
                })
                .unwrap_or_default();
            if deps.is_empty() {
                println!("    {id}");
            } else {
                println!("    {id} {}", format!("← {}", deps.join(", ")).dimmed());
            }
        }
    }
    println!();
    Ok(())
}
