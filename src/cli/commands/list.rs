//! List command
//!
//! Prints stack ids and names in deployment order.

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use serde_json::json;

/// Arguments for the list command
#[derive(Parser, Debug, Clone)]
pub struct ListArgs {
    /// Also show the stacks each stack depends on
    #[arg(long, short = 'd')]
    pub dependencies: bool,
}

impl ListArgs {
    /// Execute the list command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let app = ctx.app()?;
        let graph = app.dependency_graph()?;
        let order = graph.stack_order()?;

        let mut rows = Vec::with_capacity(order.len());
        for id in &order {
            let Some(stack) = app.stack(id) else {
                continue;
            };
            rows.push((
                id.clone(),
                stack.stack_name().to_string(),
                graph.stack_dependencies(id),
            ));
        }

        if ctx.output.is_json() {
            let stacks: Vec<_> = rows
                .iter()
                .map(|(id, name, deps)| json!({ "id": id, "stackName": name, "dependencies": deps }))
                .collect();
            ctx.output.json(&json!({ "stacks": stacks }))?;
            return Ok(0);
        }

        if self.dependencies {
            let table: Vec<Vec<String>> = rows
                .into_iter()
                .map(|(id, name, deps)| vec![id, name, deps.join(", ")])
                .collect();
            ctx.output.table(&["Stack", "Name", "Depends on"], &table);
        } else {
            for (id, name, _) in rows {
                println!("{}\t{}", id, name);
            }
        }
        Ok(0)
    }
}
