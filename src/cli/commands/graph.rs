//! Graph command
//!
//! Prints the resource dependency graph as DOT or JSON.

use super::CommandContext;
use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde_json::json;

/// Graph rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum GraphFormat {
    /// Graphviz DOT
    #[default]
    Dot,
    /// Nodes, edges and stack order as JSON
    Json,
}

/// Arguments for the graph command
#[derive(Parser, Debug, Clone)]
pub struct GraphArgs {
    /// Rendering format
    #[arg(long, short = 'f', value_enum, default_value_t = GraphFormat::Dot)]
    pub format: GraphFormat,
}

impl GraphArgs {
    /// Execute the graph command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let app = ctx.app()?;
        let graph = app.dependency_graph()?;
        ctx.output.info(&format!(
            "{} resources, {} dependencies",
            graph.node_count(),
            graph.edge_count()
        ));

        // `--output json` implies the JSON rendering
        if self.format == GraphFormat::Json || ctx.output.is_json() {
            let stack_order = graph.stack_order()?;
            let mut by_stack: Vec<_> = graph.resources_by_stack().into_iter().collect();
            by_stack.sort();
            let resources: serde_json::Map<String, serde_json::Value> = by_stack
                .into_iter()
                .map(|(stack, mut ids)| {
                    ids.sort();
                    (stack, json!(ids))
                })
                .collect();
            ctx.output.json(&json!({
                "stackOrder": stack_order,
                "resources": resources,
                "dependencies": graph.dependencies(),
            }))?;
        } else {
            ctx.output.raw(&graph.to_dot());
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_args_parsing() {
        let args = GraphArgs::try_parse_from(["graph"]).unwrap();
        assert_eq!(args.format, GraphFormat::Dot);

        let args = GraphArgs::try_parse_from(["graph", "--format", "json"]).unwrap();
        assert_eq!(args.format, GraphFormat::Json);
    }

    #[test]
    fn test_graph_args_unknown_format() {
        assert!(GraphArgs::try_parse_from(["graph", "--format", "svg"]).is_err());
    }
}
