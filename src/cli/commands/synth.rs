//! Synth command
//!
//! Synthesizes both stacks and writes the cloud assembly directory.

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

/// Arguments for the synth command
#[derive(Parser, Debug, Clone)]
pub struct SynthArgs {
    /// Assembly output directory (defaults to `output.directory`, `cdk.out`)
    #[arg(long, short = 'o')]
    pub out: Option<PathBuf>,
}

impl SynthArgs {
    /// Execute the synth command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let out_dir = self
            .out
            .clone()
            .unwrap_or_else(|| ctx.config.output.directory.clone());

        ctx.output.banner("SYNTH");
        ctx.output.info(&format!(
            "Synthesizing {} for {}",
            ctx.config.qualified_name(),
            ctx.config.cpu_architecture()
        ));

        if out_dir.join("manifest.json").is_file() {
            ctx.output.warning(&format!(
                "Overwriting the cloud assembly in {}",
                out_dir.display()
            ));
        }

        let assembly = ctx.synthesize()?;
        let files = assembly.write_to(&out_dir).await?;

        if ctx.output.is_json() {
            let stacks: Vec<_> = assembly
                .stacks()
                .iter()
                .map(|s| {
                    json!({
                        "id": s.id,
                        "stackName": s.stack_name,
                        "resources": s.resources().len(),
                        "templateHash": s.template_hash,
                        "dependencies": s.dependencies,
                    })
                })
                .collect();
            ctx.output.json(&json!({
                "directory": out_dir,
                "version": assembly.version(),
                "stacks": stacks,
                "files": files,
            }))?;
            return Ok(0);
        }

        let rows: Vec<Vec<String>> = assembly
            .stacks()
            .iter()
            .map(|s| {
                vec![
                    s.id.clone(),
                    s.stack_name.clone(),
                    s.resources().len().to_string(),
                    s.dependencies.join(", "),
                ]
            })
            .collect();
        ctx.output.section("Stacks");
        ctx.output
            .table(&["Stack", "Name", "Resources", "Depends on"], &rows);

        for file in &files {
            ctx.output.info(&format!("Wrote {}", file.display()));
        }
        ctx.output.success(&format!(
            "Cloud assembly written to {} in {:.2?}",
            out_dir.display(),
            ctx.output.elapsed()
        ));
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synth_args_defaults() {
        let args = SynthArgs::try_parse_from(["synth"]).unwrap();
        assert!(args.out.is_none());
    }

    #[test]
    fn test_synth_args_with_out() {
        let args = SynthArgs::try_parse_from(["synth", "-o", "build/cdk.out"]).unwrap();
        assert_eq!(args.out, Some(PathBuf::from("build/cdk.out")));
    }
}
