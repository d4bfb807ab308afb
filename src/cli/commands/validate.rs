//! Validate command
//!
//! Synthesizes in memory and runs the plan checks against the result.

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use nextjs_infra::validate::check_plan;
use serde_json::json;

/// Arguments for the validate command
#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    /// Only print failed checks
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

impl ValidateArgs {
    /// Execute the validate command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        ctx.output.banner("VALIDATE");

        let assembly = ctx.synthesize()?;
        let report = check_plan(&ctx.config, &assembly);
        let passed = report.passed();

        if ctx.output.is_json() {
            ctx.output.json(&json!({
                "passed": passed,
                "failed": report.failed_count(),
                "checks": report.checks,
            }))?;
        } else {
            ctx.output.section("Plan checks");
            for check in report.checks.iter().filter(|c| !self.quiet || !c.passed) {
                ctx.output.check(check.name, check.passed, &check.detail);
            }
            if passed {
                ctx.output.success(&format!(
                    "All {} checks passed for {}",
                    report.checks.len(),
                    ctx.config.qualified_name()
                ));
            } else {
                ctx.output.error(&format!(
                    "{} of {} checks failed",
                    report.failed_count(),
                    report.checks.len()
                ));
            }
        }

        Ok(match report.into_result() {
            Ok(_) => 0,
            Err(e) => e.exit_code(),
        })
    }
}
