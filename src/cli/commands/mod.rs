//! Subcommands module for nextjs-infra CLI
//!
//! This module contains all the subcommand implementations.

pub mod graph;
pub mod list;
pub mod synth;
pub mod validate;

use crate::cli::output::OutputFormatter;
use nextjs_infra::config::Config;
use nextjs_infra::construct::App;
use nextjs_infra::stacks::build_app;
use nextjs_infra::synth::CloudAssembly;
use tracing::debug;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        let output = OutputFormatter::new(
            config.logging.color && !cli.no_color,
            cli.is_json(),
            cli.verbosity(),
        );

        Self { config, output }
    }

    /// Declare the app for the current configuration
    pub fn app(&self) -> nextjs_infra::Result<App> {
        build_app(&self.config)
    }

    /// Declare and synthesize the app
    pub fn synthesize(&self) -> nextjs_infra::Result<CloudAssembly> {
        let assembly = self.app()?.synth()?;
        debug!(
            stacks = assembly.stacks().len(),
            version = assembly.version(),
            "synthesized cloud assembly"
        );
        Ok(assembly)
    }
}
