//! CLI module for nextjs-infra
//!
//! This module provides the command-line interface: argument parsing,
//! configuration overrides and subcommand handling.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use nextjs_infra::config::Config;
use std::path::PathBuf;

/// nextjs-infra - Synthesize the infrastructure of a containerized Next.js app
///
/// Declares a network stack and an application stack and writes them out as
/// a cloud assembly ready for deployment.
#[derive(Parser, Debug, Clone)]
#[command(name = "nextjs-infra")]
#[command(version)]
#[command(about = "Synthesize the infrastructure of a containerized Next.js app", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "NEXTJS_INFRA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Project name (overrides PROJECT_NAME)
    #[arg(long, global = true)]
    pub project: Option<String>,

    /// Environment tag (overrides ENVIRONMENT)
    #[arg(long, global = true)]
    pub environment: Option<String>,

    /// CPU architecture selector; `x86` selects X86_64, anything else ARM64
    #[arg(long, global = true)]
    pub cpu_arch: Option<String>,

    /// Docker build context of the application image
    #[arg(long, global = true)]
    pub asset_dir: Option<PathBuf>,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON output for scripting
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Synthesize both stacks and write the cloud assembly
    Synth(commands::synth::SynthArgs),

    /// List stacks in deployment order
    List(commands::list::ListArgs),

    /// Print the resource dependency graph
    Graph(commands::graph::GraphArgs),

    /// Synthesize in memory and run the plan checks
    Validate(commands::validate::ValidateArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-4)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(4)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }

    /// Apply the flags that override configuration values
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(project) = &self.project {
            config.project.name = project.clone();
        }
        if let Some(environment) = &self.environment {
            config.project.environment = environment.clone();
        }
        if let Some(arch) = &self.cpu_arch {
            config.project.cpu_arch = Some(arch.clone());
        }
        if let Some(dir) = &self.asset_dir {
            config.assets.directory = dir.clone();
        }
        if self.no_color {
            config.logging.color = false;
        }
    }
}
