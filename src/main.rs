//! nextjs-infra - Synthesize the infrastructure of a containerized Next.js app
//!
//! This is the main entry point for the nextjs-infra CLI.

mod cli;

use anyhow::Result;
use cli::commands::CommandContext;
use cli::output::OutputFormatter;
use cli::{Cli, Commands};
use nextjs_infra::config::{Config, LogFormat, LoggingConfig};
use nextjs_infra::Error;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Configuration decides the log format, so it is loaded first
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity())
                .error(&e.to_string());
            std::process::exit(e.exit_code());
        }
    };

    init_logging(cli.verbosity(), &config.logging);
    debug!(version = VERSION, config = ?config, "starting nextjs-infra");

    // Create command context
    let mut ctx = CommandContext::new(&cli, config);

    // Execute the appropriate command
    let result = match &cli.command {
        Commands::Synth(args) => args.execute(&mut ctx).await,
        Commands::List(args) => args.execute(&mut ctx).await,
        Commands::Graph(args) => args.execute(&mut ctx).await,
        Commands::Validate(args) => args.execute(&mut ctx).await,
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            ctx.output.error(&format!("{:#}", e));
            exit_code_for(&e)
        }
    };

    ctx.output.flush();
    std::process::exit(exit_code);
}

/// Defaults, file, environment, then command-line flags
fn load_config(cli: &Cli) -> nextjs_infra::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Initialize logging based on verbosity level
///
/// Logs go to stderr; stdout carries command output only.
fn init_logging(verbosity: u8, logging: &LoggingConfig) {
    let filter = match verbosity {
        0 => logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let registry = tracing_subscriber::registry().with(env_filter);

    match logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(verbosity >= 3)
                    .with_ansi(logging.color)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

/// Library errors keep their category's exit code
fn exit_code_for(error: &anyhow::Error) -> i32 {
    error.downcast_ref::<Error>().map_or(1, Error::exit_code)
}
