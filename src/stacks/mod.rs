//! The deployment: a network stack and the Next.js application stack.
//!
//! ```text
//! Network-{project}-{environment}          NextJS-{project}-{environment}
//! ┌──────────────────────────────┐         ┌────────────────────────────────────┐
//! │ VPC (dual-stack, 0 NAT)      │◄────────│ task definition + image asset      │
//! │   S3 / DynamoDB endpoints    │         │ Fargate service + autoscaling      │
//! │ ECS cluster (Fargate)        │◄────────│ Cloud Map service (SRV)            │
//! │ private DNS namespace        │◄────────│ HTTP API ─ VPC link ─ service      │
//! └──────────────────────────────┘         │ CloudFront distribution ─ HTTP API │
//!                                          └────────────────────────────────────┘
//! ```
//!
//! Arrows are references; synthesis turns the cross-stack ones into
//! exports of the network stack and imports in the application stack.

pub mod network;
pub mod nextjs;

use tracing::info;

use crate::config::Config;
use crate::construct::{App, AppProps};
use crate::error::Result;

pub use network::Network;

/// Construct id of the network stack.
pub const NETWORK_STACK_ID: &str = "Network";

/// Construct id of the application stack.
pub const NEXTJS_STACK_ID: &str = "NextJS";

/// Port the Next.js server listens on.
pub const CONTAINER_PORT: u16 = 3000;

/// Declare both stacks for `config`.
pub fn build_app(config: &Config) -> Result<App> {
    let synthesizer = config.stack_synthesizer()?;
    let mut app = App::new(AppProps {
        context: config.context(),
        synthesizer: synthesizer.clone(),
    });

    let (network_stack, network) = network::build(config)?;
    let nextjs_stack = nextjs::build(config, &network, &synthesizer)?;
    app.add_stack(network_stack)?;
    app.add_stack(nextjs_stack)?;

    info!(
        project = %config.project.name,
        environment = %config.project.environment,
        arch = %config.cpu_architecture(),
        "declared stacks"
    );
    Ok(app)
}

/// `{prefix}-{project}-{environment}`
pub(crate) fn stack_name(prefix: &str, config: &Config) -> String {
    format!("{}-{}", prefix, config.qualified_name())
}
