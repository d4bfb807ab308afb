//! # nextjs-infra - Infrastructure for a containerized Next.js app
//!
//! nextjs-infra declares two CloudFormation stacks and synthesizes them into a
//! cloud assembly: a network stack holding the VPC, the ECS cluster and its
//! private DNS namespace, and an application stack running the Next.js
//! container on Fargate behind an HTTP API and a CloudFront distribution.
//!
//! ## Core Concepts
//!
//! - **Stacks**: Named collections of resources deployed together
//! - **Resources**: Typed declarations rendered to CloudFormation
//! - **Values**: Literals plus intrinsic functions (`Ref`, `Fn::GetAtt`, ...)
//! - **Assets**: The Docker build context, fingerprinted at synthesis
//! - **Cloud Assembly**: Templates and manifests written for deployment
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                              │
//! │              (synth, list, graph, validate via clap)                 │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Configuration + Stacks                           │
//! │            (file, environment and flags → Network, NextJS)           │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!          ┌─────────────────────────┼─────────────────────────┐
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │    Resources    │   │   Construct layer   │   │     Dependency      │
//! │ (ec2, ecs, api, │   │  (values, logical   │   │       graph         │
//! │   cloudfront)   │   │   ids, templates)   │   │     (petgraph)      │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!          │                         │                         │
//!          └─────────────────────────┼─────────────────────────┘
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Cloud Assembly                               │
//! │          (templates, asset manifests, manifest.json)                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use nextjs_infra::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let config = Config::load(None)?;
//! let assembly = build_app(&config)?.synth()?;
//!
//! let report = check_plan(&config, &assembly);
//! assert!(report.passed());
//!
//! assembly.write_to(&config.output.directory).await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::config::Config;
    pub use crate::construct::{App, AppProps, Stack, StackProps, Value};
    pub use crate::error::{Error, ErrorContext, Result};
    pub use crate::stacks::build_app;
    pub use crate::synth::{CloudAssembly, DefaultStackSynthesizer, StackArtifact};
    pub use crate::validate::{check_plan, PlanReport};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases.
pub mod error;

/// Configuration loading from files, environment and flags.
pub mod config;

// ============================================================================
// Declaration
// ============================================================================

/// Apps, stacks, resources, values and the dependency graph.
///
/// This is the layer every resource type builds on: logical ids are derived
/// from construct paths, values carry intrinsic functions, and cross-stack
/// references become export/import pairs at synthesis.
pub mod construct;

/// Typed resource declarations.
///
/// Each submodule covers one service:
/// - **ec2**: VPC, subnets, gateway endpoints, security groups
/// - **ecs**: cluster, task definition, Fargate service, autoscaling
/// - **apigateway**: HTTP API, VPC link, Cloud Map integration
/// - **cloudfront**: cache policy, HTTP origin, distribution
/// - **iam** and **servicediscovery**: roles and DNS namespaces
pub mod resources;

/// The two stacks of the deployment.
pub mod stacks;

// ============================================================================
// Output
// ============================================================================

/// Synthesis: stack synthesizer, Docker image assets and the cloud assembly.
pub mod synth;

/// Plan checks over a synthesized assembly.
pub mod validate;

pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
