//! ECS constructs.
//!
//! - [`Cluster`]: cluster with optional Fargate capacity providers and a
//!   default Cloud Map namespace
//! - [`TaskDefinition`]: task shape, runtime platform, containers and roles
//! - [`FargateService`]: the running service, its networking, Cloud Map
//!   registration and autoscaling

mod cluster;
mod scaling;
mod service;
mod task_definition;

pub use cluster::{CloudMapNamespaceOptions, Cluster, ClusterProps};
pub use scaling::{CpuUtilizationScalingProps, ScalableTaskCount, ScalingBounds};
pub use service::{
    CapacityProviderStrategy, CloudMapOptions, DeploymentCircuitBreaker, FargateService,
    FargateServiceProps, PropagatedTagSource,
};
pub use task_definition::{
    validate_fargate_shape, Compatibility, ContainerDefinitionOptions, ContainerImage,
    CpuArchitecture, PortMapping, TaskDefinition, TaskDefinitionProps,
};
