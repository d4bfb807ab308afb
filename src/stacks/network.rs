//! The network stack: VPC, ECS cluster and the cluster's DNS namespace.

use indexmap::IndexMap;
use tracing::debug;

use super::{stack_name, NETWORK_STACK_ID};
use crate::config::Config;
use crate::construct::{Stack, StackProps};
use crate::error::Result;
use crate::resources::ec2::{
    GatewayEndpointService, IpProtocol, SubnetConfiguration, SubnetType, Vpc, VpcProps,
};
use crate::resources::ecs::{CloudMapNamespaceOptions, Cluster, ClusterProps};

const VPC_CIDR: &str = "10.0.0.0/16";

/// Handles the application stack builds on.
#[derive(Debug, Clone)]
pub struct Network {
    /// The VPC
    pub vpc: Vpc,
    /// The cluster, with its default Cloud Map namespace
    pub cluster: Cluster,
}

/// Network layout shared by every environment.
pub fn vpc_props() -> Result<VpcProps> {
    let mut props = VpcProps::new(VPC_CIDR)?;
    props.max_azs = 2;
    // Address space for two more zones stays free for later.
    props.reserved_azs = 4;
    props.ip_protocol = IpProtocol::DualStack;
    props.enable_dns_hostnames = true;
    props.enable_dns_support = true;
    props.subnet_configuration = vec![
        SubnetConfiguration {
            map_public_ip_on_launch: Some(true),
            ..SubnetConfiguration::new("Public", SubnetType::Public, 20)
        },
        SubnetConfiguration::new("Private", SubnetType::PrivateWithEgress, 20),
        SubnetConfiguration::new("Isolated", SubnetType::PrivateIsolated, 24),
    ];
    props.nat_gateways = 0;
    props.gateway_endpoints = IndexMap::from([
        ("S3".to_string(), GatewayEndpointService::S3),
        ("DynamoDB".to_string(), GatewayEndpointService::DynamoDb),
    ]);
    Ok(props)
}

/// Declare the network stack.
pub fn build(config: &Config) -> Result<(Stack, Network)> {
    let mut stack = Stack::new(
        NETWORK_STACK_ID,
        StackProps {
            stack_name: Some(stack_name(NETWORK_STACK_ID, config)),
            env: config.stack_env(),
            description: None,
        },
    )?;

    let vpc = Vpc::new(&mut stack, "Vpc", vpc_props()?)?;

    let mut cluster = Cluster::new(
        &mut stack,
        "Cluster",
        &vpc,
        ClusterProps {
            cluster_name: Some(config.qualified_name()),
            enable_fargate_capacity_providers: true,
        },
    )?;
    cluster.add_default_cloud_map_namespace(
        &mut stack,
        CloudMapNamespaceOptions {
            name: format!("{}.internal", config.qualified_name()),
            use_for_service_connect: true,
        },
    )?;

    debug!(
        stack = stack.stack_name(),
        resources = stack.resources().count(),
        "network stack declared"
    );
    Ok((stack, Network { vpc, cluster }))
}
