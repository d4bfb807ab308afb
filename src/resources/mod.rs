//! Typed constructs for the AWS services the deployment uses.
//!
//! Each construct declares one or more CloudFormation resources in a
//! [`Stack`](crate::construct::Stack), validates its properties at
//! declaration time and hands back a cheap handle whose accessors produce
//! references (`Ref` / `Fn::GetAtt`) for other constructs to consume.
//!
//! ## Available Constructs
//!
//! - [`ec2`]: VPC with subnet tiers, gateways and endpoints; security groups
//! - [`ecs`]: cluster, Fargate task definition, Fargate service, autoscaling
//! - [`iam`]: service roles and inline policies
//! - [`servicediscovery`]: private DNS namespaces and Cloud Map services
//! - [`apigateway`]: HTTP APIs, VPC links and proxy routes
//! - [`cloudfront`]: cache policies, HTTP origins and distributions

pub mod apigateway;
pub mod cloudfront;
pub mod ec2;
pub mod ecs;
pub mod iam;
pub mod servicediscovery;

use crate::construct::Value;
use crate::props;

pub use apigateway::{
    HttpApi, HttpApiProps, HttpMethod, HttpServiceDiscoveryIntegration, VpcLink, VpcLinkProps,
};
pub use cloudfront::{
    AllowedMethods, BehaviorOptions, CachePolicy, CachePolicyProps, CachedMethods, Distribution,
    DistributionProps, HttpOrigin, HttpOriginProps, PriceClass, ViewerProtocolPolicy,
};
pub use ec2::{Port, SecurityGroup, SubnetType, Vpc, VpcProps};
pub use ecs::{Cluster, CpuArchitecture, FargateService, TaskDefinition};
pub use iam::Role;
pub use servicediscovery::{CloudMapService, PrivateDnsNamespace};

/// Render `Key`/`Value` tag pairs the way most resource types take them.
pub(crate) fn tag_list<'a>(tags: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
    Value::list(
        tags.into_iter()
            .map(|(key, value)| props!({ "Key": key, "Value": value })),
    )
}

/// `Name` tag value: the full construct path.
pub(crate) fn name_tag(stack_id: &str, path: &str) -> Value {
    Value::from(format!("{}/{}", stack_id, path))
}
