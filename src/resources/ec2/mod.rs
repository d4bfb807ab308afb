//! EC2 networking constructs.
//!
//! ## Vpc
//!
//! Declares a VPC with one subnet per availability zone for every configured
//! tier, route tables, an internet gateway for public tiers, optional NAT
//! gateways, an egress-only internet gateway for dual-stack private tiers and
//! gateway endpoints attached to every route table.
//!
//! IPv4 blocks are allocated at synthesis time by [`CidrAllocator`]; IPv6
//! blocks are carved at deploy time from the Amazon-provided /56 with
//! `Fn::Cidr`.
//!
//! ## SecurityGroup
//!
//! Security groups with optional allow-all egress and ingress rules that
//! reference other groups.

mod cidr;
mod security_group;
mod vpc;

pub use cidr::CidrAllocator;
pub use security_group::{Port, Protocol, SecurityGroup, SecurityGroupProps};
pub use vpc::{
    GatewayEndpointService, IpProtocol, Subnet, SubnetConfiguration, SubnetType, Vpc, VpcProps,
};
