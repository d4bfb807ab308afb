//! The VPC construct.

use std::fmt;

use indexmap::IndexMap;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::cidr::CidrAllocator;
use crate::construct::{ResourceRef, Stack, Value};
use crate::error::{Error, Result};
use crate::props;
use crate::resources::{name_tag, tag_list};

const MIN_CIDR_MASK: u8 = 16;
const MAX_CIDR_MASK: u8 = 28;
/// `Fn::Cidr` carves at most this many blocks.
const MAX_IPV6_SUBNETS: usize = 256;

/// Reachability class of a subnet tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubnetType {
    /// Routed to the internet gateway
    Public,
    /// Outbound access through NAT (IPv4) or an egress-only gateway (IPv6)
    PrivateWithEgress,
    /// No route out of the VPC
    PrivateIsolated,
}

impl SubnetType {
    /// Value of the `aws-cdk:subnet-type` tag.
    pub fn tag_value(&self) -> &'static str {
        match self {
            SubnetType::Public => "Public",
            SubnetType::PrivateWithEgress => "Private",
            SubnetType::PrivateIsolated => "Isolated",
        }
    }
}

impl fmt::Display for SubnetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubnetType::Public => "public",
            SubnetType::PrivateWithEgress => "private-with-egress",
            SubnetType::PrivateIsolated => "isolated",
        })
    }
}

/// Address families of the VPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IpProtocol {
    /// IPv4 only
    #[default]
    Ipv4Only,
    /// IPv4 plus an Amazon-provided IPv6 block
    DualStack,
}

/// One subnet tier, instantiated once per availability zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetConfiguration {
    /// Tier name, used in construct paths (`{name}Subnet{n}`)
    pub name: String,
    /// Reachability class
    pub subnet_type: SubnetType,
    /// IPv4 prefix length of each subnet
    pub cidr_mask: u8,
    /// Map a public IPv4 address on launch; only valid for public tiers
    pub map_public_ip_on_launch: Option<bool>,
}

impl SubnetConfiguration {
    /// A tier with default launch behavior.
    pub fn new(name: impl Into<String>, subnet_type: SubnetType, cidr_mask: u8) -> Self {
        Self {
            name: name.into(),
            subnet_type,
            cidr_mask,
            map_public_ip_on_launch: None,
        }
    }
}

/// AWS services reachable through a gateway endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatewayEndpointService {
    /// Amazon S3
    S3,
    /// Amazon DynamoDB
    DynamoDb,
}

impl GatewayEndpointService {
    /// Short service name as used in `com.amazonaws.{region}.{name}`.
    pub fn short_name(&self) -> &'static str {
        match self {
            GatewayEndpointService::S3 => "s3",
            GatewayEndpointService::DynamoDb => "dynamodb",
        }
    }

    fn service_name(&self) -> Value {
        Value::join(
            "",
            vec![
                "com.amazonaws.".into(),
                Value::region(),
                format!(".{}", self.short_name()).into(),
            ],
        )
    }
}

/// Options for [`Vpc::new`].
#[derive(Debug, Clone)]
pub struct VpcProps {
    /// IPv4 range of the VPC
    pub cidr: Ipv4Net,
    /// Availability zones that get subnets
    pub max_azs: usize,
    /// Zones whose address space is reserved in every tier; only the first
    /// `max_azs` get subnets
    pub reserved_azs: usize,
    /// Address families
    pub ip_protocol: IpProtocol,
    /// Instances get public DNS hostnames
    pub enable_dns_hostnames: bool,
    /// The Amazon DNS server is enabled
    pub enable_dns_support: bool,
    /// Subnet tiers, allocated in this order
    pub subnet_configuration: Vec<SubnetConfiguration>,
    /// NAT gateways to place in public subnets
    pub nat_gateways: usize,
    /// Gateway endpoints keyed by construct id
    pub gateway_endpoints: IndexMap<String, GatewayEndpointService>,
}

impl VpcProps {
    /// A two-zone IPv4 VPC with one public and one isolated /24 tier.
    pub fn new(cidr: &str) -> Result<Self> {
        let cidr = cidr
            .parse()
            .map_err(|e| Error::validation("Vpc", format!("invalid CIDR '{}': {}", cidr, e)))?;
        Ok(Self {
            cidr,
            max_azs: 2,
            reserved_azs: 0,
            ip_protocol: IpProtocol::Ipv4Only,
            enable_dns_hostnames: true,
            enable_dns_support: true,
            subnet_configuration: vec![
                SubnetConfiguration::new("Public", SubnetType::Public, 24),
                SubnetConfiguration::new("Isolated", SubnetType::PrivateIsolated, 24),
            ],
            nat_gateways: 0,
            gateway_endpoints: IndexMap::new(),
        })
    }
}

/// A subnet declared by a [`Vpc`].
#[derive(Debug, Clone)]
pub struct Subnet {
    /// Construct name, e.g. `PublicSubnet1`
    pub name: String,
    /// Tier name
    pub group: String,
    /// Reachability class
    pub subnet_type: SubnetType,
    /// Zero-based availability zone index
    pub az_index: usize,
    /// Allocated IPv4 block
    pub ipv4_cidr: Ipv4Net,
    /// `AWS::EC2::Subnet`
    pub subnet: ResourceRef,
    /// `AWS::EC2::RouteTable`
    pub route_table: ResourceRef,
}

impl Subnet {
    /// The subnet id.
    pub fn subnet_id(&self) -> Value {
        self.subnet.reference()
    }

    /// The route table id.
    pub fn route_table_id(&self) -> Value {
        self.route_table.reference()
    }
}

/// Handle to a declared VPC.
#[derive(Debug, Clone)]
pub struct Vpc {
    resource: ResourceRef,
    cidr: Ipv4Net,
    ip_protocol: IpProtocol,
    subnets: Vec<Subnet>,
    internet_gateway: Option<ResourceRef>,
    egress_only_gateway: Option<ResourceRef>,
    nat_gateways: Vec<ResourceRef>,
    gateway_endpoints: IndexMap<String, (GatewayEndpointService, ResourceRef)>,
}

impl Vpc {
    /// Declare the VPC `id` and everything it owns in `stack`.
    pub fn new(stack: &mut Stack, id: &str, props: VpcProps) -> Result<Self> {
        validate(id, &props)?;

        let stack_id = stack.id().to_string();
        let dual_stack = props.ip_protocol == IpProtocol::DualStack;

        let resource = stack.add_resource(
            &format!("{}/Resource", id),
            "AWS::EC2::VPC",
            props!({
                "CidrBlock": props.cidr.to_string(),
                "EnableDnsHostnames": props.enable_dns_hostnames,
                "EnableDnsSupport": props.enable_dns_support,
                "InstanceTenancy": "default",
                "Tags": tag_list([("Name", name_tag(&stack_id, id))]),
            }),
        )?;

        let ipv6_block = if dual_stack {
            Some(stack.add_resource(
                &format!("{}/ipv6cidr", id),
                "AWS::EC2::VPCCidrBlock",
                props!({
                    "AmazonProvidedIpv6CidrBlock": true,
                    "VpcId": resource.reference(),
                }),
            )?)
        } else {
            None
        };

        let has_public = props
            .subnet_configuration
            .iter()
            .any(|c| c.subnet_type == SubnetType::Public);
        let has_private = props
            .subnet_configuration
            .iter()
            .any(|c| c.subnet_type == SubnetType::PrivateWithEgress);

        let (internet_gateway, gateway_attachment) = if has_public {
            let igw = stack.add_resource(
                &format!("{}/IGW", id),
                "AWS::EC2::InternetGateway",
                props!({ "Tags": tag_list([("Name", name_tag(&stack_id, id))]) }),
            )?;
            let attachment = stack.add_resource(
                &format!("{}/VPCGW", id),
                "AWS::EC2::VPCGatewayAttachment",
                props!({
                    "InternetGatewayId": igw.reference(),
                    "VpcId": resource.reference(),
                }),
            )?;
            (Some(igw), Some(attachment))
        } else {
            (None, None)
        };

        let egress_only_gateway = if dual_stack && has_private {
            Some(stack.add_resource(
                &format!("{}/EIGW6", id),
                "AWS::EC2::EgressOnlyInternetGateway",
                props!({ "VpcId": resource.reference() }),
            )?)
        } else {
            None
        };

        let total_subnets = props.subnet_configuration.len() * props.max_azs;
        let mut allocator = CidrAllocator::new(props.cidr);
        let mut subnets = Vec::with_capacity(total_subnets);

        for config in &props.subnet_configuration {
            let blocks =
                allocator.allocate_many(config.cidr_mask, props.max_azs.max(props.reserved_azs))?;

            for (az_index, block) in blocks.into_iter().take(props.max_azs).enumerate() {
                let name = format!("{}Subnet{}", config.name, az_index + 1);
                let path = format!("{}/{}", id, name);
                let map_public_ip = config
                    .map_public_ip_on_launch
                    .unwrap_or(config.subnet_type == SubnetType::Public);

                let mut subnet_props = props!({
                    "AvailabilityZone": Value::select(az_index, Value::get_azs()),
                    "CidrBlock": block.to_string(),
                    "MapPublicIpOnLaunch": map_public_ip,
                    "Tags": tag_list([
                        ("aws-cdk:subnet-name", Value::from(config.name.as_str())),
                        ("aws-cdk:subnet-type", Value::from(config.subnet_type.tag_value())),
                        ("Name", name_tag(&stack_id, &path)),
                    ]),
                    "VpcId": resource.reference(),
                });
                if dual_stack {
                    subnet_props.insert("AssignIpv6AddressOnCreation", true);
                    subnet_props.insert(
                        "Ipv6CidrBlock",
                        Value::select(
                            subnets.len(),
                            Value::cidr(
                                Value::select(0, resource.attr("Ipv6CidrBlocks")),
                                total_subnets,
                                64,
                            ),
                        ),
                    );
                }

                let subnet = stack.add_resource(
                    &format!("{}/Subnet", path),
                    "AWS::EC2::Subnet",
                    subnet_props,
                )?;
                if let Some(block) = &ipv6_block {
                    stack.add_dependency(&subnet, block)?;
                }

                let route_table = stack.add_resource(
                    &format!("{}/RouteTable", path),
                    "AWS::EC2::RouteTable",
                    props!({
                        "Tags": tag_list([("Name", name_tag(&stack_id, &path))]),
                        "VpcId": resource.reference(),
                    }),
                )?;
                stack.add_resource(
                    &format!("{}/RouteTableAssociation", path),
                    "AWS::EC2::SubnetRouteTableAssociation",
                    props!({
                        "RouteTableId": route_table.reference(),
                        "SubnetId": subnet.reference(),
                    }),
                )?;

                debug!(subnet = %name, cidr = %block, kind = %config.subnet_type, "allocated subnet");

                subnets.push(Subnet {
                    name,
                    group: config.name.clone(),
                    subnet_type: config.subnet_type,
                    az_index,
                    ipv4_cidr: block,
                    subnet,
                    route_table,
                });
            }
        }

        // Public routes.
        if let (Some(igw), Some(attachment)) = (&internet_gateway, &gateway_attachment) {
            for subnet in subnets.iter().filter(|s| s.subnet_type == SubnetType::Public) {
                let path = format!("{}/{}", id, subnet.name);
                let route = stack.add_resource(
                    &format!("{}/DefaultRoute", path),
                    "AWS::EC2::Route",
                    props!({
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "GatewayId": igw.reference(),
                        "RouteTableId": subnet.route_table_id(),
                    }),
                )?;
                stack.add_dependency(&route, attachment)?;

                if dual_stack {
                    stack.add_resource(
                        &format!("{}/DefaultRoute6", path),
                        "AWS::EC2::Route",
                        props!({
                            "DestinationIpv6CidrBlock": "::/0",
                            "GatewayId": igw.reference(),
                            "RouteTableId": subnet.route_table_id(),
                        }),
                    )?;
                }
            }
        }

        // NAT gateways go into the first public subnets.
        let mut nat_gateways = Vec::with_capacity(props.nat_gateways);
        let public: Vec<&Subnet> = subnets
            .iter()
            .filter(|s| s.subnet_type == SubnetType::Public)
            .collect();
        for subnet in public.iter().take(props.nat_gateways) {
            let path = format!("{}/{}", id, subnet.name);
            let eip = stack.add_resource(
                &format!("{}/EIP", path),
                "AWS::EC2::EIP",
                props!({
                    "Domain": "vpc",
                    "Tags": tag_list([("Name", name_tag(&stack_id, &path))]),
                }),
            )?;
            let nat = stack.add_resource(
                &format!("{}/NATGateway", path),
                "AWS::EC2::NatGateway",
                props!({
                    "AllocationId": eip.attr("AllocationId"),
                    "SubnetId": subnet.subnet_id(),
                    "Tags": tag_list([("Name", name_tag(&stack_id, &path))]),
                }),
            )?;
            nat_gateways.push(nat);
        }

        // Private egress: NAT for IPv4, egress-only gateway for IPv6.
        let private: Vec<&Subnet> = subnets
            .iter()
            .filter(|s| s.subnet_type == SubnetType::PrivateWithEgress)
            .collect();
        for (i, subnet) in private.iter().enumerate() {
            let path = format!("{}/{}", id, subnet.name);
            if !nat_gateways.is_empty() {
                stack.add_resource(
                    &format!("{}/DefaultRoute", path),
                    "AWS::EC2::Route",
                    props!({
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "NatGatewayId": nat_gateways[i % nat_gateways.len()].reference(),
                        "RouteTableId": subnet.route_table_id(),
                    }),
                )?;
            }
            if let Some(eigw) = &egress_only_gateway {
                stack.add_resource(
                    &format!("{}/DefaultRoute6", path),
                    "AWS::EC2::Route",
                    props!({
                        "DestinationIpv6CidrBlock": "::/0",
                        "EgressOnlyInternetGatewayId": eigw.reference(),
                        "RouteTableId": subnet.route_table_id(),
                    }),
                )?;
            }
        }

        let mut gateway_endpoints = IndexMap::new();
        for (endpoint_id, service) in &props.gateway_endpoints {
            let route_tables: Vec<Value> = subnets.iter().map(Subnet::route_table_id).collect();
            let endpoint = stack.add_resource(
                &format!("{}/{}/Resource", id, endpoint_id),
                "AWS::EC2::VPCEndpoint",
                props!({
                    "RouteTableIds": route_tables,
                    "ServiceName": service.service_name(),
                    "VpcEndpointType": "Gateway",
                    "VpcId": resource.reference(),
                }),
            )?;
            gateway_endpoints.insert(endpoint_id.clone(), (*service, endpoint));
        }

        info!(
            vpc = id,
            cidr = %props.cidr,
            subnets = subnets.len(),
            nat_gateways = nat_gateways.len(),
            endpoints = gateway_endpoints.len(),
            "declared VPC"
        );

        Ok(Self {
            resource,
            cidr: props.cidr,
            ip_protocol: props.ip_protocol,
            subnets,
            internet_gateway,
            egress_only_gateway,
            nat_gateways,
            gateway_endpoints,
        })
    }

    /// The VPC id.
    pub fn vpc_id(&self) -> Value {
        self.resource.reference()
    }

    /// The VPC's primary IPv4 block, as a deploy-time attribute.
    pub fn vpc_cidr_block(&self) -> Value {
        self.resource.attr("CidrBlock")
    }

    /// The declared `AWS::EC2::VPC` resource.
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    /// The IPv4 range the VPC was declared with.
    pub fn cidr(&self) -> Ipv4Net {
        self.cidr
    }

    /// Address families.
    pub fn ip_protocol(&self) -> IpProtocol {
        self.ip_protocol
    }

    /// Every subnet, tier by tier.
    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    /// Subnets of one class.
    pub fn select_subnets(&self, subnet_type: SubnetType) -> Vec<&Subnet> {
        self.subnets
            .iter()
            .filter(|s| s.subnet_type == subnet_type)
            .collect()
    }

    /// Subnet ids of one class.
    pub fn subnet_ids(&self, subnet_type: SubnetType) -> Vec<Value> {
        self.select_subnets(subnet_type)
            .into_iter()
            .map(Subnet::subnet_id)
            .collect()
    }

    /// The internet gateway, when the VPC has public subnets.
    pub fn internet_gateway(&self) -> Option<&ResourceRef> {
        self.internet_gateway.as_ref()
    }

    /// The egress-only internet gateway of a dual-stack VPC with private subnets.
    pub fn egress_only_gateway(&self) -> Option<&ResourceRef> {
        self.egress_only_gateway.as_ref()
    }

    /// Declared NAT gateways.
    pub fn nat_gateways(&self) -> &[ResourceRef] {
        &self.nat_gateways
    }

    /// Declared gateway endpoints by construct id.
    pub fn gateway_endpoints(&self) -> impl Iterator<Item = (&str, GatewayEndpointService)> {
        self.gateway_endpoints
            .iter()
            .map(|(id, (service, _))| (id.as_str(), *service))
    }
}

fn validate(id: &str, props: &VpcProps) -> Result<()> {
    let fail = |message: String| Err(Error::validation(id, message));

    let prefix = props.cidr.prefix_len();
    if !(MIN_CIDR_MASK..=MAX_CIDR_MASK).contains(&prefix) {
        return fail(format!(
            "VPC CIDR prefix must be between /{} and /{}, got /{}",
            MIN_CIDR_MASK, MAX_CIDR_MASK, prefix
        ));
    }
    if props.max_azs == 0 {
        return fail("max_azs must be at least 1".into());
    }
    if props.subnet_configuration.is_empty() {
        return fail("at least one subnet configuration is required".into());
    }

    let mut names = Vec::with_capacity(props.subnet_configuration.len());
    for config in &props.subnet_configuration {
        if config.name.is_empty() || !config.name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return fail(format!(
                "subnet group name '{}' must be non-empty and alphanumeric",
                config.name
            ));
        }
        if names.contains(&config.name.as_str()) {
            return fail(format!("duplicate subnet group name '{}'", config.name));
        }
        names.push(config.name.as_str());

        if config.cidr_mask < prefix.max(MIN_CIDR_MASK) || config.cidr_mask > MAX_CIDR_MASK {
            return fail(format!(
                "subnet group '{}' mask /{} must be between /{} and /{}",
                config.name,
                config.cidr_mask,
                prefix.max(MIN_CIDR_MASK),
                MAX_CIDR_MASK
            ));
        }
        if config.map_public_ip_on_launch == Some(true) && config.subnet_type != SubnetType::Public
        {
            return fail(format!(
                "subnet group '{}' maps public IPs but is {}",
                config.name, config.subnet_type
            ));
        }
    }

    let public_subnets = props
        .subnet_configuration
        .iter()
        .filter(|c| c.subnet_type == SubnetType::Public)
        .count()
        * props.max_azs;
    if props.nat_gateways > public_subnets {
        return fail(format!(
            "{} NAT gateways requested but only {} public subnets exist",
            props.nat_gateways, public_subnets
        ));
    }

    let has_private = props
        .subnet_configuration
        .iter()
        .any(|c| c.subnet_type == SubnetType::PrivateWithEgress);
    if has_private && props.nat_gateways == 0 && props.ip_protocol == IpProtocol::Ipv4Only {
        return fail(
            "private-with-egress subnets need NAT gateways or a dual-stack VPC".into(),
        );
    }

    if props.ip_protocol == IpProtocol::DualStack
        && props.subnet_configuration.len() * props.max_azs > MAX_IPV6_SUBNETS
    {
        return fail(format!("at most {} IPv6 subnets can be carved", MAX_IPV6_SUBNETS));
    }

    Ok(())
}
