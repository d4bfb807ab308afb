//! Security groups.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::vpc::Vpc;
use crate::construct::{ResourceRef, Stack, Value};
use crate::error::{Error, Result};
use crate::props;

/// IP protocol of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// Every protocol
    All,
}

impl Protocol {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::All => "-1",
        }
    }
}

/// A port range of one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// Protocol
    pub protocol: Protocol,
    /// First port
    pub from_port: u16,
    /// Last port
    pub to_port: u16,
}

impl Port {
    /// A single TCP port.
    pub fn tcp(port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from_port: port,
            to_port: port,
        }
    }

    /// A TCP port range.
    pub fn tcp_range(from_port: u16, to_port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from_port,
            to_port,
        }
    }

    /// A single UDP port.
    pub fn udp(port: u16) -> Self {
        Self {
            protocol: Protocol::Udp,
            from_port: port,
            to_port: port,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from_port == self.to_port {
            write!(f, "{} {}", self.protocol.as_str(), self.from_port)
        } else {
            write!(
                f,
                "{} {}-{}",
                self.protocol.as_str(),
                self.from_port,
                self.to_port
            )
        }
    }
}

/// Options for [`SecurityGroup::new`].
#[derive(Debug, Clone)]
pub struct SecurityGroupProps {
    /// Group description; defaults to the construct path
    pub description: Option<String>,
    /// Allow all outbound IPv4 traffic
    pub allow_all_outbound: bool,
    /// Allow all outbound IPv6 traffic
    pub allow_all_ipv6_outbound: bool,
}

impl Default for SecurityGroupProps {
    fn default() -> Self {
        Self {
            description: None,
            allow_all_outbound: true,
            allow_all_ipv6_outbound: false,
        }
    }
}

/// Handle to a declared security group.
#[derive(Debug, Clone)]
pub struct SecurityGroup {
    id: String,
    resource: ResourceRef,
}

impl SecurityGroup {
    /// Declare a security group in `vpc`.
    pub fn new(stack: &mut Stack, id: &str, vpc: &Vpc, props: SecurityGroupProps) -> Result<Self> {
        let description = props
            .description
            .unwrap_or_else(|| format!("{}/{}", stack.id(), id));
        if description.len() > 255 {
            return Err(Error::validation(id, "description exceeds 255 characters"));
        }

        let mut egress = Vec::new();
        if props.allow_all_outbound {
            egress.push(props!({
                "CidrIp": "0.0.0.0/0",
                "Description": "Allow all outbound traffic by default",
                "IpProtocol": "-1",
            }));
        }
        if props.allow_all_ipv6_outbound {
            egress.push(props!({
                "CidrIpv6": "::/0",
                "Description": "Allow all outbound ipv6 traffic by default",
                "IpProtocol": "-1",
            }));
        }
        if egress.is_empty() {
            // A group without rules gets AWS's implicit allow-all; block it.
            egress.push(props!({
                "CidrIp": "255.255.255.255/32",
                "Description": "Disallow all traffic",
                "FromPort": 252,
                "IpProtocol": "icmp",
                "ToPort": 86,
            }));
        }

        let resource = stack.add_resource(
            &format!("{}/Resource", id),
            "AWS::EC2::SecurityGroup",
            props!({
                "GroupDescription": description,
                "SecurityGroupEgress": egress,
                "VpcId": vpc.vpc_id(),
            }),
        )?;

        Ok(Self {
            id: id.to_string(),
            resource,
        })
    }

    /// The group id.
    pub fn group_id(&self) -> Value {
        self.resource.attr("GroupId")
    }

    /// The declared resource.
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    /// Allow `port` from members of `source`.
    ///
    /// The rule is declared as a separate ingress resource in `stack` so the
    /// two groups can live in different stacks.
    pub fn allow_from(
        &self,
        stack: &mut Stack,
        source: &SecurityGroup,
        port: Port,
        description: &str,
    ) -> Result<ResourceRef> {
        if port.from_port > port.to_port {
            return Err(Error::validation(
                &self.id,
                format!("invalid port range {}", port),
            ));
        }
        stack.add_resource(
            &format!(
                "{}/from {}:{}",
                self.id, source.resource.logical_id, port.from_port
            ),
            "AWS::EC2::SecurityGroupIngress",
            props!({
                "Description": description,
                "FromPort": port.from_port,
                "GroupId": self.group_id(),
                "IpProtocol": port.protocol.as_str(),
                "SourceSecurityGroupId": source.group_id(),
                "ToPort": port.to_port,
            }),
        )
    }
}
