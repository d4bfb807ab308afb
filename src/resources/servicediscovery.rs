//! Cloud Map: private DNS namespaces and discoverable services.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::construct::{ResourceRef, Stack, Value};
use crate::error::{Error, Result};
use crate::props;

const MAX_DNS_TTL_SECS: u64 = 2_147_483_647;

/// DNS record type registered for each instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsRecordType {
    /// IPv4 address
    A,
    /// IPv6 address
    Aaaa,
    /// IPv4 and IPv6 addresses
    AAndAaaa,
    /// Host and port
    Srv,
    /// Alias
    Cname,
}

impl DnsRecordType {
    fn records(&self) -> &'static [&'static str] {
        match self {
            DnsRecordType::A => &["A"],
            DnsRecordType::Aaaa => &["AAAA"],
            DnsRecordType::AAndAaaa => &["A", "AAAA"],
            DnsRecordType::Srv => &["SRV"],
            DnsRecordType::Cname => &["CNAME"],
        }
    }
}

/// How Route 53 answers queries for the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoutingPolicy {
    /// Up to eight healthy records
    #[default]
    Multivalue,
    /// One random healthy record
    Weighted,
}

impl RoutingPolicy {
    fn as_str(&self) -> &'static str {
        match self {
            RoutingPolicy::Multivalue => "MULTIVALUE",
            RoutingPolicy::Weighted => "WEIGHTED",
        }
    }
}

/// A private DNS namespace bound to a VPC.
#[derive(Debug, Clone)]
pub struct PrivateDnsNamespace {
    name: String,
    resource: ResourceRef,
}

impl PrivateDnsNamespace {
    /// Declare the namespace `name` at `path`, resolvable inside `vpc_id`.
    pub fn new(stack: &mut Stack, path: &str, name: &str, vpc_id: Value) -> Result<Self> {
        validate_dns_name(path, name)?;
        let resource = stack.add_resource(
            &format!("{}/Resource", path),
            "AWS::ServiceDiscovery::PrivateDnsNamespace",
            props!({
                "Name": name,
                "Vpc": vpc_id,
            }),
        )?;
        Ok(Self {
            name: name.to_string(),
            resource,
        })
    }

    /// The namespace name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The namespace id.
    pub fn namespace_id(&self) -> Value {
        self.resource.attr("Id")
    }

    /// The namespace ARN.
    pub fn namespace_arn(&self) -> Value {
        self.resource.attr("Arn")
    }

    /// The declared resource.
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }
}

/// Options for [`CloudMapService::new`].
#[derive(Debug, Clone)]
pub struct CloudMapServiceProps {
    /// Service name inside the namespace
    pub name: String,
    /// Record type
    pub dns_record_type: DnsRecordType,
    /// Record TTL
    pub dns_ttl: Duration,
    /// Answer policy
    pub routing_policy: RoutingPolicy,
    /// Failed custom health checks before an instance is unhealthy
    pub failure_threshold: Option<u32>,
}

/// A Cloud Map service.
#[derive(Debug, Clone)]
pub struct CloudMapService {
    name: String,
    record_type: DnsRecordType,
    resource: ResourceRef,
}

impl CloudMapService {
    /// Declare a service at `path` in `namespace`.
    pub fn new(
        stack: &mut Stack,
        path: &str,
        namespace: &PrivateDnsNamespace,
        props: CloudMapServiceProps,
    ) -> Result<Self> {
        validate_dns_name(path, &props.name)?;
        let ttl = props.dns_ttl.as_secs();
        if ttl > MAX_DNS_TTL_SECS {
            return Err(Error::validation(
                path,
                format!("DNS TTL must be at most {} seconds", MAX_DNS_TTL_SECS),
            ));
        }
        if props.dns_record_type == DnsRecordType::Cname
            && props.routing_policy == RoutingPolicy::Multivalue
        {
            return Err(Error::validation(
                path,
                "CNAME records cannot use multivalue routing",
            ));
        }
        if let Some(threshold) = props.failure_threshold {
            if !(1..=10).contains(&threshold) {
                return Err(Error::validation(
                    path,
                    "failure threshold must be between 1 and 10",
                ));
            }
        }

        let records: Vec<Value> = props
            .dns_record_type
            .records()
            .iter()
            .map(|record| props!({ "TTL": ttl, "Type": *record }))
            .collect();

        let mut properties = props!({
            "DnsConfig": props!({
                "DnsRecords": records,
                "NamespaceId": namespace.namespace_id(),
                "RoutingPolicy": props.routing_policy.as_str(),
            }),
            "Name": props.name.as_str(),
            "NamespaceId": namespace.namespace_id(),
        });
        if let Some(threshold) = props.failure_threshold {
            properties.insert(
                "HealthCheckCustomConfig",
                props!({ "FailureThreshold": threshold }),
            );
        }

        let resource = stack.add_resource(
            &format!("{}/Resource", path),
            "AWS::ServiceDiscovery::Service",
            properties,
        )?;
        Ok(Self {
            name: props.name,
            record_type: props.dns_record_type,
            resource,
        })
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record type.
    pub fn record_type(&self) -> DnsRecordType {
        self.record_type
    }

    /// The service ARN.
    pub fn service_arn(&self) -> Value {
        self.resource.attr("Arn")
    }

    /// The declared resource.
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }
}

fn validate_dns_name(path: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 253
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(Error::validation(path, format!("invalid DNS name '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{LocalResolver, StackProps};

    fn namespace(stack: &mut Stack) -> PrivateDnsNamespace {
        PrivateDnsNamespace::new(
            stack,
            "Cluster/DefaultServiceDiscoveryNamespace",
            "nextjs-cdk-prod.internal",
            Value::from("vpc-123"),
        )
        .unwrap()
    }

    fn srv_props() -> CloudMapServiceProps {
        CloudMapServiceProps {
            name: "dns.nextjs".into(),
            dns_record_type: DnsRecordType::Srv,
            dns_ttl: Duration::from_secs(60),
            routing_policy: RoutingPolicy::Multivalue,
            failure_threshold: Some(1),
        }
    }

    #[test]
    fn test_srv_service() {
        let mut stack = Stack::new("Network", StackProps::default()).unwrap();
        let ns = namespace(&mut stack);
        let svc = CloudMapService::new(&mut stack, "Service/CloudmapService", &ns, srv_props()).unwrap();

        let props = stack
            .resource(&svc.resource().logical_id)
            .unwrap()
            .properties
            .resolve(&mut LocalResolver)
            .unwrap();
        assert_eq!(props["DnsConfig"]["DnsRecords"][0]["Type"], "SRV");
        assert_eq!(props["DnsConfig"]["DnsRecords"][0]["TTL"], 60);
        assert_eq!(props["DnsConfig"]["RoutingPolicy"], "MULTIVALUE");
        assert_eq!(props["HealthCheckCustomConfig"]["FailureThreshold"], 1);
        assert_eq!(props["Name"], "dns.nextjs");
    }

    #[test]
    fn test_invalid_names_and_settings() {
        let mut stack = Stack::new("Network", StackProps::default()).unwrap();
        assert!(PrivateDnsNamespace::new(&mut stack, "Ns", "bad_name", Value::Null).is_err());

        let ns = namespace(&mut stack);
        let mut cname = srv_props();
        cname.dns_record_type = DnsRecordType::Cname;
        assert!(CloudMapService::new(&mut stack, "A", &ns, cname).is_err());

        let mut threshold = srv_props();
        threshold.failure_threshold = Some(0);
        assert!(CloudMapService::new(&mut stack, "B", &ns, threshold).is_err());
    }
}
