//! Fargate services.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::cluster::Cluster;
use super::scaling::{ScalableTaskCount, ScalingBounds};
use super::task_definition::TaskDefinition;
use crate::construct::{ResourceRef, Stack, Value};
use crate::error::{Error, Result};
use crate::props;
use crate::resources::ec2::{Port, SecurityGroup, SecurityGroupProps, SubnetType, Vpc};
use crate::resources::servicediscovery::{
    CloudMapService, CloudMapServiceProps, DnsRecordType, PrivateDnsNamespace, RoutingPolicy,
};

/// Roll back deployments whose tasks never become healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentCircuitBreaker {
    /// Stop failing deployments
    pub enable: bool,
    /// Roll back to the last completed deployment
    pub rollback: bool,
}

/// Where tasks copy their tags from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropagatedTagSource {
    /// The service
    Service,
    /// The task definition
    TaskDefinition,
}

impl PropagatedTagSource {
    fn as_str(&self) -> &'static str {
        match self {
            PropagatedTagSource::Service => "SERVICE",
            PropagatedTagSource::TaskDefinition => "TASK_DEFINITION",
        }
    }
}

/// Share of tasks placed on one capacity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityProviderStrategy {
    /// Capacity provider name, e.g. `FARGATE`
    pub capacity_provider: String,
    /// Relative weight
    pub weight: u32,
    /// Tasks always placed here first
    pub base: Option<u32>,
}

/// Options for [`FargateService::new`].
#[derive(Debug, Clone)]
pub struct FargateServiceProps {
    /// Physical service name
    pub service_name: Option<String>,
    /// Tasks to keep running
    pub desired_count: u32,
    /// Give tasks public IPs; selects public subnets by default
    pub assign_public_ip: bool,
    /// Lower bound of running tasks during deployments, percent of desired
    pub min_healthy_percent: u32,
    /// Upper bound of running tasks during deployments, percent of desired
    pub max_healthy_percent: u32,
    /// Deployment circuit breaker
    pub circuit_breaker: Option<DeploymentCircuitBreaker>,
    /// Tag propagation
    pub propagate_tags: Option<PropagatedTagSource>,
    /// Capacity provider strategy; empty means the `FARGATE` launch type
    pub capacity_provider_strategies: Vec<CapacityProviderStrategy>,
    /// Security groups; a default group is declared when empty
    pub security_groups: Vec<SecurityGroup>,
    /// Subnet class to place tasks in
    pub vpc_subnets: Option<SubnetType>,
}

impl Default for FargateServiceProps {
    fn default() -> Self {
        Self {
            service_name: None,
            desired_count: 1,
            assign_public_ip: false,
            min_healthy_percent: 100,
            max_healthy_percent: 200,
            circuit_breaker: None,
            propagate_tags: None,
            capacity_provider_strategies: Vec::new(),
            security_groups: Vec::new(),
            vpc_subnets: None,
        }
    }
}

/// Options for [`FargateService::enable_cloud_map`].
#[derive(Debug, Clone)]
pub struct CloudMapOptions {
    /// Service name in the namespace
    pub name: String,
    /// Record type; SRV records carry the container port
    pub dns_record_type: DnsRecordType,
    /// Record TTL
    pub dns_ttl: Duration,
    /// Failed custom health checks before an instance is unhealthy
    pub failure_threshold: u32,
}

/// Handle to a declared Fargate service.
#[derive(Debug, Clone)]
pub struct FargateService {
    id: String,
    resource: ResourceRef,
    cluster_ref: Value,
    desired_count: u32,
    security_groups: Vec<SecurityGroup>,
    default_container: Option<(String, u16)>,
    cloud_map_service: Option<CloudMapService>,
    scaling: Option<ScalingBounds>,
}

impl FargateService {
    /// Declare a service running `task_definition` on `cluster`.
    pub fn new(
        stack: &mut Stack,
        id: &str,
        cluster: &Cluster,
        task_definition: &TaskDefinition,
        vpc: &Vpc,
        props: FargateServiceProps,
    ) -> Result<Self> {
        validate(id, cluster, task_definition, &props)?;

        let subnet_type = props.vpc_subnets.unwrap_or(if props.assign_public_ip {
            SubnetType::Public
        } else if vpc.select_subnets(SubnetType::PrivateWithEgress).is_empty() {
            SubnetType::PrivateIsolated
        } else {
            SubnetType::PrivateWithEgress
        });
        if props.assign_public_ip && subnet_type != SubnetType::Public {
            return Err(Error::validation(
                id,
                format!("public IPs need public subnets, not {}", subnet_type),
            ));
        }
        let subnets = vpc.subnet_ids(subnet_type);
        if subnets.is_empty() {
            return Err(Error::validation(
                id,
                format!("the VPC has no {} subnets", subnet_type),
            ));
        }

        let security_groups = if props.security_groups.is_empty() {
            vec![SecurityGroup::new(
                stack,
                &format!("{}/SecurityGroup", id),
                vpc,
                SecurityGroupProps::default(),
            )?]
        } else {
            props.security_groups
        };

        let mut deployment = props!({
            "MaximumPercent": props.max_healthy_percent,
            "MinimumHealthyPercent": props.min_healthy_percent,
        });
        let mut controller = Value::Null;
        if let Some(breaker) = props.circuit_breaker {
            deployment.insert(
                "DeploymentCircuitBreaker",
                props!({ "Enable": breaker.enable, "Rollback": breaker.rollback }),
            );
            controller = props!({ "Type": "ECS" });
        }

        let strategies: Vec<Value> = props
            .capacity_provider_strategies
            .iter()
            .map(|s| {
                props!({
                    "Base": s.base,
                    "CapacityProvider": s.capacity_provider.as_str(),
                    "Weight": s.weight,
                })
            })
            .collect();
        let launch_type = strategies.is_empty().then_some("FARGATE");

        let resource = stack.add_resource(
            &format!("{}/Service", id),
            "AWS::ECS::Service",
            props!({
                "CapacityProviderStrategy": (!strategies.is_empty()).then_some(strategies),
                "Cluster": cluster.cluster_ref(),
                "DeploymentConfiguration": deployment,
                "DeploymentController": controller,
                "DesiredCount": props.desired_count,
                "EnableECSManagedTags": false,
                "LaunchType": launch_type,
                "NetworkConfiguration": props!({
                    "AwsvpcConfiguration": props!({
                        "AssignPublicIp": if props.assign_public_ip { "ENABLED" } else { "DISABLED" },
                        "SecurityGroups": security_groups.iter().map(SecurityGroup::group_id).collect::<Vec<_>>(),
                        "Subnets": subnets,
                    }),
                }),
                "PropagateTags": props.propagate_tags.map(|p| p.as_str()),
                "ServiceName": props.service_name.clone(),
                "TaskDefinition": task_definition.task_definition_arn(),
            }),
        )?;
        stack.add_dependency(&resource, task_definition.task_role().resource())?;

        info!(
            service = id,
            desired = props.desired_count,
            subnets = %subnet_type,
            "declared Fargate service"
        );

        Ok(Self {
            id: id.to_string(),
            resource,
            cluster_ref: cluster.cluster_ref(),
            desired_count: props.desired_count,
            security_groups,
            default_container: task_definition
                .default_container_port()
                .map(|(name, port)| (name.to_string(), port)),
            cloud_map_service: None,
            scaling: None,
        })
    }

    /// Register the service's tasks in a Cloud Map namespace.
    pub fn enable_cloud_map(
        &mut self,
        stack: &mut Stack,
        namespace: &PrivateDnsNamespace,
        options: CloudMapOptions,
    ) -> Result<&CloudMapService> {
        if self.cloud_map_service.is_some() {
            return Err(Error::validation(
                &self.id,
                "Cloud Map is already enabled for this service",
            ));
        }

        let mut registry = Value::Null;
        let service = CloudMapService::new(
            stack,
            &format!("{}/CloudmapService", self.id),
            namespace,
            CloudMapServiceProps {
                name: options.name,
                dns_record_type: options.dns_record_type,
                dns_ttl: options.dns_ttl,
                routing_policy: RoutingPolicy::Multivalue,
                failure_threshold: Some(options.failure_threshold),
            },
        )?;
        registry.insert("RegistryArn", service.service_arn());

        if options.dns_record_type == DnsRecordType::Srv {
            let (container, port) = self.default_container.as_ref().ok_or_else(|| {
                Error::validation(
                    &self.id,
                    "SRV records need a container with a port mapping",
                )
            })?;
            registry.insert("ContainerName", container.as_str());
            registry.insert("ContainerPort", *port);
        }

        stack
            .properties_mut(&self.resource)?
            .insert("ServiceRegistries", vec![registry]);

        debug!(service = %self.id, name = service.name(), "registered in Cloud Map");
        Ok(self.cloud_map_service.insert(service))
    }

    /// Declare the scalable target for the desired count.
    pub fn auto_scale_task_count(
        &mut self,
        stack: &mut Stack,
        bounds: ScalingBounds,
    ) -> Result<ScalableTaskCount> {
        if self.scaling.is_some() {
            return Err(Error::validation(
                &self.id,
                "autoscaling is already configured for this service",
            ));
        }
        if !(bounds.min_capacity..=bounds.max_capacity).contains(&self.desired_count) {
            return Err(Error::validation(
                &self.id,
                format!(
                    "desired count {} must lie within [{}, {}]",
                    self.desired_count, bounds.min_capacity, bounds.max_capacity
                ),
            ));
        }

        let resource_id = Value::join(
            "",
            vec![
                "service/".into(),
                self.cluster_ref.clone(),
                "/".into(),
                self.resource.attr("Name"),
            ],
        );
        let count = ScalableTaskCount::new(
            stack,
            &format!("{}/TaskCount", self.id),
            resource_id,
            bounds,
        )?;
        self.scaling = Some(bounds);
        Ok(count)
    }

    /// Allow `port` into every security group of the service from `source`.
    pub fn allow_from(
        &self,
        stack: &mut Stack,
        source: &SecurityGroup,
        port: Port,
        description: &str,
    ) -> Result<Vec<ResourceRef>> {
        self.security_groups
            .iter()
            .map(|sg| sg.allow_from(stack, source, port, description))
            .collect()
    }

    /// The service ARN (`Ref`).
    pub fn service_arn(&self) -> Value {
        self.resource.reference()
    }

    /// The service name.
    pub fn service_name(&self) -> Value {
        self.resource.attr("Name")
    }

    /// The declared resource.
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    /// Desired task count.
    pub fn desired_count(&self) -> u32 {
        self.desired_count
    }

    /// Scaling bounds, once autoscaling is configured.
    pub fn scaling_bounds(&self) -> Option<ScalingBounds> {
        self.scaling
    }

    /// Security groups of the tasks.
    pub fn security_groups(&self) -> &[SecurityGroup] {
        &self.security_groups
    }

    /// The Cloud Map registration.
    pub fn cloud_map_service(&self) -> Option<&CloudMapService> {
        self.cloud_map_service.as_ref()
    }
}

fn validate(
    id: &str,
    cluster: &Cluster,
    task_definition: &TaskDefinition,
    props: &FargateServiceProps,
) -> Result<()> {
    let fail = |message: String| -> Result<()> { Err(Error::validation(id, message)) };

    if !task_definition.compatibility().is_fargate_compatible() {
        return fail("the task definition is not Fargate compatible".into());
    }
    if task_definition.container_names().is_empty() {
        return fail("the task definition has no containers".into());
    }
    if props.min_healthy_percent > props.max_healthy_percent {
        return fail(format!(
            "minimum healthy percent {} exceeds maximum {}",
            props.min_healthy_percent, props.max_healthy_percent
        ));
    }
    if props.max_healthy_percent == 0 {
        return fail("maximum healthy percent must be positive".into());
    }

    let strategies = &props.capacity_provider_strategies;
    if !strategies.is_empty() {
        if let Some(unknown) = strategies
            .iter()
            .find(|s| !cluster.has_capacity_provider(&s.capacity_provider))
        {
            return fail(format!(
                "capacity provider '{}' is not associated with the cluster",
                unknown.capacity_provider
            ));
        }
        if strategies.iter().all(|s| s.weight == 0) {
            return fail("at least one capacity provider needs a positive weight".into());
        }
        if strategies.iter().filter(|s| s.base.is_some()).count() > 1 {
            return fail("only one capacity provider may set a base".into());
        }
    }
    Ok(())
}
