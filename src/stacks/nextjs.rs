//! The application stack: the Next.js container on Fargate behind an HTTP
//! API and a CloudFront distribution.

use std::time::Duration;

use indexmap::IndexMap;
use tracing::debug;

use super::{stack_name, Network, CONTAINER_PORT, NEXTJS_STACK_ID};
use crate::config::Config;
use crate::construct::{Stack, StackProps, Value};
use crate::error::{Error, Result};
use crate::resources::apigateway::{
    HttpApi, HttpApiProps, HttpMethod, HttpServiceDiscoveryIntegration, VpcLink, VpcLinkProps,
};
use crate::resources::cloudfront::{
    AllowedMethods, BehaviorOptions, CacheCookieBehavior, CacheHeaderBehavior, CachePolicy,
    CachePolicyProps, CacheQueryStringBehavior, CachedMethods, Distribution, DistributionProps,
    HttpOrigin, HttpOriginProps, OriginProtocolPolicy, PriceClass, ViewerProtocolPolicy,
};
use crate::resources::ec2::{Port, SecurityGroup, SecurityGroupProps, SubnetType};
use crate::resources::ecs::{
    CapacityProviderStrategy, CloudMapOptions, Compatibility, ContainerDefinitionOptions,
    ContainerImage, CpuUtilizationScalingProps, DeploymentCircuitBreaker, FargateService,
    FargateServiceProps, PortMapping, PropagatedTagSource, ScalingBounds, TaskDefinition,
    TaskDefinitionProps,
};
use crate::resources::servicediscovery::DnsRecordType;
use crate::synth::{DefaultStackSynthesizer, DockerImageAsset, DockerImageAssetOptions};

/// Name of the only container in the task.
pub const CONTAINER_NAME: &str = "NextJSContainer";

/// Task count limits of the service.
pub const SCALING_BOUNDS: ScalingBounds = ScalingBounds {
    min_capacity: 1,
    max_capacity: 2,
};

const DESIRED_COUNT: u32 = 1;

/// Declare the application stack on top of `network`.
pub fn build(
    config: &Config,
    network: &Network,
    synthesizer: &DefaultStackSynthesizer,
) -> Result<Stack> {
    let mut stack = Stack::new(
        NEXTJS_STACK_ID,
        StackProps {
            stack_name: Some(stack_name(NEXTJS_STACK_ID, config)),
            env: config.stack_env(),
            description: None,
        },
    )?;
    let vpc = &network.vpc;
    let arch = config.cpu_architecture();

    // Task definition and image

    let mut task_definition = TaskDefinition::new(
        &mut stack,
        "TaskDefinition",
        TaskDefinitionProps {
            family: Some(format!(
                "{}-nextjs-{}",
                config.project.name, config.project.environment
            )),
            cpu: "256".to_string(),
            memory_mib: "512".to_string(),
            cpu_architecture: Some(arch),
            compatibility: Compatibility::Fargate,
        },
    )?;

    let platform = arch.platform();
    let build_args = IndexMap::from([
        ("TARGETOS".to_string(), "linux".to_string()),
        ("TARGETARCH".to_string(), platform.arch().to_string()),
    ]);
    let asset = DockerImageAsset::from_directory(
        format!("TaskDefinition/{}/AssetImage", CONTAINER_NAME),
        &config.assets.directory,
        DockerImageAssetOptions {
            exclude: config.assets.exclude.clone(),
            platform: Some(platform),
            build_args,
            file: None,
            outdir: Some(config.output.directory.clone()),
        },
    )?;

    let mut container = ContainerDefinitionOptions::new(ContainerImage::Asset(asset));
    container.init_process_enabled = true;
    task_definition.add_container(&mut stack, CONTAINER_NAME, container, synthesizer)?;
    task_definition.add_port_mappings(
        &mut stack,
        CONTAINER_NAME,
        vec![PortMapping::tcp("http", CONTAINER_PORT)],
    )?;

    // Service

    let dual_egress = SecurityGroupProps {
        description: None,
        allow_all_outbound: true,
        allow_all_ipv6_outbound: true,
    };
    let service_sg = SecurityGroup::new(&mut stack, "ServiceSecurityGroup", vpc, dual_egress.clone())?;

    let mut service = FargateService::new(
        &mut stack,
        "FargateService",
        &network.cluster,
        &task_definition,
        vpc,
        FargateServiceProps {
            service_name: None,
            desired_count: DESIRED_COUNT,
            assign_public_ip: true,
            min_healthy_percent: 50,
            max_healthy_percent: 200,
            circuit_breaker: Some(DeploymentCircuitBreaker {
                enable: true,
                rollback: true,
            }),
            propagate_tags: Some(PropagatedTagSource::Service),
            capacity_provider_strategies: vec![CapacityProviderStrategy {
                capacity_provider: "FARGATE".to_string(),
                weight: 1,
                base: None,
            }],
            security_groups: vec![service_sg],
            vpc_subnets: None,
        },
    )?;

    let mut scaling = service.auto_scale_task_count(&mut stack, SCALING_BOUNDS)?;
    // Scale in sooner than out.
    scaling.scale_on_cpu_utilization(
        &mut stack,
        "CpuScaling",
        CpuUtilizationScalingProps {
            target_utilization_percent: 75.0,
            scale_in_cooldown: Duration::from_secs(90),
            scale_out_cooldown: Duration::from_secs(120),
            disable_scale_in: false,
        },
    )?;

    let namespace = network
        .cluster
        .default_cloud_map_namespace()
        .ok_or_else(|| {
            Error::validation("Cluster", "the cluster has no default Cloud Map namespace")
        })?;
    let cloud_map = service
        .enable_cloud_map(
            &mut stack,
            namespace,
            CloudMapOptions {
                name: "dns.nextjs".to_string(),
                dns_record_type: DnsRecordType::Srv,
                dns_ttl: Duration::from_secs(60),
                failure_threshold: 1,
            },
        )?
        .clone();

    // HTTP API

    let qualified_name = config.qualified_name();
    let mut api = HttpApi::new(
        &mut stack,
        "HttpApi",
        HttpApiProps::named(qualified_name.as_str()),
    )?;

    let vpc_link_sg = SecurityGroup::new(&mut stack, "VpcLinkSecurityGroup", vpc, dual_egress)?;
    service.allow_from(
        &mut stack,
        &vpc_link_sg,
        Port::tcp(CONTAINER_PORT),
        "Allow traffic on container port from the VPC Link",
    )?;

    let vpc_link = VpcLink::new(
        &mut stack,
        "VpcLink",
        VpcLinkProps {
            vpc_link_name: Some(qualified_name),
            subnet_ids: vpc.subnet_ids(SubnetType::Public),
            security_groups: vec![vpc_link_sg],
        },
    )?;
    let integration = HttpServiceDiscoveryIntegration::new("ServiceDiscovery", &cloud_map, &vpc_link);
    api.add_routes(&mut stack, "/{proxy+}", &[HttpMethod::Any], &integration)?;

    // CDN

    let cache_policy = CachePolicy::new(
        &mut stack,
        "CachePolicy",
        CachePolicyProps {
            cookie_behavior: CacheCookieBehavior::None,
            header_behavior: CacheHeaderBehavior::None,
            query_string_behavior: CacheQueryStringBehavior::All,
            enable_accept_encoding_gzip: true,
            enable_accept_encoding_brotli: true,
            // Responses are cached only when Cache-Control asks for it.
            min_ttl: Some(Duration::ZERO),
            default_ttl: Some(Duration::ZERO),
            ..CachePolicyProps::default()
        },
    )?;

    let api_host = Value::select(2, Value::split("/", api.url()?));
    let origin = HttpOrigin::new(
        api_host,
        HttpOriginProps {
            protocol_policy: OriginProtocolPolicy::HttpsOnly,
            read_timeout: Duration::from_secs(60),
            keepalive_timeout: Duration::from_secs(60),
            origin_path: Some("/".to_string()),
        },
    )?;

    Distribution::new(
        &mut stack,
        "CDN",
        DistributionProps {
            price_class: PriceClass::PriceClass100,
            ..DistributionProps::new(BehaviorOptions {
                allowed_methods: AllowedMethods::All,
                cached_methods: CachedMethods::GetHead,
                viewer_protocol_policy: ViewerProtocolPolicy::RedirectToHttps,
                compress: true,
                cache_policy_id: Some(cache_policy.cache_policy_id()),
                ..BehaviorOptions::new(origin)
            })
        },
    )?;

    debug!(
        stack = stack.stack_name(),
        resources = stack.resources().count(),
        "application stack declared"
    );
    Ok(stack)
}
