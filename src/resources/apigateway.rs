//! API Gateway v2 HTTP APIs.
//!
//! ## Constructs
//!
//! | Construct | Resources |
//! |-----------|-----------|
//! | [`HttpApi`] | `AWS::ApiGatewayV2::Api`, `$default` `Stage` |
//! | [`VpcLink`] | `AWS::ApiGatewayV2::VpcLink` |
//! | [`HttpApi::add_routes`] | one `Integration` per integration id, one `Route` per method |
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut api = HttpApi::new(&mut stack, "HttpApi", HttpApiProps::named("app-prod"))?;
//! let link = VpcLink::new(&mut stack, "VpcLink", VpcLinkProps { .. })?;
//! let integration = HttpServiceDiscoveryIntegration::new("ServiceDiscovery", &cloud_map, &link);
//! api.add_routes(&mut stack, "/{proxy+}", &[HttpMethod::Any], &integration)?;
//! ```

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::construct::{ResourceRef, Stack, Value};
use crate::error::{Error, Result};
use crate::props;
use crate::resources::ec2::SecurityGroup;
use crate::resources::servicediscovery::CloudMapService;

/// Options for [`HttpApi::new`].
#[derive(Debug, Clone)]
pub struct HttpApiProps {
    /// API name
    pub api_name: String,
    /// Turn off the `execute-api` endpoint
    pub disable_execute_api_endpoint: bool,
    /// Declare an auto-deploying `$default` stage
    pub create_default_stage: bool,
}

impl HttpApiProps {
    /// Defaults for an API called `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            api_name: name.into(),
            disable_execute_api_endpoint: false,
            create_default_stage: true,
        }
    }
}

/// HTTP method a route matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// Every method
    Any,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    /// The method as used in route keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Any => "ANY",
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for [`VpcLink::new`].
#[derive(Debug, Clone, Default)]
pub struct VpcLinkProps {
    /// Link name
    pub vpc_link_name: Option<String>,
    /// Subnets the link's network interfaces live in
    pub subnet_ids: Vec<Value>,
    /// Groups attached to the link's network interfaces
    pub security_groups: Vec<SecurityGroup>,
}

/// A private link from HTTP APIs into a VPC.
#[derive(Debug, Clone)]
pub struct VpcLink {
    resource: ResourceRef,
}

impl VpcLink {
    /// Declare a VPC link.
    pub fn new(stack: &mut Stack, id: &str, props: VpcLinkProps) -> Result<Self> {
        if props.subnet_ids.is_empty() {
            return Err(Error::validation(id, "a VPC link needs at least one subnet"));
        }
        let resource = stack.add_resource(
            &format!("{}/Resource", id),
            "AWS::ApiGatewayV2::VpcLink",
            props!({
                "Name": props.vpc_link_name.unwrap_or_else(|| id.to_string()),
                "SecurityGroupIds": props
                    .security_groups
                    .iter()
                    .map(SecurityGroup::group_id)
                    .collect::<Vec<_>>(),
                "SubnetIds": props.subnet_ids,
            }),
        )?;
        Ok(Self { resource })
    }

    /// The link id (`Ref`).
    pub fn vpc_link_id(&self) -> Value {
        self.resource.reference()
    }

    /// The declared resource.
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }
}

/// Proxies requests to a Cloud Map service through a VPC link.
#[derive(Debug, Clone)]
pub struct HttpServiceDiscoveryIntegration {
    id: String,
    service_arn: Value,
    vpc_link_id: Value,
}

impl HttpServiceDiscoveryIntegration {
    /// Integration `id` forwarding to `service` over `vpc_link`.
    pub fn new(id: impl Into<String>, service: &CloudMapService, vpc_link: &VpcLink) -> Self {
        Self {
            id: id.into(),
            service_arn: service.service_arn(),
            vpc_link_id: vpc_link.vpc_link_id(),
        }
    }

    /// Integration id within the API.
    pub fn id(&self) -> &str {
        &self.id
    }

    fn properties(&self, api_id: Value) -> Value {
        props!({
            "ApiId": api_id,
            "ConnectionId": self.vpc_link_id.clone(),
            "ConnectionType": "VPC_LINK",
            "IntegrationMethod": "ANY",
            "IntegrationType": "HTTP_PROXY",
            "IntegrationUri": self.service_arn.clone(),
            "PayloadFormatVersion": "1.0",
        })
    }
}

/// Handle to a declared HTTP API.
#[derive(Debug, Clone)]
pub struct HttpApi {
    id: String,
    name: String,
    resource: ResourceRef,
    default_stage: Option<ResourceRef>,
    integrations: IndexMap<String, ResourceRef>,
    routes: IndexMap<String, ResourceRef>,
}

impl HttpApi {
    /// Declare an HTTP API.
    pub fn new(stack: &mut Stack, id: &str, props: HttpApiProps) -> Result<Self> {
        if props.api_name.is_empty() || props.api_name.len() > 128 {
            return Err(Error::validation(id, "API name must be 1-128 characters"));
        }

        let resource = stack.add_resource(
            &format!("{}/Resource", id),
            "AWS::ApiGatewayV2::Api",
            props!({
                "DisableExecuteApiEndpoint": props.disable_execute_api_endpoint,
                "Name": props.api_name.as_str(),
                "ProtocolType": "HTTP",
            }),
        )?;

        let default_stage = if props.create_default_stage {
            Some(stack.add_resource(
                &format!("{}/DefaultStage/Resource", id),
                "AWS::ApiGatewayV2::Stage",
                props!({
                    "ApiId": resource.reference(),
                    "AutoDeploy": true,
                    "StageName": "$default",
                }),
            )?)
        } else {
            None
        };

        Ok(Self {
            id: id.to_string(),
            name: props.api_name,
            resource,
            default_stage,
            integrations: IndexMap::new(),
            routes: IndexMap::new(),
        })
    }

    /// Route `path` for each of `methods` to `integration`.
    pub fn add_routes(
        &mut self,
        stack: &mut Stack,
        path: &str,
        methods: &[HttpMethod],
        integration: &HttpServiceDiscoveryIntegration,
    ) -> Result<Vec<ResourceRef>> {
        validate_route_path(&self.id, path)?;
        if methods.is_empty() {
            return Err(Error::validation(&self.id, "a route needs at least one method"));
        }

        let integration_ref = match self.integrations.get(integration.id()) {
            Some(existing) => existing.clone(),
            None => {
                let declared = stack.add_resource(
                    &format!("{}/{}/Resource", self.id, integration.id()),
                    "AWS::ApiGatewayV2::Integration",
                    integration.properties(self.api_id()),
                )?;
                self.integrations
                    .insert(integration.id().to_string(), declared.clone());
                declared
            }
        };

        let mut declared = Vec::with_capacity(methods.len());
        for method in methods {
            let route_key = format!("{} {}", method, path);
            if self.routes.contains_key(&route_key) {
                return Err(Error::validation(
                    &self.id,
                    format!("route '{}' is already defined", route_key),
                ));
            }
            let route_id = format!("{}{}", method, path).replace('/', "--");
            let route = stack.add_resource(
                &format!("{}/{}/Resource", self.id, route_id),
                "AWS::ApiGatewayV2::Route",
                props!({
                    "ApiId": self.api_id(),
                    "AuthorizationType": "NONE",
                    "RouteKey": route_key.as_str(),
                    "Target": Value::join(
                        "",
                        vec!["integrations/".into(), integration_ref.reference()],
                    ),
                }),
            )?;
            debug!(api = %self.id, route = %route_key, "added route");
            self.routes.insert(route_key, route.clone());
            declared.push(route);
        }
        Ok(declared)
    }

    /// The API id (`Ref`).
    pub fn api_id(&self) -> Value {
        self.resource.reference()
    }

    /// The API name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// URL of the `$default` stage, ending in `/`.
    pub fn url(&self) -> Result<Value> {
        if self.default_stage.is_none() {
            return Err(Error::validation(
                &self.id,
                "the API has no default stage and therefore no URL",
            ));
        }
        Ok(Value::join(
            "",
            vec![
                "https://".into(),
                self.api_id(),
                ".execute-api.".into(),
                Value::region(),
                ".".into(),
                Value::url_suffix(),
                "/".into(),
            ],
        ))
    }

    /// The declared resource.
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    /// Declared route keys.
    pub fn route_keys(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

fn validate_route_path(api: &str, path: &str) -> Result<()> {
    let fail = |message: String| -> Result<()> { Err(Error::validation(api, message)) };

    if !path.starts_with('/') {
        return fail(format!("route path '{}' must start with '/'", path));
    }
    if path == "/" {
        return Ok(());
    }
    let segments: Vec<&str> = path[1..].split('/').collect();
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return fail(format!("route path '{}' has an empty segment", path));
        }
        if segment.ends_with("+}") && i + 1 != segments.len() {
            return fail(format!(
                "greedy parameter in '{}' must be the last segment",
                path
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{LocalResolver, StackProps};
    use crate::resources::servicediscovery::{
        CloudMapServiceProps, DnsRecordType, PrivateDnsNamespace, RoutingPolicy,
    };
    use std::time::Duration;

    fn cloud_map(stack: &mut Stack) -> CloudMapService {
        let namespace = PrivateDnsNamespace::new(stack, "Namespace", "app.internal", "vpc-1".into())
            .unwrap();
        CloudMapService::new(
            stack,
            "Service",
            &namespace,
            CloudMapServiceProps {
                name: "dns.nextjs".into(),
                dns_record_type: DnsRecordType::Srv,
                dns_ttl: Duration::from_secs(60),
                routing_policy: RoutingPolicy::Multivalue,
                failure_threshold: Some(1),
            },
        )
        .unwrap()
    }

    fn rendered(stack: &Stack, r: &ResourceRef) -> serde_json::Value {
        stack
            .resource(&r.logical_id)
            .unwrap()
            .properties
            .resolve(&mut LocalResolver)
            .unwrap()
    }

    #[test]
    fn test_api_with_default_stage() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let api = HttpApi::new(&mut stack, "HttpApi", HttpApiProps::named("nextjs-cdk-prod")).unwrap();
        assert_eq!(api.resource().logical_id, "HttpApiF5A9A8A7");

        let json = rendered(&stack, api.resource());
        assert_eq!(json["Name"], "nextjs-cdk-prod");
        assert_eq!(json["ProtocolType"], "HTTP");
        assert_eq!(json["DisableExecuteApiEndpoint"], false);

        let stage = stack
            .resources_of_type("AWS::ApiGatewayV2::Stage")
            .next()
            .unwrap();
        let stage = stage.properties.resolve(&mut LocalResolver).unwrap();
        assert_eq!(stage["StageName"], "$default");
        assert_eq!(stage["AutoDeploy"], true);

        let url = api.url().unwrap().resolve(&mut LocalResolver).unwrap();
        let parts = url["Fn::Join"][1].as_array().unwrap();
        assert_eq!(parts[0], "https://");
        assert_eq!(parts.last().unwrap(), "/");
    }

    #[test]
    fn test_no_stage_means_no_url() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let props = HttpApiProps {
            create_default_stage: false,
            ..HttpApiProps::named("api")
        };
        let api = HttpApi::new(&mut stack, "HttpApi", props).unwrap();
        assert!(api.url().is_err());
    }

    #[test]
    fn test_proxy_route_through_vpc_link() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let service = cloud_map(&mut stack);
        let link = VpcLink::new(
            &mut stack,
            "VpcLink",
            VpcLinkProps {
                vpc_link_name: Some("nextjs-cdk-prod".into()),
                subnet_ids: vec!["subnet-1".into(), "subnet-2".into()],
                security_groups: Vec::new(),
            },
        )
        .unwrap();
        let mut api = HttpApi::new(&mut stack, "HttpApi", HttpApiProps::named("api")).unwrap();
        let integration = HttpServiceDiscoveryIntegration::new("ServiceDiscovery", &service, &link);

        let routes = api
            .add_routes(&mut stack, "/{proxy+}", &[HttpMethod::Any], &integration)
            .unwrap();
        assert_eq!(routes.len(), 1);

        let route = rendered(&stack, &routes[0]);
        assert_eq!(route["RouteKey"], "ANY /{proxy+}");
        assert_eq!(route["AuthorizationType"], "NONE");

        let integration_json = stack
            .resources_of_type("AWS::ApiGatewayV2::Integration")
            .next()
            .unwrap()
            .properties
            .resolve(&mut LocalResolver)
            .unwrap();
        assert_eq!(integration_json["ConnectionType"], "VPC_LINK");
        assert_eq!(integration_json["IntegrationType"], "HTTP_PROXY");
        assert_eq!(integration_json["PayloadFormatVersion"], "1.0");
        assert_eq!(
            integration_json["ConnectionId"],
            serde_json::json!({ "Ref": link.resource().logical_id })
        );

        // Same integration, new path: the integration resource is reused.
        api.add_routes(&mut stack, "/", &[HttpMethod::Get, HttpMethod::Head], &integration)
            .unwrap();
        assert_eq!(
            stack.resources_of_type("AWS::ApiGatewayV2::Integration").count(),
            1
        );
        assert_eq!(api.route_keys().count(), 3);

        assert!(api
            .add_routes(&mut stack, "/{proxy+}", &[HttpMethod::Any], &integration)
            .is_err());
    }

    #[test]
    fn test_route_path_validation() {
        assert!(validate_route_path("api", "/").is_ok());
        assert!(validate_route_path("api", "/items/{id}").is_ok());
        assert!(validate_route_path("api", "items").is_err());
        assert!(validate_route_path("api", "/a//b").is_err());
        assert!(validate_route_path("api", "/{proxy+}/tail").is_err());
    }

    #[test]
    fn test_vpc_link_needs_subnets() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        assert!(VpcLink::new(&mut stack, "VpcLink", VpcLinkProps::default()).is_err());
    }
}
