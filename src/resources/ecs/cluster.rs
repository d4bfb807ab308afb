//! ECS clusters.

use tracing::debug;

use crate::construct::{ResourceRef, Stack, Value};
use crate::error::{Error, Result};
use crate::props;
use crate::resources::ec2::Vpc;
use crate::resources::servicediscovery::PrivateDnsNamespace;

const FARGATE_CAPACITY_PROVIDERS: [&str; 2] = ["FARGATE", "FARGATE_SPOT"];

/// Options for [`Cluster::new`].
#[derive(Debug, Clone, Default)]
pub struct ClusterProps {
    /// Physical cluster name; generated when unset
    pub cluster_name: Option<String>,
    /// Associate the `FARGATE` and `FARGATE_SPOT` capacity providers
    pub enable_fargate_capacity_providers: bool,
}

/// Options for [`Cluster::add_default_cloud_map_namespace`].
#[derive(Debug, Clone)]
pub struct CloudMapNamespaceOptions {
    /// Namespace name, e.g. `app-prod.internal`
    pub name: String,
    /// Also make it the cluster's Service Connect default
    pub use_for_service_connect: bool,
}

/// Handle to a declared cluster.
#[derive(Debug, Clone)]
pub struct Cluster {
    id: String,
    cluster_name: Option<String>,
    resource: ResourceRef,
    vpc_id: Value,
    capacity_providers: Vec<String>,
    default_namespace: Option<PrivateDnsNamespace>,
}

impl Cluster {
    /// Declare a cluster for services running in `vpc`.
    pub fn new(stack: &mut Stack, id: &str, vpc: &Vpc, props: ClusterProps) -> Result<Self> {
        if let Some(name) = &props.cluster_name {
            let valid = !name.is_empty()
                && name.len() <= 255
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(Error::validation(
                    id,
                    format!(
                        "cluster name '{}' must be 1-255 letters, digits, hyphens or underscores",
                        name
                    ),
                ));
            }
        }

        let resource = stack.add_resource(
            &format!("{}/Resource", id),
            "AWS::ECS::Cluster",
            props!({ "ClusterName": props.cluster_name.clone() }),
        )?;

        let mut capacity_providers = Vec::new();
        if props.enable_fargate_capacity_providers {
            capacity_providers.extend(FARGATE_CAPACITY_PROVIDERS.iter().map(|p| p.to_string()));
            stack.add_resource(
                &format!("{}/{}", id, id),
                "AWS::ECS::ClusterCapacityProviderAssociations",
                props!({
                    "CapacityProviders": capacity_providers.clone(),
                    "Cluster": resource.reference(),
                    "DefaultCapacityProviderStrategy": Vec::<Value>::new(),
                }),
            )?;
        }

        debug!(cluster = id, providers = ?capacity_providers, "declared cluster");

        Ok(Self {
            id: id.to_string(),
            cluster_name: props.cluster_name,
            resource,
            vpc_id: vpc.vpc_id(),
            capacity_providers,
            default_namespace: None,
        })
    }

    /// Declare the cluster's default Cloud Map namespace.
    pub fn add_default_cloud_map_namespace(
        &mut self,
        stack: &mut Stack,
        options: CloudMapNamespaceOptions,
    ) -> Result<&PrivateDnsNamespace> {
        if self.default_namespace.is_some() {
            return Err(Error::validation(
                &self.id,
                "the cluster already has a default Cloud Map namespace",
            ));
        }

        let namespace = PrivateDnsNamespace::new(
            stack,
            &format!("{}/DefaultServiceDiscoveryNamespace", self.id),
            &options.name,
            self.vpc_id.clone(),
        )?;

        if options.use_for_service_connect {
            stack.properties_mut(&self.resource)?.insert(
                "ServiceConnectDefaults",
                props!({ "Namespace": namespace.namespace_arn() }),
            );
        }

        Ok(self.default_namespace.insert(namespace))
    }

    /// The cluster name (`Ref`).
    pub fn cluster_ref(&self) -> Value {
        self.resource.reference()
    }

    /// The cluster ARN.
    pub fn cluster_arn(&self) -> Value {
        self.resource.attr("Arn")
    }

    /// Physical name, when one was given.
    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_name.as_deref()
    }

    /// The declared resource.
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    /// Associated capacity providers.
    pub fn capacity_providers(&self) -> &[String] {
        &self.capacity_providers
    }

    /// Whether `name` is associated with this cluster.
    pub fn has_capacity_provider(&self, name: &str) -> bool {
        self.capacity_providers.iter().any(|p| p == name)
    }

    /// The default Cloud Map namespace.
    pub fn default_cloud_map_namespace(&self) -> Option<&PrivateDnsNamespace> {
        self.default_namespace.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{LocalResolver, StackProps};
    use crate::resources::ec2::VpcProps;

    fn setup() -> (Stack, Vpc) {
        let mut stack = Stack::new("Network", StackProps::default()).unwrap();
        let vpc = Vpc::new(&mut stack, "Vpc", VpcProps::new("10.0.0.0/16").unwrap()).unwrap();
        (stack, vpc)
    }

    #[test]
    fn test_fargate_capacity_providers() {
        let (mut stack, vpc) = setup();
        let cluster = Cluster::new(
            &mut stack,
            "Cluster",
            &vpc,
            ClusterProps {
                cluster_name: Some("nextjs-cdk-prod".into()),
                enable_fargate_capacity_providers: true,
            },
        )
        .unwrap();

        assert!(cluster.has_capacity_provider("FARGATE"));
        let association = stack
            .resources_of_type("AWS::ECS::ClusterCapacityProviderAssociations")
            .next()
            .unwrap();
        let props = association.properties.resolve(&mut LocalResolver).unwrap();
        assert_eq!(props["CapacityProviders"][1], "FARGATE_SPOT");
        assert_eq!(cluster.resource().logical_id, "ClusterEB0386A7");
    }

    #[test]
    fn test_default_namespace_for_service_connect() {
        let (mut stack, vpc) = setup();
        let mut cluster = Cluster::new(&mut stack, "Cluster", &vpc, ClusterProps::default()).unwrap();
        let options = CloudMapNamespaceOptions {
            name: "nextjs-cdk-prod.internal".into(),
            use_for_service_connect: true,
        };
        cluster
            .add_default_cloud_map_namespace(&mut stack, options.clone())
            .unwrap();
        assert_eq!(
            cluster.default_cloud_map_namespace().unwrap().name(),
            "nextjs-cdk-prod.internal"
        );

        let props = stack
            .resource(&cluster.resource().logical_id)
            .unwrap()
            .properties
            .resolve(&mut LocalResolver)
            .unwrap();
        assert!(props["ServiceConnectDefaults"]["Namespace"]["Fn::GetAtt"].is_array());
        assert!(props.get("ClusterName").is_none());

        assert!(cluster
            .add_default_cloud_map_namespace(&mut stack, options)
            .is_err());
    }

    #[test]
    fn test_invalid_cluster_name() {
        let (mut stack, vpc) = setup();
        let props = ClusterProps {
            cluster_name: Some("bad name".into()),
            ..ClusterProps::default()
        };
        assert!(Cluster::new(&mut stack, "Cluster", &vpc, props).is_err());
    }
}
