//! Stacks: named, independently deployable groups of resources.

use std::fmt;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::logical_id::make_unique_id;
use super::resource::{CfnResource, RemovalPolicy, ResourceRef};
use super::value::Value;
use crate::error::{Error, Result};
use crate::synth::asset::DockerImageAsset;

static STACK_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*$").expect("static regex"));

const MAX_STACK_NAME_LEN: usize = 128;

/// Target account and region of a stack. Either may be left to deploy time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Account id
    pub account: Option<String>,
    /// Region name
    pub region: Option<String>,
}

impl Environment {
    /// Create a fully specified environment.
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            region: Some(region.into()),
        }
    }

    /// Account, or the assembly placeholder when unresolved.
    pub fn account_or_placeholder(&self) -> &str {
        self.account.as_deref().unwrap_or("unknown-account")
    }

    /// Region, or the assembly placeholder when unresolved.
    pub fn region_or_placeholder(&self) -> &str {
        self.region.as_deref().unwrap_or("unknown-region")
    }

    /// True when both account and region are known at synthesis time.
    pub fn is_resolved(&self) -> bool {
        self.account.is_some() && self.region.is_some()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "aws://{}/{}",
            self.account_or_placeholder(),
            self.region_or_placeholder()
        )
    }
}

/// Options for a new stack.
#[derive(Debug, Clone, Default)]
pub struct StackProps {
    /// Deployed stack name; defaults to the construct id
    pub stack_name: Option<String>,
    /// Target environment
    pub env: Environment,
    /// Template description
    pub description: Option<String>,
}

/// A template output.
#[derive(Debug, Clone)]
pub struct Output {
    /// Output value
    pub value: Value,
    /// Optional description
    pub description: Option<String>,
    /// Export name, making the value importable by other stacks
    pub export_name: Option<String>,
}

/// A stack under construction.
#[derive(Debug, Clone)]
pub struct Stack {
    id: String,
    stack_name: String,
    env: Environment,
    description: Option<String>,
    resources: IndexMap<String, CfnResource>,
    outputs: IndexMap<String, Output>,
    docker_images: Vec<DockerImageAsset>,
}

impl Stack {
    /// Create a stack with the given construct id.
    pub fn new(id: impl Into<String>, props: StackProps) -> Result<Self> {
        let id = id.into();
        let stack_name = props.stack_name.unwrap_or_else(|| id.clone());
        validate_stack_name(&stack_name)?;

        Ok(Self {
            id,
            stack_name,
            env: props.env,
            description: props.description,
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
            docker_images: Vec::new(),
        })
    }

    /// Construct id (also the artifact id in the assembly).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Deployed stack name.
    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    /// Target environment.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Template description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Declare a resource at `path` (components separated by `/`).
    pub fn add_resource(
        &mut self,
        path: &str,
        resource_type: &str,
        properties: Value,
    ) -> Result<ResourceRef> {
        let components: Vec<&str> = path.split('/').collect();
        let logical_id = make_unique_id(&components)?;

        if self.resources.contains_key(&logical_id) {
            return Err(Error::DuplicateConstruct {
                stack: self.id.clone(),
                path: path.to_string(),
                logical_id,
            });
        }

        debug!(
            stack = %self.id,
            %logical_id,
            resource_type,
            "declared resource"
        );

        self.resources.insert(
            logical_id.clone(),
            CfnResource {
                logical_id: logical_id.clone(),
                path: path.to_string(),
                resource_type: resource_type.to_string(),
                properties,
                depends_on: Vec::new(),
                removal_policy: None,
            },
        );

        Ok(ResourceRef {
            stack: self.id.clone(),
            logical_id,
            path: path.to_string(),
            resource_type: resource_type.to_string(),
        })
    }

    /// Make `dependent` wait for `dependency` (both in this stack).
    pub fn add_dependency(&mut self, dependent: &ResourceRef, dependency: &ResourceRef) -> Result<()> {
        if dependent.stack != self.id || dependency.stack != self.id {
            return Err(Error::validation(
                &dependent.path,
                format!(
                    "explicit dependencies must stay inside stack '{}'",
                    self.id
                ),
            ));
        }
        if !self.resources.contains_key(&dependency.logical_id) {
            return Err(Error::UnresolvedReference {
                stack: self.id.clone(),
                logical_id: dependency.logical_id.clone(),
            });
        }
        let resource = self.resource_mut(dependent)?;
        if !resource.depends_on.contains(&dependency.logical_id) {
            resource.depends_on.push(dependency.logical_id.clone());
        }
        Ok(())
    }

    /// Set deletion and update-replace policy.
    pub fn set_removal_policy(&mut self, target: &ResourceRef, policy: RemovalPolicy) -> Result<()> {
        self.resource_mut(target)?.removal_policy = Some(policy);
        Ok(())
    }

    /// Mutable access to a declared resource's properties.
    pub fn properties_mut(&mut self, target: &ResourceRef) -> Result<&mut Value> {
        Ok(&mut self.resource_mut(target)?.properties)
    }

    fn resource_mut(&mut self, target: &ResourceRef) -> Result<&mut CfnResource> {
        self.resources
            .get_mut(&target.logical_id)
            .ok_or_else(|| Error::UnresolvedReference {
                stack: self.id.clone(),
                logical_id: target.logical_id.clone(),
            })
    }

    /// Add a template output.
    pub fn add_output(&mut self, id: impl Into<String>, output: Output) -> Result<()> {
        let id = id.into();
        if self.outputs.contains_key(&id) {
            return Err(Error::DuplicateConstruct {
                stack: self.id.clone(),
                path: id.clone(),
                logical_id: id,
            });
        }
        self.outputs.insert(id, output);
        Ok(())
    }

    /// Register a container image asset built for this stack.
    pub fn add_docker_image_asset(&mut self, asset: DockerImageAsset) {
        if !self.docker_images.iter().any(|a| a.hash == asset.hash) {
            self.docker_images.push(asset);
        }
    }

    /// Look up a resource by logical ID.
    pub fn resource(&self, logical_id: &str) -> Option<&CfnResource> {
        self.resources.get(logical_id)
    }

    /// All resources, in declaration order.
    pub fn resources(&self) -> impl Iterator<Item = &CfnResource> {
        self.resources.values()
    }

    /// Resources of one CloudFormation type.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a CfnResource> + 'a {
        self.resources
            .values()
            .filter(move |r| r.resource_type == resource_type)
    }

    /// Declared outputs.
    pub fn outputs(&self) -> &IndexMap<String, Output> {
        &self.outputs
    }

    /// Registered container image assets.
    pub fn docker_images(&self) -> &[DockerImageAsset] {
        &self.docker_images
    }
}

fn validate_stack_name(name: &str) -> Result<()> {
    if name.len() > MAX_STACK_NAME_LEN {
        return Err(Error::InvalidStackName {
            name: name.to_string(),
            message: format!("must be at most {} characters", MAX_STACK_NAME_LEN),
        });
    }
    if !STACK_NAME_RE.is_match(name) {
        return Err(Error::InvalidStackName {
            name: name.to_string(),
            message: "must start with a letter and contain only letters, digits and hyphens"
                .to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props;

    fn stack() -> Stack {
        Stack::new("Network", StackProps::default()).unwrap()
    }

    #[test]
    fn test_stack_name_defaults_to_id() {
        assert_eq!(stack().stack_name(), "Network");
    }

    #[test]
    fn test_invalid_stack_names() {
        for name in ["1Network", "Network_prod", "", "a.b"] {
            let props = StackProps {
                stack_name: Some(name.to_string()),
                ..StackProps::default()
            };
            assert!(Stack::new("Network", props).is_err(), "{name}");
        }
        let long = StackProps {
            stack_name: Some("a".repeat(129)),
            ..StackProps::default()
        };
        assert!(Stack::new("Network", long).is_err());
    }

    #[test]
    fn test_duplicate_logical_id() {
        let mut s = stack();
        s.add_resource("Vpc/Resource", "AWS::EC2::VPC", props!({}))
            .unwrap();
        let err = s
            .add_resource("Vpc/Resource", "AWS::EC2::VPC", props!({}))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateConstruct { .. }));
    }

    #[test]
    fn test_add_dependency_within_stack() {
        let mut s = stack();
        let igw = s
            .add_resource("Vpc/IGW", "AWS::EC2::InternetGateway", Value::Null)
            .unwrap();
        let route = s
            .add_resource("Vpc/PublicSubnet1/DefaultRoute", "AWS::EC2::Route", Value::Null)
            .unwrap();
        s.add_dependency(&route, &igw).unwrap();
        s.add_dependency(&route, &igw).unwrap();
        assert_eq!(
            s.resource(&route.logical_id).unwrap().depends_on,
            vec![igw.logical_id.clone()]
        );
    }

    #[test]
    fn test_removal_policy_rendered() {
        let mut s = stack();
        let namespace = s
            .add_resource(
                "Cluster/DefaultServiceDiscoveryNamespace/Resource",
                "AWS::ServiceDiscovery::PrivateDnsNamespace",
                props!({ "Name": "nextjs-cdk-prod" }),
            )
            .unwrap();
        s.set_removal_policy(&namespace, RemovalPolicy::Retain).unwrap();

        let rendered = s
            .resource(&namespace.logical_id)
            .unwrap()
            .render("Network", &mut crate::construct::LocalResolver)
            .unwrap();
        assert_eq!(rendered["DeletionPolicy"], "Retain");
        assert_eq!(rendered["UpdateReplacePolicy"], "Retain");
    }

    #[test]
    fn test_cross_stack_explicit_dependency_rejected() {
        let mut a = stack();
        let mut b = Stack::new("App", StackProps::default()).unwrap();
        let vpc = a
            .add_resource("Vpc/Resource", "AWS::EC2::VPC", Value::Null)
            .unwrap();
        let sg = b
            .add_resource("Sg/Resource", "AWS::EC2::SecurityGroup", Value::Null)
            .unwrap();
        assert!(b.add_dependency(&sg, &vpc).is_err());
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(
            Environment::default().to_string(),
            "aws://unknown-account/unknown-region"
        );
        assert_eq!(
            Environment::new("123456789012", "eu-west-1").to_string(),
            "aws://123456789012/eu-west-1"
        );
    }
}
