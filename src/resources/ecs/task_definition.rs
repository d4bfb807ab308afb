//! Task definitions and container definitions.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::construct::logical_id::make_unique_id;
use crate::construct::{ResourceRef, Stack, Value};
use crate::error::{Error, Result};
use crate::props;
use crate::resources::ec2::Protocol;
use crate::resources::iam::{PolicyStatement, Role};
use crate::synth::{DefaultStackSynthesizer, DockerImageAsset, Platform};

const ECS_TASKS_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";

/// CPU architecture of the task's runtime platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpuArchitecture {
    /// x86-64
    #[serde(rename = "X86_64")]
    X86_64,
    /// 64-bit ARM (Graviton)
    #[serde(rename = "ARM64")]
    Arm64,
}

impl CpuArchitecture {
    /// Interpret a selector string: `x86` means x86-64, anything else ARM64.
    pub fn from_selector(selector: Option<&str>) -> Self {
        match selector {
            Some("x86") => CpuArchitecture::X86_64,
            _ => CpuArchitecture::Arm64,
        }
    }

    /// Name used in `RuntimePlatform.CpuArchitecture`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CpuArchitecture::X86_64 => "X86_64",
            CpuArchitecture::Arm64 => "ARM64",
        }
    }

    /// Image build platform producing binaries for this architecture.
    pub fn platform(&self) -> Platform {
        match self {
            CpuArchitecture::X86_64 => Platform::LinuxAmd64,
            CpuArchitecture::Arm64 => Platform::LinuxArm64,
        }
    }
}

impl fmt::Display for CpuArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Launch types a task definition is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compatibility {
    /// EC2 container instances
    Ec2,
    /// Fargate
    Fargate,
    /// Both
    Ec2AndFargate,
}

impl Compatibility {
    fn requires(&self) -> Vec<&'static str> {
        match self {
            Compatibility::Ec2 => vec!["EC2"],
            Compatibility::Fargate => vec!["FARGATE"],
            Compatibility::Ec2AndFargate => vec!["EC2", "FARGATE"],
        }
    }

    /// True when Fargate can run the task.
    pub fn is_fargate_compatible(&self) -> bool {
        !matches!(self, Compatibility::Ec2)
    }
}

/// Check a CPU/memory pair against the shapes Fargate supports.
pub fn validate_fargate_shape(cpu: u32, memory_mib: u32) -> bool {
    let (min, max, step) = match cpu {
        256 => {
            return matches!(memory_mib, 512 | 1024 | 2048);
        }
        512 => (1024, 4096, 1024),
        1024 => (2048, 8192, 1024),
        2048 => (4096, 16384, 1024),
        4096 => (8192, 30720, 1024),
        8192 => (16384, 61440, 4096),
        16384 => (32768, 122880, 8192),
        _ => return false,
    };
    (min..=max).contains(&memory_mib) && memory_mib % step == 0
}

/// Options for [`TaskDefinition::new`].
#[derive(Debug, Clone)]
pub struct TaskDefinitionProps {
    /// Task family; derived from the construct path when unset
    pub family: Option<String>,
    /// CPU units, as a string (`"256"`)
    pub cpu: String,
    /// Memory in MiB, as a string (`"512"`)
    pub memory_mib: String,
    /// CPU architecture of the Linux runtime platform
    pub cpu_architecture: Option<CpuArchitecture>,
    /// Launch type compatibility
    pub compatibility: Compatibility,
}

/// Where a container image comes from.
#[derive(Debug, Clone)]
pub enum ContainerImage {
    /// Built from local sources and published to the bootstrap repository
    Asset(DockerImageAsset),
    /// An existing image URI
    Registry(String),
}

/// A container port mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// Name, used by Service Connect and for lookups
    pub name: Option<String>,
    /// Port inside the container
    pub container_port: u16,
    /// Host port; must equal the container port in `awsvpc` mode
    pub host_port: Option<u16>,
    /// TCP or UDP
    pub protocol: Protocol,
}

impl PortMapping {
    /// A named TCP mapping.
    pub fn tcp(name: &str, container_port: u16) -> Self {
        Self {
            name: Some(name.to_string()),
            container_port,
            host_port: None,
            protocol: Protocol::Tcp,
        }
    }

    fn to_value(&self) -> Value {
        props!({
            "ContainerPort": self.container_port,
            "HostPort": self.host_port,
            "Name": self.name.clone(),
            "Protocol": self.protocol.as_str(),
        })
    }
}

/// Options for [`TaskDefinition::add_container`].
#[derive(Debug, Clone)]
pub struct ContainerDefinitionOptions {
    /// Image source
    pub image: ContainerImage,
    /// Stop the task when this container stops
    pub essential: bool,
    /// Run an init process as PID 1 to reap zombies and forward signals
    pub init_process_enabled: bool,
    /// Environment variables
    pub environment: IndexMap<String, String>,
    /// Port mappings
    pub port_mappings: Vec<PortMapping>,
}

impl ContainerDefinitionOptions {
    /// An essential container with no extras.
    pub fn new(image: ContainerImage) -> Self {
        Self {
            image,
            essential: true,
            init_process_enabled: false,
            environment: IndexMap::new(),
            port_mappings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Container {
    name: String,
    image: Value,
    essential: bool,
    init_process_enabled: bool,
    environment: IndexMap<String, String>,
    port_mappings: Vec<PortMapping>,
}

impl Container {
    fn to_value(&self) -> Value {
        let linux_parameters = self.init_process_enabled.then(|| {
            props!({
                "Capabilities": props!({}),
                "InitProcessEnabled": true,
            })
        });
        let environment = (!self.environment.is_empty()).then(|| {
            Value::list(
                self.environment
                    .iter()
                    .map(|(name, value)| props!({ "Name": name, "Value": value })),
            )
        });
        let port_mappings = (!self.port_mappings.is_empty()).then(|| {
            Value::list(self.port_mappings.iter().map(PortMapping::to_value))
        });

        props!({
            "Environment": environment,
            "Essential": self.essential,
            "Image": self.image.clone(),
            "LinuxParameters": linux_parameters,
            "Name": self.name.as_str(),
            "PortMappings": port_mappings,
        })
    }
}

/// Handle to a declared task definition.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    id: String,
    family: String,
    cpu: u32,
    memory_mib: u32,
    cpu_architecture: Option<CpuArchitecture>,
    compatibility: Compatibility,
    resource: ResourceRef,
    task_role: Role,
    execution_role: Option<Role>,
    containers: Vec<Container>,
}

impl TaskDefinition {
    /// Declare a task definition and its task role.
    pub fn new(stack: &mut Stack, id: &str, props: TaskDefinitionProps) -> Result<Self> {
        let cpu = parse_units(id, "cpu", &props.cpu)?;
        let memory_mib = parse_units(id, "memory", &props.memory_mib)?;
        if props.compatibility.is_fargate_compatible() && !validate_fargate_shape(cpu, memory_mib)
        {
            return Err(Error::validation(
                id,
                format!(
                    "Fargate does not support {} CPU units with {} MiB of memory",
                    cpu, memory_mib
                ),
            ));
        }

        let family = match props.family {
            Some(family) => {
                let valid = !family.is_empty()
                    && family.len() <= 255
                    && family
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
                if !valid {
                    return Err(Error::validation(
                        id,
                        format!("invalid task family '{}'", family),
                    ));
                }
                family
            }
            None => make_unique_id(&[stack.id(), id])?,
        };

        let task_role = Role::new(stack, &format!("{}/TaskRole", id), ECS_TASKS_PRINCIPAL)?;

        let network_mode = if props.compatibility.is_fargate_compatible() {
            "awsvpc"
        } else {
            "bridge"
        };
        let runtime_platform = props.cpu_architecture.map(|arch| {
            props!({
                "CpuArchitecture": arch.as_str(),
                "OperatingSystemFamily": "LINUX",
            })
        });

        let resource = stack.add_resource(
            &format!("{}/Resource", id),
            "AWS::ECS::TaskDefinition",
            props!({
                "ContainerDefinitions": Vec::<Value>::new(),
                "Cpu": props.cpu.as_str(),
                "Family": family.as_str(),
                "Memory": props.memory_mib.as_str(),
                "NetworkMode": network_mode,
                "RequiresCompatibilities": props.compatibility.requires(),
                "RuntimePlatform": runtime_platform,
                "TaskRoleArn": task_role.arn(),
            }),
        )?;

        Ok(Self {
            id: id.to_string(),
            family,
            cpu,
            memory_mib,
            cpu_architecture: props.cpu_architecture,
            compatibility: props.compatibility,
            resource,
            task_role,
            execution_role: None,
            containers: Vec::new(),
        })
    }

    /// Add a container. Image assets are registered with the stack and the
    /// execution role is granted pull access to the asset repository.
    pub fn add_container(
        &mut self,
        stack: &mut Stack,
        name: &str,
        options: ContainerDefinitionOptions,
        synthesizer: &DefaultStackSynthesizer,
    ) -> Result<()> {
        if self.containers.iter().any(|c| c.name == name) {
            return Err(Error::DuplicateConstruct {
                stack: stack.id().to_string(),
                path: format!("{}/{}", self.id, name),
                logical_id: name.to_string(),
            });
        }

        let image = match options.image {
            ContainerImage::Registry(uri) => Value::from(uri),
            ContainerImage::Asset(asset) => {
                if let (Some(arch), Some(platform)) =
                    (self.cpu_architecture, asset.options.platform)
                {
                    if arch.platform() != platform {
                        return Err(Error::validation(
                            format!("{}/{}", self.id, name),
                            format!(
                                "image is built for {} but the task runs on {}",
                                platform.as_str(),
                                arch
                            ),
                        ));
                    }
                }
                let uri = synthesizer.image_uri(&asset);
                self.grant_pull(stack, synthesizer)?;
                debug!(container = name, hash = %asset.hash, "container uses image asset");
                stack.add_docker_image_asset(asset);
                uri
            }
        };

        let mut container = Container {
            name: name.to_string(),
            image,
            essential: options.essential,
            init_process_enabled: options.init_process_enabled,
            environment: options.environment,
            port_mappings: Vec::new(),
        };
        for mapping in options.port_mappings {
            self.check_port_mapping(&container, &mapping)?;
            container.port_mappings.push(mapping);
        }
        self.containers.push(container);
        self.sync(stack)
    }

    /// Add port mappings to an existing container.
    pub fn add_port_mappings(
        &mut self,
        stack: &mut Stack,
        container_name: &str,
        mappings: Vec<PortMapping>,
    ) -> Result<()> {
        let index = self
            .containers
            .iter()
            .position(|c| c.name == container_name)
            .ok_or_else(|| {
                Error::validation(
                    &self.id,
                    format!("no container named '{}'", container_name),
                )
            })?;

        for mapping in mappings {
            self.check_port_mapping(&self.containers[index], &mapping)?;
            self.containers[index].port_mappings.push(mapping);
        }
        self.sync(stack)
    }

    fn check_port_mapping(&self, container: &Container, mapping: &PortMapping) -> Result<()> {
        let path = format!("{}/{}", self.id, container.name);
        if mapping.container_port == 0 {
            return Err(Error::validation(path, "container port must be non-zero"));
        }
        if mapping.protocol == Protocol::All {
            return Err(Error::validation(path, "port mappings must be tcp or udp"));
        }
        if self.network_mode() == "awsvpc" {
            if let Some(host) = mapping.host_port {
                if host != mapping.container_port {
                    return Err(Error::validation(
                        path,
                        "host port must equal container port in awsvpc mode",
                    ));
                }
            }
        }
        let clash = container.port_mappings.iter().any(|m| {
            (m.container_port == mapping.container_port && m.protocol == mapping.protocol)
                || (m.name.is_some() && m.name == mapping.name)
        });
        if clash {
            return Err(Error::validation(
                path,
                format!("duplicate port mapping for port {}", mapping.container_port),
            ));
        }
        Ok(())
    }

    fn grant_pull(&mut self, stack: &mut Stack, synthesizer: &DefaultStackSynthesizer) -> Result<()> {
        let role = match self.execution_role.take() {
            Some(role) => role,
            None => {
                let role = Role::new(
                    stack,
                    &format!("{}/ExecutionRole", self.id),
                    ECS_TASKS_PRINCIPAL,
                )?;
                stack
                    .properties_mut(&self.resource)?
                    .insert("ExecutionRoleArn", role.arn());
                role
            }
        };
        let role = self.execution_role.insert(role);
        role.add_to_policy(
            stack,
            PolicyStatement::allow(
                [
                    "ecr:BatchCheckLayerAvailability",
                    "ecr:GetDownloadUrlForLayer",
                    "ecr:BatchGetImage",
                ],
                vec![synthesizer.image_repository_arn()],
            ),
        )?;
        role.add_to_policy(
            stack,
            PolicyStatement::allow(["ecr:GetAuthorizationToken"], vec!["*".into()]),
        )
    }

    fn sync(&self, stack: &mut Stack) -> Result<()> {
        let containers: Vec<Value> = self.containers.iter().map(Container::to_value).collect();
        stack
            .properties_mut(&self.resource)?
            .insert("ContainerDefinitions", containers);
        Ok(())
    }

    /// The task definition ARN (`Ref`).
    pub fn task_definition_arn(&self) -> Value {
        self.resource.reference()
    }

    /// The declared resource.
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    /// Task family.
    pub fn family(&self) -> &str {
        &self.family
    }

    /// CPU units.
    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    /// Memory in MiB.
    pub fn memory_mib(&self) -> u32 {
        self.memory_mib
    }

    /// Runtime CPU architecture.
    pub fn cpu_architecture(&self) -> Option<CpuArchitecture> {
        self.cpu_architecture
    }

    /// Launch type compatibility.
    pub fn compatibility(&self) -> Compatibility {
        self.compatibility
    }

    /// Network mode.
    pub fn network_mode(&self) -> &'static str {
        if self.compatibility.is_fargate_compatible() {
            "awsvpc"
        } else {
            "bridge"
        }
    }

    /// Role assumed by the application.
    pub fn task_role(&self) -> &Role {
        &self.task_role
    }

    /// Role the agent uses to pull images, once one is needed.
    pub fn execution_role(&self) -> Option<&Role> {
        self.execution_role.as_ref()
    }

    /// Container names in declaration order.
    pub fn container_names(&self) -> Vec<&str> {
        self.containers.iter().map(|c| c.name.as_str()).collect()
    }

    /// The first essential container and its first port, used when a
    /// service registers in Cloud Map.
    pub fn default_container_port(&self) -> Option<(&str, u16)> {
        self.containers
            .iter()
            .find(|c| c.essential)
            .and_then(|c| {
                c.port_mappings
                    .first()
                    .map(|m| (c.name.as_str(), m.container_port))
            })
    }
}

fn parse_units(id: &str, what: &str, raw: &str) -> Result<u32> {
    raw.trim().parse::<u32>().map_err(|_| {
        Error::validation(id, format!("{} must be a whole number, got '{}'", what, raw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{LocalResolver, StackProps};
    use crate::synth::DockerImageAssetOptions;
    use std::fs;
    use tempfile::tempdir;

    fn props(arch: CpuArchitecture) -> TaskDefinitionProps {
        TaskDefinitionProps {
            family: Some("nextjs-cdk-nextjs-prod".into()),
            cpu: "256".into(),
            memory_mib: "512".into(),
            cpu_architecture: Some(arch),
            compatibility: Compatibility::Fargate,
        }
    }

    fn rendered(stack: &Stack, td: &TaskDefinition) -> serde_json::Value {
        stack
            .resource(&td.resource().logical_id)
            .unwrap()
            .properties
            .resolve(&mut LocalResolver)
            .unwrap()
    }

    fn asset(platform: Platform) -> (tempfile::TempDir, DockerImageAsset) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM node:20").unwrap();
        let asset = DockerImageAsset::from_directory(
            "NextJSContainer",
            dir.path(),
            DockerImageAssetOptions {
                platform: Some(platform),
                ..DockerImageAssetOptions::default()
            },
        )
        .unwrap();
        (dir, asset)
    }

    #[test]
    fn test_selector() {
        assert_eq!(CpuArchitecture::from_selector(Some("x86")), CpuArchitecture::X86_64);
        assert_eq!(CpuArchitecture::from_selector(Some("arm")), CpuArchitecture::Arm64);
        assert_eq!(CpuArchitecture::from_selector(Some("X86")), CpuArchitecture::Arm64);
        assert_eq!(CpuArchitecture::from_selector(None), CpuArchitecture::Arm64);
        assert_eq!(CpuArchitecture::X86_64.platform(), Platform::LinuxAmd64);
    }

    #[test]
    fn test_fargate_shapes() {
        assert!(validate_fargate_shape(256, 512));
        assert!(validate_fargate_shape(1024, 3072));
        assert!(validate_fargate_shape(16384, 122880));
        assert!(!validate_fargate_shape(256, 4096));
        assert!(!validate_fargate_shape(8192, 18432));
        assert!(!validate_fargate_shape(300, 512));
    }

    #[test]
    fn test_task_definition_properties() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let td = TaskDefinition::new(&mut stack, "TaskDefinition", props(CpuArchitecture::Arm64)).unwrap();
        let json = rendered(&stack, &td);
        assert_eq!(json["Cpu"], "256");
        assert_eq!(json["Memory"], "512");
        assert_eq!(json["NetworkMode"], "awsvpc");
        assert_eq!(json["RequiresCompatibilities"][0], "FARGATE");
        assert_eq!(json["RuntimePlatform"]["CpuArchitecture"], "ARM64");
        assert_eq!(json["RuntimePlatform"]["OperatingSystemFamily"], "LINUX");
        assert!(json.get("ExecutionRoleArn").is_none());
    }

    #[test]
    fn test_invalid_shape_rejected() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let mut p = props(CpuArchitecture::Arm64);
        p.memory_mib = "8192".into();
        assert!(TaskDefinition::new(&mut stack, "TaskDefinition", p).is_err());

        let mut p = props(CpuArchitecture::Arm64);
        p.cpu = "quarter".into();
        assert!(TaskDefinition::new(&mut stack, "Other", p).is_err());
    }

    #[test]
    fn test_asset_container_with_port_mapping() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let synth = DefaultStackSynthesizer::new("nextjscdk").unwrap();
        let mut td = TaskDefinition::new(&mut stack, "TaskDefinition", props(CpuArchitecture::Arm64)).unwrap();
        let (_dir, image) = asset(Platform::LinuxArm64);

        let mut options = ContainerDefinitionOptions::new(ContainerImage::Asset(image));
        options.init_process_enabled = true;
        td.add_container(&mut stack, "NextJSContainer", options, &synth)
            .unwrap();
        td.add_port_mappings(&mut stack, "NextJSContainer", vec![PortMapping::tcp("http", 3000)])
            .unwrap();

        let json = rendered(&stack, &td);
        let container = &json["ContainerDefinitions"][0];
        assert_eq!(container["Name"], "NextJSContainer");
        assert_eq!(container["Essential"], true);
        assert_eq!(container["LinuxParameters"]["InitProcessEnabled"], true);
        assert_eq!(
            container["PortMappings"],
            serde_json::json!([{ "ContainerPort": 3000, "Name": "http", "Protocol": "tcp" }])
        );
        assert!(container["Image"]["Fn::Sub"]
            .as_str()
            .unwrap()
            .contains("cdk-nextjscdk-container-assets"));
        assert!(json["ExecutionRoleArn"]["Fn::GetAtt"].is_array());
        assert_eq!(stack.docker_images().len(), 1);
        assert_eq!(td.default_container_port(), Some(("NextJSContainer", 3000)));

        let err = td
            .add_port_mappings(&mut stack, "NextJSContainer", vec![PortMapping::tcp("web", 3000)])
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_platform_mismatch_rejected() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let synth = DefaultStackSynthesizer::default();
        let mut td = TaskDefinition::new(&mut stack, "TaskDefinition", props(CpuArchitecture::X86_64)).unwrap();
        let (_dir, image) = asset(Platform::LinuxArm64);
        let err = td
            .add_container(
                &mut stack,
                "NextJSContainer",
                ContainerDefinitionOptions::new(ContainerImage::Asset(image)),
                &synth,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_registry_image_needs_no_execution_role() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let synth = DefaultStackSynthesizer::default();
        let mut td = TaskDefinition::new(&mut stack, "TaskDefinition", props(CpuArchitecture::Arm64)).unwrap();
        td.add_container(
            &mut stack,
            "web",
            ContainerDefinitionOptions::new(ContainerImage::Registry("nginx:latest".into())),
            &synth,
        )
        .unwrap();
        assert!(td.execution_role().is_none());
        assert!(td
            .add_container(
                &mut stack,
                "web",
                ContainerDefinitionOptions::new(ContainerImage::Registry("nginx".into())),
                &synth,
            )
            .is_err());
    }
}
