//! Synthesis: turning an [`App`] into a [`CloudAssembly`].
//!
//! The default synthesizer targets an environment bootstrapped with a
//! qualifier: assets go to `cdk-{qualifier}-assets-*` /
//! `cdk-{qualifier}-container-assets-*` and deployments assume the
//! `cdk-{qualifier}-*-role-*` roles. Every template carries the
//! bootstrap-version parameter and rule so a stale bootstrap fails fast.

pub mod asset;
pub mod assembly;

use std::collections::BTreeSet;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::construct::{
    App, CrossStackResolver, DependencyGraph, Environment, ExportSpec, Reference, Stack, Value,
};
use crate::error::{Error, Result};

pub use assembly::{CloudAssembly, StackArtifact};
pub use asset::{DockerImageAsset, DockerImageAssetOptions, Platform};

/// Cloud assembly schema version written to the manifests.
pub const CLOUD_ASSEMBLY_VERSION: &str = "36.0.0";
/// Minimum bootstrap stack version the templates require.
pub const REQUIRED_BOOTSTRAP_VERSION: u32 = 6;
/// Qualifier used when none is configured.
pub const DEFAULT_QUALIFIER: &str = "hnb659fds";

static QUALIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{1,10}$").expect("static regex"));

/// Synthesizer for bootstrapped environments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultStackSynthesizer {
    qualifier: String,
    bucket_prefix: String,
}

impl Default for DefaultStackSynthesizer {
    fn default() -> Self {
        Self {
            qualifier: DEFAULT_QUALIFIER.to_string(),
            bucket_prefix: String::new(),
        }
    }
}

impl DefaultStackSynthesizer {
    /// Create a synthesizer for the given bootstrap qualifier.
    pub fn new(qualifier: impl Into<String>) -> Result<Self> {
        let qualifier = qualifier.into();
        if !QUALIFIER_RE.is_match(&qualifier) {
            return Err(Error::invalid_config(
                "synthesizer.qualifier",
                format!(
                    "'{}' must be 1-10 alphanumeric characters",
                    qualifier
                ),
            ));
        }
        Ok(Self {
            qualifier,
            bucket_prefix: String::new(),
        })
    }

    /// Prefix every file asset object key with `prefix`.
    pub fn with_bucket_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.bucket_prefix = prefix.into();
        self
    }

    /// Bootstrap qualifier.
    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }

    /// Object key prefix for file assets.
    pub fn bucket_prefix(&self) -> &str {
        &self.bucket_prefix
    }

    /// Staging bucket for file assets.
    pub fn file_assets_bucket_name(&self) -> String {
        format!(
            "cdk-{}-assets-${{AWS::AccountId}}-${{AWS::Region}}",
            self.qualifier
        )
    }

    /// ECR repository for image assets.
    pub fn image_assets_repository_name(&self) -> String {
        format!(
            "cdk-{}-container-assets-${{AWS::AccountId}}-${{AWS::Region}}",
            self.qualifier
        )
    }

    fn role_arn(&self, role: &str) -> String {
        format!(
            "arn:${{AWS::Partition}}:iam::${{AWS::AccountId}}:role/cdk-{}-{}-${{AWS::AccountId}}-${{AWS::Region}}",
            self.qualifier, role
        )
    }

    /// Role assumed to deploy stacks.
    pub fn deploy_role_arn(&self) -> String {
        self.role_arn("deploy-role")
    }

    /// Role CloudFormation executes changes with.
    pub fn cloudformation_execution_role_arn(&self) -> String {
        self.role_arn("cfn-exec-role")
    }

    /// Role assumed to publish file assets.
    pub fn file_asset_publishing_role_arn(&self) -> String {
        self.role_arn("file-publishing-role")
    }

    /// Role assumed to publish image assets.
    pub fn image_asset_publishing_role_arn(&self) -> String {
        self.role_arn("image-publishing-role")
    }

    /// Role assumed for context lookups.
    pub fn lookup_role_arn(&self) -> String {
        self.role_arn("lookup-role")
    }

    /// SSM parameter holding the bootstrap stack version.
    pub fn bootstrap_version_parameter(&self) -> String {
        format!("/cdk-bootstrap/{}/version", self.qualifier)
    }

    /// Image URI of a container asset, as a template value.
    pub fn image_uri(&self, asset: &DockerImageAsset) -> Value {
        Value::sub(format!(
            "${{AWS::AccountId}}.dkr.ecr.${{AWS::Region}}.${{AWS::URLSuffix}}/{}:{}",
            self.image_assets_repository_name(),
            asset.hash
        ))
    }

    /// ARN of the image asset repository, as a template value.
    pub fn image_repository_arn(&self) -> Value {
        Value::sub(format!(
            "arn:${{AWS::Partition}}:ecr:${{AWS::Region}}:${{AWS::AccountId}}:repository/{}",
            self.image_assets_repository_name()
        ))
    }

    /// Synthesize every stack of `app`.
    pub fn synthesize(&self, app: &App) -> Result<CloudAssembly> {
        let graph = DependencyGraph::from_app(app)?;
        let order = graph.stack_order()?;
        let resources = graph.resource_order()?;
        debug!(order = ?order, resources = resources.len(), "stack deployment order");

        let stacks: IndexMap<String, &Stack> =
            app.stacks().map(|s| (s.id().to_string(), s)).collect();

        // First pass: render resources and collect what each stack imports.
        let mut rendered: IndexMap<String, (Map<String, Json>, Map<String, Json>)> =
            IndexMap::new();
        let mut exports: IndexMap<String, BTreeSet<Reference>> = IndexMap::new();

        for id in &order {
            let stack = stacks[id.as_str()];
            let mut resolver = CrossStackResolver::new(&stacks, id);

            let mut resources = Map::new();
            for resource in stack.resources() {
                resources.insert(
                    resource.logical_id.clone(),
                    resource.render(id, &mut resolver)?,
                );
            }

            let mut outputs = Map::new();
            for (output_id, output) in stack.outputs() {
                let mut entry = Map::new();
                if let Some(description) = &output.description {
                    entry.insert("Description".into(), json!(description));
                }
                entry.insert("Value".into(), output.value.resolve(&mut resolver)?);
                if let Some(name) = &output.export_name {
                    entry.insert("Export".into(), json!({ "Name": name }));
                }
                outputs.insert(output_id.clone(), Json::Object(entry));
            }

            for import in resolver.into_imports() {
                exports.entry(import.stack.clone()).or_default().insert(import);
            }
            rendered.insert(id.clone(), (resources, outputs));
        }

        // Second pass: add exports to producers and assemble the artifacts.
        let mut artifacts = Vec::with_capacity(order.len());
        for id in &order {
            let stack = stacks[id.as_str()];
            let (resources, mut outputs) = rendered
                .shift_remove(id)
                .ok_or_else(|| Error::DependencyCycle(format!("stack '{}' not rendered", id)))?;

            if let Some(references) = exports.get(id) {
                for reference in references {
                    let export = ExportSpec::for_reference(stack.stack_name(), reference);
                    outputs.insert(
                        export.output_id,
                        json!({
                            "Value": reference.local_json(),
                            "Export": { "Name": export.export_name },
                        }),
                    );
                }
            }

            let template = self.template(stack, resources, outputs);
            let template_hash = sha256_hex(&assembly::to_canonical_json(&template)?);
            let assets = self.asset_manifest(stack, &template_hash);

            artifacts.push(StackArtifact {
                id: id.clone(),
                stack_name: stack.stack_name().to_string(),
                environment: stack.environment().clone(),
                template,
                template_hash,
                assets,
                dependencies: graph.stack_dependencies(id),
            });
        }

        let manifest = self.manifest(&artifacts, app);
        info!(stacks = artifacts.len(), "synthesis complete");

        Ok(CloudAssembly {
            manifest,
            stacks: artifacts,
        })
    }

    fn template(
        &self,
        stack: &Stack,
        resources: Map<String, Json>,
        outputs: Map<String, Json>,
    ) -> Json {
        let mut template = Map::new();
        if let Some(description) = stack.description() {
            template.insert("Description".into(), json!(description));
        }
        template.insert("Resources".into(), Json::Object(resources));
        if !outputs.is_empty() {
            template.insert("Outputs".into(), Json::Object(outputs));
        }
        template.insert(
            "Parameters".into(),
            json!({
                "BootstrapVersion": {
                    "Type": "AWS::SSM::Parameter::Value<String>",
                    "Default": self.bootstrap_version_parameter(),
                    "Description": "Version of the bootstrap resources in this environment, automatically retrieved from SSM Parameter Store. [cdk:skip]"
                }
            }),
        );
        let stale: Vec<String> = (1..REQUIRED_BOOTSTRAP_VERSION).map(|v| v.to_string()).collect();
        template.insert(
            "Rules".into(),
            json!({
                "CheckBootstrapVersion": {
                    "Assertions": [{
                        "Assert": {
                            "Fn::Not": [{ "Fn::Contains": [stale, { "Ref": "BootstrapVersion" }] }]
                        },
                        "AssertDescription": format!(
                            "Bootstrap stack version {} required. Please re-bootstrap the environment.",
                            REQUIRED_BOOTSTRAP_VERSION
                        )
                    }]
                }
            }),
        );
        Json::Object(template)
    }

    fn asset_manifest(&self, stack: &Stack, template_hash: &str) -> Json {
        let env = stack.environment();
        let destination = format!(
            "{}-{}",
            env.account.as_deref().unwrap_or("current_account"),
            env.region.as_deref().unwrap_or("current_region")
        );

        let mut files = Map::new();
        files.insert(
            template_hash.to_string(),
            json!({
                "source": {
                    "path": assembly::template_file_name(stack.id()),
                    "packaging": "file"
                },
                "destinations": {
                    destination.clone(): {
                        "bucketName": substitute(&self.file_assets_bucket_name(), env),
                        "objectKey": format!("{}{}.json", self.bucket_prefix, template_hash),
                        "assumeRoleArn": substitute(&self.file_asset_publishing_role_arn(), env)
                    }
                }
            }),
        );

        let mut images = Map::new();
        for asset in stack.docker_images() {
            let mut source = Map::new();
            source.insert(
                "directory".into(),
                json!(asset.directory.to_string_lossy()),
            );
            if !asset.options.exclude.is_empty() {
                source.insert("exclude".into(), json!(asset.options.exclude));
            }
            if let Some(file) = &asset.options.file {
                source.insert("dockerFile".into(), json!(file));
            }
            if !asset.options.build_args.is_empty() {
                source.insert("dockerBuildArgs".into(), json!(asset.options.build_args));
            }
            if let Some(platform) = asset.options.platform {
                source.insert("platform".into(), json!(platform.as_str()));
            }

            images.insert(
                asset.hash.clone(),
                json!({
                    "source": source,
                    "destinations": {
                        destination.clone(): {
                            "repositoryName": substitute(&self.image_assets_repository_name(), env),
                            "imageTag": asset.hash,
                            "assumeRoleArn": substitute(&self.image_asset_publishing_role_arn(), env)
                        }
                    }
                }),
            );
        }

        json!({
            "version": CLOUD_ASSEMBLY_VERSION,
            "files": files,
            "dockerImages": images,
        })
    }

    fn manifest(&self, artifacts: &[StackArtifact], app: &App) -> Json {
        let mut entries = Map::new();

        for artifact in artifacts {
            let env = &artifact.environment;
            let assets_id = format!("{}.assets", artifact.id);

            entries.insert(
                assets_id.clone(),
                json!({
                    "type": "cdk:asset-manifest",
                    "properties": {
                        "file": artifact.assets_file(),
                        "requiresBootstrapStackVersion": REQUIRED_BOOTSTRAP_VERSION,
                        "bootstrapStackVersionSsmParameter": self.bootstrap_version_parameter()
                    }
                }),
            );

            let mut dependencies = artifact.dependencies.clone();
            dependencies.push(assets_id.clone());

            entries.insert(
                artifact.id.clone(),
                json!({
                    "type": "aws:cloudformation:stack",
                    "environment": env.to_string(),
                    "properties": {
                        "templateFile": artifact.template_file(),
                        "terminationProtection": false,
                        "stackName": artifact.stack_name,
                        "validateOnSynth": false,
                        "assumeRoleArn": substitute(&self.deploy_role_arn(), env),
                        "cloudFormationExecutionRoleArn": substitute(&self.cloudformation_execution_role_arn(), env),
                        "stackTemplateAssetObjectUrl": format!(
                            "s3://{}/{}{}.json",
                            substitute(&self.file_assets_bucket_name(), env),
                            self.bucket_prefix,
                            artifact.template_hash
                        ),
                        "requiresBootstrapStackVersion": REQUIRED_BOOTSTRAP_VERSION,
                        "bootstrapStackVersionSsmParameter": self.bootstrap_version_parameter(),
                        "additionalDependencies": [assets_id],
                        "lookupRole": {
                            "arn": substitute(&self.lookup_role_arn(), env),
                            "requiresBootstrapStackVersion": 8,
                            "bootstrapStackVersionSsmParameter": self.bootstrap_version_parameter()
                        }
                    },
                    "dependencies": dependencies,
                    "displayName": artifact.id
                }),
            );
        }

        let mut manifest = json!({
            "version": CLOUD_ASSEMBLY_VERSION,
            "artifacts": entries,
        });
        if !app.context().is_empty() {
            manifest["context"] = json!(app.context());
        }
        manifest
    }
}

/// Replace account and region placeholders when the environment pins them.
fn substitute(s: &str, env: &Environment) -> String {
    let mut out = s.to_string();
    if let Some(account) = &env.account {
        out = out.replace("${AWS::AccountId}", account);
    }
    if let Some(region) = &env.region {
        out = out.replace("${AWS::Region}", region);
    }
    out
}

fn sha256_hex(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{AppProps, Output, StackProps};
    use crate::props;

    fn app() -> App {
        let synthesizer = DefaultStackSynthesizer::new("nextjscdk")
            .unwrap()
            .with_bucket_prefix("prod/");
        let mut app = App::new(AppProps {
            synthesizer,
            ..AppProps::default()
        });

        let mut network = Stack::new(
            "Network",
            StackProps {
                stack_name: Some("Network-demo-prod".into()),
                ..StackProps::default()
            },
        )
        .unwrap();
        let vpc = network
            .add_resource("Vpc/Resource", "AWS::EC2::VPC", props!({ "CidrBlock": "10.0.0.0/16" }))
            .unwrap();

        let mut consumer = Stack::new(
            "NextJS",
            StackProps {
                stack_name: Some("NextJS-demo-prod".into()),
                ..StackProps::default()
            },
        )
        .unwrap();
        consumer
            .add_resource(
                "Sg/Resource",
                "AWS::EC2::SecurityGroup",
                props!({ "VpcId": vpc.reference(), "GroupDescription": "sg" }),
            )
            .unwrap();
        consumer
            .add_output(
                "VpcOut",
                Output {
                    value: vpc.reference(),
                    description: Some("vpc".into()),
                    export_name: None,
                },
            )
            .unwrap();

        // Added consumer-first to prove ordering comes from the graph.
        app.add_stack(consumer).unwrap();
        app.add_stack(network).unwrap();
        app
    }

    #[test]
    fn test_qualifier_validation() {
        assert!(DefaultStackSynthesizer::new("nextjscdk").is_ok());
        assert!(DefaultStackSynthesizer::new("waytoolongqualifier").is_err());
        assert!(DefaultStackSynthesizer::new("bad-q").is_err());
    }

    #[test]
    fn test_producer_synthesized_first_with_export() {
        let assembly = app().synth().unwrap();
        let ids: Vec<&str> = assembly.stacks().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["Network", "NextJS"]);

        let network = assembly.stack("Network").unwrap();
        let outputs = network.outputs().unwrap();
        assert_eq!(outputs.len(), 1);
        let (_, export) = outputs.iter().next().unwrap();
        assert_eq!(export["Value"], json!({ "Ref": "Vpc8378EB38" }));

        let consumer = assembly.stack("NextJS").unwrap();
        assert_eq!(consumer.dependencies, vec!["Network".to_string()]);
        let sg = consumer
            .single_resource_properties("AWS::EC2::SecurityGroup")
            .unwrap();
        assert_eq!(
            sg["VpcId"]["Fn::ImportValue"],
            export["Export"]["Name"]
        );
    }

    #[test]
    fn test_bootstrap_parameter_and_rule() {
        let assembly = app().synth().unwrap();
        let template = &assembly.stack("Network").unwrap().template;
        assert_eq!(
            template["Parameters"]["BootstrapVersion"]["Default"],
            "/cdk-bootstrap/nextjscdk/version"
        );
        assert!(template["Rules"]["CheckBootstrapVersion"].is_object());
    }

    #[test]
    fn test_manifest_and_asset_manifest() {
        let assembly = app().synth().unwrap();
        let manifest = &assembly.manifest;
        let artifact = &manifest["artifacts"]["NextJS"];
        assert_eq!(artifact["type"], "aws:cloudformation:stack");
        assert_eq!(artifact["environment"], "aws://unknown-account/unknown-region");
        assert_eq!(artifact["dependencies"], json!(["Network", "NextJS.assets"]));

        let network = assembly.stack("Network").unwrap();
        let object_url = manifest["artifacts"]["Network"]["properties"]["stackTemplateAssetObjectUrl"]
            .as_str()
            .unwrap();
        assert!(object_url.starts_with("s3://cdk-nextjscdk-assets-${AWS::AccountId}-${AWS::Region}/prod/"));
        assert!(object_url.ends_with(&format!("{}.json", network.template_hash)));

        let file = &network.assets["files"][&network.template_hash];
        assert_eq!(file["source"]["path"], "Network.template.json");
        assert_eq!(
            file["destinations"]["current_account-current_region"]["objectKey"],
            format!("prod/{}.json", network.template_hash)
        );
    }

    #[test]
    fn test_resolved_environment_substitutes_placeholders() {
        let env = Environment::new("123456789012", "eu-west-1");
        let synth = DefaultStackSynthesizer::new("nextjscdk").unwrap();
        assert_eq!(
            substitute(&synth.deploy_role_arn(), &env),
            "arn:${AWS::Partition}:iam::123456789012:role/cdk-nextjscdk-deploy-role-123456789012-eu-west-1"
        );
    }
}
