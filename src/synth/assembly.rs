//! The cloud assembly: synthesized templates plus the manifests that tell a
//! deployment tool how to publish assets and in which order to deploy.

use std::path::{Path, PathBuf};

use serde_json::Value as Json;
use tokio::fs;
use tracing::{debug, info};

use crate::construct::Environment;
use crate::error::{ErrorContext, Result};

/// One synthesized stack.
#[derive(Debug, Clone)]
pub struct StackArtifact {
    /// Construct id, also the artifact id
    pub id: String,
    /// Deployed stack name
    pub stack_name: String,
    /// Target environment
    pub environment: Environment,
    /// CloudFormation template
    pub template: Json,
    /// SHA-256 of the written template file
    pub template_hash: String,
    /// Asset manifest
    pub assets: Json,
    /// Ids of stacks that must be deployed first
    pub dependencies: Vec<String>,
}

impl StackArtifact {
    /// File name of the template inside the assembly.
    pub fn template_file(&self) -> String {
        template_file_name(&self.id)
    }

    /// File name of the asset manifest inside the assembly.
    pub fn assets_file(&self) -> String {
        format!("{}.assets.json", self.id)
    }

    /// Template resources as `(logical id, resource)` pairs.
    pub fn resources(&self) -> Vec<(&str, &Json)> {
        self.template
            .get("Resources")
            .and_then(Json::as_object)
            .map(|map| map.iter().map(|(k, v)| (k.as_str(), v)).collect())
            .unwrap_or_default()
    }

    /// Resources of one CloudFormation type.
    pub fn resources_of_type(&self, resource_type: &str) -> Vec<(&str, &Json)> {
        self.resources()
            .into_iter()
            .filter(|(_, r)| r.get("Type").and_then(Json::as_str) == Some(resource_type))
            .collect()
    }

    /// Properties of the only resource of a type, if there is exactly one.
    pub fn single_resource_properties(&self, resource_type: &str) -> Option<&Json> {
        let matches = self.resources_of_type(resource_type);
        if matches.len() != 1 {
            return None;
        }
        let resource: &Json = matches[0].1;
        resource.get("Properties")
    }

    /// Template outputs.
    pub fn outputs(&self) -> Option<&serde_json::Map<String, Json>> {
        self.template.get("Outputs").and_then(Json::as_object)
    }
}

pub(crate) fn template_file_name(id: &str) -> String {
    format!("{}.template.json", id)
}

/// Everything produced by one synthesis run.
#[derive(Debug, Clone)]
pub struct CloudAssembly {
    /// `manifest.json` content
    pub manifest: Json,
    /// Stacks in deployment order
    pub stacks: Vec<StackArtifact>,
}

impl CloudAssembly {
    /// Stacks in deployment order.
    pub fn stacks(&self) -> &[StackArtifact] {
        &self.stacks
    }

    /// Look up a stack by artifact id.
    pub fn stack(&self, id: &str) -> Option<&StackArtifact> {
        self.stacks.iter().find(|s| s.id == id)
    }

    /// Assembly schema version.
    pub fn version(&self) -> &str {
        self.manifest
            .get("version")
            .and_then(Json::as_str)
            .unwrap_or_default()
    }

    /// Write the assembly into `dir`, creating it if needed.
    ///
    /// Returns the paths written.
    pub async fn write_to(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create assembly directory {}", dir.display()))?;

        let mut written = Vec::new();

        for stack in &self.stacks {
            let template_path = dir.join(stack.template_file());
            write_json(&template_path, &stack.template).await?;
            written.push(template_path);

            let assets_path = dir.join(stack.assets_file());
            write_json(&assets_path, &stack.assets).await?;
            written.push(assets_path);
        }

        let version_path = dir.join("cdk.out");
        write_json(&version_path, &serde_json::json!({ "version": self.version() })).await?;
        written.push(version_path);

        let manifest_path = dir.join("manifest.json");
        write_json(&manifest_path, &self.manifest).await?;
        written.push(manifest_path);

        info!(
            directory = %dir.display(),
            files = written.len(),
            "wrote cloud assembly"
        );
        Ok(written)
    }
}

/// Canonical serialization; template hashes are computed over these bytes.
pub(crate) fn to_canonical_json(value: &Json) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

async fn write_json(path: &Path, value: &Json) -> Result<()> {
    let content = to_canonical_json(value)?;
    fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), "wrote file");
    Ok(())
}
