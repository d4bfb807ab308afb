//! Configuration for nextjs-infra
//!
//! Settings are resolved from several sources, later ones winning:
//! - Default values
//! - A configuration file (`infra.toml`, `infra.yaml`, `infra.yml` or
//!   `infra.json` in the working directory, or an explicit path)
//! - Environment variables
//! - Command-line flags (applied by the CLI)

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::construct::Environment;
use crate::error::{Error, ErrorContext, Result};
use crate::resources::ecs::CpuArchitecture;
use crate::synth::DefaultStackSynthesizer;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "NEXTJS_INFRA_CONFIG";

/// Files looked up in the working directory, in order.
const DEFAULT_CONFIG_FILES: [&str; 4] = ["infra.toml", "infra.yaml", "infra.yml", "infra.json"];

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]*$").expect("static regex"));

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project naming and CPU architecture
    pub project: ProjectConfig,

    /// Target account and region
    pub deploy: DeployConfig,

    /// Bootstrap resources used by the stacks
    pub synthesizer: SynthesizerConfig,

    /// Container build context
    pub assets: AssetsConfig,

    /// Cloud assembly output
    pub output: OutputConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Project settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project name, part of every stack and resource name
    pub name: String,

    /// Environment tag, e.g. `prod` or `staging`
    pub environment: String,

    /// `x86` selects X86_64/amd64; anything else ARM64/arm64
    pub cpu_arch: Option<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "nextjs-cdk".to_string(),
            environment: "prod".to_string(),
            cpu_arch: None,
        }
    }
}

/// Deployment target. Unset values stay unresolved in the assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Account id
    pub account: Option<String>,

    /// Region
    pub region: Option<String>,
}

/// Synthesizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
    /// Bootstrap qualifier
    pub qualifier: String,

    /// Prefix of template and file asset keys; `{environment}/` when unset
    pub bucket_prefix: Option<String>,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            qualifier: "nextjscdk".to_string(),
            bucket_prefix: None,
        }
    }
}

/// Container image build context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Build context directory
    pub directory: PathBuf,

    /// Glob patterns left out of the build context and the asset hash
    pub exclude: Vec<String>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(".."),
            exclude: vec![
                ".git".to_string(),
                ".readme".to_string(),
                "node_modules".to_string(),
                "infra".to_string(),
            ],
        }
    }
}

/// Cloud assembly output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Assembly directory
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("cdk.out"),
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when neither `RUST_LOG` nor `-v` is given
    pub level: String,

    /// Log format
    pub format: LogFormat,

    /// Colored human output
    pub color: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
            color: true,
        }
    }
}

impl Config {
    /// Load configuration from the file (if any) and the environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from);
        let mut config = match Self::find_config_file(config_path, env_path.as_deref())? {
            Some(path) => Self::from_file(&path)?,
            None => Config::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// The file to read: an explicit path must exist, the defaults may not
    fn find_config_file(explicit: Option<&Path>, from_env: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit.or(from_env) {
            if !path.is_file() {
                return Err(Error::Config(format!(
                    "configuration file '{}' does not exist",
                    path.display()
                )));
            }
            return Ok(Some(path.to_path_buf()));
        }
        Ok(DEFAULT_CONFIG_FILES
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file()))
    }

    /// Read a single configuration file; the format follows the extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            _ => {
                // Unknown extension: TOML, then YAML
                toml::from_str(&content)
                    .or_else(|_| serde_yaml::from_str(&content))
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
        };

        debug!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`, which maps variable names to values
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // PROJECT_NAME
        if let Some(name) = lookup("PROJECT_NAME") {
            self.project.name = name;
        }

        // ENVIRONMENT
        if let Some(environment) = lookup("ENVIRONMENT") {
            self.project.environment = environment;
        }

        // CPU_ARCH
        if let Some(arch) = lookup("CPU_ARCH") {
            self.project.cpu_arch = Some(arch);
        }

        // CDK_DEFAULT_ACCOUNT
        if let Some(account) = lookup("CDK_DEFAULT_ACCOUNT") {
            self.deploy.account = Some(account);
        }

        // CDK_DEFAULT_REGION
        if let Some(region) = lookup("CDK_DEFAULT_REGION") {
            self.deploy.region = Some(region);
        }

        // CDK_OUTDIR
        if let Some(dir) = lookup("CDK_OUTDIR") {
            self.output.directory = PathBuf::from(dir);
        }

        // NO_COLOR
        if lookup("NO_COLOR").is_some() {
            self.logging.color = false;
        }
    }

    /// Reject values no stack could be named after
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("project.name", &self.project.name),
            ("project.environment", &self.project.environment),
        ] {
            if !NAME_RE.is_match(value) {
                return Err(Error::invalid_config(
                    key,
                    format!(
                        "'{}' must start with a letter or digit and contain only letters, digits and hyphens",
                        value
                    ),
                ));
            }
        }
        self.stack_synthesizer().map(|_| ())
    }

    /// CPU architecture selected by `project.cpu_arch`
    pub fn cpu_architecture(&self) -> CpuArchitecture {
        CpuArchitecture::from_selector(self.project.cpu_arch.as_deref())
    }

    /// Deployment environment of both stacks
    pub fn stack_env(&self) -> Environment {
        Environment {
            account: self.deploy.account.clone(),
            region: self.deploy.region.clone(),
        }
    }

    /// Effective bucket prefix
    pub fn bucket_prefix(&self) -> String {
        self.synthesizer
            .bucket_prefix
            .clone()
            .unwrap_or_else(|| format!("{}/", self.project.environment))
    }

    /// The synthesizer shared by both stacks
    pub fn stack_synthesizer(&self) -> Result<DefaultStackSynthesizer> {
        Ok(DefaultStackSynthesizer::new(&self.synthesizer.qualifier)?
            .with_bucket_prefix(self.bucket_prefix()))
    }

    /// Context recorded in the assembly manifest
    pub fn context(&self) -> IndexMap<String, String> {
        let mut context = IndexMap::new();
        if let Some(account) = &self.deploy.account {
            context.insert("account".to_string(), account.clone());
        }
        if let Some(region) = &self.deploy.region {
            context.insert("region".to_string(), region.clone());
        }
        context.insert("environment".to_string(), self.project.environment.clone());
        context
    }

    /// `{project}-{environment}`
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.project.name, "nextjs-cdk");
        assert_eq!(config.project.environment, "prod");
        assert_eq!(config.synthesizer.qualifier, "nextjscdk");
        assert_eq!(config.bucket_prefix(), "prod/");
        assert_eq!(config.output.directory, PathBuf::from("cdk.out"));
        assert_eq!(config.cpu_architecture(), CpuArchitecture::Arm64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [project]
            environment = "staging"

            [synthesizer]
            bucket_prefix = "custom/"
            "#,
        )
        .unwrap();
        assert_eq!(config.project.name, "nextjs-cdk");
        assert_eq!(config.project.environment, "staging");
        assert_eq!(config.bucket_prefix(), "custom/");
        assert_eq!(config.assets.exclude.len(), 4);
    }

    #[test]
    fn test_env_override() {
        let vars: HashMap<&str, &str> = [
            ("PROJECT_NAME", "shop"),
            ("ENVIRONMENT", "dev"),
            ("CPU_ARCH", "x86"),
            ("CDK_DEFAULT_REGION", "eu-west-1"),
            ("NO_COLOR", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.qualified_name(), "shop-dev");
        assert_eq!(config.cpu_architecture(), CpuArchitecture::X86_64);
        assert_eq!(config.stack_env().region.as_deref(), Some("eu-west-1"));
        assert!(config.stack_env().account.is_none());
        assert!(!config.logging.color);
        assert_eq!(config.bucket_prefix(), "dev/");
        assert_eq!(config.context().get("environment").unwrap(), "dev");
        assert!(!config.context().contains_key("account"));
    }

    #[test]
    fn test_invalid_values() {
        let mut config = Config::default();
        config.project.environment = "prod env".into();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { .. })
        ));

        let mut config = Config::default();
        config.synthesizer.qualifier = "way-too-long-qualifier".into();
        assert!(config.validate().is_err());
    }
}
