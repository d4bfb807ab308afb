//! Container image assets built from a local directory.
//!
//! The asset hash doubles as the image tag, so it must change whenever the
//! build context or the build options change and stay the same otherwise.
//! It is a SHA-256 over every non-excluded file (relative path and content,
//! in sorted order) followed by the build options.

use std::fs;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Target platform of a container image build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    /// `linux/amd64`
    #[serde(rename = "linux/amd64")]
    LinuxAmd64,
    /// `linux/arm64`
    #[serde(rename = "linux/arm64")]
    LinuxArm64,
}

impl Platform {
    /// Docker platform string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::LinuxAmd64 => "linux/amd64",
            Platform::LinuxArm64 => "linux/arm64",
        }
    }

    /// Architecture part, as passed in `TARGETARCH`.
    pub fn arch(&self) -> &'static str {
        match self {
            Platform::LinuxAmd64 => "amd64",
            Platform::LinuxArm64 => "arm64",
        }
    }
}

/// Build options for a container image asset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DockerImageAssetOptions {
    /// Glob patterns excluded from the build context
    pub exclude: Vec<String>,
    /// Target platform
    pub platform: Option<Platform>,
    /// `--build-arg` values
    pub build_args: IndexMap<String, String>,
    /// Dockerfile name relative to the directory
    pub file: Option<String>,
    /// Assembly output directory, never part of the build context
    pub outdir: Option<PathBuf>,
}

impl DockerImageAssetOptions {
    /// Dockerfile path relative to the build context.
    pub fn dockerfile(&self) -> &str {
        self.file.as_deref().unwrap_or(DEFAULT_DOCKERFILE)
    }
}

const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// A fingerprinted container image asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerImageAsset {
    /// Construct path of the asset
    pub id: String,
    /// Absolute build context directory
    pub directory: PathBuf,
    /// Build options
    pub options: DockerImageAssetOptions,
    /// Content hash, also used as the image tag
    pub hash: String,
}

impl DockerImageAsset {
    /// Fingerprint `directory` and create the asset.
    pub fn from_directory(
        id: impl Into<String>,
        directory: impl AsRef<Path>,
        options: DockerImageAssetOptions,
    ) -> Result<Self> {
        let directory = directory.as_ref();
        let absolute = fs::canonicalize(directory)
            .map_err(|e| Error::asset_source(directory, e.to_string()))?;
        if !absolute.is_dir() {
            return Err(Error::asset_source(&absolute, "not a directory"));
        }

        let hash = fingerprint(&absolute, &options)?;

        let id = id.into();
        debug!(asset = %id, %hash, directory = %absolute.display(), "fingerprinted image asset");

        Ok(Self {
            id,
            directory: absolute,
            options,
            hash,
        })
    }
}

/// Hash the build context under `directory` plus the build options.
///
/// Files matching `options.exclude` are skipped, except the Dockerfile. The
/// output directory is skipped when it lies inside the context.
pub fn fingerprint(directory: &Path, options: &DockerImageAssetOptions) -> Result<String> {
    let root = fs::canonicalize(directory)
        .map_err(|e| Error::asset_source(directory, e.to_string()))?;
    let outdir = options.outdir.as_deref().map(resolve_path).transpose()?;
    let filter = ContextFilter {
        matcher: exclude_matcher(&options.exclude)?,
        dockerfile: options.dockerfile().trim_start_matches("./").replace('\\', "/"),
    };
    let mut hasher = Sha256::new();

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            if outdir.as_deref() == Some(entry.path()) {
                return false;
            }
            let rel = relative_path(&root, entry.path());
            filter.includes(&rel, entry.file_type().is_dir())
        });

    for entry in walker {
        let entry = entry.map_err(|e| Error::asset_source(&root, e.to_string()))?;
        if entry.depth() == 0 {
            continue;
        }

        let rel = relative_path(&root, entry.path());
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        // directories kept only to reach the Dockerfile
        if !filter.includes(&rel, false) {
            continue;
        }

        trace!(file = %rel, "hashing asset file");
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            hasher.update(target.to_string_lossy().as_bytes());
        } else {
            hasher.update(fs::read(entry.path())?);
        }
        hasher.update([0u8]);
    }

    let extra = serde_json::json!({
        "platform": options.platform.map(|p| p.as_str()),
        "buildArgs": options.build_args,
        "file": options.file,
    });
    hasher.update(extra.to_string().as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

struct ContextFilter {
    matcher: GlobSet,
    dockerfile: String,
}

impl ContextFilter {
    /// Whether `rel` belongs to the build context.
    fn includes(&self, rel: &str, is_dir: bool) -> bool {
        if rel == self.dockerfile {
            return true;
        }
        if is_dir && self.dockerfile.starts_with(&format!("{}/", rel)) {
            return true;
        }
        // an excluded directory excludes everything below it
        let mut prefix = String::with_capacity(rel.len());
        for (i, part) in rel.split('/').enumerate() {
            if i > 0 {
                prefix.push('/');
            }
            prefix.push_str(part);
            if self.matcher.is_match(&prefix) {
                return false;
            }
        }
        true
    }
}

/// Absolute form of `path`, following symlinks where it exists.
fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    if let Ok(canonical) = fs::canonicalize(&absolute) {
        return Ok(canonical);
    }
    // not written yet
    if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) {
        if let Ok(parent) = fs::canonicalize(parent) {
            return Ok(parent.join(name));
        }
    }
    Ok(absolute)
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Patterns without a slash match at any depth, like `.dockerignore` globs.
fn exclude_matcher(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.trim().trim_end_matches('/');
        if pattern.is_empty() {
            continue;
        }
        let mut variants = vec![pattern.to_string()];
        if !pattern.contains('/') {
            variants.push(format!("**/{}", pattern));
        }
        for variant in variants {
            let glob = GlobBuilder::new(&variant)
                .literal_separator(true)
                .build()
                .map_err(|e| Error::invalid_config("assets.exclude", e.to_string()))?;
            builder.add(glob);
        }
    }
    builder
        .build()
        .map_err(|e| Error::invalid_config("assets.exclude", e.to_string()))
}
