//! Shared test utilities and fixtures for the nextjs-infra test suite.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use serde_json::Value as Json;
use tempfile::TempDir;

use nextjs_infra::config::Config;
use nextjs_infra::stacks::build_app;
use nextjs_infra::synth::{CloudAssembly, StackArtifact};

/// A Next.js build context with files the image excludes.
pub fn asset_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("create temp dir");
    write(dir.path(), "Dockerfile", "FROM node:20-alpine\nCOPY . .\nCMD [\"npm\", \"start\"]\n");
    write(dir.path(), "package.json", r#"{ "name": "web", "scripts": { "start": "next start" } }"#);
    write(dir.path(), "app/page.tsx", "export default function Page() { return null }\n");
    write(dir.path(), "node_modules/next/package.json", r#"{ "name": "next" }"#);
    write(dir.path(), ".git/HEAD", "ref: refs/heads/main\n");
    write(dir.path(), "infra/Cargo.toml", "[package]\n");
    dir
}

/// Write `content` to `root/relative`, creating parent directories.
pub fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, content).expect("write fixture");
}

/// Default configuration building from `dir`.
pub fn config_for(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.assets.directory = dir.path().to_path_buf();
    config
}

/// Configuration for a named project, environment and architecture.
pub fn config_with(dir: &TempDir, project: &str, environment: &str, arch: Option<&str>) -> Config {
    let mut config = config_for(dir);
    config.project.name = project.to_string();
    config.project.environment = environment.to_string();
    config.project.cpu_arch = arch.map(str::to_string);
    config
}

/// Declare and synthesize both stacks.
pub fn synthesize(config: &Config) -> CloudAssembly {
    build_app(config)
        .expect("declare stacks")
        .synth()
        .expect("synthesize")
}

/// Properties of the single resource of `resource_type`.
pub fn single<'a>(stack: &'a StackArtifact, resource_type: &str) -> &'a Json {
    stack
        .single_resource_properties(resource_type)
        .unwrap_or_else(|| panic!("expected exactly one {}", resource_type))
}

/// Every `Fn::ImportValue` name anywhere in `value`.
pub fn imports(value: &Json) -> Vec<String> {
    let mut found = Vec::new();
    collect_imports(value, &mut found);
    found
}

fn collect_imports(value: &Json, found: &mut Vec<String>) {
    match value {
        Json::Object(map) => {
            if let Some(Json::String(name)) = map.get("Fn::ImportValue") {
                found.push(name.clone());
            }
            map.values().for_each(|v| collect_imports(v, found));
        }
        Json::Array(items) => items.iter().for_each(|v| collect_imports(v, found)),
        _ => {}
    }
}
