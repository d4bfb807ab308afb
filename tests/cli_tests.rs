//! CLI tests for nextjs-infra
//!
//! Runs the built binary with assert_cmd in a scratch working directory so
//! no configuration file or assembly from the repository is picked up.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use common::{asset_dir, write};

const ENV_VARS: [&str; 8] = [
    "PROJECT_NAME",
    "ENVIRONMENT",
    "CPU_ARCH",
    "CDK_DEFAULT_ACCOUNT",
    "CDK_DEFAULT_REGION",
    "CDK_OUTDIR",
    "NEXTJS_INFRA_CONFIG",
    "RUST_LOG",
];

// Helper to get a command for testing
fn cmd(workdir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("nextjs-infra").unwrap();
    cmd.current_dir(workdir.path()).env("NO_COLOR", "1");
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn json_stdout(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout is one JSON document")
}

// ============================================================================
// Help and argument errors
// ============================================================================

#[test]
fn test_help_lists_commands() {
    let workdir = tempfile::tempdir().unwrap();
    cmd(&workdir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("synth"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("graph"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_version() {
    let workdir = tempfile::tempdir().unwrap();
    cmd(&workdir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_missing_subcommand_fails() {
    let workdir = tempfile::tempdir().unwrap();
    cmd(&workdir).assert().failure();
}

// ============================================================================
// list
// ============================================================================

#[test]
fn test_list_in_deployment_order() {
    let workdir = tempfile::tempdir().unwrap();
    let assets = asset_dir();
    cmd(&workdir)
        .args(["list", "--asset-dir"])
        .arg(assets.path())
        .assert()
        .success()
        .stdout(predicate::str::is_match("(?s)Network\tNetwork-nextjs-cdk-prod.*NextJS\tNextJS-nextjs-cdk-prod").unwrap());
}

#[test]
fn test_list_json_with_overrides() {
    let workdir = tempfile::tempdir().unwrap();
    let assets = asset_dir();
    let output = cmd(&workdir)
        .args(["--output", "json", "--project", "shop", "list", "--asset-dir"])
        .arg(assets.path())
        .env("ENVIRONMENT", "staging")
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = json_stdout(&output);
    assert_eq!(json["stacks"][0]["stackName"], "Network-shop-staging");
    assert_eq!(json["stacks"][1]["stackName"], "NextJS-shop-staging");
    assert_eq!(json["stacks"][1]["dependencies"], serde_json::json!(["Network"]));
}

// ============================================================================
// synth
// ============================================================================

#[test]
fn test_synth_writes_assembly() {
    let workdir = tempfile::tempdir().unwrap();
    let assets = asset_dir();
    cmd(&workdir)
        .args(["synth", "--out", "out", "--asset-dir"])
        .arg(assets.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Cloud assembly written to out"));

    for file in ["manifest.json", "Network.template.json", "NextJS.template.json"] {
        assert!(workdir.path().join("out").join(file).is_file(), "{} missing", file);
    }
}

#[test]
fn test_synth_honors_cdk_outdir_and_cpu_arch() {
    let workdir = tempfile::tempdir().unwrap();
    let assets = asset_dir();
    let output = cmd(&workdir)
        .args(["--output", "json", "synth", "--asset-dir"])
        .arg(assets.path())
        .env("CDK_OUTDIR", "assembly")
        .env("CPU_ARCH", "x86")
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = json_stdout(&output);
    assert_eq!(json["stacks"].as_array().unwrap().len(), 2);

    let template =
        std::fs::read_to_string(workdir.path().join("assembly/NextJS.template.json")).unwrap();
    assert!(template.contains("\"X86_64\""));
    let assets_manifest =
        std::fs::read_to_string(workdir.path().join("assembly/NextJS.assets.json")).unwrap();
    assert!(assets_manifest.contains("linux/amd64"));
}

#[test]
fn test_synth_missing_asset_dir_exit_code() {
    let workdir = tempfile::tempdir().unwrap();
    cmd(&workdir)
        .args(["synth", "--asset-dir", "no-such-dir"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("ERROR:"));
}

#[test]
fn test_invalid_environment_name_exit_code() {
    let workdir = tempfile::tempdir().unwrap();
    cmd(&workdir)
        .args(["--environment", "not valid", "list"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("project.environment"));
}

#[test]
fn test_config_file_in_working_directory() {
    let workdir = tempfile::tempdir().unwrap();
    let assets = asset_dir();
    write(
        workdir.path(),
        "infra.toml",
        &format!(
            "[project]\nname = \"blog\"\n\n[assets]\ndirectory = {:?}\n",
            assets.path().to_string_lossy()
        ),
    );

    cmd(&workdir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("NextJS-blog-prod"));
}

// ============================================================================
// graph and validate
// ============================================================================

#[test]
fn test_graph_dot() {
    let workdir = tempfile::tempdir().unwrap();
    let assets = asset_dir();
    cmd(&workdir)
        .args(["graph", "--asset-dir"])
        .arg(assets.path())
        .assert()
        .success()
        .stdout(predicate::str::starts_with("digraph dependencies {"))
        .stdout(predicate::str::contains("cluster_Network"));
}

#[test]
fn test_graph_json() {
    let workdir = tempfile::tempdir().unwrap();
    let assets = asset_dir();
    let output = cmd(&workdir)
        .args(["graph", "--format", "json", "--asset-dir"])
        .arg(assets.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = json_stdout(&output);
    assert_eq!(json["stackOrder"], serde_json::json!(["Network", "NextJS"]));
    assert!(!json["dependencies"].as_array().unwrap().is_empty());
    assert!(json["resources"]["NextJS"].as_array().unwrap().len() > 10);
}

#[test]
fn test_validate_passes() {
    let workdir = tempfile::tempdir().unwrap();
    let assets = asset_dir();
    cmd(&workdir)
        .args(["validate", "--asset-dir"])
        .arg(assets.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("All 6 checks passed for nextjs-cdk-prod"));
}

#[test]
fn test_validate_json_report() {
    let workdir = tempfile::tempdir().unwrap();
    let assets = asset_dir();
    let output = cmd(&workdir)
        .args(["--output", "json", "validate", "--asset-dir"])
        .arg(assets.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = json_stdout(&output);
    assert_eq!(json["passed"], true);
    assert_eq!(json["failed"], 0);
    let names: Vec<&str> = json["checks"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "stacks",
            "nat-gateways",
            "gateway-endpoints",
            "scaling-bounds",
            "cache-ttl",
            "cpu-architecture"
        ]
    );
}
