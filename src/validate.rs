//! Plan checks run against a synthesized assembly.
//!
//! Each check inspects the rendered templates and asset manifests rather than
//! the construct handles, so it sees exactly what would be deployed.
//!
//! | Check | Holds when |
//! |-------|-----------|
//! | `stacks` | exactly `Network-{p}-{e}` and `NextJS-{p}-{e}` are present |
//! | `nat-gateways` | the network declares no NAT gateway |
//! | `gateway-endpoints` | S3 and DynamoDB gateway endpoints exist |
//! | `scaling-bounds` | `min <= desired <= max` for the service |
//! | `cache-ttl` | the cache policy's minimum and default TTL are 0 |
//! | `cpu-architecture` | task architecture, image platform and `TARGETARCH` agree |

use serde::Serialize;
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::stacks::{stack_name, NETWORK_STACK_ID, NEXTJS_STACK_ID};
use crate::synth::{CloudAssembly, StackArtifact};

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    /// Check name
    pub name: &'static str,
    /// Whether it held
    pub passed: bool,
    /// What was found
    pub detail: String,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
        }
    }

    fn from_result(name: &'static str, result: std::result::Result<String, String>) -> Self {
        match result {
            Ok(detail) => Self::pass(name, detail),
            Err(detail) => Self::fail(name, detail),
        }
    }
}

/// All check outcomes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanReport {
    /// Outcomes in the order the checks ran
    pub checks: Vec<CheckResult>,
}

impl PlanReport {
    /// Whether every check held.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Number of failed checks.
    pub fn failed_count(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }

    /// `PlanCheckFailed` unless every check held.
    pub fn into_result(self) -> Result<Self> {
        if self.passed() {
            Ok(self)
        } else {
            Err(Error::PlanCheckFailed {
                failed: self.failed_count(),
                total: self.checks.len(),
            })
        }
    }
}

/// Run every check against `assembly`.
pub fn check_plan(config: &Config, assembly: &CloudAssembly) -> PlanReport {
    let network = assembly.stack(NETWORK_STACK_ID);
    let nextjs = assembly.stack(NEXTJS_STACK_ID);

    let mut checks = vec![check_stacks(config, assembly)];
    checks.push(match network {
        Some(stack) => check_nat_gateways(stack),
        None => CheckResult::fail("nat-gateways", "network stack missing"),
    });
    checks.push(match network {
        Some(stack) => check_gateway_endpoints(stack),
        None => CheckResult::fail("gateway-endpoints", "network stack missing"),
    });
    checks.push(match nextjs {
        Some(stack) => check_scaling_bounds(stack),
        None => CheckResult::fail("scaling-bounds", "application stack missing"),
    });
    checks.push(match nextjs {
        Some(stack) => check_cache_ttl(stack),
        None => CheckResult::fail("cache-ttl", "application stack missing"),
    });
    checks.push(match nextjs {
        Some(stack) => check_cpu_architecture(config, stack),
        None => CheckResult::fail("cpu-architecture", "application stack missing"),
    });

    for check in &checks {
        if check.passed {
            debug!(check = check.name, detail = %check.detail, "plan check passed");
        } else {
            warn!(check = check.name, detail = %check.detail, "plan check failed");
        }
    }
    PlanReport { checks }
}

fn check_stacks(config: &Config, assembly: &CloudAssembly) -> CheckResult {
    let mut expected = vec![
        stack_name(NETWORK_STACK_ID, config),
        stack_name(NEXTJS_STACK_ID, config),
    ];
    let mut found: Vec<String> = assembly
        .stacks()
        .iter()
        .map(|s| s.stack_name.clone())
        .collect();
    expected.sort();
    found.sort();

    if found == expected {
        CheckResult::pass("stacks", found.join(", "))
    } else {
        CheckResult::fail(
            "stacks",
            format!("expected [{}], found [{}]", expected.join(", "), found.join(", ")),
        )
    }
}

fn check_nat_gateways(stack: &StackArtifact) -> CheckResult {
    let count = stack.resources_of_type("AWS::EC2::NatGateway").len();
    if count == 0 {
        CheckResult::pass("nat-gateways", "no NAT gateways")
    } else {
        CheckResult::fail("nat-gateways", format!("{} NAT gateways declared", count))
    }
}

/// Last literal part of a `com.amazonaws.{region}.{service}` name.
fn endpoint_service(properties: &Json) -> Option<String> {
    let name = properties.get("ServiceName")?;
    let literal = match name.as_str() {
        Some(s) => s,
        None => name.get("Fn::Join")?.get(1)?.as_array()?.last()?.as_str()?,
    };
    literal.rsplit('.').next().map(str::to_string)
}

fn check_gateway_endpoints(stack: &StackArtifact) -> CheckResult {
    let services: Vec<String> = stack
        .resources_of_type("AWS::EC2::VPCEndpoint")
        .into_iter()
        .filter_map(|(_, r)| r.get("Properties"))
        .filter(|p| p.get("VpcEndpointType").and_then(Json::as_str) == Some("Gateway"))
        .filter_map(endpoint_service)
        .collect();

    let missing: Vec<&str> = ["s3", "dynamodb"]
        .into_iter()
        .filter(|required| !services.iter().any(|s| s == required))
        .collect();
    if missing.is_empty() {
        CheckResult::pass("gateway-endpoints", services.join(", "))
    } else {
        CheckResult::fail(
            "gateway-endpoints",
            format!("missing gateway endpoints: {}", missing.join(", ")),
        )
    }
}

fn int_property(properties: &Json, key: &str) -> std::result::Result<i64, String> {
    properties
        .get(key)
        .and_then(Json::as_i64)
        .ok_or_else(|| format!("{} is not a literal integer", key))
}

fn check_scaling_bounds(stack: &StackArtifact) -> CheckResult {
    let result = (|| -> std::result::Result<String, String> {
        let target = stack
            .single_resource_properties("AWS::ApplicationAutoScaling::ScalableTarget")
            .ok_or("expected exactly one scalable target")?;
        let service = stack
            .single_resource_properties("AWS::ECS::Service")
            .ok_or("expected exactly one ECS service")?;

        let min = int_property(target, "MinCapacity")?;
        let max = int_property(target, "MaxCapacity")?;
        let desired = int_property(service, "DesiredCount")?;
        if min <= desired && desired <= max {
            Ok(format!("{} <= {} <= {}", min, desired, max))
        } else {
            Err(format!("desired count {} outside [{}, {}]", desired, min, max))
        }
    })();
    CheckResult::from_result("scaling-bounds", result)
}

fn check_cache_ttl(stack: &StackArtifact) -> CheckResult {
    let result = (|| -> std::result::Result<String, String> {
        let policy = stack
            .single_resource_properties("AWS::CloudFront::CachePolicy")
            .and_then(|p| p.get("CachePolicyConfig"))
            .ok_or("expected exactly one cache policy")?;
        let min = int_property(policy, "MinTTL")?;
        let default = int_property(policy, "DefaultTTL")?;
        if min == 0 && default == 0 {
            Ok("min 0, default 0".to_string())
        } else {
            Err(format!("min {}, default {}", min, default))
        }
    })();
    CheckResult::from_result("cache-ttl", result)
}

fn check_cpu_architecture(config: &Config, stack: &StackArtifact) -> CheckResult {
    let expected = config.cpu_architecture();
    let result = (|| -> std::result::Result<String, String> {
        let arch = stack
            .single_resource_properties("AWS::ECS::TaskDefinition")
            .and_then(|p| p.pointer("/RuntimePlatform/CpuArchitecture"))
            .and_then(Json::as_str)
            .ok_or("task definition has no CPU architecture")?;
        let images = stack
            .assets
            .get("dockerImages")
            .and_then(Json::as_object)
            .ok_or("no docker image assets")?;
        if images.is_empty() {
            return Err("no docker image assets".to_string());
        }

        if arch != expected.as_str() {
            return Err(format!("task runs on {}, expected {}", arch, expected));
        }
        let platform = expected.platform();
        for (hash, image) in images {
            let source = &image["source"];
            let image_platform = source["platform"].as_str().unwrap_or("unset");
            let target_arch = source["dockerBuildArgs"]["TARGETARCH"]
                .as_str()
                .unwrap_or("unset");
            if image_platform != platform.as_str() || target_arch != platform.arch() {
                return Err(format!(
                    "image {} builds for {} with TARGETARCH {}, task runs on {}",
                    hash, image_platform, target_arch, arch
                ));
            }
        }
        Ok(format!("{} / {}", arch, platform.as_str()))
    })();
    CheckResult::from_result("cpu-architecture", result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::build_app;

    fn config_with_assets(dir: &tempfile::TempDir) -> Config {
        std::fs::write(dir.path().join("Dockerfile"), "FROM node:20-alpine\n").unwrap();
        let mut config = Config::default();
        config.assets.directory = dir.path().to_path_buf();
        config
    }

    #[test]
    fn test_synthesized_plan_passes() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_assets(&dir);
        let assembly = build_app(&config).unwrap().synth().unwrap();

        let report = check_plan(&config, &assembly);
        assert!(report.passed(), "{:?}", report);
        assert_eq!(report.checks.len(), 6);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_tampered_plan_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_assets(&dir);
        let mut assembly = build_app(&config).unwrap().synth().unwrap();

        let nextjs = assembly
            .stacks
            .iter_mut()
            .find(|s| s.id == NEXTJS_STACK_ID)
            .unwrap();
        let (policy_id, _) = nextjs.resources_of_type("AWS::CloudFront::CachePolicy")[0];
        let policy_id = policy_id.to_string();
        nextjs.template["Resources"][&policy_id]["Properties"]["CachePolicyConfig"]["DefaultTTL"] =
            serde_json::json!(86400);

        let report = check_plan(&config, &assembly);
        assert_eq!(report.failed_count(), 1);
        assert!(!report.checks.iter().find(|c| c.name == "cache-ttl").unwrap().passed);
        assert!(matches!(
            report.into_result(),
            Err(Error::PlanCheckFailed { failed: 1, total: 6 })
        ));
    }

    #[test]
    fn test_architecture_mismatch_detected() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_assets(&dir);
        let assembly = build_app(&config).unwrap().synth().unwrap();

        let mut x86 = config.clone();
        x86.project.cpu_arch = Some("x86".into());
        let result = check_cpu_architecture(&x86, assembly.stack(NEXTJS_STACK_ID).unwrap());
        assert!(!result.passed);
    }

    #[test]
    fn test_endpoint_service_from_join() {
        let props = serde_json::json!({
            "ServiceName": { "Fn::Join": ["", ["com.amazonaws.", { "Ref": "AWS::Region" }, ".dynamodb"]] }
        });
        assert_eq!(endpoint_service(&props).as_deref(), Some("dynamodb"));
    }
}
