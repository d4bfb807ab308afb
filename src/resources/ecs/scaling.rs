//! Application Auto Scaling of a service's desired count.

use std::time::Duration;

use crate::construct::logical_id::make_unique_id;
use crate::construct::{ResourceRef, Stack, Value};
use crate::error::{Error, Result};
use crate::props;

const ECS_SCALING_ROLE: &str = "arn:${AWS::Partition}:iam::${AWS::AccountId}:role/aws-service-role/ecs.application-autoscaling.amazonaws.com/AWSServiceRoleForApplicationAutoScaling_ECSService";

/// Task count limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingBounds {
    /// Never scale below
    pub min_capacity: u32,
    /// Never scale above
    pub max_capacity: u32,
}

/// Options for [`ScalableTaskCount::scale_on_cpu_utilization`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuUtilizationScalingProps {
    /// Average CPU utilization to hold, in percent
    pub target_utilization_percent: f64,
    /// Wait after a scale-in before the next one
    pub scale_in_cooldown: Duration,
    /// Wait after a scale-out before the next one
    pub scale_out_cooldown: Duration,
    /// Only ever scale out
    pub disable_scale_in: bool,
}

/// The scalable target of a service plus its scaling policies.
#[derive(Debug, Clone)]
pub struct ScalableTaskCount {
    path: String,
    bounds: ScalingBounds,
    target: ResourceRef,
    policies: Vec<ResourceRef>,
}

impl ScalableTaskCount {
    pub(crate) fn new(
        stack: &mut Stack,
        path: &str,
        resource_id: Value,
        bounds: ScalingBounds,
    ) -> Result<Self> {
        if bounds.min_capacity > bounds.max_capacity {
            return Err(Error::validation(
                path,
                format!(
                    "min capacity {} exceeds max capacity {}",
                    bounds.min_capacity, bounds.max_capacity
                ),
            ));
        }

        let target = stack.add_resource(
            &format!("{}/Target/Resource", path),
            "AWS::ApplicationAutoScaling::ScalableTarget",
            props!({
                "MaxCapacity": bounds.max_capacity,
                "MinCapacity": bounds.min_capacity,
                "ResourceId": resource_id,
                "RoleARN": Value::sub(ECS_SCALING_ROLE),
                "ScalableDimension": "ecs:service:DesiredCount",
                "ServiceNamespace": "ecs",
            }),
        )?;

        Ok(Self {
            path: format!("{}/Target", path),
            bounds,
            target,
            policies: Vec::new(),
        })
    }

    /// Track average CPU utilization of the service.
    pub fn scale_on_cpu_utilization(
        &mut self,
        stack: &mut Stack,
        id: &str,
        props: CpuUtilizationScalingProps,
    ) -> Result<ResourceRef> {
        let target = props.target_utilization_percent;
        if !(target > 0.0 && target <= 100.0) {
            return Err(Error::validation(
                format!("{}/{}", self.path, id),
                format!("target utilization must be in (0, 100], got {}", target),
            ));
        }

        let path = format!("{}/{}", self.path, id);
        let mut name_components = vec![stack.id()];
        name_components.extend(path.split('/'));
        let policy_name = make_unique_id(&name_components)?;

        let mut tracking = props!({
            "PredefinedMetricSpecification": props!({
                "PredefinedMetricType": "ECSServiceAverageCPUUtilization",
            }),
            "ScaleInCooldown": props.scale_in_cooldown.as_secs(),
            "ScaleOutCooldown": props.scale_out_cooldown.as_secs(),
            "TargetValue": format_percent(target),
        });
        if props.disable_scale_in {
            tracking.insert("DisableScaleIn", true);
        }

        let policy = stack.add_resource(
            &format!("{}/Resource", path),
            "AWS::ApplicationAutoScaling::ScalingPolicy",
            props!({
                "PolicyName": policy_name,
                "PolicyType": "TargetTrackingScaling",
                "ScalingTargetId": self.target.reference(),
                "TargetTrackingScalingPolicyConfiguration": tracking,
            }),
        )?;
        self.policies.push(policy.clone());
        Ok(policy)
    }

    /// Configured limits.
    pub fn bounds(&self) -> ScalingBounds {
        self.bounds
    }

    /// The scalable target resource.
    pub fn target(&self) -> &ResourceRef {
        &self.target
    }

    /// Declared policies.
    pub fn policies(&self) -> &[ResourceRef] {
        &self.policies
    }
}

/// Whole percentages render as integers, fractional ones as strings.
fn format_percent(value: f64) -> Value {
    if value.fract() == 0.0 {
        Value::Int(value as i64)
    } else {
        Value::from(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{LocalResolver, StackProps};

    fn cpu_props(target: f64) -> CpuUtilizationScalingProps {
        CpuUtilizationScalingProps {
            target_utilization_percent: target,
            scale_in_cooldown: Duration::from_secs(90),
            scale_out_cooldown: Duration::from_secs(120),
            disable_scale_in: false,
        }
    }

    #[test]
    fn test_cpu_policy() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let bounds = ScalingBounds {
            min_capacity: 1,
            max_capacity: 2,
        };
        let mut count =
            ScalableTaskCount::new(&mut stack, "FargateService/TaskCount", "service/x/y".into(), bounds)
                .unwrap();
        let policy = count
            .scale_on_cpu_utilization(&mut stack, "CpuScaling", cpu_props(75.0))
            .unwrap();

        let json = stack
            .resource(&policy.logical_id)
            .unwrap()
            .properties
            .resolve(&mut LocalResolver)
            .unwrap();
        let config = &json["TargetTrackingScalingPolicyConfiguration"];
        assert_eq!(config["TargetValue"], 75);
        assert_eq!(config["ScaleInCooldown"], 90);
        assert_eq!(config["ScaleOutCooldown"], 120);
        assert!(json["PolicyName"]
            .as_str()
            .unwrap()
            .starts_with("NextJSFargateServiceTaskCountTargetCpuScaling"));
        assert_eq!(count.policies().len(), 1);

        let target = stack.resource(&count.target().logical_id).unwrap();
        let target = target.properties.resolve(&mut LocalResolver).unwrap();
        assert_eq!(target["MinCapacity"], 1);
        assert_eq!(target["MaxCapacity"], 2);
    }

    #[test]
    fn test_invalid_bounds_and_target() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let inverted = ScalingBounds {
            min_capacity: 3,
            max_capacity: 2,
        };
        assert!(ScalableTaskCount::new(&mut stack, "S/TaskCount", Value::Null, inverted).is_err());

        let ok = ScalingBounds {
            min_capacity: 1,
            max_capacity: 2,
        };
        let mut count = ScalableTaskCount::new(&mut stack, "S/TaskCount", Value::Null, ok).unwrap();
        assert!(count
            .scale_on_cpu_utilization(&mut stack, "Cpu", cpu_props(0.0))
            .is_err());
        assert!(count
            .scale_on_cpu_utilization(&mut stack, "Cpu", cpu_props(101.0))
            .is_err());
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(75.0), Value::Int(75));
        assert_eq!(format_percent(62.5), Value::from("62.5"));
    }
}
