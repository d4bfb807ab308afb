//! Declared resources and the handles used to reference them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use super::value::{Reference, ReferenceResolver, Value};
use crate::error::Result;

/// What CloudFormation does with a resource when it leaves the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalPolicy {
    /// Delete the physical resource
    Delete,
    /// Keep it around, orphaned
    Retain,
    /// Snapshot, then delete
    Snapshot,
}

impl RemovalPolicy {
    fn as_str(&self) -> &'static str {
        match self {
            RemovalPolicy::Delete => "Delete",
            RemovalPolicy::Retain => "Retain",
            RemovalPolicy::Snapshot => "Snapshot",
        }
    }
}

/// A single resource declaration inside a stack.
#[derive(Debug, Clone)]
pub struct CfnResource {
    /// Logical ID within the stack
    pub logical_id: String,
    /// Construct path relative to the stack
    pub path: String,
    /// CloudFormation resource type, e.g. `AWS::EC2::VPC`
    pub resource_type: String,
    /// Resource properties
    pub properties: Value,
    /// Logical IDs this resource must be created after
    pub depends_on: Vec<String>,
    /// Deletion and update-replace policy
    pub removal_policy: Option<RemovalPolicy>,
}

impl CfnResource {
    /// Render the resource entry for a template.
    pub fn render(&self, stack_id: &str, resolver: &mut dyn ReferenceResolver) -> Result<Json> {
        let mut entry = serde_json::Map::new();
        entry.insert("Type".into(), json!(self.resource_type));

        let properties = self.properties.resolve(resolver)?;
        let has_properties = match &properties {
            Json::Object(map) => !map.is_empty(),
            Json::Null => false,
            _ => true,
        };
        if has_properties {
            entry.insert("Properties".into(), properties);
        }

        if !self.depends_on.is_empty() {
            let mut deps = self.depends_on.clone();
            deps.sort();
            deps.dedup();
            entry.insert("DependsOn".into(), json!(deps));
        }

        if let Some(policy) = self.removal_policy {
            entry.insert("UpdateReplacePolicy".into(), json!(policy.as_str()));
            entry.insert("DeletionPolicy".into(), json!(policy.as_str()));
        }

        entry.insert(
            "Metadata".into(),
            json!({ "aws:cdk:path": format!("{}/{}", stack_id, self.path) }),
        );

        Ok(Json::Object(entry))
    }
}

/// A cheap, cloneable handle to a declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Construct id of the owning stack
    pub stack: String,
    /// Logical ID of the resource
    pub logical_id: String,
    /// Construct path relative to the stack
    pub path: String,
    /// CloudFormation resource type
    pub resource_type: String,
}

impl ResourceRef {
    /// The resource's `Ref` value.
    pub fn reference(&self) -> Value {
        Value::Ref(Reference {
            stack: self.stack.clone(),
            logical_id: self.logical_id.clone(),
            attribute: None,
        })
    }

    /// One of the resource's `Fn::GetAtt` attributes.
    pub fn attr(&self, name: &str) -> Value {
        Value::Ref(Reference {
            stack: self.stack.clone(),
            logical_id: self.logical_id.clone(),
            attribute: Some(name.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::value::LocalResolver;
    use crate::props;

    #[test]
    fn test_render_omits_empty_sections() {
        let resource = CfnResource {
            logical_id: "VpcIGWD7BA715C".into(),
            path: "Vpc/IGW".into(),
            resource_type: "AWS::EC2::InternetGateway".into(),
            properties: Value::Null,
            depends_on: vec![],
            removal_policy: None,
        };
        let json = resource.render("Network", &mut LocalResolver).unwrap();
        assert_eq!(json["Type"], "AWS::EC2::InternetGateway");
        assert!(json.get("Properties").is_none());
        assert!(json.get("DependsOn").is_none());
        assert_eq!(json["Metadata"]["aws:cdk:path"], "Network/Vpc/IGW");
    }

    #[test]
    fn test_render_sorted_depends_on_and_policy() {
        let resource = CfnResource {
            logical_id: "Route".into(),
            path: "Route".into(),
            resource_type: "AWS::EC2::Route".into(),
            properties: props!({ "DestinationCidrBlock": "0.0.0.0/0" }),
            depends_on: vec!["B".into(), "A".into(), "B".into()],
            removal_policy: Some(RemovalPolicy::Retain),
        };
        let json = resource.render("Network", &mut LocalResolver).unwrap();
        assert_eq!(json["DependsOn"], json!(["A", "B"]));
        assert_eq!(json["DeletionPolicy"], "Retain");
        assert_eq!(json["Properties"]["DestinationCidrBlock"], "0.0.0.0/0");
    }

    #[test]
    fn test_handle_values() {
        let handle = ResourceRef {
            stack: "Network".into(),
            logical_id: "ClusterEB0386A7".into(),
            path: "Cluster/Resource".into(),
            resource_type: "AWS::ECS::Cluster".into(),
        };
        let json = handle.attr("Arn").resolve(&mut LocalResolver).unwrap();
        assert_eq!(json, json!({ "Fn::GetAtt": ["ClusterEB0386A7", "Arn"] }));
    }
}
