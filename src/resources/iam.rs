//! IAM service roles with an inline default policy.

use serde::{Deserialize, Serialize};

use crate::construct::{ResourceRef, Stack, Value};
use crate::error::{Error, Result};
use crate::props;

const POLICY_VERSION: &str = "2012-10-17";

/// Statement effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Effect {
    /// Allow
    #[default]
    Allow,
    /// Deny
    Deny,
}

impl Effect {
    fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        }
    }
}

/// One policy statement.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStatement {
    /// Effect
    pub effect: Effect,
    /// Actions, e.g. `ecr:BatchGetImage`
    pub actions: Vec<String>,
    /// Resource ARNs (or `*`)
    pub resources: Vec<Value>,
}

impl PolicyStatement {
    /// An `Allow` statement.
    pub fn allow<S: Into<String>>(actions: impl IntoIterator<Item = S>, resources: Vec<Value>) -> Self {
        Self {
            effect: Effect::Allow,
            actions: actions.into_iter().map(Into::into).collect(),
            resources,
        }
    }

    fn to_value(&self) -> Value {
        let action: Value = if self.actions.len() == 1 {
            self.actions[0].as_str().into()
        } else {
            Value::list(self.actions.iter())
        };
        let resource = if self.resources.len() == 1 {
            self.resources[0].clone()
        } else {
            Value::List(self.resources.clone())
        };
        props!({
            "Action": action,
            "Effect": self.effect.as_str(),
            "Resource": resource,
        })
    }
}

/// A role assumable by one AWS service.
#[derive(Debug, Clone)]
pub struct Role {
    path: String,
    resource: ResourceRef,
    policy: Option<ResourceRef>,
    statements: Vec<PolicyStatement>,
}

impl Role {
    /// Declare a role at `path` trusted by `service_principal`.
    pub fn new(stack: &mut Stack, path: &str, service_principal: &str) -> Result<Self> {
        if !service_principal.ends_with(".amazonaws.com") {
            return Err(Error::validation(
                path,
                format!("'{}' is not a service principal", service_principal),
            ));
        }
        let resource = stack.add_resource(
            &format!("{}/Resource", path),
            "AWS::IAM::Role",
            props!({
                "AssumeRolePolicyDocument": props!({
                    "Statement": vec![props!({
                        "Action": "sts:AssumeRole",
                        "Effect": "Allow",
                        "Principal": props!({ "Service": service_principal }),
                    })],
                    "Version": POLICY_VERSION,
                }),
            }),
        )?;
        Ok(Self {
            path: path.to_string(),
            resource,
            policy: None,
            statements: Vec::new(),
        })
    }

    /// The role ARN.
    pub fn arn(&self) -> Value {
        self.resource.attr("Arn")
    }

    /// The declared role.
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    /// The default policy, once a statement has been added.
    pub fn policy(&self) -> Option<&ResourceRef> {
        self.policy.as_ref()
    }

    /// Statements granted so far.
    pub fn statements(&self) -> &[PolicyStatement] {
        &self.statements
    }

    /// Add a statement to the role's default policy, declaring it on first use.
    pub fn add_to_policy(&mut self, stack: &mut Stack, statement: PolicyStatement) -> Result<()> {
        if statement.actions.is_empty() || statement.resources.is_empty() {
            return Err(Error::validation(
                &self.path,
                "policy statements need at least one action and one resource",
            ));
        }
        if self.statements.contains(&statement) {
            return Ok(());
        }
        self.statements.push(statement);

        let document = props!({
            "Statement": self.statements.iter().map(PolicyStatement::to_value).collect::<Vec<_>>(),
            "Version": POLICY_VERSION,
        });

        match &self.policy {
            Some(policy) => {
                stack
                    .properties_mut(policy)?
                    .insert("PolicyDocument", document);
            }
            None => {
                let path = format!("{}/DefaultPolicy/Resource", self.path);
                let policy = stack.add_resource(&path, "AWS::IAM::Policy", Value::Null)?;
                let name = policy.logical_id.clone();
                *stack.properties_mut(&policy)? = props!({
                    "PolicyDocument": document,
                    "PolicyName": name,
                    "Roles": vec![self.resource.reference()],
                });
                self.policy = Some(policy);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{LocalResolver, StackProps};

    #[test]
    fn test_role_trust_policy() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let role = Role::new(&mut stack, "TaskDefinition/TaskRole", "ecs-tasks.amazonaws.com").unwrap();
        let props = stack
            .resource(&role.resource().logical_id)
            .unwrap()
            .properties
            .resolve(&mut LocalResolver)
            .unwrap();
        assert_eq!(
            props["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"],
            "ecs-tasks.amazonaws.com"
        );
        assert!(role.policy().is_none());
    }

    #[test]
    fn test_default_policy_accumulates() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let mut role =
            Role::new(&mut stack, "TaskDefinition/ExecutionRole", "ecs-tasks.amazonaws.com").unwrap();

        let pull = PolicyStatement::allow(["ecr:BatchGetImage"], vec!["arn:aws:ecr:repo".into()]);
        role.add_to_policy(&mut stack, pull.clone()).unwrap();
        role.add_to_policy(&mut stack, pull).unwrap();
        role.add_to_policy(
            &mut stack,
            PolicyStatement::allow(["ecr:GetAuthorizationToken"], vec!["*".into()]),
        )
        .unwrap();

        let policy = role.policy().unwrap();
        let props = stack
            .resource(&policy.logical_id)
            .unwrap()
            .properties
            .resolve(&mut LocalResolver)
            .unwrap();
        let statements = props["PolicyDocument"]["Statement"].as_array().unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1]["Resource"], "*");
        assert_eq!(props["PolicyName"], policy.logical_id.as_str());
        assert_eq!(stack.resources_of_type("AWS::IAM::Policy").count(), 1);
    }

    #[test]
    fn test_rejects_bad_principal_and_empty_statement() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        assert!(Role::new(&mut stack, "R", "someone").is_err());

        let mut role = Role::new(&mut stack, "Ok", "ecs-tasks.amazonaws.com").unwrap();
        let empty = PolicyStatement::allow(Vec::<String>::new(), vec!["*".into()]);
        assert!(role.add_to_policy(&mut stack, empty).is_err());
    }
}
