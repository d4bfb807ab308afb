//! Cross-stack reference resolution.
//!
//! While a stack's template is rendered, references to resources owned by
//! another stack are replaced by `Fn::ImportValue` of a generated export
//! name. The resolver remembers each such reference so the synthesizer can
//! add the matching `Outputs` entry to the producing stack and record the
//! deployment dependency between the two.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde_json::{json, Value as Json};

use super::logical_id::sanitize;
use super::stack::Stack;
use super::value::{Reference, ReferenceResolver};
use crate::error::{Error, Result};

const MAX_EXPORT_NAME_LEN: usize = 255;

/// Output id and export name generated for a cross-stack reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSpec {
    /// Logical id of the output in the producing template
    pub output_id: String,
    /// Export name, unique per region and account
    pub export_name: String,
}

impl ExportSpec {
    /// Compute the export for `reference` owned by a stack named `producer_stack_name`.
    pub fn for_reference(producer_stack_name: &str, reference: &Reference) -> Self {
        let digest = md5::compute(reference.token());
        let hash = format!("{:x}", digest)[..8].to_uppercase();
        let output_id = match &reference.attribute {
            None => format!("ExportsOutputRef{}{}", reference.logical_id, hash),
            Some(attr) => format!(
                "ExportsOutputFnGetAtt{}{}{}",
                reference.logical_id,
                sanitize(attr),
                hash
            ),
        };
        let mut export_name = format!("{}:{}", producer_stack_name, output_id);
        export_name.truncate(MAX_EXPORT_NAME_LEN);
        Self {
            output_id,
            export_name,
        }
    }
}

/// Resolver used while rendering one stack of an app.
pub struct CrossStackResolver<'a> {
    stacks: &'a IndexMap<String, &'a Stack>,
    current: &'a str,
    imports: BTreeSet<Reference>,
}

impl<'a> CrossStackResolver<'a> {
    /// Create a resolver for the stack with construct id `current`.
    pub fn new(stacks: &'a IndexMap<String, &'a Stack>, current: &'a str) -> Self {
        Self {
            stacks,
            current,
            imports: BTreeSet::new(),
        }
    }

    /// References into other stacks seen so far.
    pub fn imports(&self) -> &BTreeSet<Reference> {
        &self.imports
    }

    /// Consume the resolver, returning the imported references.
    pub fn into_imports(self) -> BTreeSet<Reference> {
        self.imports
    }
}

impl ReferenceResolver for CrossStackResolver<'_> {
    fn resolve_reference(&mut self, reference: &Reference) -> Result<Json> {
        let producer = self
            .stacks
            .get(&reference.stack)
            .ok_or_else(|| Error::UnresolvedReference {
                stack: reference.stack.clone(),
                logical_id: reference.logical_id.clone(),
            })?;

        if producer.resource(&reference.logical_id).is_none() {
            return Err(Error::UnresolvedReference {
                stack: reference.stack.clone(),
                logical_id: reference.logical_id.clone(),
            });
        }

        if reference.stack == self.current {
            return Ok(reference.local_json());
        }

        if producer.environment() != self.stacks[self.current].environment() {
            return Err(Error::validation(
                &reference.logical_id,
                format!(
                    "stack '{}' cannot reference '{}' across environments",
                    self.current, reference.stack
                ),
            ));
        }

        let export = ExportSpec::for_reference(producer.stack_name(), reference);
        self.imports.insert(reference.clone());
        Ok(json!({ "Fn::ImportValue": export.export_name }))
    }
}
