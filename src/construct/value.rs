//! Property values and intrinsic functions.
//!
//! A [`Value`] is the in-memory form of a CloudFormation property tree. It is
//! plain data until synthesis, when a [`ReferenceResolver`] decides how each
//! [`Reference`] is rendered: `Ref`/`Fn::GetAtt` inside the owning stack,
//! `Fn::ImportValue` from anywhere else.

use serde_json::{json, Value as Json};

use crate::error::Result;

#[doc(hidden)]
pub use indexmap::IndexMap;

/// Builds a [`Value::Map`] from `"Key": value` pairs.
///
/// Values go through `Value::from`, so strings, numbers, booleans, options,
/// vectors and nested `props!` all work. `None` entries are dropped at
/// render time.
#[macro_export]
macro_rules! props {
    ({ $($key:literal : $val:expr),* $(,)? }) => {{
        #[allow(unused_mut)]
        let mut map = $crate::construct::value::IndexMap::new();
        $( map.insert(::std::string::String::from($key), $crate::construct::Value::from($val)); )*
        $crate::construct::Value::Map(map)
    }};
}

/// Pseudo parameters supplied by CloudFormation at deploy time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pseudo {
    /// `AWS::AccountId`
    AccountId,
    /// `AWS::Region`
    Region,
    /// `AWS::Partition`
    Partition,
    /// `AWS::URLSuffix`
    UrlSuffix,
}

impl Pseudo {
    /// The parameter name as written in a template.
    pub fn as_str(&self) -> &'static str {
        match self {
            Pseudo::AccountId => "AWS::AccountId",
            Pseudo::Region => "AWS::Region",
            Pseudo::Partition => "AWS::Partition",
            Pseudo::UrlSuffix => "AWS::URLSuffix",
        }
    }
}

/// A reference to a resource (or one of its attributes) in some stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    /// Construct id of the owning stack
    pub stack: String,
    /// Logical ID of the target resource
    pub logical_id: String,
    /// Attribute name; `None` means the resource's `Ref` value
    pub attribute: Option<String>,
}

impl Reference {
    /// Render the reference as seen from inside its own stack.
    pub fn local_json(&self) -> Json {
        match &self.attribute {
            None => json!({ "Ref": self.logical_id }),
            Some(attr) => json!({ "Fn::GetAtt": [self.logical_id, attr] }),
        }
    }

    /// Stable textual form, used for export names and hashing.
    pub fn token(&self) -> String {
        match &self.attribute {
            None => format!("{}/{}.Ref", self.stack, self.logical_id),
            Some(attr) => format!("{}/{}.{}", self.stack, self.logical_id, attr),
        }
    }
}

/// Intrinsic functions that survive into the template.
#[derive(Debug, Clone, PartialEq)]
pub enum Intrinsic {
    /// `Fn::Join`
    Join {
        /// Separator
        delimiter: String,
        /// Parts to join
        parts: Vec<Value>,
    },
    /// `Fn::Select`
    Select {
        /// Zero-based index
        index: usize,
        /// List to select from
        list: Value,
    },
    /// `Fn::Split`
    Split {
        /// Separator
        delimiter: String,
        /// String to split
        source: Value,
    },
    /// `Fn::GetAZs`
    GetAzs(Value),
    /// `Fn::Cidr`
    Cidr {
        /// Block to carve
        block: Value,
        /// Number of blocks
        count: usize,
        /// Host bits per block
        bits: u8,
    },
    /// `Fn::Sub`
    Sub(String),
    /// `Fn::ImportValue` of an explicitly named export
    ImportValue(Value),
}

impl Intrinsic {
    fn resolve(&self, resolver: &mut dyn ReferenceResolver) -> Result<Json> {
        Ok(match self {
            Intrinsic::Join { delimiter, parts } => {
                let parts = resolve_list(parts, resolver)?;
                json!({ "Fn::Join": [delimiter, parts] })
            }
            Intrinsic::Select { index, list } => {
                json!({ "Fn::Select": [index, list.resolve(resolver)?] })
            }
            Intrinsic::Split { delimiter, source } => {
                json!({ "Fn::Split": [delimiter, source.resolve(resolver)?] })
            }
            Intrinsic::GetAzs(region) => json!({ "Fn::GetAZs": region.resolve(resolver)? }),
            Intrinsic::Cidr { block, count, bits } => {
                json!({ "Fn::Cidr": [block.resolve(resolver)?, count, bits.to_string()] })
            }
            Intrinsic::Sub(template) => json!({ "Fn::Sub": template }),
            Intrinsic::ImportValue(name) => json!({ "Fn::ImportValue": name.resolve(resolver)? }),
        })
    }

    fn values(&self) -> Vec<&Value> {
        match self {
            Intrinsic::Join { parts, .. } => parts.iter().collect(),
            Intrinsic::Select { list, .. } => vec![list],
            Intrinsic::Split { source, .. } => vec![source],
            Intrinsic::GetAzs(region) => vec![region],
            Intrinsic::Cidr { block, .. } => vec![block],
            Intrinsic::Sub(_) => vec![],
            Intrinsic::ImportValue(name) => vec![name],
        }
    }
}

/// Decides how references render in the template being produced.
pub trait ReferenceResolver {
    /// Render `reference` for the current stack.
    fn resolve_reference(&mut self, reference: &Reference) -> Result<Json>;
}

/// Resolves every reference as if it were local to the current stack.
///
/// Useful for inspecting a single stack's properties outside of a full
/// synthesis.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalResolver;

impl ReferenceResolver for LocalResolver {
    fn resolve_reference(&mut self, reference: &Reference) -> Result<Json> {
        Ok(reference.local_json())
    }
}

/// A CloudFormation property value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent; dropped from maps and lists on render
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// String
    Str(String),
    /// List
    List(Vec<Value>),
    /// Ordered map
    Map(IndexMap<String, Value>),
    /// Reference to a resource or attribute
    Ref(Reference),
    /// Pseudo parameter
    Pseudo(Pseudo),
    /// Intrinsic function
    Fn(Box<Intrinsic>),
}

impl Value {
    /// Build a list from anything convertible.
    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// `Fn::Join`
    pub fn join(delimiter: impl Into<String>, parts: Vec<Value>) -> Self {
        Value::Fn(Box::new(Intrinsic::Join {
            delimiter: delimiter.into(),
            parts,
        }))
    }

    /// `Fn::Select`
    pub fn select(index: usize, list: Value) -> Self {
        Value::Fn(Box::new(Intrinsic::Select { index, list }))
    }

    /// `Fn::Split`
    pub fn split(delimiter: impl Into<String>, source: Value) -> Self {
        Value::Fn(Box::new(Intrinsic::Split {
            delimiter: delimiter.into(),
            source,
        }))
    }

    /// `Fn::GetAZs` for the current region.
    pub fn get_azs() -> Self {
        Value::Fn(Box::new(Intrinsic::GetAzs(Value::Str(String::new()))))
    }

    /// `Fn::Cidr`
    pub fn cidr(block: Value, count: usize, bits: u8) -> Self {
        Value::Fn(Box::new(Intrinsic::Cidr { block, count, bits }))
    }

    /// `Fn::Sub`
    pub fn sub(template: impl Into<String>) -> Self {
        Value::Fn(Box::new(Intrinsic::Sub(template.into())))
    }

    /// `Fn::ImportValue` of a named export.
    pub fn import_value(name: impl Into<Value>) -> Self {
        Value::Fn(Box::new(Intrinsic::ImportValue(name.into())))
    }

    /// `Ref: AWS::Region`
    pub fn region() -> Self {
        Value::Pseudo(Pseudo::Region)
    }

    /// `Ref: AWS::AccountId`
    pub fn account_id() -> Self {
        Value::Pseudo(Pseudo::AccountId)
    }

    /// `Ref: AWS::Partition`
    pub fn partition() -> Self {
        Value::Pseudo(Pseudo::Partition)
    }

    /// `Ref: AWS::URLSuffix`
    pub fn url_suffix() -> Self {
        Value::Pseudo(Pseudo::UrlSuffix)
    }

    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The string payload, if this is a plain string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload, if this is a plain integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Look up a key in a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Insert or replace a key; turns `Null` into an empty map first.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if self.is_null() {
            *self = Value::Map(IndexMap::new());
        }
        if let Value::Map(map) = self {
            map.insert(key.into(), value.into());
        }
    }

    /// Append to a list value; turns `Null` into an empty list first.
    pub fn push(&mut self, value: impl Into<Value>) {
        if self.is_null() {
            *self = Value::List(Vec::new());
        }
        if let Value::List(items) = self {
            items.push(value.into());
        }
    }

    /// Every reference contained in this value, in document order.
    pub fn references(&self) -> Vec<&Reference> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a Reference>) {
        match self {
            Value::Ref(r) => found.push(r),
            Value::List(items) => items.iter().for_each(|v| v.collect_references(found)),
            Value::Map(map) => map.values().for_each(|v| v.collect_references(found)),
            Value::Fn(f) => f.values().into_iter().for_each(|v| v.collect_references(found)),
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Str(_) | Value::Pseudo(_) => {}
        }
    }

    /// Render to template JSON.
    pub fn resolve(&self, resolver: &mut dyn ReferenceResolver) -> Result<Json> {
        Ok(match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => json!(i),
            Value::Str(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(resolve_list(items, resolver)?),
            Value::Map(map) => {
                let mut out = serde_json::Map::new();
                for (key, value) in map {
                    if value.is_null() {
                        continue;
                    }
                    out.insert(key.clone(), value.resolve(resolver)?);
                }
                Json::Object(out)
            }
            Value::Ref(reference) => resolver.resolve_reference(reference)?,
            Value::Pseudo(p) => json!({ "Ref": p.as_str() }),
            Value::Fn(f) => f.resolve(resolver)?,
        })
    }
}

fn resolve_list(items: &[Value], resolver: &mut dyn ReferenceResolver) -> Result<Vec<Json>> {
    items
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| v.resolve(resolver))
        .collect()
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Str(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! int_into_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(i: $t) -> Self {
                Value::Int(i64::from(i))
            }
        })*
    };
}

int_into_value!(i32, i64, u8, u16, u32);

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        Value::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Value::Ref(r)
    }
}

impl From<Pseudo> for Value {
    fn from(p: Pseudo) -> Self {
        Value::Pseudo(p)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(logical_id: &str, attribute: Option<&str>) -> Reference {
        Reference {
            stack: "Network".into(),
            logical_id: logical_id.into(),
            attribute: attribute.map(String::from),
        }
    }

    #[test]
    fn test_props_macro_drops_null() {
        let value = crate::props!({
            "Name": "cluster",
            "Count": 2,
            "Missing": Option::<String>::None,
        });
        let json = value.resolve(&mut LocalResolver).unwrap();
        assert_eq!(json, json!({ "Name": "cluster", "Count": 2 }));
    }

    #[test]
    fn test_local_references() {
        let value = crate::props!({
            "VpcId": reference("Vpc8378EB38", None),
            "Arn": reference("Cluster", Some("Arn")),
        });
        let json = value.resolve(&mut LocalResolver).unwrap();
        assert_eq!(json["VpcId"], json!({ "Ref": "Vpc8378EB38" }));
        assert_eq!(json["Arn"], json!({ "Fn::GetAtt": ["Cluster", "Arn"] }));
    }

    #[test]
    fn test_intrinsics_render() {
        let az = Value::select(1, Value::get_azs());
        assert_eq!(
            az.resolve(&mut LocalResolver).unwrap(),
            json!({ "Fn::Select": [1, { "Fn::GetAZs": "" }] })
        );

        let host = Value::select(2, Value::split("/", Value::from("https://x/")));
        assert_eq!(
            host.resolve(&mut LocalResolver).unwrap(),
            json!({ "Fn::Select": [2, { "Fn::Split": ["/", "https://x/"] }] })
        );

        let cidr = Value::cidr(Value::from("2001:db8::/56"), 6, 64);
        assert_eq!(
            cidr.resolve(&mut LocalResolver).unwrap(),
            json!({ "Fn::Cidr": ["2001:db8::/56", 6, "64"] })
        );

        let joined = Value::join("", vec!["com.amazonaws.".into(), Value::region(), ".s3".into()]);
        assert_eq!(
            joined.resolve(&mut LocalResolver).unwrap(),
            json!({ "Fn::Join": ["", ["com.amazonaws.", { "Ref": "AWS::Region" }, ".s3"]] })
        );
    }

    #[test]
    fn test_references_walk_into_intrinsics() {
        let value = Value::join(
            "",
            vec![
                "service/".into(),
                reference("Cluster", None).into(),
                "/".into(),
                reference("Service", Some("Name")).into(),
            ],
        );
        let refs = value.references();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].attribute.as_deref(), Some("Name"));
    }

    #[test]
    fn test_insert_and_push() {
        let mut value = Value::Null;
        value.insert("A", 1);
        assert_eq!(value.get("A").and_then(Value::as_i64), Some(1));

        let mut list = Value::Null;
        list.push("x");
        list.push("y");
        assert_eq!(list, Value::list(["x", "y"]));
    }
}
