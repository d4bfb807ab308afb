//! The construct layer.
//!
//! Stacks hold resource declarations whose properties are [`Value`] trees.
//! Resources refer to each other through [`ResourceRef`] handles; nothing is
//! copied by value. At synthesis the references are rendered as `Ref`,
//! `Fn::GetAtt` or, across stacks, `Fn::ImportValue` with a matching export.

pub mod app;
pub mod graph;
pub mod logical_id;
pub mod resource;
pub mod stack;
pub mod template;
pub mod value;

pub use app::{App, AppProps};
pub use graph::{DependencyGraph, DependencyKind, ResourceDependency, ResourceNode};
pub use resource::{CfnResource, RemovalPolicy, ResourceRef};
pub use stack::{Environment, Output, Stack, StackProps};
pub use template::{CrossStackResolver, ExportSpec};
pub use value::{Intrinsic, LocalResolver, Pseudo, Reference, ReferenceResolver, Value};
