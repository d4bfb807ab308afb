//! The app: the root of the construct tree and the unit of synthesis.

use indexmap::IndexMap;
use tracing::info;

use super::graph::DependencyGraph;
use super::stack::Stack;
use crate::error::{Error, Result};
use crate::synth::{CloudAssembly, DefaultStackSynthesizer};

/// Options for a new app.
#[derive(Debug, Clone)]
pub struct AppProps {
    /// Context values recorded in the assembly manifest
    pub context: IndexMap<String, String>,
    /// Synthesizer used for every stack
    pub synthesizer: DefaultStackSynthesizer,
}

impl Default for AppProps {
    fn default() -> Self {
        Self {
            context: IndexMap::new(),
            synthesizer: DefaultStackSynthesizer::default(),
        }
    }
}

/// An ordered collection of stacks synthesized together.
#[derive(Debug, Clone, Default)]
pub struct App {
    stacks: IndexMap<String, Stack>,
    context: IndexMap<String, String>,
    synthesizer: DefaultStackSynthesizer,
}

impl App {
    /// Create an empty app.
    pub fn new(props: AppProps) -> Self {
        Self {
            stacks: IndexMap::new(),
            context: props.context,
            synthesizer: props.synthesizer,
        }
    }

    /// Add a finished stack. Ids and stack names must be unique.
    pub fn add_stack(&mut self, stack: Stack) -> Result<()> {
        if self.stacks.contains_key(stack.id())
            || self
                .stacks
                .values()
                .any(|s| s.stack_name() == stack.stack_name())
        {
            return Err(Error::DuplicateStack(stack.stack_name().to_string()));
        }
        self.stacks.insert(stack.id().to_string(), stack);
        Ok(())
    }

    /// Look up a stack by construct id.
    pub fn stack(&self, id: &str) -> Option<&Stack> {
        self.stacks.get(id)
    }

    /// Stacks in the order they were added.
    pub fn stacks(&self) -> impl Iterator<Item = &Stack> {
        self.stacks.values()
    }

    /// Number of stacks.
    pub fn stack_count(&self) -> usize {
        self.stacks.len()
    }

    /// Context values.
    pub fn context(&self) -> &IndexMap<String, String> {
        &self.context
    }

    /// The synthesizer shared by all stacks.
    pub fn synthesizer(&self) -> &DefaultStackSynthesizer {
        &self.synthesizer
    }

    /// Build the resource dependency graph.
    pub fn dependency_graph(&self) -> Result<DependencyGraph> {
        DependencyGraph::from_app(self)
    }

    /// Produce the cloud assembly.
    pub fn synth(&self) -> Result<CloudAssembly> {
        info!(stacks = self.stacks.len(), "synthesizing app");
        self.synthesizer.synthesize(self)
    }
}
