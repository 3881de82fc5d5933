//! Node constructor registry and the workflow library boundary.
//!
//! Node types are resolved through a table of constructor closures populated
//! at startup — there is no dynamic loading. The registry also carries the
//! per-type interface metadata the wrapper consults for JSON auto-parsing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::{Node, NodeInterface};
use crate::error::{FlowError, Result};
use crate::ir::WorkflowIr;

/// Constructor closure producing a fresh node instance.
pub type NodeFactory = Box<dyn Fn() -> Box<dyn Node> + Send + Sync>;

/// Registry mapping node type names to constructors and interface metadata.
#[derive(Default)]
pub struct NodeRegistry {
    factories: HashMap<String, NodeFactory>,
    interfaces: HashMap<String, NodeInterface>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.factories.keys().collect();
        types.sort();
        f.debug_struct("NodeRegistry").field("types", &types).finish()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor for `node_type`, replacing any previous one.
    pub fn register<F>(&mut self, node_type: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Node> + Send + Sync + 'static,
    {
        self.factories.insert(node_type.into(), Box::new(factory));
    }

    /// Registers a constructor together with its interface metadata.
    pub fn register_with_interface<F>(
        &mut self,
        node_type: impl Into<String>,
        interface: NodeInterface,
        factory: F,
    ) where
        F: Fn() -> Box<dyn Node> + Send + Sync + 'static,
    {
        let node_type = node_type.into();
        self.interfaces.insert(node_type.clone(), interface);
        self.factories.insert(node_type, Box::new(factory));
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// Constructs a fresh instance of `node_type`.
    pub fn create(&self, node_type: &str) -> Result<Box<dyn Node>> {
        match self.factories.get(node_type) {
            Some(factory) => Ok(factory()),
            None => Err(FlowError::UnknownNodeType {
                node_type: node_type.to_string(),
            }),
        }
    }

    pub fn interface(&self, node_type: &str) -> Option<&NodeInterface> {
        self.interfaces.get(node_type)
    }

    /// Registered type names, sorted for stable reporting.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Boundary contract to the workflow persistence layer.
///
/// The core never reads the registry's storage directly; sub-workflow
/// execution resolves `workflow_name` references through this trait. The
/// path, when known, feeds circular-reference detection.
pub trait WorkflowLibrary: Send + Sync {
    /// Loads the IR saved under `name`.
    fn load_ir(&self, name: &str) -> Result<WorkflowIr>;

    /// Filesystem location of the saved workflow, when it has one.
    fn path_of(&self, name: &str) -> Option<PathBuf>;
}

/// In-memory workflow library, used in tests and by embedders that manage
/// their own persistence.
#[derive(Default)]
pub struct InMemoryWorkflowLibrary {
    workflows: HashMap<String, WorkflowIr>,
}

impl InMemoryWorkflowLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, ir: WorkflowIr) {
        self.workflows.insert(name.into(), ir);
    }

    pub fn into_shared(self) -> Arc<dyn WorkflowLibrary> {
        Arc::new(self)
    }
}

impl WorkflowLibrary for InMemoryWorkflowLibrary {
    fn load_ir(&self, name: &str) -> Result<WorkflowIr> {
        self.workflows
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::WorkflowNotFound {
                name: name.to_string(),
            })
    }

    fn path_of(&self, name: &str) -> Option<PathBuf> {
        // In-memory workflows have no backing file; cycle detection falls
        // back to the name-based pseudo path.
        let _ = name;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::ParamSpec;
    use crate::ir::ParamKind;
    use serde_json::{Map, Value};

    #[derive(Debug, Default)]
    struct NullNode {
        params: Map<String, Value>,
    }

    impl Node for NullNode {
        fn set_params(&mut self, params: Map<String, Value>) {
            self.params = params;
        }

        fn params(&self) -> &Map<String, Value> {
            &self.params
        }
    }

    #[test]
    fn create_constructs_fresh_instances() {
        let mut registry = NodeRegistry::new();
        registry.register("null", || Box::new(NullNode::default()));
        assert!(registry.contains("null"));
        assert!(registry.create("null").is_ok());
    }

    #[test]
    fn unknown_type_is_a_missing_resource() {
        let registry = NodeRegistry::new();
        let err = registry.create("shell").unwrap_err();
        assert!(matches!(err, FlowError::UnknownNodeType { .. }));
        assert_eq!(
            err.category(),
            crate::error::ErrorCategory::MissingResource
        );
    }

    #[test]
    fn interface_metadata_is_stored_per_type() {
        let mut registry = NodeRegistry::new();
        registry.register_with_interface(
            "typed",
            NodeInterface {
                params: vec![ParamSpec {
                    key: "payload".into(),
                    kind: ParamKind::Object,
                    required: true,
                    description: None,
                }],
            },
            || Box::new(NullNode::default()),
        );
        let interface = registry.interface("typed").unwrap();
        assert_eq!(interface.param_kind("payload"), Some(ParamKind::Object));
    }

    #[test]
    fn library_misses_are_not_found() {
        let library = InMemoryWorkflowLibrary::new();
        let err = library.load_ir("ghost").unwrap_err();
        assert!(matches!(err, FlowError::WorkflowNotFound { .. }));
    }
}
