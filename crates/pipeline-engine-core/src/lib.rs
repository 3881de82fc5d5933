//! # Pipeline Engine Core
//!
//! The workflow execution core of a declarative pipeline engine. A workflow
//! arrives as a typed intermediate representation — a directed graph of
//! nodes connected by labeled edges — and this crate validates it, compiles
//! it into an executable flow, resolves `${var.path}` templates against a
//! namespaced shared state, runs the nodes in action-guided order with
//! checkpointing, and composes workflows through sub-workflow nodes.
//!
//! ## Core Concepts
//!
//! - **IR** ([`ir::WorkflowIr`]): the declarative, JSON-serializable
//!   description of a workflow, validated once before compilation.
//! - **Nodes** ([`nodes::Node`]): units of work with a `prep → exec → post`
//!   lifecycle, plugged in through a [`nodes::NodeRegistry`] of constructors.
//! - **Templates** ([`template`]): `${name.path}` expressions resolved
//!   against the shared state, strict or permissive.
//! - **Shared state** ([`store::SharedState`]): the JSON-domain data
//!   container threaded through execution, with per-node write namespacing
//!   and typed checkpoint metadata.
//! - **Runtime** ([`runtime`]): compiler, flow runner, sub-workflow
//!   executor, and the [`runtime::execute_workflow`] orchestrator.
//!
//! ## Example
//!
//! ```rust
//! use pipeline_engine_core::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let ir: WorkflowIr = serde_json::from_value(json!({
//!     "ir_version": "0.1.0",
//!     "nodes": [
//!         {"id": "greet", "type": "echo", "params": {"value": "hello ${name}"}}
//!     ],
//!     "inputs": {"name": {"type": "string"}},
//!     "outputs": {"greeting": {"source": "${greet.out}"}}
//! })).unwrap();
//!
//! let registry = pipeline_engine_core::testing::test_registry();
//! let params = json!({"name": "world"}).as_object().cloned().unwrap();
//! let result = execute_workflow(&ir, params, &registry, ExecutionOptions::default());
//!
//! assert!(result.success);
//! assert_eq!(result.outputs["greeting"], json!("hello world"));
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod error;
pub mod ir;
pub mod nodes;
pub mod runtime;
pub mod store;
pub mod template;
pub mod testing;

// Re-export commonly used types
pub use error::{ErrorCategory, ErrorRecord, ErrorSeverity, FlowError, Result};
pub use ir::{EdgeSpec, InputSpec, NodeSpec, OutputSpec, ParamKind, WorkflowIr};
pub use nodes::{Node, NodeInterface, NodeRegistry, WorkflowLibrary};
pub use runtime::{
    compile_ir_to_flow, execute_workflow, CompileOptions, CompiledFlow, ExecutionOptions,
    ExecutionResult, SubWorkflowNode, WorkflowStatus,
};
pub use store::{NamespacedStore, ProgressEvent, SharedState};
pub use template::{ResolveMode, TemplateResolver};

/// Current version of the pipeline engine core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    pub use crate::error::{ErrorCategory, ErrorRecord, FlowError, Result};
    pub use crate::ir::{EdgeSpec, InputSpec, NodeSpec, OutputSpec, ParamKind, WorkflowIr};
    pub use crate::nodes::{Node, NodeInterface, NodeRegistry, WorkflowLibrary};
    pub use crate::runtime::{
        compile_ir_to_flow, execute_workflow, CompileOptions, ExecutionOptions, ExecutionResult,
        StepStatus, WorkflowStatus,
    };
    pub use crate::store::{NamespacedStore, ProgressEvent, SharedState};
    pub use crate::template::{ResolveMode, TemplateResolver};
    pub use serde_json::{json, Value};
}
