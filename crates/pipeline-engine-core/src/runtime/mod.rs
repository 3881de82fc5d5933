//! # Runtime
//!
//! The executable side of the engine: the compiler that turns a validated IR
//! into a flow of instrumented node wrappers, the runner that drives the flow
//! action by action, the sub-workflow executor, and the orchestrator that
//! ties validation, execution, error reporting, and repair-and-resume
//! together.
//!
//! Execution is single-threaded and cooperative: there is one current node
//! at any instant, and all suspension happens inside node bodies. For any
//! two nodes A and B where A precedes B on the executed path, A's writes to
//! the shared state complete before B's reads.

pub mod compiler;
pub mod flow;
pub mod orchestrator;
pub mod sub_workflow;
pub mod wrapper;

pub use compiler::{compile_ir_to_flow, CompileOptions, GENERIC_MCP_TYPE, KEY_MCP_SERVER, KEY_MCP_TOOL};
pub use flow::{CompiledFlow, NodeRun};
pub use orchestrator::{
    execute_workflow, ExecutionOptions, ExecutionResult, ExecutionStep, RepairRequest, StepStatus,
    WorkflowRepairer, WorkflowStatus,
};
pub use sub_workflow::{StorageMode, SubWorkflowNode, MAX_DEPTH_DEFAULT};
pub use wrapper::{ExecutionOutcome, InstrumentedNodeWrapper};

use std::collections::BTreeMap;

use serde_json::Value;

use crate::ir::InputSpec;
use crate::store::SharedState;

/// Seeds declared inputs that the caller did not provide.
///
/// A declared `default` (including an explicit `null`) wins; an optional
/// input with no default is seeded as `null` so templates referencing it
/// resolve to an empty value instead of failing.
pub fn seed_inputs(shared: &mut SharedState, inputs: &BTreeMap<String, InputSpec>) {
    for (name, spec) in inputs {
        if shared.values.contains_key(name) {
            continue;
        }
        if let Some(default) = &spec.default {
            shared.values.insert(name.clone(), default.clone());
        } else if !spec.required {
            shared.values.insert(name.clone(), Value::Null);
        }
    }
}
