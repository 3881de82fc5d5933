//! Sub-workflow composition node.
//!
//! A pseudo-node that loads another workflow — by library name, file path,
//! or inline IR — compiles it against the same registry, and runs it with a
//! controlled parameter and output interface. Nesting is bounded by
//! `max_depth`, and the ancestor stack prevents a workflow from invoking
//! itself transitively.
//!
//! Configuration errors (no source, two sources, depth, cycles, unloadable
//! files, unresolvable parameter mappings) fail the node hard. Failures of
//! the child itself are soft: the node writes an `error` entry into its
//! output and returns the configured `error_action`, so the parent graph can
//! route around them.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{FlowError, Result};
use crate::ir::WorkflowIr;
use crate::nodes::{Node, NodeRegistry, WorkflowLibrary};
use crate::store::{NamespacedStore, SharedState, RESERVED_KEY_PREFIX};
use crate::template::{has_templates_str, resolve_value, ResolveMode, TemplateResolver};

use super::compiler::{compile_ir_to_flow, CompileOptions};
use super::seed_inputs;

/// Default bound on sub-workflow nesting.
pub const MAX_DEPTH_DEFAULT: u32 = 10;

/// Reference recorded for inline child definitions. Inline children carry no
/// identity, so they are exempt from cycle detection.
const INLINE_REFERENCE: &str = "<inline>";

/// How much of the parent's state the child may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Only the resolved `param_mapping` values. The default: the clearest
    /// contract and the lowest risk of accidental state leakage.
    #[default]
    Mapped,
    /// Keys from the parent matching `scope_prefix` (prefix stripped), plus
    /// the mapped parameters.
    Scoped,
    /// An empty store; mapped parameters are still placed into it.
    Isolated,
    /// The parent's state itself. Both sides can mutate each other — opt-in
    /// unsafe, `output_mapping` is ignored.
    Shared,
}

impl FromStr for StorageMode {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mapped" => Ok(StorageMode::Mapped),
            "scoped" => Ok(StorageMode::Scoped),
            "isolated" => Ok(StorageMode::Isolated),
            "shared" => Ok(StorageMode::Shared),
            other => Err(FlowError::Configuration {
                message: format!("Invalid storage_mode '{other}'"),
            }),
        }
    }
}

/// The composition node. Constructed by the compiler for `workflow`-typed
/// node specs; never registered in the node library.
pub struct SubWorkflowNode {
    params: Map<String, Value>,
    registry: Arc<NodeRegistry>,
    library: Option<Arc<dyn WorkflowLibrary>>,
    mode: ResolveMode,
}

impl std::fmt::Debug for SubWorkflowNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubWorkflowNode")
            .field("params", &self.params)
            .field("mode", &self.mode)
            .field("has_library", &self.library.is_some())
            .finish()
    }
}

struct PreparedChild {
    ir: WorkflowIr,
    reference: String,
    child_params: Map<String, Value>,
    storage_mode: StorageMode,
    scope_prefix: String,
    child_depth: u32,
    child_stack: Vec<String>,
}

impl SubWorkflowNode {
    pub fn new(
        registry: Arc<NodeRegistry>,
        library: Option<Arc<dyn WorkflowLibrary>>,
        mode: ResolveMode,
    ) -> Self {
        Self {
            params: Map::new(),
            registry,
            library,
            mode,
        }
    }

    fn error_action(&self) -> String {
        self.params
            .get("error_action")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("error")
            .to_string()
    }

    fn prepare(&self, store: &NamespacedStore<'_>) -> Result<PreparedChild> {
        let workflow_name = self.params.get("workflow_name").filter(|v| !v.is_null());
        let workflow_ref = self.params.get("workflow_ref").filter(|v| !v.is_null());
        let workflow_ir = self.params.get("workflow_ir").filter(|v| !v.is_null());

        let sources = [workflow_name, workflow_ref, workflow_ir]
            .iter()
            .filter(|s| s.is_some())
            .count();
        if sources == 0 {
            return Err(FlowError::Composition {
                message: "one of 'workflow_name', 'workflow_ref', or 'workflow_ir' is required"
                    .to_string(),
            });
        }
        if sources > 1 {
            return Err(FlowError::Composition {
                message:
                    "only one of 'workflow_name', 'workflow_ref', or 'workflow_ir' may be provided"
                        .to_string(),
            });
        }

        let max_depth = self
            .params
            .get("max_depth")
            .and_then(Value::as_u64)
            .map(|d| d as u32)
            .unwrap_or(MAX_DEPTH_DEFAULT);
        let current_depth = store.root().depth();
        if current_depth >= max_depth {
            return Err(FlowError::DepthExceeded { max_depth });
        }

        let stack = store.root().stack().to_vec();

        let (ir, reference) = if let Some(name) = workflow_name.and_then(Value::as_str) {
            debug!(name, "loading sub-workflow by name");
            let library = self.library.as_ref().ok_or_else(|| FlowError::Composition {
                message: format!(
                    "workflow_name '{name}' given but no workflow library is configured"
                ),
            })?;
            let ir = library.load_ir(name)?;
            let reference = library
                .path_of(name)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| format!("name:{name}"));
            check_cycle(&stack, &reference)?;
            (ir, reference)
        } else if let Some(path) = workflow_ref.and_then(Value::as_str) {
            debug!(path, "loading sub-workflow by file reference");
            let resolved = self.resolve_path(path, store.root());
            let reference = resolved.display().to_string();
            check_cycle(&stack, &reference)?;
            let ir = load_workflow_file(&resolved)?;
            (ir, reference)
        } else {
            debug!("using inline sub-workflow definition");
            let inline = workflow_ir.cloned().unwrap_or(Value::Null);
            let ir =
                WorkflowIr::from_json_value(inline).map_err(|e| FlowError::Composition {
                    message: format!("invalid inline workflow_ir: {e}"),
                })?;
            (ir, INLINE_REFERENCE.to_string())
        };

        let child_params = self.resolve_param_mapping(store.root())?;
        let storage_mode = self
            .params
            .get("storage_mode")
            .and_then(Value::as_str)
            .map(StorageMode::from_str)
            .transpose()?
            .unwrap_or_default();
        let scope_prefix = self
            .params
            .get("scope_prefix")
            .and_then(Value::as_str)
            .unwrap_or("child_")
            .to_string();

        let mut child_stack = stack;
        child_stack.push(reference.clone());

        Ok(PreparedChild {
            ir,
            reference,
            child_params,
            storage_mode,
            scope_prefix,
            child_depth: current_depth + 1,
            child_stack,
        })
    }

    // Relative references resolve against the parent workflow's own file
    // when it has one, else the working directory.
    fn resolve_path(&self, reference: &str, root: &SharedState) -> PathBuf {
        let path = Path::new(reference);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let base = root
            .workflow_file()
            .map(Path::new)
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();
        base.join(path)
    }

    /// Evaluates `param_mapping` in the parent's scope: template expressions
    /// resolve against the parent state, literals pass through.
    fn resolve_param_mapping(&self, root: &SharedState) -> Result<Map<String, Value>> {
        let Some(mapping) = self.params.get("param_mapping").and_then(Value::as_object) else {
            return Ok(Map::new());
        };

        let mut resolver = TemplateResolver::new(&root.values, self.mode, "param_mapping");
        let mut resolved = Map::with_capacity(mapping.len());
        for (child_param, parent_value) in mapping {
            let value = match parent_value {
                Value::String(text) if has_templates_str(text) => resolver
                    .resolve_template(text)
                    .map_err(|e| FlowError::Composition {
                        message: format!("failed to resolve parameter '{child_param}': {e}"),
                    })?,
                other => other.clone(),
            };
            resolved.insert(child_param.clone(), value);
        }
        Ok(resolved)
    }

    // Compile-and-run. Every error returned here is a soft failure handled
    // by the caller via error_action.
    fn execute_child(
        &self,
        store: &mut NamespacedStore<'_>,
        prepared: PreparedChild,
    ) -> Result<String> {
        let compile_options = CompileOptions {
            validate: true,
            mode: self.mode,
            library: self.library.clone(),
            initial_params: prepared.child_params.clone(),
        };
        let mut child_flow = compile_ir_to_flow(&prepared.ir, &self.registry, &compile_options)
            .map_err(|e| FlowError::Composition {
                message: format!("failed to compile sub-workflow: {e}"),
            })?;

        if prepared.storage_mode == StorageMode::Shared {
            // The child runs directly on the parent's state. Checkpoints,
            // namespaces, and the _pflow_ control keys are all shared; this
            // is the documented free-for-all.
            let root = store.root_mut();
            root.set_depth(prepared.child_depth);
            root.set_stack(prepared.child_stack);
            root.set_workflow_file(prepared.reference.clone());
            return child_flow.run(root);
        }

        let mut child_state = SharedState::new();
        match prepared.storage_mode {
            StorageMode::Mapped | StorageMode::Isolated => {
                child_state.values = prepared.child_params.clone();
            }
            StorageMode::Scoped => {
                for (key, value) in &store.root().values {
                    if let Some(stripped) = key.strip_prefix(&prepared.scope_prefix) {
                        if !key.starts_with(RESERVED_KEY_PREFIX) && !stripped.is_empty() {
                            child_state.values.insert(stripped.to_string(), value.clone());
                        }
                    }
                }
                for (key, value) in &prepared.child_params {
                    child_state.values.insert(key.clone(), value.clone());
                }
            }
            StorageMode::Shared => unreachable!("handled above"),
        }
        seed_inputs(&mut child_state, &prepared.ir.inputs);
        child_state.set_depth(prepared.child_depth);
        child_state.set_stack(prepared.child_stack);
        child_state.set_workflow_file(prepared.reference.clone());
        if let Some(callback) = store.root().progress_callback() {
            child_state.set_progress_callback(Arc::clone(callback));
        }

        let action = child_flow.run(&mut child_state)?;
        self.apply_output_mapping(store, &child_state);
        Ok(action)
    }

    /// Copies child values to the parent per `output_mapping`. Parent keys
    /// carrying the reserved prefix are skipped, as are child keys that do
    /// not exist — the parent value stays untouched.
    fn apply_output_mapping(&self, store: &mut NamespacedStore<'_>, child_state: &SharedState) {
        let Some(mapping) = self.params.get("output_mapping").and_then(Value::as_object) else {
            return;
        };
        for (child_key, parent_key) in mapping {
            let Some(parent_key) = parent_key.as_str() else {
                continue;
            };
            if parent_key.starts_with(RESERVED_KEY_PREFIX) {
                continue;
            }
            if let Some(value) = resolve_value(child_key, &child_state.values) {
                store.insert(parent_key.to_string(), value.clone());
            }
        }
    }
}

impl Node for SubWorkflowNode {
    fn set_params(&mut self, params: Map<String, Value>) {
        self.params = params;
    }

    fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    fn run(&mut self, store: &mut NamespacedStore<'_>) -> Result<String> {
        let prepared = self.prepare(store)?;
        let reference = prepared.reference.clone();
        match self.execute_child(store, prepared) {
            Ok(action) => Ok(action),
            // Composition-fatal errors from deeper levels surface to the
            // caller; routing around them with error_action would mask a
            // structurally broken workflow.
            Err(error @ (FlowError::CircularReference { .. } | FlowError::DepthExceeded { .. })) => {
                Err(error)
            }
            Err(error) => {
                debug!(%reference, %error, "sub-workflow failed, taking error action");
                store.insert(
                    "error",
                    Value::from(format!("Sub-workflow failed at {reference}: {error}")),
                );
                Ok(self.error_action())
            }
        }
    }
}

fn check_cycle(stack: &[String], reference: &str) -> Result<()> {
    if stack.iter().any(|ancestor| ancestor == reference) {
        let mut cycle: Vec<&str> = stack.iter().map(String::as_str).collect();
        cycle.push(reference);
        return Err(FlowError::CircularReference {
            cycle: cycle.join(" -> "),
        });
    }
    Ok(())
}

fn load_workflow_file(path: &Path) -> Result<WorkflowIr> {
    if !path.exists() {
        return Err(FlowError::WorkflowLoad {
            path: path.display().to_string(),
            message: "file not found".to_string(),
        });
    }
    let raw = std::fs::read_to_string(path).map_err(|e| FlowError::WorkflowLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| FlowError::WorkflowLoad {
        path: path.display().to_string(),
        message: format!("invalid JSON: {e}"),
    })?;
    WorkflowIr::from_json_value(value).map_err(|e| FlowError::WorkflowLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
