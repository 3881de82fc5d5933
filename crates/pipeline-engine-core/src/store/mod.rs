//! # Shared State
//!
//! The shared state is the single data container threaded through a workflow
//! run. User-facing data lives in a JSON-domain `values` mapping; the
//! cross-cutting execution metadata the original reserved keys carried is
//! held in dedicated typed fields alongside it:
//!
//! | Reserved key            | Typed field                     |
//! |-------------------------|---------------------------------|
//! | `__execution__`         | [`ExecutionState`]              |
//! | `__llm_calls__`         | `Vec<`[`LlmCallRecord`]`>`      |
//! | `__template_errors__`   | node id → [`TemplateErrorRecord`] |
//! | `__warnings__`          | node id → warning string        |
//! | `__progress_callback__` | [`ProgressCallback`]            |
//! | `_pflow_depth`          | nesting depth                   |
//! | `_pflow_stack`          | ancestor workflow stack         |
//! | `_pflow_workflow_file`  | current workflow file           |
//!
//! [`SharedState::to_value`] / [`SharedState::from_value`] fold the typed
//! fields back into the reserved keys, so persisting the shared state as
//! JSON preserves checkpoints with no extra machinery.
//!
//! The [`NamespacedStore`] proxy gives each executing node a view where
//! writes land in its own `values[node_id]` sub-mapping while reads fall
//! back to the root. Special keys (`__…__` / `_pflow_…`) bypass namespacing
//! entirely.
//!
//! The shared state is owned by exactly one flow at a time; the proxy is
//! stateless glue and nothing here is thread-safe by design.

pub mod namespaced;

pub use namespaced::NamespacedStore;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowError, Result};

/// Reserved root key for checkpoint metadata.
pub const KEY_EXECUTION: &str = "__execution__";
/// Reserved root key for the append-only LLM invocation log.
pub const KEY_LLM_CALLS: &str = "__llm_calls__";
/// Reserved root key for permissive-mode template errors.
pub const KEY_TEMPLATE_ERRORS: &str = "__template_errors__";
/// Reserved root key for per-node warnings.
pub const KEY_WARNINGS: &str = "__warnings__";
/// Reserved root key under which callers install the progress callback.
pub const KEY_PROGRESS_CALLBACK: &str = "__progress_callback__";
/// Reserved root key for sub-workflow nesting depth.
pub const KEY_DEPTH: &str = "_pflow_depth";
/// Reserved root key for the ancestor execution stack.
pub const KEY_STACK: &str = "_pflow_stack";
/// Reserved root key for the current workflow file path.
pub const KEY_WORKFLOW_FILE: &str = "_pflow_workflow_file";

/// Prefix of the sub-workflow control keys.
pub const RESERVED_KEY_PREFIX: &str = "_pflow_";

/// A key is special iff it is dunder-wrapped (`__…__`) or carries the
/// sub-workflow control prefix. Special keys always resolve to the root
/// scope, never to a node namespace.
pub fn is_special_key(key: &str) -> bool {
    (key.starts_with("__") && key.ends_with("__")) || key.starts_with(RESERVED_KEY_PREFIX)
}

/// Checkpoint metadata accumulated over a run.
///
/// `completed_nodes` is monotonically appended; it is never shrunk except by
/// starting a fresh execution without resume state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    #[serde(default)]
    pub completed_nodes: Vec<String>,
    #[serde(default)]
    pub node_actions: BTreeMap<String, String>,
    #[serde(default)]
    pub node_hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_node: Option<String>,
}

impl ExecutionState {
    pub fn is_completed(&self, node_id: &str) -> bool {
        self.completed_nodes.iter().any(|id| id == node_id)
    }

    /// Records a successful node completion. Appends to `completed_nodes`
    /// only on first completion; action and hash are always refreshed.
    pub fn record_completion(&mut self, node_id: &str, action: &str, config_hash: &str) {
        if !self.is_completed(node_id) {
            self.completed_nodes.push(node_id.to_string());
        }
        self.node_actions
            .insert(node_id.to_string(), action.to_string());
        self.node_hashes
            .insert(node_id.to_string(), config_hash.to_string());
        if self.failed_node.as_deref() == Some(node_id) {
            self.failed_node = None;
        }
    }
}

/// One captured LLM invocation.
///
/// The usage payload written by the node (model, token counts, cost) is
/// flattened into the record alongside the engine-attributed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub node_id: String,
    pub duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub usage: Map<String, Value>,
}

/// One permissive-mode template failure, keyed by node id in the shared
/// state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateErrorRecord {
    pub message: String,
    #[serde(default)]
    pub variables: Vec<String>,
}

/// Progress events delivered to the caller-installed callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEvent {
    WorkflowStart,
    NodeStart,
    NodeComplete,
    NodeCached,
    NodeError,
}

/// Caller-installed progress hook: `(node_id, event, duration_ms, depth)`.
pub type ProgressCallback = Arc<dyn Fn(&str, ProgressEvent, Option<f64>, u32) + Send + Sync>;

/// The root shared-state container for one workflow run.
#[derive(Clone, Default)]
pub struct SharedState {
    /// JSON-domain user data: workflow inputs, per-node namespaces, and any
    /// unrecognized special keys nodes choose to write.
    pub values: Map<String, Value>,

    execution: ExecutionState,
    llm_calls: Vec<LlmCallRecord>,
    template_errors: BTreeMap<String, TemplateErrorRecord>,
    warnings: BTreeMap<String, String>,
    depth: u32,
    stack: Vec<String>,
    workflow_file: Option<String>,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedState")
            .field("values", &self.values)
            .field("execution", &self.execution)
            .field("llm_calls", &self.llm_calls)
            .field("template_errors", &self.template_errors)
            .field("warnings", &self.warnings)
            .field("depth", &self.depth)
            .field("stack", &self.stack)
            .field("workflow_file", &self.workflow_file)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a fresh state with caller-provided values.
    pub fn with_values(values: Map<String, Value>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    pub fn execution(&self) -> &ExecutionState {
        &self.execution
    }

    pub fn execution_mut(&mut self) -> &mut ExecutionState {
        &mut self.execution
    }

    pub fn llm_calls(&self) -> &[LlmCallRecord] {
        &self.llm_calls
    }

    pub fn record_llm_call(&mut self, record: LlmCallRecord) {
        self.llm_calls.push(record);
    }

    pub fn template_errors(&self) -> &BTreeMap<String, TemplateErrorRecord> {
        &self.template_errors
    }

    pub fn record_template_error(&mut self, node_id: &str, record: TemplateErrorRecord) {
        self.template_errors.insert(node_id.to_string(), record);
    }

    pub fn warnings(&self) -> &BTreeMap<String, String> {
        &self.warnings
    }

    pub fn record_warning(&mut self, node_id: &str, warning: impl Into<String>) {
        self.warnings.insert(node_id.to_string(), warning.into());
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
    }

    pub fn stack(&self) -> &[String] {
        &self.stack
    }

    pub fn set_stack(&mut self, stack: Vec<String>) {
        self.stack = stack;
    }

    pub fn workflow_file(&self) -> Option<&str> {
        self.workflow_file.as_deref()
    }

    pub fn set_workflow_file(&mut self, file: impl Into<String>) {
        self.workflow_file = Some(file.into());
    }

    pub fn progress_callback(&self) -> Option<&ProgressCallback> {
        self.progress.as_ref()
    }

    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.progress = Some(callback);
    }

    /// Fires the progress callback when one is installed. Callback panics
    /// are suppressed; progress reporting must never break execution.
    pub fn emit_progress(&self, node_id: &str, event: ProgressEvent, duration_ms: Option<f64>) {
        if let Some(callback) = &self.progress {
            let depth = self.depth;
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(node_id, event, duration_ms, depth)
            }));
        }
    }

    /// Serializes the full state — user values plus reserved keys — into one
    /// JSON object. This is the persisted checkpoint shape.
    pub fn to_value(&self) -> Value {
        let mut out = self.values.clone();
        out.insert(
            KEY_EXECUTION.to_string(),
            serde_json::to_value(&self.execution).unwrap_or(Value::Null),
        );
        out.insert(
            KEY_LLM_CALLS.to_string(),
            serde_json::to_value(&self.llm_calls).unwrap_or_else(|_| Value::Array(Vec::new())),
        );
        if !self.template_errors.is_empty() {
            out.insert(
                KEY_TEMPLATE_ERRORS.to_string(),
                serde_json::to_value(&self.template_errors).unwrap_or(Value::Null),
            );
        }
        if !self.warnings.is_empty() {
            out.insert(
                KEY_WARNINGS.to_string(),
                serde_json::to_value(&self.warnings).unwrap_or(Value::Null),
            );
        }
        if self.depth > 0 {
            out.insert(KEY_DEPTH.to_string(), Value::from(self.depth));
        }
        if !self.stack.is_empty() {
            out.insert(
                KEY_STACK.to_string(),
                serde_json::to_value(&self.stack).unwrap_or(Value::Null),
            );
        }
        if let Some(file) = &self.workflow_file {
            out.insert(KEY_WORKFLOW_FILE.to_string(), Value::from(file.clone()));
        }
        Value::Object(out)
    }

    /// Rebuilds a state from its serialized form, extracting reserved keys
    /// back into the typed fields. The progress callback is not persistable
    /// and must be re-installed by the caller.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(FlowError::Serialization {
                message: "shared state must be a JSON object".to_string(),
            });
        };

        let execution = match map.remove(KEY_EXECUTION) {
            Some(raw) => serde_json::from_value(raw)?,
            None => ExecutionState::default(),
        };
        let llm_calls = match map.remove(KEY_LLM_CALLS) {
            Some(raw) => serde_json::from_value(raw)?,
            None => Vec::new(),
        };
        let template_errors = match map.remove(KEY_TEMPLATE_ERRORS) {
            Some(raw) => serde_json::from_value(raw)?,
            None => BTreeMap::new(),
        };
        let warnings = match map.remove(KEY_WARNINGS) {
            Some(raw) => serde_json::from_value(raw)?,
            None => BTreeMap::new(),
        };
        let depth = match map.remove(KEY_DEPTH) {
            Some(raw) => serde_json::from_value(raw)?,
            None => 0,
        };
        let stack = match map.remove(KEY_STACK) {
            Some(raw) => serde_json::from_value(raw)?,
            None => Vec::new(),
        };
        let workflow_file = match map.remove(KEY_WORKFLOW_FILE) {
            Some(Value::String(file)) => Some(file),
            _ => None,
        };
        map.remove(KEY_PROGRESS_CALLBACK);

        Ok(Self {
            values: map,
            execution,
            llm_calls,
            template_errors,
            warnings,
            depth,
            stack,
            workflow_file,
            progress: None,
        })
    }

    /// The per-node output namespace, when present.
    pub fn namespace(&self, node_id: &str) -> Option<&Map<String, Value>> {
        self.values.get(node_id).and_then(Value::as_object)
    }
}
