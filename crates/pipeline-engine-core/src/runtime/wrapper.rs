//! Instrumented node wrapper.
//!
//! The single layer wrapping every executing node. Per execution it:
//!
//! 1. resolves the node's configured params against the shared state,
//! 2. computes the config hash of the resolved params,
//! 3. short-circuits when the checkpoint already records this node with a
//!    matching hash (the node body does not run),
//! 4. fires progress events,
//! 5. runs the inner node through a namespaced store view,
//! 6. captures duration, LLM usage, and warnings,
//! 7. updates the checkpoint on success.
//!
//! The wrapper must be the outermost layer so instrumentation sees template
//! resolution and namespacing. The node's spec params are kept immutable and
//! re-set on the inner node after every run so that retries resolve against
//! the then-current shared state, not a stale snapshot.

use std::collections::HashSet;
use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{FlowError, Result};
use crate::ir::DEFAULT_ACTION;
use crate::nodes::{Node, NodeInterface};
use crate::store::{
    LlmCallRecord, NamespacedStore, ProgressEvent, SharedState, TemplateErrorRecord,
};
use crate::template::{ResolveMode, TemplateResolver};

/// Length of the truncated hex config hash stored in checkpoints.
const CONFIG_HASH_LEN: usize = 16;

/// How a single node execution concluded. Failures travel as errors; this
/// type only distinguishes a checkpoint hit from a real run, removing the
/// ambiguity between "sentinel" and "completed" outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The checkpoint already recorded this node; the stored action was
    /// replayed without running the node body.
    Cached { action: String },
    /// The node body ran to completion.
    Completed { action: String, duration_ms: f64 },
}

impl ExecutionOutcome {
    pub fn action(&self) -> &str {
        match self {
            ExecutionOutcome::Cached { action } => action,
            ExecutionOutcome::Completed { action, .. } => action,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, ExecutionOutcome::Cached { .. })
    }

    pub fn duration_ms(&self) -> Option<f64> {
        match self {
            ExecutionOutcome::Cached { .. } => None,
            ExecutionOutcome::Completed { duration_ms, .. } => Some(*duration_ms),
        }
    }
}

/// Wrapper carrying instrumentation state for one compiled node.
pub struct InstrumentedNodeWrapper {
    node_id: String,
    node_type: String,
    inner: Box<dyn Node>,
    /// The node's params exactly as compiled from the IR (plus injected
    /// special parameters). Resolution always starts from these.
    spec_params: Map<String, Value>,
    interface: Option<NodeInterface>,
    /// Params whose contents must not be template-resolved (a sub-workflow's
    /// inline child IR belongs to the child's scope).
    opaque_params: HashSet<String>,
    mode: ResolveMode,
    namespacing: bool,
}

impl std::fmt::Debug for InstrumentedNodeWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedNodeWrapper")
            .field("node_id", &self.node_id)
            .field("node_type", &self.node_type)
            .field("mode", &self.mode)
            .field("namespacing", &self.namespacing)
            .finish()
    }
}

impl InstrumentedNodeWrapper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: impl Into<String>,
        node_type: impl Into<String>,
        inner: Box<dyn Node>,
        spec_params: Map<String, Value>,
        interface: Option<NodeInterface>,
        opaque_params: HashSet<String>,
        mode: ResolveMode,
        namespacing: bool,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            inner,
            spec_params,
            interface,
            opaque_params,
            mode,
            namespacing,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// Executes the wrapped node against the shared state.
    pub fn execute(&mut self, shared: &mut SharedState) -> Result<ExecutionOutcome> {
        match self.execute_inner(shared) {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                shared.execution_mut().failed_node = Some(self.node_id.clone());
                shared.emit_progress(&self.node_id, ProgressEvent::NodeError, None);
                Err(error)
            }
        }
    }

    fn execute_inner(&mut self, shared: &mut SharedState) -> Result<ExecutionOutcome> {
        let resolved = self.resolve_params(shared)?;
        let config_hash = config_hash(&self.node_type, &resolved);

        if let Some(action) = self.checkpoint_hit(shared, &config_hash) {
            debug!(node_id = %self.node_id, "checkpoint hit, replaying recorded action");
            shared.emit_progress(&self.node_id, ProgressEvent::NodeCached, None);
            return Ok(ExecutionOutcome::Cached { action });
        }

        shared.emit_progress(&self.node_id, ProgressEvent::NodeStart, None);
        let start = Instant::now();

        self.inner.set_params(resolved.clone());
        let result = {
            let mut store = NamespacedStore::new(shared, &self.node_id, self.namespacing);
            self.inner.run(&mut store)
        };
        // Restore the unresolved spec params so a retry re-resolves against
        // the then-current shared state.
        self.inner.set_params(self.spec_params.clone());

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        let action = result.map_err(|error| self.attribute(error))?;

        self.capture_llm_usage(shared, &resolved, duration_ms);
        self.check_llm_json_output(shared, &resolved);
        shared
            .execution_mut()
            .record_completion(&self.node_id, &action, &config_hash);
        shared.emit_progress(&self.node_id, ProgressEvent::NodeComplete, Some(duration_ms));
        debug!(node_id = %self.node_id, action = %action, duration_ms, "node completed");

        Ok(ExecutionOutcome::Completed {
            action,
            duration_ms,
        })
    }

    fn resolve_params(&mut self, shared: &mut SharedState) -> Result<Map<String, Value>> {
        let mut resolved = Map::with_capacity(self.spec_params.len());
        let unresolved;
        {
            let mut resolver = TemplateResolver::new(&shared.values, self.mode, &self.node_id);
            for (key, value) in &self.spec_params {
                if self.opaque_params.contains(key) {
                    resolved.insert(key.clone(), value.clone());
                    continue;
                }
                let kind = self.interface.as_ref().and_then(|i| i.param_kind(key));
                resolved.insert(key.clone(), resolver.resolve_param(key, value, kind)?);
            }
            unresolved = resolver.unresolved().to_vec();
        }

        if !unresolved.is_empty() {
            shared.record_template_error(
                &self.node_id,
                TemplateErrorRecord {
                    message: format!(
                        "Unresolved template variable(s): {}",
                        unresolved.join(", ")
                    ),
                    variables: unresolved,
                },
            );
        }
        Ok(resolved)
    }

    fn checkpoint_hit(&self, shared: &SharedState, config_hash: &str) -> Option<String> {
        let execution = shared.execution();
        if !execution.is_completed(&self.node_id) {
            return None;
        }
        if execution.node_hashes.get(&self.node_id).map(String::as_str) != Some(config_hash) {
            return None;
        }
        Some(
            execution
                .node_actions
                .get(&self.node_id)
                .cloned()
                .unwrap_or_else(|| DEFAULT_ACTION.to_string()),
        )
    }

    // Nodes report their LLM usage by writing `llm_usage` into their
    // namespace (or the root when namespacing is off); the wrapper lifts it
    // into the root append-only log with attribution.
    fn capture_llm_usage(
        &self,
        shared: &mut SharedState,
        resolved: &Map<String, Value>,
        duration_ms: f64,
    ) {
        let usage = self
            .namespace_value(shared, "llm_usage")
            .or_else(|| shared.values.get("llm_usage"))
            .and_then(Value::as_object)
            .cloned();
        let Some(usage) = usage else { return };

        let prompt = resolved
            .get("prompt")
            .and_then(Value::as_str)
            .map(str::to_string);

        let tokens = usage
            .get("total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        debug!(node_id = %self.node_id, tokens, "captured LLM usage");

        shared.record_llm_call(LlmCallRecord {
            node_id: self.node_id.clone(),
            duration_ms,
            prompt,
            timestamp: Utc::now(),
            usage,
        });
    }

    // A prompt that asked for JSON paired with a plain-text response almost
    // always means the model ignored the format instructions; surface it as
    // a warning rather than guessing at a fix.
    fn check_llm_json_output(&self, shared: &mut SharedState, resolved: &Map<String, Value>) {
        let Some(prompt) = resolved.get("prompt").and_then(Value::as_str) else {
            return;
        };
        if !prompt.to_lowercase().contains("json") {
            return;
        }
        let response = self
            .namespace_value(shared, "response")
            .or_else(|| shared.values.get("response"))
            .and_then(Value::as_str);
        let Some(response) = response else { return };

        let trimmed = response.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return;
        }

        let model = self
            .namespace_value(shared, "llm_usage")
            .or_else(|| shared.values.get("llm_usage"))
            .and_then(|u| u.get("model"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let preview: String = response.chars().take(100).collect();
        warn!(node_id = %self.node_id, model = %model, "prompt requested JSON but response is plain text");
        shared.record_warning(
            &self.node_id,
            format!(
                "Model '{model}' may have failed to generate valid JSON: the prompt requested \
                 JSON but the response starts with: {preview}"
            ),
        );
    }

    fn namespace_value<'s>(&self, shared: &'s SharedState, key: &str) -> Option<&'s Value> {
        shared.namespace(&self.node_id).and_then(|ns| ns.get(key))
    }

    // Errors from node bodies keep whatever attribution they carry; ones
    // raised before the node knew its graph id get stamped with it here.
    fn attribute(&self, error: FlowError) -> FlowError {
        match error {
            FlowError::NodeExecution { node_id, message } if node_id.is_empty() => {
                FlowError::NodeExecution {
                    node_id: self.node_id.clone(),
                    message,
                }
            }
            other => other,
        }
    }
}

/// Stable hash of a node's resolved configuration.
///
/// SHA-256 over the node type and the canonical JSON encoding of the
/// resolved params, truncated to 16 hex chars. `serde_json` maps iterate in
/// sorted key order, so the encoding is canonical without extra work. Any
/// change in resolved params invalidates the checkpoint entry.
pub fn config_hash(node_type: &str, resolved_params: &Map<String, Value>) -> String {
    let encoded = serde_json::to_string(resolved_params).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(node_type.as_bytes());
    hasher.update(b":");
    hasher.update(encoded.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..CONFIG_HASH_LEN].to_string()
}
