//! Execution orchestration.
//!
//! [`execute_workflow`] is the single public entry point library, CLI, and
//! MCP callers use. It validates the IR (always — repair disabled does not
//! skip validation), compiles, seeds or resumes the shared state, runs the
//! flow, and reports a structured result with per-node steps.
//!
//! When a run fails and repair is enabled, the external
//! [`WorkflowRepairer`] collaborator may produce a replacement IR; the
//! orchestrator then re-invokes itself once with repair disabled and the
//! preserved shared state as resume state. Already-completed nodes replay
//! from their checkpoints, so the repaired run picks up at the failure
//! point. A second failure is terminal.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info_span, warn};
use uuid::Uuid;

use crate::error::ErrorRecord;
use crate::ir::{validator, WorkflowIr};
use crate::nodes::{NodeRegistry, WorkflowLibrary};
use crate::store::{ProgressCallback, ProgressEvent, SharedState};
use crate::template::{ResolveMode, TemplateResolver};

use super::compiler::{compile_ir_to_flow, CompileOptions};
use super::flow::NodeRun;
use super::seed_inputs;

/// Final status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Completed,
    Failed,
    ValidationFailed,
}

/// Per-node status in the result report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    NotExecuted,
}

/// One node's contribution to the result report.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStep {
    pub node_id: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    /// True iff the wrapper replayed this node from its checkpoint.
    pub cached: bool,
}

/// Structured result returned to every caller.
#[derive(Debug)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub success: bool,
    pub status: WorkflowStatus,
    /// The flow's final action on success, or `"validation_failed"`.
    pub action_result: Option<String>,
    pub errors: Vec<ErrorRecord>,
    pub steps: Vec<ExecutionStep>,
    /// Declared outputs resolved from the final shared state.
    pub outputs: Map<String, Value>,
    pub shared_after: SharedState,
}

/// External repair collaborator. The core only defines the boundary: given
/// the failed run's context, produce a replacement IR or decline.
pub trait WorkflowRepairer: Send + Sync {
    fn repair(&self, request: RepairRequest<'_>) -> Option<WorkflowIr>;
}

/// Everything the repair collaborator gets to look at.
pub struct RepairRequest<'a> {
    pub original_request: Option<&'a str>,
    pub workflow_ir: &'a WorkflowIr,
    pub errors: &'a [ErrorRecord],
    pub shared_state: &'a SharedState,
}

/// Options for [`execute_workflow`].
#[derive(Default)]
pub struct ExecutionOptions {
    pub enable_repair: bool,
    /// Shared state preserved from a prior failed execution; completed nodes
    /// replay from their checkpoints.
    pub resume_state: Option<SharedState>,
    /// Progress/display hook installed into the shared state.
    pub progress: Option<ProgressCallback>,
    /// Free-text request that produced the workflow; forwarded to repair.
    pub original_request: Option<String>,
    pub mode: ResolveMode,
    pub library: Option<Arc<dyn WorkflowLibrary>>,
    pub repairer: Option<Arc<dyn WorkflowRepairer>>,
}

/// Validates, compiles, and runs a workflow, returning a structured result.
/// This function never panics on workflow failures — every outcome is a
/// result value.
pub fn execute_workflow(
    ir: &WorkflowIr,
    execution_params: Map<String, Value>,
    registry: &Arc<NodeRegistry>,
    options: ExecutionOptions,
) -> ExecutionResult {
    let run_id = Uuid::new_v4();
    let span = info_span!("workflow_execution", %run_id);
    let _guard = span.enter();

    let mut ir = ir.clone();
    ir.normalize();

    // Validation always runs, even when repair is disabled.
    let validation_errors = validator::validate_workflow(&ir, &execution_params, Some(registry));
    if !validation_errors.is_empty() {
        warn!(
            errors = validation_errors.len(),
            "workflow failed validation; no nodes executed"
        );
        return ExecutionResult {
            run_id,
            success: false,
            status: WorkflowStatus::ValidationFailed,
            action_result: Some("validation_failed".to_string()),
            errors: validation_errors,
            steps: not_executed_steps(&ir),
            outputs: Map::new(),
            shared_after: SharedState::new(),
        };
    }

    let mut shared = match options.resume_state {
        Some(state) => state,
        None => SharedState::with_values(execution_params.clone()),
    };
    seed_inputs(&mut shared, &ir.inputs);
    if let Some(callback) = &options.progress {
        shared.set_progress_callback(Arc::clone(callback));
    }

    let compile_options = CompileOptions {
        validate: false,
        mode: options.mode,
        library: options.library.clone(),
        initial_params: execution_params.clone(),
    };
    let mut flow = match compile_ir_to_flow(&ir, registry, &compile_options) {
        Ok(flow) => flow,
        Err(error) => {
            return ExecutionResult {
                run_id,
                success: false,
                status: WorkflowStatus::Failed,
                action_result: None,
                errors: vec![ErrorRecord::from(&error)],
                steps: not_executed_steps(&ir),
                outputs: Map::new(),
                shared_after: shared,
            };
        }
    };

    if let Some(start) = ir.start_node_id() {
        shared.emit_progress(start, ProgressEvent::WorkflowStart, None);
    }

    match flow.run(&mut shared) {
        Ok(action) => {
            debug!(%action, "workflow completed");
            let steps = build_steps(&ir, &shared, flow.run_log());
            let outputs = resolve_outputs(&ir, &shared);
            ExecutionResult {
                run_id,
                success: true,
                status: WorkflowStatus::Completed,
                action_result: Some(action),
                errors: Vec::new(),
                steps,
                outputs,
                shared_after: shared,
            }
        }
        Err(error) => {
            warn!(%error, "workflow failed");
            let errors = vec![ErrorRecord::from(&error)];

            if options.enable_repair {
                if let Some(repairer) = options.repairer.as_ref() {
                    let request = RepairRequest {
                        original_request: options.original_request.as_deref(),
                        workflow_ir: &ir,
                        errors: &errors,
                        shared_state: &shared,
                    };
                    if let Some(repaired_ir) = repairer.repair(request) {
                        debug!("repair produced a replacement workflow, resuming once");
                        // One shot: the repaired run may not repair again.
                        return execute_workflow(
                            &repaired_ir,
                            execution_params,
                            registry,
                            ExecutionOptions {
                                enable_repair: false,
                                resume_state: Some(shared),
                                progress: options.progress,
                                original_request: options.original_request,
                                mode: options.mode,
                                library: options.library,
                                repairer: None,
                            },
                        );
                    }
                }
            }

            let steps = build_steps(&ir, &shared, flow.run_log());
            ExecutionResult {
                run_id,
                success: false,
                status: WorkflowStatus::Failed,
                action_result: None,
                errors,
                steps,
                outputs: Map::new(),
                shared_after: shared,
            }
        }
    }
}

fn not_executed_steps(ir: &WorkflowIr) -> Vec<ExecutionStep> {
    ir.nodes
        .iter()
        .map(|node| ExecutionStep {
            node_id: node.id.clone(),
            status: StepStatus::NotExecuted,
            duration_ms: None,
            cached: false,
        })
        .collect()
}

// Derives per-node steps from the checkpoint plus this run's visit log.
fn build_steps(ir: &WorkflowIr, shared: &SharedState, run_log: &[NodeRun]) -> Vec<ExecutionStep> {
    let execution = shared.execution();
    ir.nodes
        .iter()
        .map(|node| {
            let visit = run_log.iter().find(|run| run.node_id == node.id);
            let status = if execution.is_completed(&node.id) {
                StepStatus::Completed
            } else if execution.failed_node.as_deref() == Some(node.id.as_str()) {
                StepStatus::Failed
            } else {
                StepStatus::NotExecuted
            };
            ExecutionStep {
                node_id: node.id.clone(),
                status,
                duration_ms: visit.and_then(|run| run.duration_ms),
                cached: visit.is_some_and(|run| run.cached),
            }
        })
        .collect()
}

// Resolves declared outputs against the final shared state. Unresolvable
// sources are skipped rather than failing a run that already succeeded.
fn resolve_outputs(ir: &WorkflowIr, shared: &SharedState) -> Map<String, Value> {
    let mut outputs = Map::new();
    for (name, spec) in &ir.outputs {
        let Some(source) = &spec.source else { continue };
        let mut resolver =
            TemplateResolver::new(&shared.values, ResolveMode::Permissive, "outputs");
        match resolver.resolve_template(source) {
            Ok(value) if resolver.unresolved().is_empty() => {
                outputs.insert(name.clone(), value);
            }
            _ => {
                warn!(output = %name, source = %source, "output source did not resolve; skipping");
            }
        }
    }
    outputs
}
