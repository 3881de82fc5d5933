//! Unused-input detection and validation-failure semantics through the
//! public entry point.

use pipeline_engine_core::ir::validator::validate_workflow;
use pipeline_engine_core::prelude::*;
use pipeline_engine_core::testing::test_registry;
use serde_json::{json, Map};

fn ir(value: Value) -> WorkflowIr {
    serde_json::from_value(value).unwrap()
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn unused_input_fails_validation_before_execution() {
    // Declares `repo` and `unused`; only `repo` is referenced. Execution
    // must refuse to run any node.
    let registry = test_registry();
    let result = execute_workflow(
        &ir(json!({
            "ir_version": "0.1.0",
            "nodes": [
                {"id": "clone", "type": "echo", "params": {"value": "cloning ${repo}"}}
            ],
            "inputs": {
                "repo": {"type": "string"},
                "unused": {"type": "string", "required": false}
            }
        })),
        params(json!({"repo": "org/thing"})),
        &registry,
        ExecutionOptions::default(),
    );

    assert!(!result.success);
    assert_eq!(result.status, WorkflowStatus::ValidationFailed);
    assert_eq!(result.action_result.as_deref(), Some("validation_failed"));
    assert!(
        result.errors.iter().any(|e| e.message.contains("unused")),
        "error must name the unused input"
    );
    assert!(
        result.shared_after.values.is_empty(),
        "no node ran, no side effects"
    );
    assert!(result
        .steps
        .iter()
        .all(|s| s.status == StepStatus::NotExecuted));
}

#[test]
fn all_validation_errors_are_collected_in_one_pass() {
    // Repair tooling needs the full picture: an unused input, a missing
    // required input, and a bad node reference must all be reported
    // together.
    let workflow = ir(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "a", "type": "echo", "params": {"value": "${needed}"}},
            {"id": "b", "type": "echo", "params": {"value": "${ghost.out}"}}
        ],
        "edges": [{"from": "a", "to": "b"}],
        "inputs": {
            "needed": {"type": "string"},
            "forgotten": {"type": "string", "required": false}
        }
    }));

    let errors = validate_workflow(&workflow, &Map::new(), None);
    let combined = errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join(" | ");

    assert!(combined.contains("forgotten"), "unused input reported");
    assert!(combined.contains("needed"), "missing required reported");
    assert!(combined.contains("ghost"), "unknown reference reported");
    assert!(errors.len() >= 3);
}

#[test]
fn valid_workflow_passes_with_params_supplied() {
    let workflow = ir(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "a", "type": "echo", "params": {"value": "${base_path}/one"}},
            {"id": "b", "type": "echo", "params": {"value": "${base_path}/two"}}
        ],
        "edges": [{"from": "a", "to": "b"}],
        "inputs": {"base_path": {"type": "string"}}
    }));
    let errors = validate_workflow(&workflow, &params(json!({"base_path": "/tmp"})), None);
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
}

#[test]
fn input_used_only_inside_nested_structures_counts() {
    let workflow = ir(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "send", "type": "sink", "params": {
                "dict_param": {
                    "headers": {"Authorization": "Bearer ${token}"},
                    "body": ["${payload}", "constant"]
                }
            }}
        ],
        "inputs": {
            "token": {"type": "string"},
            "payload": {"type": "string"}
        }
    }));
    let errors = validate_workflow(
        &workflow,
        &params(json!({"token": "t", "payload": "p"})),
        None,
    );
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
}
