//! Sub-workflow composition: storage isolation modes, parameter and output
//! mapping, nesting depth bounds, and cycle detection.

use pipeline_engine_core::prelude::*;
use pipeline_engine_core::nodes::InMemoryWorkflowLibrary;
use pipeline_engine_core::testing::test_registry;
use serde_json::{json, Map};

fn ir(value: Value) -> WorkflowIr {
    serde_json::from_value(value).unwrap()
}

fn snoop_child() -> Value {
    json!({
        "ir_version": "0.1.0",
        "nodes": [{"id": "snoop", "type": "snoop", "params": {}}]
    })
}

fn run(parent: Value, seed: Value) -> ExecutionResult {
    let registry = test_registry();
    execute_workflow(
        &ir(parent),
        seed.as_object().cloned().unwrap_or_default(),
        &registry,
        ExecutionOptions::default(),
    )
}

#[test]
fn mapped_mode_passes_only_mapped_params() {
    let result = run(
        json!({
            "ir_version": "0.1.0",
            "nodes": [{
                "id": "sub", "type": "workflow",
                "params": {
                    "workflow_ir": snoop_child(),
                    "param_mapping": {"x": "hello"},
                    "storage_mode": "mapped",
                    "output_mapping": {"snoop.observed": "child_view"}
                }
            }]
        }),
        json!({"parent_data": "secret"}),
    );

    assert!(result.success, "errors: {:?}", result.errors);
    let view = &result.shared_after.values["sub"]["child_view"];
    assert_eq!(
        view["seen_keys"],
        json!(["x"]),
        "child sees only the mapped parameter, never parent_data"
    );
    assert_eq!(view["depth"], json!(1));
    assert_eq!(view["stack_len"], json!(1));
}

#[test]
fn param_mapping_resolves_templates_in_parent_scope() {
    let result = run(
        json!({
            "ir_version": "0.1.0",
            "nodes": [
                {"id": "produce", "type": "echo", "params": {"value": "made upstream"}},
                {"id": "sub", "type": "workflow", "params": {
                    "workflow_ir": {
                        "ir_version": "0.1.0",
                        "nodes": [{"id": "inner", "type": "echo",
                                   "params": {"value": "${handoff}"}}]
                    },
                    "param_mapping": {
                        "handoff": "${produce.out}",
                        "constant": 42
                    },
                    "output_mapping": {"inner.out": "relayed"}
                }}
            ],
            "edges": [{"from": "produce", "to": "sub"}]
        }),
        json!({}),
    );

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(
        result.shared_after.values["sub"]["relayed"],
        json!("made upstream")
    );
}

#[test]
fn isolated_mode_hides_everything_but_mapped_params() {
    let result = run(
        json!({
            "ir_version": "0.1.0",
            "nodes": [{
                "id": "sub", "type": "workflow",
                "params": {
                    "workflow_ir": snoop_child(),
                    "storage_mode": "isolated",
                    "output_mapping": {"snoop.observed": "child_view"}
                }
            }]
        }),
        json!({"parent_data": "should_not_see"}),
    );

    assert!(result.success, "errors: {:?}", result.errors);
    let view = &result.shared_after.values["sub"]["child_view"];
    assert_eq!(view["seen_keys"], json!([]), "isolated child starts empty");
}

#[test]
fn scoped_mode_filters_by_prefix_and_strips_it() {
    let result = run(
        json!({
            "ir_version": "0.1.0",
            "nodes": [{
                "id": "sub", "type": "workflow",
                "params": {
                    "workflow_ir": snoop_child(),
                    "storage_mode": "scoped",
                    "output_mapping": {"snoop.observed": "child_view"}
                }
            }]
        }),
        json!({
            "child_region": "eu",
            "child_bucket": "artifacts",
            "private": "hidden"
        }),
    );

    assert!(result.success, "errors: {:?}", result.errors);
    let view = &result.shared_after.values["sub"]["child_view"];
    assert_eq!(
        view["seen_keys"],
        json!(["bucket", "region"]),
        "prefixed keys come through stripped; unprefixed keys do not"
    );
}

#[test]
fn shared_mode_aliases_parent_state() {
    let registry = test_registry();
    let result = execute_workflow(
        &ir(json!({
            "ir_version": "0.1.0",
            "nodes": [{
                "id": "sub", "type": "workflow",
                "params": {
                    "workflow_ir": {
                        "ir_version": "0.1.0",
                        "nodes": [{"id": "writer", "type": "echo",
                                   "params": {"value": "${parent_data}"}}]
                    },
                    "storage_mode": "shared"
                }
            }]
        })),
        json!({"parent_data": "visible"}).as_object().cloned().unwrap(),
        &registry,
        ExecutionOptions::default(),
    );

    assert!(result.success, "errors: {:?}", result.errors);
    // The child wrote straight into the parent's state and read from it.
    assert_eq!(
        result.shared_after.values["writer"]["out"],
        json!("visible")
    );
}

#[test]
fn child_failure_takes_error_action() {
    let result = run(
        json!({
            "ir_version": "0.1.0",
            "nodes": [
                {"id": "sub", "type": "workflow", "params": {
                    "workflow_ir": {
                        "ir_version": "0.1.0",
                        "nodes": [{"id": "boom", "type": "fail",
                                   "params": {"message": "child failed"}}]
                    },
                    "error_action": "workflow_error"
                }},
                {"id": "recovery", "type": "echo", "params": {"value": "recovered"}}
            ],
            "edges": [{"from": "sub", "to": "recovery", "action": "workflow_error"}]
        }),
        json!({}),
    );

    assert!(result.success, "errors: {:?}", result.errors);
    let error = result.shared_after.values["sub"]["error"].as_str().unwrap();
    assert!(error.contains("child failed"));
    assert_eq!(
        result.shared_after.values["recovery"]["out"],
        json!("recovered"),
        "the parent routed around the failed child"
    );
}

#[test]
fn both_sources_is_a_configuration_error() {
    let result = run(
        json!({
            "ir_version": "0.1.0",
            "nodes": [{
                "id": "sub", "type": "workflow",
                "params": {
                    "workflow_name": "a",
                    "workflow_ir": snoop_child()
                }
            }]
        }),
        json!({}),
    );
    assert!(!result.success);
    assert!(result.errors[0].message.contains("only one of"));
}

#[test]
fn missing_source_is_a_configuration_error() {
    let result = run(
        json!({
            "ir_version": "0.1.0",
            "nodes": [{"id": "sub", "type": "workflow", "params": {}}]
        }),
        json!({}),
    );
    assert!(!result.success);
    assert!(result.errors[0].message.contains("workflow_name"));
}

#[test]
fn depth_at_limit_is_allowed_one_more_is_rejected() {
    let registry = test_registry();
    let parent = ir(json!({
        "ir_version": "0.1.0",
        "nodes": [{
            "id": "sub", "type": "workflow",
            "params": {"workflow_ir": snoop_child(), "max_depth": 3}
        }]
    }));

    // At depth max-1 the child lands exactly on the limit: allowed.
    let mut flow = compile_ir_to_flow(&parent, &registry, &CompileOptions::default()).unwrap();
    let mut shared = SharedState::new();
    shared.set_depth(2);
    assert!(flow.run(&mut shared).is_ok());

    // At the limit itself, one more level is rejected.
    let mut flow = compile_ir_to_flow(&parent, &registry, &CompileOptions::default()).unwrap();
    let mut shared = SharedState::new();
    shared.set_depth(3);
    let err = flow.run(&mut shared).unwrap_err();
    assert!(err.to_string().contains("nesting depth"));
}

#[test]
fn mutual_recursion_is_detected_as_a_cycle() {
    let registry = test_registry();

    let mut library = InMemoryWorkflowLibrary::new();
    library.insert(
        "workflow-a",
        ir(json!({
            "ir_version": "0.1.0",
            "nodes": [{"id": "call-b", "type": "workflow",
                       "params": {"workflow_name": "workflow-b"}}]
        })),
    );
    library.insert(
        "workflow-b",
        ir(json!({
            "ir_version": "0.1.0",
            "nodes": [{"id": "call-a", "type": "workflow",
                       "params": {"workflow_name": "workflow-a"}}]
        })),
    );

    let entry = ir(json!({
        "ir_version": "0.1.0",
        "nodes": [{"id": "start", "type": "workflow",
                   "params": {"workflow_name": "workflow-a"}}]
    }));

    let result = execute_workflow(
        &entry,
        Map::new(),
        &registry,
        ExecutionOptions {
            library: Some(library.into_shared()),
            ..Default::default()
        },
    );

    assert!(!result.success);
    let message = &result.errors[0].message;
    assert!(message.contains("Circular"), "got: {message}");
    assert!(
        message.contains("workflow-a") && message.contains("workflow-b"),
        "cycle path names both workflows: {message}"
    );
}

#[test]
fn loads_child_from_file_reference() {
    let dir = tempfile::tempdir().unwrap();
    let child_path = dir.path().join("child.json");
    std::fs::write(
        &child_path,
        serde_json::to_string_pretty(&snoop_child()).unwrap(),
    )
    .unwrap();

    let result = run(
        json!({
            "ir_version": "0.1.0",
            "nodes": [{
                "id": "sub", "type": "workflow",
                "params": {
                    "workflow_ref": child_path.to_str().unwrap(),
                    "output_mapping": {"snoop.observed": "child_view"}
                }
            }]
        }),
        json!({}),
    );

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(
        result.shared_after.values["sub"]["child_view"]["depth"],
        json!(1)
    );
}

#[test]
fn file_reference_accepts_metadata_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let child_path = dir.path().join("saved.json");
    std::fs::write(
        &child_path,
        serde_json::to_string(&json!({
            "ir": snoop_child(),
            "metadata": {"name": "saved", "description": "stored with frontmatter"}
        }))
        .unwrap(),
    )
    .unwrap();

    let result = run(
        json!({
            "ir_version": "0.1.0",
            "nodes": [{
                "id": "sub", "type": "workflow",
                "params": {"workflow_ref": child_path.to_str().unwrap()}
            }]
        }),
        json!({}),
    );
    assert!(result.success, "errors: {:?}", result.errors);
}

#[test]
fn missing_file_reference_fails_hard() {
    let result = run(
        json!({
            "ir_version": "0.1.0",
            "nodes": [{
                "id": "sub", "type": "workflow",
                "params": {"workflow_ref": "/nonexistent/child.json"}
            }]
        }),
        json!({}),
    );
    assert!(!result.success);
    assert!(result.errors[0].message.contains("not found"));
}

#[test]
fn output_mapping_skips_missing_child_keys_and_reserved_parents() {
    let result = run(
        json!({
            "ir_version": "0.1.0",
            "nodes": [{
                "id": "sub", "type": "workflow",
                "params": {
                    "workflow_ir": {
                        "ir_version": "0.1.0",
                        "nodes": [{"id": "inner", "type": "echo",
                                   "params": {"value": "present"}}]
                    },
                    "output_mapping": {
                        "inner.out": "copied",
                        "inner.never_written": "untouched",
                        "inner.out2": "_pflow_depth"
                    }
                }
            }]
        }),
        json!({}),
    );

    assert!(result.success, "errors: {:?}", result.errors);
    let namespace = result.shared_after.namespace("sub").unwrap();
    assert_eq!(namespace["copied"], json!("present"));
    assert!(
        !namespace.contains_key("untouched"),
        "missing child key leaves the parent untouched"
    );
    assert_eq!(result.shared_after.depth(), 0, "reserved parent key skipped");
}

#[test]
fn nested_depth_increases_per_level() {
    let level3 = snoop_child();
    let level2 = json!({
        "ir_version": "0.1.0",
        "nodes": [{"id": "l2", "type": "workflow", "params": {
            "workflow_ir": level3,
            "output_mapping": {"snoop.observed": "leaf_view"}
        }}]
    });
    let level1 = json!({
        "ir_version": "0.1.0",
        "nodes": [{"id": "l1", "type": "workflow", "params": {
            "workflow_ir": level2,
            "output_mapping": {"l2.leaf_view": "leaf_view"}
        }}]
    });

    let result = run(level1, json!({}));
    assert!(result.success, "errors: {:?}", result.errors);
    let view = &result.shared_after.values["l1"]["leaf_view"];
    assert_eq!(view["depth"], json!(2), "two nested executors below root");
    assert_eq!(view["stack_len"], json!(2));
}
