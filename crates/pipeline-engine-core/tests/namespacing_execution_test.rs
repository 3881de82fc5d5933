//! End-to-end namespacing behavior: per-node write isolation, root
//! fallback for caller-seeded values, and the disabled path.

use pipeline_engine_core::prelude::*;
use pipeline_engine_core::runtime::CompiledFlow;
use pipeline_engine_core::testing::test_registry;
use serde_json::json;

fn ir(value: Value) -> WorkflowIr {
    serde_json::from_value(value).unwrap()
}

fn compile(value: Value) -> CompiledFlow {
    let registry = test_registry();
    compile_ir_to_flow(&ir(value), &registry, &CompileOptions::default()).unwrap()
}

#[test]
fn namespacing_prevents_output_collisions() {
    // Two nodes of the same type both write `out`; with namespacing on the
    // final state holds both under their ids and no root `out` exists.
    let mut flow = compile(json!({
        "ir_version": "0.1.0",
        "enable_namespacing": true,
        "nodes": [
            {"id": "echo1", "type": "echo", "params": {"value": "first"}},
            {"id": "echo2", "type": "echo", "params": {"value": "second"}},
            {"id": "reader", "type": "echo", "params": {"value": "${echo1.out}"}}
        ],
        "edges": [
            {"from": "echo1", "to": "echo2"},
            {"from": "echo2", "to": "reader"}
        ]
    }));

    let mut shared = SharedState::new();
    flow.run(&mut shared).unwrap();

    assert_eq!(shared.values["echo1"]["out"], json!("first"));
    assert_eq!(shared.values["echo2"]["out"], json!("second"));
    assert_eq!(
        shared.values["reader"]["out"],
        json!("first"),
        "cross-node reference reads the producer's namespace"
    );
    assert!(
        !shared.values.contains_key("out"),
        "no collision key at root"
    );
}

#[test]
fn namespacing_is_enabled_by_default() {
    let mut flow = compile(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "node1", "type": "echo", "params": {"value": "first"}},
            {"id": "node2", "type": "echo", "params": {"value": "second"}}
        ],
        "edges": [{"from": "node1", "to": "node2"}]
    }));

    let mut shared = SharedState::new();
    flow.run(&mut shared).unwrap();

    assert_eq!(shared.values["node1"]["out"], json!("first"));
    assert_eq!(shared.values["node2"]["out"], json!("second"));
    assert!(!shared.values.contains_key("out"));
}

#[test]
fn caller_seeded_root_values_stay_visible() {
    // Inputs land at the root; templates and node reads fall back to them.
    let mut flow = compile(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "reader", "type": "echo", "params": {"value": "${seeded}"}}
        ]
    }));

    let mut shared = SharedState::new();
    shared.values.insert("seeded".into(), json!("cli_data"));
    flow.run(&mut shared).unwrap();

    assert_eq!(shared.values["reader"]["out"], json!("cli_data"));
    assert_eq!(shared.values["seeded"], json!("cli_data"));
}

#[test]
fn disabled_namespacing_writes_flat() {
    let mut flow = compile(json!({
        "ir_version": "0.1.0",
        "enable_namespacing": false,
        "nodes": [
            {"id": "node1", "type": "echo", "params": {"value": "first"}},
            {"id": "node2", "type": "echo", "params": {"value": "second"}}
        ],
        "edges": [{"from": "node1", "to": "node2"}]
    }));

    let mut shared = SharedState::new();
    flow.run(&mut shared).unwrap();

    // Flat mode: the second write wins the collision.
    assert_eq!(shared.values["out"], json!("second"));
    assert!(!shared.values.contains_key("node1"));
    assert!(!shared.values.contains_key("node2"));
}

#[test]
fn checkpoint_metadata_is_not_namespaced() {
    let mut flow = compile(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "a", "type": "echo", "params": {"value": "x"}},
            {"id": "b", "type": "echo", "params": {"value": "y"}}
        ],
        "edges": [{"from": "a", "to": "b"}]
    }));

    let mut shared = SharedState::new();
    flow.run(&mut shared).unwrap();

    assert_eq!(shared.execution().completed_nodes, ["a", "b"]);
    assert_eq!(shared.execution().node_actions["a"], "default");
    assert!(shared.execution().node_hashes.contains_key("b"));

    // The serialized form carries the checkpoint under the reserved key, at
    // the root, never inside a namespace.
    let persisted = shared.to_value();
    assert_eq!(
        persisted["__execution__"]["completed_nodes"],
        json!(["a", "b"])
    );
    assert!(persisted["a"].get("__execution__").is_none());
}
