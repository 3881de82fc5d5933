//! Checkpoint-based resume after repair.
//!
//! The critical property: nodes that succeeded before the failure are NOT
//! re-executed after repair — they replay from the checkpoint with no
//! duplicate side effects, and the repaired run continues from the failure
//! point.

use std::sync::{Arc, Mutex};

use pipeline_engine_core::prelude::*;
use pipeline_engine_core::runtime::{RepairRequest, WorkflowRepairer};
use pipeline_engine_core::testing::{base_registry, register_counting};
use serde_json::{json, Map};

fn ir(value: Value) -> WorkflowIr {
    serde_json::from_value(value).unwrap()
}

fn counting_registry(counter: &Arc<Mutex<usize>>) -> Arc<NodeRegistry> {
    let mut registry = base_registry();
    register_counting(&mut registry, Arc::clone(counter));
    Arc::new(registry)
}

struct FixedIrRepairer {
    fixed: WorkflowIr,
    calls: Arc<Mutex<usize>>,
}

impl WorkflowRepairer for FixedIrRepairer {
    fn repair(&self, request: RepairRequest<'_>) -> Option<WorkflowIr> {
        *self.calls.lock().unwrap() += 1;
        assert!(!request.errors.is_empty(), "repair sees the failure");
        Some(self.fixed.clone())
    }
}

#[test]
fn resume_after_repair_skips_completed_nodes() {
    let counter = Arc::new(Mutex::new(0));
    let registry = counting_registry(&counter);

    let broken = ir(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "node1", "type": "counting", "params": {}},
            {"id": "node2", "type": "counting", "params": {}},
            {"id": "node3", "type": "fail", "params": {"message": "template exploded"}},
            {"id": "node4", "type": "counting", "params": {}}
        ],
        "edges": [
            {"from": "node1", "to": "node2"},
            {"from": "node2", "to": "node3"},
            {"from": "node3", "to": "node4"}
        ]
    }));

    // The repaired workflow replaces node3 with a working node.
    let fixed = ir(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "node1", "type": "counting", "params": {}},
            {"id": "node2", "type": "counting", "params": {}},
            {"id": "node3", "type": "counting", "params": {}},
            {"id": "node4", "type": "counting", "params": {}}
        ],
        "edges": [
            {"from": "node1", "to": "node2"},
            {"from": "node2", "to": "node3"},
            {"from": "node3", "to": "node4"}
        ]
    }));

    let repair_calls = Arc::new(Mutex::new(0));
    let result = execute_workflow(
        &broken,
        Map::new(),
        &registry,
        ExecutionOptions {
            enable_repair: true,
            repairer: Some(Arc::new(FixedIrRepairer {
                fixed,
                calls: Arc::clone(&repair_calls),
            })),
            original_request: Some("test workflow".into()),
            ..Default::default()
        },
    );

    assert!(result.success, "workflow succeeds after repair");
    assert_eq!(*repair_calls.lock().unwrap(), 1, "repair consulted once");

    // First run executed node1 and node2; the resumed run executed only
    // node3 and node4. Four total executions, not six.
    assert_eq!(*counter.lock().unwrap(), 4);

    let execution = result.shared_after.execution();
    assert_eq!(
        execution.completed_nodes,
        ["node1", "node2", "node3", "node4"]
    );
    assert!(execution.node_hashes.contains_key("node3"));

    // Per-node report: the carried-over nodes are cached, the repaired tail
    // actually ran.
    let cached: Vec<&str> = result
        .steps
        .iter()
        .filter(|s| s.cached)
        .map(|s| s.node_id.as_str())
        .collect();
    assert_eq!(cached, ["node1", "node2"]);
    assert!(result
        .steps
        .iter()
        .all(|s| s.status == StepStatus::Completed));

    // Original results survived the resume.
    assert_eq!(result.shared_after.values["node1"]["result"], json!("executed_1"));
    assert_eq!(result.shared_after.values["node2"]["result"], json!("executed_2"));
}

#[test]
fn cached_nodes_emit_cached_progress_events() {
    let counter = Arc::new(Mutex::new(0));
    let registry = counting_registry(&counter);

    let workflow = ir(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "node1", "type": "counting", "params": {}},
            {"id": "node2", "type": "counting", "params": {}},
            {"id": "node3", "type": "counting", "params": {}}
        ],
        "edges": [
            {"from": "node1", "to": "node2"},
            {"from": "node2", "to": "node3"}
        ]
    }));

    // First run to build real checkpoint state, failing nothing.
    let first = execute_workflow(&workflow, Map::new(), &registry, ExecutionOptions::default());
    assert!(first.success);

    // Drop node3 from the checkpoint to simulate a failure there.
    let mut resume_state = first.shared_after.clone();
    resume_state
        .execution_mut()
        .completed_nodes
        .retain(|id| id != "node3");
    resume_state.execution_mut().failed_node = Some("node3".into());

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let result = execute_workflow(
        &workflow,
        Map::new(),
        &registry,
        ExecutionOptions {
            resume_state: Some(resume_state),
            progress: Some(Arc::new(move |node_id, event, _, _| {
                sink.lock().unwrap().push((node_id.to_string(), event));
            })),
            ..Default::default()
        },
    );
    assert!(result.success);

    let events = events.lock().unwrap();
    assert!(events.contains(&("node1".to_string(), ProgressEvent::NodeCached)));
    assert!(events.contains(&("node2".to_string(), ProgressEvent::NodeCached)));
    assert!(events.contains(&("node3".to_string(), ProgressEvent::NodeStart)));
    assert!(events.contains(&("node3".to_string(), ProgressEvent::NodeComplete)));
    assert!(!events.contains(&("node3".to_string(), ProgressEvent::NodeCached)));
}

#[test]
fn rerunning_a_successful_state_is_fully_cached() {
    let counter = Arc::new(Mutex::new(0));
    let registry = counting_registry(&counter);

    let workflow = ir(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "a", "type": "counting", "params": {}},
            {"id": "b", "type": "counting", "params": {}}
        ],
        "edges": [{"from": "a", "to": "b"}]
    }));

    let first = execute_workflow(&workflow, Map::new(), &registry, ExecutionOptions::default());
    assert!(first.success);
    assert_eq!(*counter.lock().unwrap(), 2);
    let state_snapshot = first.shared_after.to_value();

    let second = execute_workflow(
        &workflow,
        Map::new(),
        &registry,
        ExecutionOptions {
            resume_state: Some(first.shared_after),
            ..Default::default()
        },
    );

    assert!(second.success);
    assert_eq!(*counter.lock().unwrap(), 2, "nothing re-executed");
    assert!(second.steps.iter().all(|s| s.cached));
    assert_eq!(
        second.shared_after.to_value(),
        state_snapshot,
        "re-running a successful state reproduces it"
    );
}

#[test]
fn checkpoint_survives_json_round_trip() {
    let counter = Arc::new(Mutex::new(0));
    let registry = counting_registry(&counter);

    let workflow = ir(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "a", "type": "counting", "params": {}},
            {"id": "b", "type": "fail", "params": {"message": "stop here"}}
        ],
        "edges": [{"from": "a", "to": "b"}]
    }));

    let failed = execute_workflow(&workflow, Map::new(), &registry, ExecutionOptions::default());
    assert!(!failed.success);

    // Persist anywhere JSON goes, restore, and resume with the failing node
    // fixed by pointing the registry's `fail` at a working type instead.
    let persisted = serde_json::to_string(&failed.shared_after.to_value()).unwrap();
    let restored = SharedState::from_value(serde_json::from_str(&persisted).unwrap()).unwrap();
    assert!(restored.execution().is_completed("a"));
    assert_eq!(restored.execution().failed_node.as_deref(), Some("b"));

    let fixed = ir(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "a", "type": "counting", "params": {}},
            {"id": "b", "type": "counting", "params": {}}
        ],
        "edges": [{"from": "a", "to": "b"}]
    }));
    let resumed = execute_workflow(
        &fixed,
        Map::new(),
        &registry,
        ExecutionOptions {
            resume_state: Some(restored),
            ..Default::default()
        },
    );
    assert!(resumed.success);
    assert_eq!(*counter.lock().unwrap(), 2, "a ran once, b ran once");
}
