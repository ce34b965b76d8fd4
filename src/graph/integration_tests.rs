// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Integration tests for graph mutations, invariants and fingerprints.

use serde_json::json;

use crate::config::FlowSettings;
use crate::errors::GraphError;
use crate::graph::{
    FlowGraph, InputSlot, NodeKind, NodePromise, NodeSettings, SetSettingsError,
};

fn promise(node_id: i64, kind: NodeKind) -> NodePromise {
    NodePromise {
        node_id,
        kind,
        position_x: 0.0,
        position_y: 0.0,
        description: String::new(),
    }
}

fn graph() -> FlowGraph {
    FlowGraph::new(1, "test-flow", FlowSettings::default())
}

fn manual_input(rows: serde_json::Value) -> NodeSettings {
    NodeSettings::from_value(NodeKind::ManualInput, json!({ "data": rows })).unwrap()
}

fn filter(predicate: &str) -> NodeSettings {
    NodeSettings::from_value(NodeKind::Filter, json!({ "predicate": predicate })).unwrap()
}

fn formula(column: &str, expression: &str) -> NodeSettings {
    NodeSettings::from_value(
        NodeKind::Formula,
        json!({ "column": column, "expression": expression }),
    )
    .unwrap()
}

/// Build the canonical chain manual_input -> filter -> formula.
fn chain() -> FlowGraph {
    let mut g = graph();
    g.add_node(promise(1, NodeKind::ManualInput)).unwrap();
    g.add_node(promise(2, NodeKind::Filter)).unwrap();
    g.add_node(promise(3, NodeKind::Formula)).unwrap();
    g.set_node_settings(1, manual_input(json!([{"a": 1}, {"a": 2}, {"a": 3}])))
        .unwrap();
    g.set_node_settings(2, filter("a > 1")).unwrap();
    g.set_node_settings(3, formula("b", "a * 2")).unwrap();
    g.connect(1, 2, InputSlot::Main).unwrap();
    g.connect(2, 3, InputSlot::Main).unwrap();
    g
}

#[test]
fn chain_is_correct_and_fingerprinted() {
    let g = chain();
    for id in [1, 2, 3] {
        let node = g.node(id).unwrap();
        assert!(node.is_correct, "node {id} should be correct");
        assert!(node.fingerprint.is_some(), "node {id} should have a fingerprint");
    }
}

#[test]
fn cycle_rejected_and_graph_unchanged() {
    let mut g = chain();
    let edges_before = g.edges().to_vec();

    let err = g.connect(3, 1, InputSlot::Main).unwrap_err();
    assert!(matches!(err, GraphError::CycleDetected { from: 3, to: 1 }));

    // The failed mutation left no trace.
    assert_eq!(g.edges(), edges_before.as_slice());
    assert!(g.node(3).unwrap().is_correct);
}

#[test]
fn self_loop_rejected() {
    let mut g = chain();
    let err = g.connect(2, 2, InputSlot::Main).unwrap_err();
    assert!(matches!(err, GraphError::CycleDetected { .. }));
}

#[test]
fn single_main_slot_fills_up() {
    let mut g = graph();
    g.add_node(promise(1, NodeKind::ManualInput)).unwrap();
    g.add_node(promise(2, NodeKind::ManualInput)).unwrap();
    g.add_node(promise(3, NodeKind::Filter)).unwrap();
    g.connect(1, 3, InputSlot::Main).unwrap();
    let err = g.connect(2, 3, InputSlot::Main).unwrap_err();
    assert!(matches!(
        err,
        GraphError::SlotOccupied { node: 3, slot: InputSlot::Main }
    ));
}

#[test]
fn join_takes_left_and_right_once_each() {
    let mut g = graph();
    g.add_node(promise(1, NodeKind::ManualInput)).unwrap();
    g.add_node(promise(2, NodeKind::ManualInput)).unwrap();
    g.add_node(promise(3, NodeKind::ManualInput)).unwrap();
    g.add_node(promise(4, NodeKind::Join)).unwrap();

    g.connect(1, 4, InputSlot::Left).unwrap();
    g.connect(2, 4, InputSlot::Right).unwrap();

    let err = g.connect(3, 4, InputSlot::Left).unwrap_err();
    assert!(matches!(err, GraphError::SlotOccupied { .. }));
    let err = g.connect(3, 4, InputSlot::Main).unwrap_err();
    assert!(matches!(err, GraphError::ShapeMismatch { .. }));
}

#[test]
fn union_accepts_many_main_inputs() {
    let mut g = graph();
    for id in 1..=3 {
        g.add_node(promise(id, NodeKind::ManualInput)).unwrap();
        g.set_node_settings(id, manual_input(json!([{"a": 1}]))).unwrap();
    }
    g.add_node(promise(4, NodeKind::Union)).unwrap();
    g.set_node_settings(4, NodeSettings::from_value(NodeKind::Union, json!({})).unwrap())
        .unwrap();
    for id in 1..=3 {
        g.connect(id, 4, InputSlot::Main).unwrap();
    }
    assert!(g.node(4).unwrap().is_correct);
    assert_eq!(g.predecessors(4).len(), 3);
}

#[test]
fn settings_edit_changes_only_downstream_fingerprints() {
    let mut g = chain();
    let fp_input = g.node(1).unwrap().fingerprint.unwrap();
    let fp_filter = g.node(2).unwrap().fingerprint.unwrap();
    let fp_formula = g.node(3).unwrap().fingerprint.unwrap();

    g.set_node_settings(2, filter("a > 2")).unwrap();

    assert_eq!(g.node(1).unwrap().fingerprint.unwrap(), fp_input);
    assert_ne!(g.node(2).unwrap().fingerprint.unwrap(), fp_filter);
    assert_ne!(g.node(3).unwrap().fingerprint.unwrap(), fp_formula);

    let invalidated = g.take_invalidated();
    assert!(invalidated.contains(&fp_filter));
    assert!(invalidated.contains(&fp_formula));
    assert!(!invalidated.contains(&fp_input));
}

#[test]
fn invalid_settings_leave_previous_in_place() {
    let mut g = chain();
    let fp_before = g.node(2).unwrap().fingerprint.unwrap();

    let err = g
        .set_node_settings(2, NodeSettings::Filter(crate::graph::FilterSettings {
            predicate: "  ".to_string(),
        }))
        .unwrap_err();
    assert!(matches!(err, SetSettingsError::Invalid(_)));

    let node = g.node(2).unwrap();
    assert!(node.is_correct);
    assert_eq!(node.fingerprint.unwrap(), fp_before);
}

#[test]
fn kind_mismatch_rejected() {
    let mut g = chain();
    let err = g.set_node_settings(2, formula("x", "1")).unwrap_err();
    assert!(matches!(
        err,
        SetSettingsError::Graph(GraphError::KindMismatch { .. })
    ));
}

#[test]
fn delete_node_detaches_edges_and_breaks_downstream() {
    let mut g = chain();
    g.delete_node(2).unwrap();

    assert!(g.node(2).is_none());
    assert!(g.edges().iter().all(|e| e.from != 2 && e.to != 2));

    // The formula node lost its required input.
    let formula_node = g.node(3).unwrap();
    assert!(!formula_node.is_correct);
    assert!(formula_node.fingerprint.is_none());
}

#[test]
fn disconnect_breaks_correctness() {
    let mut g = chain();
    g.disconnect(1, 2, InputSlot::Main).unwrap();
    assert!(!g.node(2).unwrap().is_correct);
    assert!(!g.node(3).unwrap().is_correct);
    // Reconnecting restores it.
    g.connect(1, 2, InputSlot::Main).unwrap();
    assert!(g.node(3).unwrap().is_correct);
}

#[test]
fn fingerprint_restored_after_revert() {
    let mut g = chain();
    let fp_before = g.node(3).unwrap().fingerprint.unwrap();
    g.set_node_settings(2, filter("a > 2")).unwrap();
    g.set_node_settings(2, filter("a > 1")).unwrap();
    assert_eq!(g.node(3).unwrap().fingerprint.unwrap(), fp_before);
}

#[test]
fn fingerprints_do_not_depend_on_insertion_order() {
    let build = |ids: [i64; 3]| {
        let mut g = graph();
        // Insert nodes in the given order but keep identical wiring.
        for id in ids {
            let kind = match id {
                1 => NodeKind::ManualInput,
                2 => NodeKind::Filter,
                _ => NodeKind::Formula,
            };
            g.add_node(promise(id, kind)).unwrap();
        }
        g.set_node_settings(1, manual_input(json!([{"a": 1}]))).unwrap();
        g.set_node_settings(2, filter("a > 1")).unwrap();
        g.set_node_settings(3, formula("b", "a * 2")).unwrap();
        g.connect(1, 2, InputSlot::Main).unwrap();
        g.connect(2, 3, InputSlot::Main).unwrap();
        g.node(3).unwrap().fingerprint.unwrap()
    };

    assert_eq!(build([1, 2, 3]), build([3, 1, 2]));
}

#[test]
fn topological_roots_and_leads_to() {
    let g = chain();
    assert_eq!(g.topological_roots(), vec![1]);
    assert_eq!(g.leads_to(1), vec![2, 3]);
    assert_eq!(g.leads_to(3), Vec::<i64>::new());
    assert_eq!(g.upstream_of(3), vec![1, 2]);
}

#[test]
fn duplicate_node_id_rejected() {
    let mut g = graph();
    g.add_node(promise(1, NodeKind::ManualInput)).unwrap();
    let err = g.add_node(promise(1, NodeKind::Filter)).unwrap_err();
    assert!(matches!(err, GraphError::NodeIdTaken(1)));
}

#[test]
fn unconfigured_node_is_incorrect() {
    let mut g = graph();
    g.add_node(promise(1, NodeKind::Filter)).unwrap();
    assert!(!g.node(1).unwrap().is_correct);
}
