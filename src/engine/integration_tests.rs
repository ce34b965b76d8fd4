// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! End-to-end scheduler scenarios: caching across runs, parallel wall
//! clock, failure propagation, cancellation, timeouts and the
//! at-most-one-build guarantee.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::cache::ResultCache;
use crate::config::{ExecutionMode, FlowSettings};
use crate::errors::ExecutionError;
use crate::graph::{
    FlowGraph, InputSlot, Node, NodeKind, NodePromise, NodeSettings, NodeState,
};

use super::progress::ProgressSink;
use super::stubs::{stub_registry, FailingTransform, SleepTransform, StubTransform};
use super::transform::{NodeInputs, NodeTransform, TransformOutput, TransformRegistry};
use super::{ExecutionContext, FlowRunner, RunInformation, SkipCause};

fn promise(node_id: i64, kind: NodeKind) -> NodePromise {
    NodePromise {
        node_id,
        kind,
        position_x: 0.0,
        position_y: 0.0,
        description: String::new(),
    }
}

fn settings(kind: NodeKind, value: serde_json::Value) -> NodeSettings {
    NodeSettings::from_value(kind, value).unwrap()
}

/// manual_input([{a:1},{a:2},{a:3}]) -> filter(a>1) -> formula(b = a*2)
fn linear_chain(flow_id: i64) -> FlowGraph {
    let mut g = FlowGraph::new(flow_id, "chain", FlowSettings::default());
    g.add_node(promise(1, NodeKind::ManualInput)).unwrap();
    g.add_node(promise(2, NodeKind::Filter)).unwrap();
    g.add_node(promise(3, NodeKind::Formula)).unwrap();
    g.set_node_settings(
        1,
        settings(NodeKind::ManualInput, json!({"data": [{"a": 1}, {"a": 2}, {"a": 3}]})),
    )
    .unwrap();
    g.set_node_settings(2, settings(NodeKind::Filter, json!({"predicate": "a > 1"})))
        .unwrap();
    g.set_node_settings(
        3,
        settings(NodeKind::Formula, json!({"column": "b", "expression": "a * 2"})),
    )
    .unwrap();
    g.connect(1, 2, InputSlot::Main).unwrap();
    g.connect(2, 3, InputSlot::Main).unwrap();
    g
}

fn runner_with(registry: TransformRegistry, dir: &std::path::Path, flow_id: i64) -> FlowRunner {
    FlowRunner::new(
        Arc::new(ResultCache::new(dir, flow_id)),
        Arc::new(registry),
    )
}

async fn run(runner: &FlowRunner, graph: &mut FlowGraph) -> RunInformation {
    runner
        .run(graph, &[], CancellationToken::new(), ProgressSink::disabled())
        .await
        .unwrap()
}

#[tokio::test]
async fn empty_graph_runs_successfully() {
    let dir = tempfile::tempdir().unwrap();
    let mut g = FlowGraph::new(1, "empty", FlowSettings::default());
    let runner = runner_with(stub_registry(), dir.path(), 1);

    let info = run(&runner, &mut g).await;
    assert!(info.success);
    assert_eq!(info.nodes_completed, 0);
    assert!(info.node_results.is_empty());
}

#[tokio::test]
async fn linear_chain_caches_on_second_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut g = linear_chain(1);
    let runner = runner_with(stub_registry(), dir.path(), 1);

    // First run executes everything.
    let first = run(&runner, &mut g).await;
    assert!(first.success);
    assert_eq!(first.nodes_completed, 3);
    assert!(first.node_results.iter().all(|r| !r.was_cached));

    // Second run: identical fingerprints, 100% cache hits.
    let second = run(&runner, &mut g).await;
    assert!(second.success);
    assert_eq!(second.nodes_completed, 3);
    assert!(second.node_results.iter().all(|r| r.was_cached));

    // Edit the filter: its fingerprint and the formula's change, the
    // input's does not.
    let fp_input = g.node(1).unwrap().fingerprint.unwrap();
    g.set_node_settings(2, settings(NodeKind::Filter, json!({"predicate": "a > 2"})))
        .unwrap();
    assert_eq!(g.node(1).unwrap().fingerprint.unwrap(), fp_input);

    let third = run(&runner, &mut g).await;
    assert!(third.success);
    let cached: HashMap<i64, bool> = third
        .node_results
        .iter()
        .map(|r| (r.node_id, r.was_cached))
        .collect();
    assert_eq!(cached[&1], true);
    assert_eq!(cached[&2], false);
    assert_eq!(cached[&3], false);
}

#[tokio::test(start_paused = false)]
async fn diamond_runs_middle_nodes_in_parallel() {
    let dir = tempfile::tempdir().unwrap();
    let mut g = FlowGraph::new(1, "diamond", FlowSettings::default());
    g.settings_mut().max_parallel_workers = 2;

    g.add_node(promise(1, NodeKind::ManualInput)).unwrap();
    g.add_node(promise(2, NodeKind::Filter)).unwrap();
    g.add_node(promise(3, NodeKind::Filter)).unwrap();
    g.add_node(promise(4, NodeKind::Union)).unwrap();
    g.set_node_settings(1, settings(NodeKind::ManualInput, json!({"data": [{"a": 1}]})))
        .unwrap();
    g.set_node_settings(2, settings(NodeKind::Filter, json!({"predicate": "a > 0"})))
        .unwrap();
    g.set_node_settings(3, settings(NodeKind::Filter, json!({"predicate": "a < 9"})))
        .unwrap();
    g.set_node_settings(4, settings(NodeKind::Union, json!({}))).unwrap();
    g.connect(1, 2, InputSlot::Main).unwrap();
    g.connect(1, 3, InputSlot::Main).unwrap();
    g.connect(2, 4, InputSlot::Main).unwrap();
    g.connect(3, 4, InputSlot::Main).unwrap();

    // Both middle nodes sleep; with two workers they overlap.
    let mut registry = stub_registry();
    registry.register(
        NodeKind::Filter,
        Arc::new(SleepTransform::new(Duration::from_millis(300))),
    );
    let runner = runner_with(registry, dir.path(), 1);

    let started = Instant::now();
    let info = run(&runner, &mut g).await;
    let elapsed = started.elapsed();

    assert!(info.success);
    assert_eq!(info.nodes_completed, 4);
    // Sequential would be >= 600ms of sleeping alone.
    assert!(
        elapsed < Duration::from_millis(550),
        "expected parallel execution, took {elapsed:?}"
    );
}

#[tokio::test]
async fn single_worker_degrades_to_sequential_stage_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut g = linear_chain(1);
    g.settings_mut().max_parallel_workers = 1;

    // Record execution order through a wrapping transform.
    #[derive(Clone)]
    struct Recording {
        order: Arc<Mutex<Vec<i64>>>,
    }

    #[async_trait]
    impl NodeTransform for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn run(
            &self,
            ctx: &ExecutionContext,
            node: &Node,
            inputs: &NodeInputs,
        ) -> Result<TransformOutput, ExecutionError> {
            self.order.lock().unwrap().push(node.node_id);
            StubTransform.run(ctx, node, inputs).await
        }
    }

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut registry = TransformRegistry::with_builtins();
    for kind in [NodeKind::ManualInput, NodeKind::Filter, NodeKind::Formula] {
        registry.register(kind, Arc::new(Recording { order: Arc::clone(&order) }));
    }
    let runner = runner_with(registry, dir.path(), 1);

    let info = run(&runner, &mut g).await;
    assert!(info.success);
    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn failed_node_skips_descendants_with_cause() {
    let dir = tempfile::tempdir().unwrap();
    let mut g = FlowGraph::new(1, "fail-chain", FlowSettings::default());
    for (id, kind) in [
        (1, NodeKind::ManualInput),
        (2, NodeKind::Filter),
        (3, NodeKind::Formula),
        (4, NodeKind::Sort),
    ] {
        g.add_node(promise(id, kind)).unwrap();
    }
    g.set_node_settings(1, settings(NodeKind::ManualInput, json!({"data": [{"a": 1}]})))
        .unwrap();
    g.set_node_settings(2, settings(NodeKind::Filter, json!({"predicate": "missing > 1"})))
        .unwrap();
    g.set_node_settings(
        3,
        settings(NodeKind::Formula, json!({"column": "b", "expression": "a"})),
    )
    .unwrap();
    g.set_node_settings(
        4,
        settings(NodeKind::Sort, json!({"by": [{"column": "b"}]})),
    )
    .unwrap();
    g.connect(1, 2, InputSlot::Main).unwrap();
    g.connect(2, 3, InputSlot::Main).unwrap();
    g.connect(3, 4, InputSlot::Main).unwrap();

    let mut registry = stub_registry();
    registry.register(
        NodeKind::Filter,
        Arc::new(FailingTransform::new("column 'missing' not found")),
    );
    let runner = runner_with(registry, dir.path(), 1);

    let info = run(&runner, &mut g).await;
    assert!(!info.success);
    assert_eq!(info.nodes_completed, 1);

    assert_eq!(info.result_for(1).unwrap().state, NodeState::Done);
    let failed = info.result_for(2).unwrap();
    assert_eq!(failed.state, NodeState::Failed);
    assert!(failed.error.as_ref().unwrap().contains("missing"));

    for id in [3, 4] {
        let skipped = info.result_for(id).unwrap();
        assert_eq!(skipped.state, NodeState::Skipped);
        assert_eq!(skipped.skip_cause, Some(SkipCause::UpstreamFailed));
        assert_eq!(skipped.caused_by, Some(2));
        assert!(skipped.error.as_ref().unwrap().contains("node 2"));
    }

    // Graph transient state mirrors the summary.
    assert_eq!(g.node(2).unwrap().state, NodeState::Failed);
    assert_eq!(g.node(4).unwrap().state, NodeState::Skipped);
}

#[tokio::test]
async fn invalid_node_skipped_and_run_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let mut g = FlowGraph::new(1, "invalid", FlowSettings::default());
    g.add_node(promise(7, NodeKind::Filter)).unwrap(); // never configured
    let runner = runner_with(stub_registry(), dir.path(), 1);

    let info = run(&runner, &mut g).await;
    assert!(info.success);
    assert_eq!(info.nodes_completed, 0);
    let skipped = info.result_for(7).unwrap();
    assert_eq!(skipped.state, NodeState::Skipped);
    assert_eq!(skipped.skip_cause, Some(SkipCause::InvalidSettings));
}

#[tokio::test]
async fn cancellation_skips_pending_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let mut g = linear_chain(1);

    let mut registry = stub_registry();
    registry.register(
        NodeKind::ManualInput,
        Arc::new(SleepTransform::new(Duration::from_secs(5))),
    );
    let runner = runner_with(registry, dir.path(), 1);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let info = runner
        .run(&mut g, &[], cancel, ProgressSink::disabled())
        .await
        .unwrap();

    assert!(!info.success);
    assert!(info.cancelled);
    assert_eq!(info.nodes_completed, 0);
    for result in &info.node_results {
        assert_eq!(result.state, NodeState::Skipped);
        assert_eq!(result.skip_cause, Some(SkipCause::Cancelled));
    }
}

#[tokio::test]
async fn node_timeout_fails_run_unless_optional() {
    let dir = tempfile::tempdir().unwrap();
    let mut g = linear_chain(1);
    g.node_mut(2).unwrap().timeout_seconds = Some(1);

    let mut registry = stub_registry();
    registry.register(
        NodeKind::Filter,
        Arc::new(SleepTransform::new(Duration::from_millis(1500))),
    );
    let runner = runner_with(registry, dir.path(), 1);

    let info = run(&runner, &mut g).await;
    assert!(!info.success);
    let timed_out = info.result_for(2).unwrap();
    assert_eq!(timed_out.state, NodeState::Failed);
    assert_eq!(timed_out.error_kind.as_deref(), Some("timeout"));
    assert_eq!(info.result_for(3).unwrap().state, NodeState::Skipped);
}

#[tokio::test]
async fn optional_node_timeout_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let mut g = linear_chain(1);
    {
        let node = g.node_mut(2).unwrap();
        node.timeout_seconds = Some(1);
        node.optional = true;
        node.cache_results = false;
    }

    let mut registry = stub_registry();
    registry.register(
        NodeKind::Filter,
        Arc::new(SleepTransform::new(Duration::from_millis(1500))),
    );
    let runner = runner_with(registry, dir.path(), 1);

    let info = run(&runner, &mut g).await;
    // The optional node failed, its descendants are skipped, but the run
    // itself is not poisoned.
    assert!(info.success);
    assert_eq!(info.result_for(2).unwrap().state, NodeState::Failed);
    assert_eq!(info.result_for(3).unwrap().state, NodeState::Skipped);
}

#[tokio::test]
async fn run_deadline_cancels_and_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut g = linear_chain(1);
    g.settings_mut().run_deadline_seconds = Some(1);

    let mut registry = stub_registry();
    registry.register(
        NodeKind::ManualInput,
        Arc::new(SleepTransform::new(Duration::from_secs(10))),
    );
    let runner = runner_with(registry, dir.path(), 1);

    let started = Instant::now();
    let info = run(&runner, &mut g).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!info.success);
    assert!(!info.cancelled, "deadline expiry is a failure, not a user cancel");
}

#[tokio::test]
async fn concurrent_runs_build_each_fingerprint_once() {
    let dir = tempfile::tempdir().unwrap();

    struct Counting {
        builds: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NodeTransform for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(
            &self,
            ctx: &ExecutionContext,
            node: &Node,
            inputs: &NodeInputs,
        ) -> Result<TransformOutput, ExecutionError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            // Make the build slow enough that both runs contend.
            tokio::time::sleep(Duration::from_millis(100)).await;
            StubTransform.run(ctx, node, inputs).await
        }
    }

    let builds = Arc::new(AtomicUsize::new(0));
    let mut registry = TransformRegistry::with_builtins();
    for kind in [NodeKind::ManualInput, NodeKind::Filter, NodeKind::Formula] {
        registry.register(kind, Arc::new(Counting { builds: Arc::clone(&builds) }));
    }

    // Two runs of the same flow share cache, locks and registry.
    let runner = Arc::new(runner_with(registry, dir.path(), 1));
    let mut graph_a = linear_chain(1);
    let mut graph_b = linear_chain(1);

    let runner_a = Arc::clone(&runner);
    let runner_b = Arc::clone(&runner);
    let (info_a, info_b) = tokio::join!(
        async move {
            runner_a
                .run(&mut graph_a, &[], CancellationToken::new(), ProgressSink::disabled())
                .await
                .unwrap()
        },
        async move {
            runner_b
                .run(&mut graph_b, &[], CancellationToken::new(), ProgressSink::disabled())
                .await
                .unwrap()
        }
    );

    assert!(info_a.success && info_b.success);
    // Three fingerprints, each built at most once across both runs.
    assert_eq!(builds.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn performance_mode_stays_lazy() {
    let dir = tempfile::tempdir().unwrap();
    let mut g = linear_chain(1);
    g.settings_mut().execution_mode = ExecutionMode::Performance;
    let runner = runner_with(stub_registry(), dir.path(), 1);

    let info = run(&runner, &mut g).await;
    assert!(info.success);
    // Nothing materialised: the flow cache directory was never created.
    assert!(!runner.cache().flow_dir().exists());
}

#[tokio::test]
async fn flow_starts_limit_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut g = FlowGraph::new(1, "starts", FlowSettings::default());
    for id in [1, 2] {
        g.add_node(promise(id, NodeKind::ManualInput)).unwrap();
        g.set_node_settings(
            id,
            settings(NodeKind::ManualInput, json!({"data": [{"a": 1}]})),
        )
        .unwrap();
    }
    let runner = runner_with(stub_registry(), dir.path(), 1);

    let info = runner
        .run(&mut g, &[1], CancellationToken::new(), ProgressSink::disabled())
        .await
        .unwrap();
    assert!(info.success);
    assert_eq!(info.nodes_completed, 1);
    assert_eq!(
        info.result_for(2).unwrap().skip_cause,
        Some(SkipCause::Unreachable)
    );
}
