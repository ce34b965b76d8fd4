// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Typed progress events emitted during a run.
//!
//! Events travel over an unbounded mpsc channel; the sink silently drops
//! events when nobody is listening so headless runs pay nothing for
//! progress reporting.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::graph::{FlowId, NodeId, NodeState};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        flow_id: FlowId,
        node_count: usize,
    },
    NodeStarted {
        node_id: NodeId,
    },
    /// Forwarded from worker progress frames, 0..=100.
    NodeProgress {
        node_id: NodeId,
        progress: u8,
    },
    NodeFinished {
        node_id: NodeId,
        state: NodeState,
        was_cached: bool,
    },
    RunFinished {
        flow_id: FlowId,
        success: bool,
    },
}

pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

/// Cloneable sending half; a disconnected or absent receiver is fine.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sender: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn channel() -> (Self, ProgressReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_flow_through_channel() {
        let (sink, mut receiver) = ProgressSink::channel();
        sink.emit(ProgressEvent::NodeStarted { node_id: 1 });
        sink.emit(ProgressEvent::NodeProgress {
            node_id: 1,
            progress: 50,
        });
        drop(sink);

        assert!(matches!(
            receiver.recv().await,
            Some(ProgressEvent::NodeStarted { node_id: 1 })
        ));
        assert!(matches!(
            receiver.recv().await,
            Some(ProgressEvent::NodeProgress { progress: 50, .. })
        ));
        assert!(receiver.recv().await.is_none());
    }

    #[test]
    fn disabled_sink_swallows_events() {
        let sink = ProgressSink::disabled();
        sink.emit(ProgressEvent::RunFinished {
            flow_id: 1,
            success: true,
        });
    }
}
