//! Observational progress events for live consumers.
//!
//! Emitted over a broadcast channel in pipeline order; nothing in the
//! pipeline ever reads them back.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::store::AgentStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArenaEvent {
    PhaseStarted {
        context_id: String,
        phase: u8,
    },
    PhaseCompleted {
        context_id: String,
        phase: u8,
    },
    AgentStarted {
        context_id: String,
        agent: String,
    },
    AgentCompleted {
        context_id: String,
        agent: String,
        status: AgentStatus,
    },
    VoteRecorded {
        context_id: String,
        voter: String,
        approvals: usize,
        rejections: usize,
    },
    DecisionAdopted {
        context_id: String,
        winner_result_id: String,
        net_score: i64,
    },
}

/// Thin wrapper so emitting with zero subscribers is not an error.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: broadcast::Sender<ArenaEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArenaEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ArenaEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let sink = EventSink::new(16);
        sink.emit(ArenaEvent::PhaseStarted {
            context_id: "ctx".into(),
            phase: 1,
        });
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let sink = EventSink::new(16);
        let mut rx = sink.subscribe();
        sink.emit(ArenaEvent::PhaseStarted {
            context_id: "ctx".into(),
            phase: 1,
        });
        sink.emit(ArenaEvent::PhaseCompleted {
            context_id: "ctx".into(),
            phase: 1,
        });
        assert!(matches!(
            rx.recv().await.unwrap(),
            ArenaEvent::PhaseStarted { phase: 1, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ArenaEvent::PhaseCompleted { phase: 1, .. }
        ));
    }
}
