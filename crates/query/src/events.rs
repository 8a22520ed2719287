//! Progress events streamed to whatever UI is attached.
//!
//! Emission is non-blocking by contract: when no consumer is attached (or a
//! channel is full) events are dropped, never awaited on.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepStatus {
    Started,
    Complete,
    Failed,
}

/// Compact partition description carried by `pgs_routed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedPartition {
    pub id: String,
    pub node_count: usize,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        message: String,
    },
    PgsInit {
        total_nodes: usize,
        total_edges: usize,
    },
    PgsPhase {
        phase: String,
        phase_index: usize,
        total_phases: usize,
        message: String,
    },
    PgsRouted {
        partitions: Vec<RoutedPartition>,
        total_partitions: usize,
    },
    PgsSweepProgress {
        partition_index: usize,
        total: usize,
        status: SweepStatus,
    },
    PgsSession {
        mode: String,
        session_id: String,
        searched: usize,
        remaining: usize,
        total: usize,
        sweeping: usize,
    },
    PgsSessionUpdated {
        session_id: String,
        searched: usize,
    },
    Result {
        answer: String,
        metadata: serde_json::Value,
    },
    Error {
        message: String,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink for headless runs.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events into a tokio channel, dropping when the consumer lags.
pub struct ChannelEventSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: ProgressEvent) {
        if self.tx.try_send(event).is_err() {
            debug!("event consumer lagging, dropping progress event");
        }
    }
}


// ── Tests ─────────────────────────────────────────────────────────────────────
