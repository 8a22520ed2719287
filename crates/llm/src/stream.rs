//! Cooperative chunk streaming.
//!
//! Downstream HTTP/SSE bridging is external; the engine only pushes text
//! chunks into a [`ChunkSink`]. Sinks must never block the generation task,
//! so both implementations here are lossy under back-pressure.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::warn;

/// Non-blocking sink for streamed LLM text.
pub trait ChunkSink: Send + Sync {
    fn on_chunk(&self, text: &str);
}

/// Forwards chunks into a tokio channel, dropping when the consumer lags.
pub struct MpscChunkSink {
    tx: mpsc::Sender<String>,
}

impl MpscChunkSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }
}

impl ChunkSink for MpscChunkSink {
    fn on_chunk(&self, text: &str) {
        if self.tx.try_send(text.to_string()).is_err() {
            warn!(len = text.len(), "chunk consumer lagging, dropping streamed chunk");
        }
    }
}

/// Bounded in-memory relay: newest chunks win, oldest are dropped.
///
/// Capacity 64 per the streaming contract. The generation side pushes via
/// [`ChunkSink::on_chunk`]; a UI bridge drains with [`ChunkRelay::drain`].
pub struct ChunkRelay {
    buffer: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl ChunkRelay {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn drain(&self) -> Vec<String> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ChunkRelay {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl ChunkSink for ChunkRelay {
    fn on_chunk(&self, text: &str) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if buffer.len() == self.capacity {
            buffer.pop_front();
            warn!(capacity = self.capacity, "chunk relay full, dropping oldest chunk");
        }
        buffer.push_back(text.to_string());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_keeps_newest_chunks_when_full() {
        let relay = ChunkRelay::new(3);
        for i in 0..5 {
            relay.on_chunk(&format!("c{i}"));
        }
        assert_eq!(relay.drain(), vec!["c2", "c3", "c4"]);
        assert!(relay.is_empty());
    }

    #[test]
    fn mpsc_sink_drops_without_blocking_when_channel_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = MpscChunkSink::new(tx);
        sink.on_chunk("first");
        sink.on_chunk("dropped");
        assert_eq!(rx.try_recv().unwrap(), "first");
        assert!(rx.try_recv().is_err());
    }
}
