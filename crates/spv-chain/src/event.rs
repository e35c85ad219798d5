//! Chain events and the sink they are pushed into.
//!
//! The engine publishes through a channel-style sink rather than a
//! registered listener set: implementations may queue, forward, or
//! handle events inline. Sinks run synchronously on the ingesting
//! thread after the store is consistent, must not reenter the engine,
//! and cannot roll anything back.

use parking_lot::Mutex;
use spv_core::StoredBlock;

/// Something the best chain did.
#[derive(Clone, Debug)]
pub enum ChainEvent {
    /// The best chain grew by one block.
    NewBestBlock(StoredBlock),

    /// The best chain switched to a heavier fork.
    Reorganize {
        /// Tip that was abandoned.
        old_head: StoredBlock,
        /// Tip that took over.
        new_head: StoredBlock,
        /// Blocks leaving the best chain, highest first.
        disconnected: Vec<StoredBlock>,
        /// Blocks joining the best chain, lowest first.
        connected: Vec<StoredBlock>,
    },
}

/// Receives chain events.
pub trait ChainEventSink: Send + Sync {
    /// Accept one event. Must not block for long and must not call back
    /// into the engine.
    fn push(&self, event: ChainEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ChainEventSink for NullSink {
    fn push(&self, _event: ChainEvent) {}
}

/// Buffers events in order; useful for tests and polling consumers.
#[derive(Default)]
pub struct VecSink {
    events: Mutex<Vec<ChainEvent>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything pushed so far.
    pub fn events(&self) -> Vec<ChainEvent> {
        self.events.lock().clone()
    }

    /// Take everything pushed so far, leaving the sink empty.
    pub fn drain(&self) -> Vec<ChainEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl ChainEventSink for VecSink {
    fn push(&self, event: ChainEvent) {
        self.events.lock().push(event);
    }
}
