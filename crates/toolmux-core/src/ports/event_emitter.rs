//! Event emitter port.

#[cfg(any(test, feature = "test-utils"))]
use std::sync::{Arc, Mutex};

use crate::events::ManagerEvent;

/// Sink for [`ManagerEvent`]s.
///
/// `emit` must not block; it is called while the connection registry is
/// locked.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: ManagerEvent);
}

/// Discards every event. Used by the CLI and by tests that do not observe
/// events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    pub const fn new() -> Self {
        Self
    }
}

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: ManagerEvent) {}
}

/// Keeps every emitted event in memory, in order.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Default)]
pub struct RecordingEmitter {
    events: Arc<Mutex<Vec<ManagerEvent>>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<ManagerEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl EventEmitter for RecordingEmitter {
    fn emit(&self, event: ManagerEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
