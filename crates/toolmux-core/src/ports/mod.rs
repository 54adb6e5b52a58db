//! Port definitions (traits) implemented by adapter crates.

mod event_emitter;
mod server_repository;

#[cfg(any(test, feature = "test-utils"))]
pub use event_emitter::RecordingEmitter;
pub use event_emitter::{EventEmitter, NoopEmitter};
pub use server_repository::{RepositoryError, ServerConfigRepository};
