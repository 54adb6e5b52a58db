//! Server config stores for toolmux.
//!
//! Both stores implement [`ServerConfigRepository`](toolmux_core::ServerConfigRepository)
//! on top of the same in-memory [`catalog`]:
//!
//! - [`JsonFileServerRepository`]: persists to `servers.json`
//! - [`MemoryServerRepository`]: nothing leaves the process

#![deny(unsafe_code)]

mod catalog;
mod json_file;
mod memory;

pub use json_file::JsonFileServerRepository;
pub use memory::MemoryServerRepository;
