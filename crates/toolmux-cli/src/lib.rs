//! `toolmux` command-line front-end.
//!
//! [`bootstrap`] wires the JSON config store, environment resolver, session
//! factory and connection manager together; [`handlers`] run one command
//! each against the resulting [`CliContext`].

#![deny(unsafe_code)]

pub mod bootstrap;
pub mod commands;
pub mod error;
pub mod handlers;
pub mod parser;
pub mod presentation;

pub use bootstrap::{CliConfig, CliContext, bootstrap};
pub use commands::{Commands, ServersCommand};
pub use error::CliError;
pub use parser::Cli;
