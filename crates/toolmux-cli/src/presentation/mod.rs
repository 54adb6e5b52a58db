//! Terminal output helpers shared by the handlers.

mod tables;

pub use tables::{format_optional, print_separator, server_target, truncate_string};
