//! Command handlers, one module per top-level command.

pub mod call;
pub mod doctor;
pub mod servers;
pub mod test_connection;
pub mod tools;

use toolmux_mcp::ConnectionState;

/// Print per-server connect failures to stderr.
pub(crate) fn report_failures(state: &ConnectionState) {
    for (server_id, message) in &state.server_errors {
        eprintln!("warning: server {server_id} failed to connect: {message}");
    }
}
