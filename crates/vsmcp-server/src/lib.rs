//! vsmcp-server: the worker side of the IDE ↔ MCP server bridge.
//!
//! Spawned by the host with the pipe name on the command line, dials in,
//! exposes the capability catalog and the graceful-shutdown operation, and
//! runs until the host asks it to stop or the connection goes away.

pub mod capabilities;
pub mod runtime;

pub use runtime::{ServerConfig, run};
