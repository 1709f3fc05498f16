//! vsmcp-host: host-side supervision for the IDE ↔ MCP server bridge.
//!
//! The host embeds this crate to run the server worker: [`ServerSupervisor`]
//! owns the process, [`RpcListener`] owns the pipe and the live channel,
//! [`LogSink`] fans log lines out to a rotating file and the host UI pane,
//! and [`AutomationDispatcher`] marshals inbound IDE calls onto a single
//! execution context.

pub mod automation;
pub mod listener;
pub mod logsink;
pub mod settings;
pub mod supervisor;

pub use automation::{AutomationDispatcher, IdeAutomation};
pub use listener::{ListenerState, RpcListener};
pub use logsink::{LogSink, PaneSink};
pub use settings::ServerStartSettings;
pub use supervisor::{ServerSupervisor, StartError, SupervisorTimings};
