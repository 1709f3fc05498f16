//! vsmcp-bridge: wire protocol for the IDE host ↔ MCP server bridge.
//!
//! One physical duplex stream carries calls in both directions. The host
//! listens on a pipe named after its own process id, the server dials in,
//! and each side exposes its operation set to the other over the same
//! connection via [`RpcChannel`].

pub mod channel;
pub mod codec;
pub mod models;
pub mod pipe;
pub mod protocol;

pub use channel::{ChannelError, RpcChannel, RpcHandler};
pub use models::{BuildState, BuildStatusReport, ToolInfo, group_by_category};
pub use protocol::{CallId, Frame, methods};
