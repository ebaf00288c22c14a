//! Model Context Protocol (MCP) client side.
//!
//! Each configured server runs as a child process and speaks
//! newline-delimited JSON-RPC 2.0 over its stdio. The pieces, leaf first:
//!
//! - [`transport`]: spawns the process and hands out its pipes
//! - [`client`]: framing, the connection state machine and typed
//!   operations (`initialize`, `tools/list`, `tools/call`)
//! - [`registry`]: merges every server's tools into one dispatch table
//!
//! # Configuration
//!
//! Servers are configured via a JSON file:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "time": {
//!       "command": "npx",
//!       "args": ["-y", "@mcpcentral/mcp-time"]
//!     },
//!     "search": {
//!       "command": "search-mcp",
//!       "env": { "SEARCH_API_KEY": "${SEARCH_API_KEY}" }
//!     }
//!   }
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod in_process;
pub mod registry;
pub mod transport;
pub mod types;

pub use client::{ClientState, ClientTimeouts, McpClient};
pub use config::{McpConfig, ServerDescriptor, load_mcp_config};
pub use error::McpError;
pub use registry::{CollisionPolicy, ToolRegistry, ToolRoute};
pub use transport::{StdioTransport, Transport};
pub use types::{Tool, ToolInputSchema};
