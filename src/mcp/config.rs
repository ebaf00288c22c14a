//! Server configuration file loading.
//!
//! The file maps server names to the command that launches them:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "time": { "command": "npx", "args": ["-y", "@mcpcentral/mcp-time"] },
//!     "search": { "command": "search-mcp", "env": { "API_KEY": "${SEARCH_API_KEY}" } }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use super::error::McpError;

/// Top-level configuration file.
///
/// Servers are kept in a `BTreeMap` so every pass over them (startup,
/// tool listing, teardown) runs in ascending name order.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct McpConfig {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, ServerDescriptor>,
}

/// How to launch one server process.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ServerDescriptor {
    /// Descriptor with no extra arguments or environment.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Builder: append arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Builder: add one environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The server's environment with `${VAR}` placeholders resolved.
    pub fn resolved_env(&self) -> HashMap<String, String> {
        expand_env_map(&self.env)
    }
}

/// Read and parse a configuration file.
pub fn load_mcp_config(path: impl AsRef<Path>) -> Result<McpConfig, McpError> {
    let path = path.as_ref();
    let txt = fs::read_to_string(path).map_err(|e| McpError::Config {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_mcp_config(&txt).map_err(|e| McpError::Config {
        reason: format!("failed to parse {}: {e}", path.display()),
    })
}

/// Parse configuration from a JSON string.
pub fn parse_mcp_config(txt: &str) -> Result<McpConfig, serde_json::Error> {
    serde_json::from_str(txt)
}

/// Expand "${VAR}" placeholders from the process environment.
///
/// Unknown variables are left as-is.
pub fn expand_env_placeholders(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(v) => out.push_str(&v),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn expand_env_map(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}
