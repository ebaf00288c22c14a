//! Aggregated tool catalog and dispatch table.
//!
//! The registry is built once, after every client has initialized, by
//! listing each server's tools in ascending server-name order. What happens
//! when two servers advertise the same name is governed by
//! [`CollisionPolicy`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::client::McpClient;
use super::error::McpError;
use super::types::Tool;

/// Separator between server and tool name under [`CollisionPolicy::Namespace`].
pub const NAMESPACE_SEPARATOR: &str = "__";

/// How to resolve two servers advertising the same tool name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum CollisionPolicy {
    /// The server processed last owns the name. A warning names both servers.
    #[default]
    LastWriteWins,
    /// Building the registry fails with [`McpError::ToolNameCollision`].
    FailFast,
    /// Every tool is exposed as `<server>__<tool>`.
    Namespace,
}

impl fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LastWriteWins => "last-write-wins",
            Self::FailFast => "fail-fast",
            Self::Namespace => "namespace",
        })
    }
}

impl FromStr for CollisionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "last-write-wins" => Ok(Self::LastWriteWins),
            "fail-fast" => Ok(Self::FailFast),
            "namespace" => Ok(Self::Namespace),
            other => Err(format!(
                "unknown collision policy '{other}' (expected last-write-wins, fail-fast or namespace)"
            )),
        }
    }
}

impl TryFrom<String> for CollisionPolicy {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Where a tool lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRoute {
    /// Server that advertised the tool.
    pub server: String,
    /// Name to send in `tools/call`.
    pub tool_name: String,
}

/// Name-to-server dispatch table plus the catalog shown to the LLM.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    // Catalog in registration order, names as exposed to the LLM.
    tools: Vec<Tool>,
    // exposed name -> index into `tools`
    index: HashMap<String, usize>,
    routes: HashMap<String, ToolRoute>,
    policy: CollisionPolicy,
}

impl ToolRegistry {
    /// List tools on every client and merge them.
    ///
    /// Fails on the first client error; no partial registry is returned.
    pub async fn build(
        clients: &mut BTreeMap<String, McpClient>,
        policy: CollisionPolicy,
    ) -> Result<Self, McpError> {
        let mut catalogs = Vec::with_capacity(clients.len());
        for (server, client) in clients.iter_mut() {
            let tools = client.list_tools().await?;
            catalogs.push((server.clone(), tools));
        }
        Self::from_catalogs(catalogs, policy)
    }

    /// Merge already-fetched catalogs, processed in the order given.
    pub fn from_catalogs<I>(catalogs: I, policy: CollisionPolicy) -> Result<Self, McpError>
    where
        I: IntoIterator<Item = (String, Vec<Tool>)>,
    {
        let mut registry = Self {
            policy,
            ..Self::default()
        };

        for (server, tools) in catalogs {
            for tool in tools {
                registry.insert(&server, tool)?;
            }
        }

        tracing::info!(
            name: "mcp.registry.built",
            tool_count = registry.tools.len(),
            policy = %policy,
            "Tool registry built"
        );
        Ok(registry)
    }

    fn insert(&mut self, server: &str, mut tool: Tool) -> Result<(), McpError> {
        let raw_name = tool.name.clone();
        let exposed = match self.policy {
            CollisionPolicy::Namespace => {
                sanitize_tool_name(&format!("{server}{NAMESPACE_SEPARATOR}{raw_name}"))
            }
            CollisionPolicy::LastWriteWins | CollisionPolicy::FailFast => raw_name.clone(),
        };
        tool.name.clone_from(&exposed);

        let route = ToolRoute {
            server: server.to_string(),
            tool_name: raw_name,
        };

        if let Some(previous) = self.routes.get(&exposed) {
            match self.policy {
                CollisionPolicy::FailFast => {
                    return Err(McpError::ToolNameCollision {
                        tool: exposed,
                        first: previous.server.clone(),
                        second: server.to_string(),
                    });
                }
                CollisionPolicy::LastWriteWins | CollisionPolicy::Namespace => {
                    tracing::warn!(
                        name: "mcp.tool.collision",
                        tool = %exposed,
                        dropped = %previous.server,
                        kept = %server,
                        "Tool name advertised by more than one server; keeping the later one"
                    );
                }
            }
        }

        tracing::debug!(
            name: "mcp.tool.discovered",
            tool = %exposed,
            server = %server,
            "Discovered tool"
        );

        match self.index.get(&exposed) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(exposed.clone(), self.tools.len());
                self.tools.push(tool);
            }
        }
        self.routes.insert(exposed, route);
        Ok(())
    }

    /// Catalog to offer the LLM, with exposed names.
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// Owning server and server-side name for an exposed tool name.
    pub fn resolve(&self, exposed_name: &str) -> Option<&ToolRoute> {
        self.routes.get(exposed_name)
    }

    /// Exposed name to owning server, for every registered tool.
    pub fn routing(&self) -> BTreeMap<&str, &str> {
        self.routes
            .iter()
            .map(|(name, route)| (name.as_str(), route.server.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Replace anything outside `[A-Za-z0-9_-]` with `_`.
///
/// LLM providers restrict tool names to this alphabet.
pub fn sanitize_tool_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::in_process::{InProcessTransport, Reply};
    use crate::mcp::types::{ToolInputSchema, methods};
    use serde_json::json;

    fn tool(name: &str) -> Tool {
        Tool {
            name: name.into(),
            description: Some(format!("{name} tool")),
            input_schema: ToolInputSchema {
                schema_type: "object".into(),
                properties: serde_json::Map::new(),
                required: vec![],
            },
        }
    }

    fn catalogs() -> Vec<(String, Vec<Tool>)> {
        vec![
            ("alpha".into(), vec![tool("search"), tool("now")]),
            ("beta".into(), vec![tool("search"), tool("fetch")]),
        ]
    }

    #[test]
    fn test_every_route_points_at_an_advertising_server() {
        let registry = ToolRegistry::from_catalogs(catalogs(), CollisionPolicy::default()).unwrap();
        let input = catalogs();

        for t in registry.tools() {
            let route = registry.resolve(&t.name).unwrap();
            let advertised = input
                .iter()
                .find(|(s, _)| *s == route.server)
                .map(|(_, tools)| tools.iter().any(|x| x.name == route.tool_name))
                .unwrap();
            assert!(advertised, "{} routed to {}", t.name, route.server);
        }
    }

    #[test]
    fn test_last_write_wins_keeps_later_server() {
        let registry =
            ToolRegistry::from_catalogs(catalogs(), CollisionPolicy::LastWriteWins).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.resolve("search").unwrap().server, "beta");
        assert_eq!(registry.resolve("now").unwrap().server, "alpha");
        let names: Vec<&str> = registry.tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["search", "now", "fetch"]);
    }

    #[test]
    fn test_last_write_wins_depends_only_on_order() {
        let mut reversed = catalogs();
        reversed.reverse();
        let registry =
            ToolRegistry::from_catalogs(reversed, CollisionPolicy::LastWriteWins).unwrap();
        assert_eq!(registry.resolve("search").unwrap().server, "alpha");
    }

    #[test]
    fn test_fail_fast_reports_both_servers() {
        let err = ToolRegistry::from_catalogs(catalogs(), CollisionPolicy::FailFast).unwrap_err();
        match err {
            McpError::ToolNameCollision { tool, first, second } => {
                assert_eq!(tool, "search");
                assert_eq!(first, "alpha");
                assert_eq!(second, "beta");
            }
            other => panic!("expected ToolNameCollision, got {other:?}"),
        }
    }

    #[test]
    fn test_namespace_exposes_prefixed_names_and_routes_raw_name() {
        let registry = ToolRegistry::from_catalogs(
            vec![("time.v2".into(), vec![tool("now")]), ("alpha".into(), vec![tool("now")])],
            CollisionPolicy::Namespace,
        )
        .unwrap();

        let route = registry.resolve("time_v2__now").unwrap();
        assert_eq!(route.server, "time.v2");
        assert_eq!(route.tool_name, "now");
        assert!(registry.resolve("now").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_routing_table_maps_names_to_servers() {
        let registry =
            ToolRegistry::from_catalogs(catalogs(), CollisionPolicy::LastWriteWins).unwrap();
        let routing = registry.routing();
        assert_eq!(routing.get("fetch"), Some(&"beta"));
        assert_eq!(routing.len(), registry.len());
    }

    #[test]
    fn test_policy_parses_from_config_strings() {
        assert_eq!("fail-fast".parse::<CollisionPolicy>().unwrap(), CollisionPolicy::FailFast);
        assert_eq!("NAMESPACE".parse::<CollisionPolicy>().unwrap(), CollisionPolicy::Namespace);
        assert_eq!(
            "last_write_wins".parse::<CollisionPolicy>().unwrap(),
            CollisionPolicy::LastWriteWins
        );
        assert!("first-wins".parse::<CollisionPolicy>().is_err());
    }

    #[test]
    fn test_sanitize_tool_name() {
        assert_eq!(sanitize_tool_name("a.b:c__d-e"), "a_b_c__d-e");
    }

    #[tokio::test]
    async fn test_build_fails_on_first_broken_server() {
        let good = InProcessTransport::tool_server(vec![tool("now")], |_, _| Ok(json!({})));
        let broken = InProcessTransport::new(|req| match req.method.as_str() {
            methods::INITIALIZE => Reply::Result(json!({})),
            methods::TOOLS_LIST => Reply::Result(json!({"tools": "nope"})),
            _ => Reply::Silent,
        });

        let mut clients = BTreeMap::new();
        for (name, transport) in [("a-good", good), ("b-broken", broken)] {
            let mut client = McpClient::new(name, Box::new(transport));
            client.connect().await.unwrap();
            client.initialize().await.unwrap();
            clients.insert(name.to_string(), client);
        }

        let err = ToolRegistry::build(&mut clients, CollisionPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            McpError::MalformedResponse { ref server, .. } if server == "b-broken"
        ));
    }
}
