//! MCP server struct definition.

use crate::service::SharedService;
use crate::tools::{tool_specs, ToolDispatcher, ToolOutput};
use rmcp::model::{JsonObject, Tool};
use serde_json::Value;
use std::sync::Arc;

/// The SQL Server tools MCP server.
///
/// This struct is cloned for each request; the database service behind the
/// dispatcher is shared via Arc.
#[derive(Clone)]
pub struct DatabaseToolServer {
    pub(crate) dispatcher: Arc<ToolDispatcher>,
}

impl DatabaseToolServer {
    /// Create a server over an existing service.
    pub fn new(service: SharedService) -> Self {
        Self {
            dispatcher: Arc::new(ToolDispatcher::new(service)),
        }
    }

    /// The database service behind the tools.
    pub fn service(&self) -> &SharedService {
        self.dispatcher.service()
    }

    /// The static tool table as MCP tool descriptors.
    pub fn tools(&self) -> Vec<Tool> {
        tool_specs()
            .iter()
            .map(|spec| {
                let schema: JsonObject = match &spec.parameters {
                    Value::Object(map) => map.clone(),
                    _ => JsonObject::new(),
                };
                Tool::new(spec.name.as_str(), spec.description, Arc::new(schema))
            })
            .collect()
    }

    /// Run one tool call.
    pub async fn call(&self, name: &str, arguments: Option<JsonObject>) -> ToolOutput {
        let arguments = arguments.map(Value::Object).unwrap_or(Value::Null);
        self.dispatcher.dispatch(name, arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::database::testing::ScriptedConnector;
    use crate::service::DatabaseService;
    use std::path::PathBuf;

    fn server() -> DatabaseToolServer {
        let config = Config::from_vars(PathBuf::from("/work"), |_| None).unwrap();
        DatabaseToolServer::new(Arc::new(DatabaseService::new(
            config,
            Arc::new(ScriptedConnector::empty()),
        )))
    }

    #[test]
    fn test_tools_match_table() {
        let tools = server().tools();
        assert_eq!(tools.len(), tool_specs().len());
        assert_eq!(tools[0].name, "connect_database");
        assert!(tools
            .iter()
            .all(|t| t.input_schema.get("type") == Some(&Value::from("object"))));
    }

    #[tokio::test]
    async fn test_call_without_arguments() {
        let out = server().call("disconnect_database", None).await;
        assert!(!out.is_error);

        let out = server().call("describe_table", None).await;
        assert!(out.is_error);
        assert!(out.text.starts_with("Error:"));
    }
}
