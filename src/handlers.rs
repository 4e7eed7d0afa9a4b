//! ServerHandler implementation for the SQL Server tools server.
//!
//! This module implements the rmcp `ServerHandler` trait which defines how
//! the server responds to MCP protocol requests.

use crate::server::DatabaseToolServer;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::ErrorData;
use tracing::info;

impl ServerHandler for DatabaseToolServer {
    /// Server identification - called during initialization handshake.
    fn get_info(&self) -> ServerInfo {
        info!("MCP client requesting server info");

        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,

            capabilities: ServerCapabilities::builder().enable_tools().build(),

            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                title: Some("SQL Server Tools".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },

            instructions: Some(build_instructions(self)),
        }
    }

    /// List the fixed tool table.
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(self.tools()))
    }

    /// Run a tool. Tool failures are reported in the result, not as protocol errors.
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let output = self.call(&request.name, request.arguments).await;
        let content = vec![Content::text(output.text)];

        Ok(if output.is_error {
            CallToolResult::error(content)
        } else {
            CallToolResult::success(content)
        })
    }
}

/// Build server instructions based on configuration.
fn build_instructions(server: &DatabaseToolServer) -> String {
    let config = server.service().config();
    let mut instructions = String::new();

    instructions.push_str("# SQL Server Tools\n\n");
    instructions.push_str("This server exposes one Microsoft SQL Server connection as tools.\n\n");

    match (&config.database.server, &config.database.database) {
        (Some(server), Some(database)) => instructions.push_str(&format!(
            "**Default database:** `{}` on `{}` (connected at startup when reachable)\n\n",
            database, server
        )),
        _ => instructions.push_str("Call `connect_database` before any other database tool.\n\n"),
    }

    instructions.push_str("### Tools\n");
    instructions.push_str("- Explore schema with `list_tables`, `describe_table` and `get_related_tables`\n");
    instructions.push_str("- Inspect procedures with `list_stored_procedures`, `search_stored_procedures` and `get_procedure_details`\n");
    instructions.push_str("- Run SQL with `execute_query`, `execute_stored_procedure` or `generate_query_from_template`\n");
    instructions.push_str(&format!(
        "- Schema defaults to `{}` when omitted\n",
        config.database.default_schema
    ));

    if config.database.allow_unsafe_introspection {
        instructions.push_str(
            "- `discoverReturnColumns` executes procedures with NULL arguments inside a rolled-back transaction\n",
        );
    } else {
        instructions.push_str("- Return-column discovery by trial execution is disabled\n");
    }

    instructions.push_str("\nFailed tool calls return text starting with `Error:`.\n");
    instructions
}
