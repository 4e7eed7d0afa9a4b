//! Tool table and dispatch.
//!
//! The tool set is fixed: [`tool_specs`] publishes one [`ToolSpec`] per
//! [`ToolName`] and [`ToolDispatcher`] routes calls onto [`DatabaseService`].
//! The dispatcher is the only place where typed errors become text: every
//! failure comes back as an `"Error: <message>"` output, never as a panic or an
//! `Err`. The MCP server and the chat loop both call tools through it.
//!
//! [`DatabaseService`]: crate::service::DatabaseService

pub mod inputs;

use crate::database::ReturnColumnDiscovery;
use crate::error::ServerError;
use crate::security::parse_qualified_name;
use crate::service::SharedService;
use inputs::{
    schema_or, ConnectDatabaseInput, ExecuteQueryInput, ExecuteStoredProcedureInput,
    GenerateQueryFromTemplateInput, GetProcedureDetailsInput, ListStoredProceduresInput,
    ListTablesInput, SearchStoredProceduresInput, TableInput,
};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Every callable tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    ConnectDatabase,
    ExecuteQuery,
    ListTables,
    DescribeTable,
    GetRelatedTables,
    ListStoredProcedures,
    ExecuteStoredProcedure,
    GetProcedureDetails,
    SearchStoredProcedures,
    GenerateQueryFromTemplate,
    DisconnectDatabase,
}

impl ToolName {
    /// All tools, in publication order.
    pub const ALL: [ToolName; 11] = [
        ToolName::ConnectDatabase,
        ToolName::ExecuteQuery,
        ToolName::ListTables,
        ToolName::DescribeTable,
        ToolName::GetRelatedTables,
        ToolName::ListStoredProcedures,
        ToolName::ExecuteStoredProcedure,
        ToolName::GetProcedureDetails,
        ToolName::SearchStoredProcedures,
        ToolName::GenerateQueryFromTemplate,
        ToolName::DisconnectDatabase,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::ConnectDatabase => "connect_database",
            ToolName::ExecuteQuery => "execute_query",
            ToolName::ListTables => "list_tables",
            ToolName::DescribeTable => "describe_table",
            ToolName::GetRelatedTables => "get_related_tables",
            ToolName::ListStoredProcedures => "list_stored_procedures",
            ToolName::ExecuteStoredProcedure => "execute_stored_procedure",
            ToolName::GetProcedureDetails => "get_procedure_details",
            ToolName::SearchStoredProcedures => "search_stored_procedures",
            ToolName::GenerateQueryFromTemplate => "generate_query_from_template",
            ToolName::DisconnectDatabase => "disconnect_database",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| ServerError::invalid_input(format!("Unknown tool: {}", s)))
    }
}

/// Name, description and JSON-schema argument contract of one tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: ToolName,
    pub description: &'static str,
    pub parameters: Value,
}

static TOOL_SPECS: Lazy<Vec<ToolSpec>> = Lazy::new(|| {
    let schema_property = json!({
        "type": "string",
        "description": "Schema name (optional, defaults to the configured schema, usually dbo)"
    });
    let parameters_property = |description: &str| {
        json!({
            "type": "object",
            "description": description,
            "additionalProperties": true
        })
    };

    vec![
        ToolSpec {
            name: ToolName::ConnectDatabase,
            description: "Connect to the SQL Server database",
            parameters: json!({
                "type": "object",
                "properties": {
                    "server": {
                        "type": "string",
                        "description": "Database server name or IP address (host, host,port or host\\instance)"
                    },
                    "database": {"type": "string", "description": "Database name"},
                    "user": {
                        "type": "string",
                        "description": "Username for database connection (optional for Windows auth)"
                    },
                    "password": {
                        "type": "string",
                        "description": "Password for database connection (optional for Windows auth)"
                    }
                },
                "required": ["server", "database"]
            }),
        },
        ToolSpec {
            name: ToolName::ExecuteQuery,
            description: "Execute a SQL query on the connected database",
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "SQL query to execute"},
                    "parameters": parameters_property(
                        "Values for @name placeholders in the query, keyed by name"
                    )
                },
                "required": ["query"]
            }),
        },
        ToolSpec {
            name: ToolName::ListTables,
            description: "List all tables in the database. Use this when asked to show or list tables.",
            parameters: json!({
                "type": "object",
                "properties": {"schema": schema_property.clone()}
            }),
        },
        ToolSpec {
            name: ToolName::DescribeTable,
            description: "Get columns, indexes and primary key of a specific table",
            parameters: json!({
                "type": "object",
                "properties": {
                    "tableName": {"type": "string", "description": "Name of the table to describe"},
                    "schema": schema_property.clone()
                },
                "required": ["tableName"]
            }),
        },
        ToolSpec {
            name: ToolName::GetRelatedTables,
            description: "Get a table and all related tables through foreign key relationships. \
                          Use this when asked about table relationships, related tables, foreign keys, \
                          or how tables are connected.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "tableName": {
                        "type": "string",
                        "description": "Name of the table to get relationships for"
                    },
                    "schema": schema_property.clone()
                },
                "required": ["tableName"]
            }),
        },
        ToolSpec {
            name: ToolName::ListStoredProcedures,
            description: "List stored procedures in the database with optional name pattern filtering. \
                          Without a pattern only the first 10 procedures by name are returned.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "schema": schema_property.clone(),
                    "procedureNamePattern": {
                        "type": "string",
                        "description": "Filter procedures whose name contains this text (optional)"
                    }
                }
            }),
        },
        ToolSpec {
            name: ToolName::ExecuteStoredProcedure,
            description: "Execute a stored procedure with parameters and return every result set",
            parameters: json!({
                "type": "object",
                "properties": {
                    "procedureName": {
                        "type": "string",
                        "description": "Name of the stored procedure to execute"
                    },
                    "parameters": parameters_property(
                        "Parameters for the stored procedure, keyed by parameter name"
                    )
                },
                "required": ["procedureName"]
            }),
        },
        ToolSpec {
            name: ToolName::GetProcedureDetails,
            description: "Get details about a stored procedure including parameters and, \
                          when enabled, return columns",
            parameters: json!({
                "type": "object",
                "properties": {
                    "procedureName": {
                        "type": "string",
                        "description": "Name of the stored procedure to get details for"
                    },
                    "schema": schema_property.clone(),
                    "discoverReturnColumns": {
                        "type": "boolean",
                        "description": "Execute the procedure with NULL arguments inside a rolled-back \
                                        transaction to learn its result columns. Only honoured when the \
                                        server allows unsafe introspection. Default false."
                    }
                },
                "required": ["procedureName"]
            }),
        },
        ToolSpec {
            name: ToolName::SearchStoredProcedures,
            description: "Search stored procedures in all schemas by name, description or definition text",
            parameters: json!({
                "type": "object",
                "properties": {
                    "searchTerm": {"type": "string", "description": "Text to search for"}
                },
                "required": ["searchTerm"]
            }),
        },
        ToolSpec {
            name: ToolName::GenerateQueryFromTemplate,
            description: "Read a SQL file from the templates directory or working directory and use it \
                          as a template to generate and execute a query",
            parameters: json!({
                "type": "object",
                "properties": {
                    "templateFile": {
                        "type": "string",
                        "description": "Name of the SQL template file (e.g. 'query.sql'). Templates are \
                                        looked for in the 'templates' folder first, then in the working \
                                        directory and its sql, queries, scripts and sql_templates folders."
                    },
                    "parameters": parameters_property(
                        "Parameters to substitute in the template (format: @paramName in SQL)"
                    )
                },
                "required": ["templateFile"]
            }),
        },
        ToolSpec {
            name: ToolName::DisconnectDatabase,
            description: "Disconnect from the database",
            parameters: json!({"type": "object", "properties": {}}),
        },
    ]
});

/// The fixed tool table, in publication order.
pub fn tool_specs() -> &'static [ToolSpec] {
    &TOOL_SPECS
}

/// Text result of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    /// An `"Error: ..."` output.
    pub fn error(message: impl fmt::Display) -> Self {
        Self {
            text: format!("Error: {}", message),
            is_error: true,
        }
    }
}

/// Routes tool calls onto the database service.
#[derive(Clone)]
pub struct ToolDispatcher {
    service: SharedService,
}

impl ToolDispatcher {
    pub fn new(service: SharedService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &SharedService {
        &self.service
    }

    /// Run a tool. Failures of any kind become an error output.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> ToolOutput {
        debug!("Dispatching tool {}", name);
        match self.run(name, arguments).await {
            Ok(text) => ToolOutput::success(text),
            Err(e) => {
                warn!("Tool {} failed: {}", name, e);
                ToolOutput::error(e)
            }
        }
    }

    async fn run(&self, name: &str, arguments: Value) -> Result<String, ServerError> {
        let tool: ToolName = name.parse()?;
        let service = &self.service;
        let default_schema = service.default_schema();

        match tool {
            ToolName::ConnectDatabase => {
                let input: ConnectDatabaseInput = parse_args(tool, arguments)?;
                let db = &service.config().database;
                let user = input.user.as_deref().or(db.user.as_deref());
                let password = input.password.as_deref().or(db.password.as_deref());
                service
                    .connect(&input.server, &input.database, user, password)
                    .await
            }
            ToolName::ExecuteQuery => {
                let input: ExecuteQueryInput = parse_args(tool, arguments)?;
                let parameters = input.parameters.unwrap_or_default();
                to_json(&service.execute_query(&input.query, &parameters).await?)
            }
            ToolName::ListTables => {
                let input: ListTablesInput = parse_args(tool, arguments)?;
                to_json(&service.list_tables(schema_or(&input.schema, default_schema)).await?)
            }
            ToolName::DescribeTable => {
                let input: TableInput = parse_args(tool, arguments)?;
                let (schema, table) =
                    split_object_name(&input.table_name, schema_or(&input.schema, default_schema))?;
                to_json(&service.describe_table(&table, &schema).await?)
            }
            ToolName::GetRelatedTables => {
                let input: TableInput = parse_args(tool, arguments)?;
                let (schema, table) =
                    split_object_name(&input.table_name, schema_or(&input.schema, default_schema))?;
                to_json(&service.get_related_tables(&table, &schema).await?)
            }
            ToolName::ListStoredProcedures => {
                let input: ListStoredProceduresInput = parse_args(tool, arguments)?;
                let schema = schema_or(&input.schema, default_schema);
                let pattern = input.procedure_name_pattern.as_deref();
                to_json(&service.list_stored_procedures(schema, pattern).await?)
            }
            ToolName::ExecuteStoredProcedure => {
                let input: ExecuteStoredProcedureInput = parse_args(tool, arguments)?;
                let parameters = input.parameters.unwrap_or_default();
                to_json(
                    &service
                        .execute_stored_procedure(&input.procedure_name, &parameters)
                        .await?,
                )
            }
            ToolName::GetProcedureDetails => {
                let input: GetProcedureDetailsInput = parse_args(tool, arguments)?;
                let (schema, procedure) = split_object_name(
                    &input.procedure_name,
                    schema_or(&input.schema, default_schema),
                )?;
                let discovery = if input.discover_return_columns {
                    ReturnColumnDiscovery::TrialExecution
                } else {
                    ReturnColumnDiscovery::Skip
                };
                to_json(
                    &service
                        .get_procedure_details(&procedure, &schema, discovery)
                        .await?,
                )
            }
            ToolName::SearchStoredProcedures => {
                let input: SearchStoredProceduresInput = parse_args(tool, arguments)?;
                to_json(&service.search_stored_procedures(&input.search_term).await?)
            }
            ToolName::GenerateQueryFromTemplate => {
                let input: GenerateQueryFromTemplateInput = parse_args(tool, arguments)?;
                let parameters = input.parameters.unwrap_or_default();
                to_json(
                    &service
                        .generate_query_from_template(&input.template_file, &parameters)
                        .await?,
                )
            }
            ToolName::DisconnectDatabase => Ok(service.disconnect().await),
        }
    }
}

/// Split `schema.object`; a schema written into the name wins over `schema`.
fn split_object_name(name: &str, schema: &str) -> Result<(String, String), ServerError> {
    let (prefix, object) = parse_qualified_name(name)?;
    Ok((prefix.unwrap_or_else(|| schema.to_string()), object))
}

/// Deserialize tool arguments; a missing or null argument object counts as `{}`.
fn parse_args<T: DeserializeOwned>(tool: ToolName, arguments: Value) -> Result<T, ServerError> {
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(arguments)
        .map_err(|e| ServerError::invalid_input(format!("Invalid arguments for {}: {}", tool, e)))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, ServerError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ServerError::internal(format!("Failed to serialize result: {}", e)))
}
