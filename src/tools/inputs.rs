//! Tool argument types.
//!
//! Field names follow the camelCase names published in the tool schemas.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Arguments of `connect_database`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectDatabaseInput {
    pub server: String,
    pub database: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Arguments of `execute_query`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteQueryInput {
    pub query: String,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

/// Arguments of `list_tables`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTablesInput {
    #[serde(default)]
    pub schema: Option<String>,
}

/// Arguments of `describe_table` and `get_related_tables`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInput {
    pub table_name: String,
    #[serde(default)]
    pub schema: Option<String>,
}

/// Arguments of `list_stored_procedures`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListStoredProceduresInput {
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub procedure_name_pattern: Option<String>,
}

/// Arguments of `execute_stored_procedure`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteStoredProcedureInput {
    pub procedure_name: String,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

/// Arguments of `get_procedure_details`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetProcedureDetailsInput {
    pub procedure_name: String,
    #[serde(default)]
    pub schema: Option<String>,
    /// Execute the procedure with NULL arguments in a rolled-back transaction
    #[serde(default)]
    pub discover_return_columns: bool,
}

/// Arguments of `search_stored_procedures`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStoredProceduresInput {
    pub search_term: String,
}

/// Arguments of `generate_query_from_template`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQueryFromTemplateInput {
    pub template_file: String,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

/// Pick the caller's schema, or `default` when it is missing or blank.
pub fn schema_or<'a>(schema: &'a Option<String>, default: &'a str) -> &'a str {
    schema
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
}
