//! SQL Server metadata queries for schema introspection.
//!
//! Every descriptor is derived fresh from the catalog on each call.

use crate::constants::{PROCEDURE_LISTING_LIMIT, SEARCH_SNIPPET_RADIUS};
use crate::database::connection::ConnectionManager;
use crate::database::driver::{BoundStatement, ColumnMeta};
use crate::database::procedure::parameter_name;
use crate::database::query::{execute_query, ResultRow};
use crate::error::ServerError;
use crate::security::qualify;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// Column of a described table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub max_length: Option<i64>,
    pub precision: Option<i64>,
    pub scale: Option<i64>,
    pub ordinal_position: i64,
}

/// One index with its key columns in key order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescriptor {
    pub name: String,
    pub index_type: String,
    pub is_unique: bool,
    pub is_primary_key: bool,
    pub columns: Vec<String>,
}

/// Result of `describe_table`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    /// `schema.name`
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
    pub primary_key: Vec<String>,
}

/// Direction of a foreign-key edge relative to the inspected table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Relationship {
    /// This table references the other one
    Parent,
    /// The other table references this one
    Child,
}

/// Row count of a related table, `"Unknown"` when it could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCount {
    Known(i64),
    Unknown,
}

impl Serialize for RowCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RowCount::Known(count) => serializer.serialize_i64(*count),
            RowCount::Unknown => serializer.serialize_str("Unknown"),
        }
    }
}

/// One foreign-key column relationship.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedTableEdge {
    pub schema: String,
    pub table: String,
    pub relationship: Relationship,
    pub foreign_key: String,
    pub local_column: String,
    pub remote_column: String,
    pub row_count: RowCount,
}

/// Result of `get_related_tables`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedTables {
    pub table: String,
    pub related_tables: Vec<RelatedTableEdge>,
}

/// Stored procedure parameter metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDescriptor {
    pub name: String,
    pub data_type: String,
    pub max_length: Option<i64>,
    pub precision: Option<i64>,
    pub scale: Option<i64>,
    pub is_output: bool,
    pub has_default: bool,
    pub default_value: Option<String>,
}

/// Result of `get_procedure_details`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureDescriptor {
    /// `schema.name`
    pub name: String,
    pub parameters: Vec<ParameterDescriptor>,
    pub return_columns: Vec<ColumnMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_columns_note: Option<String>,
    pub has_definition: bool,
}

/// Whether `get_procedure_details` may execute the procedure to learn its
/// result columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnColumnDiscovery {
    /// Catalog lookups only
    #[default]
    Skip,
    /// Run the procedure with NULL arguments inside a rolled-back transaction
    TrialExecution,
}

/// A stored procedure matched by `search_stored_procedures`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcedureSearchHit {
    pub schema: String,
    pub name: String,
    pub description: String,
    pub snippet: String,
}

fn params(pairs: &[(&str, &str)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect()
}

/// List tables and views in a schema, ordered by name.
pub async fn list_tables(
    manager: &mut ConnectionManager,
    schema: &str,
) -> Result<Vec<ResultRow>, ServerError> {
    let query = r#"
        SELECT
            TABLE_SCHEMA,
            TABLE_NAME,
            TABLE_TYPE
        FROM INFORMATION_SCHEMA.TABLES
        WHERE TABLE_SCHEMA = @schema
        ORDER BY TABLE_NAME
    "#;

    let result = execute_query(manager, query, &params(&[("schema", schema)])).await?;
    Ok(result.rows)
}

/// Describe a table's columns, indexes and primary key.
///
/// A table without indexes yields empty index and key lists.
pub async fn describe_table(
    manager: &mut ConnectionManager,
    table: &str,
    schema: &str,
) -> Result<TableDescriptor, ServerError> {
    let columns_query = r#"
        SELECT
            COLUMN_NAME,
            DATA_TYPE,
            IS_NULLABLE,
            COLUMN_DEFAULT,
            CHARACTER_MAXIMUM_LENGTH,
            NUMERIC_PRECISION,
            NUMERIC_SCALE,
            ORDINAL_POSITION
        FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = @schema AND TABLE_NAME = @table_name
        ORDER BY ORDINAL_POSITION
    "#;

    let indexes_query = r#"
        SELECT
            i.name AS index_name,
            i.type_desc AS index_type,
            i.is_unique,
            i.is_primary_key,
            c.name AS column_name
        FROM sys.indexes i
        JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id
        JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id
        JOIN sys.tables t ON i.object_id = t.object_id
        JOIN sys.schemas s ON t.schema_id = s.schema_id
        WHERE s.name = @schema AND t.name = @table_name AND ic.is_included_column = 0
        ORDER BY i.name, ic.key_ordinal
    "#;

    let args = params(&[("schema", schema), ("table_name", table)]);
    let columns = execute_query(manager, columns_query, &args).await?;
    let index_rows = execute_query(manager, indexes_query, &args).await?;

    let columns = columns
        .rows
        .iter()
        .map(|row| ColumnDescriptor {
            name: extract_string(row, "COLUMN_NAME").unwrap_or_default(),
            data_type: extract_string(row, "DATA_TYPE").unwrap_or_default(),
            nullable: extract_string(row, "IS_NULLABLE").is_some_and(|v| v == "YES"),
            default: extract_string(row, "COLUMN_DEFAULT"),
            max_length: extract_i64(row, "CHARACTER_MAXIMUM_LENGTH"),
            precision: extract_i64(row, "NUMERIC_PRECISION"),
            scale: extract_i64(row, "NUMERIC_SCALE"),
            ordinal_position: extract_i64(row, "ORDINAL_POSITION").unwrap_or(0),
        })
        .collect();

    let indexes = group_indexes(&index_rows.rows);
    let primary_key = indexes
        .iter()
        .find(|index| index.is_primary_key)
        .map(|index| index.columns.clone())
        .unwrap_or_default();

    Ok(TableDescriptor {
        table: format!("{}.{}", schema, table),
        columns,
        indexes,
        primary_key,
    })
}

/// Fold per-column index rows (ordered by index then key ordinal) into indexes.
fn group_indexes(rows: &[ResultRow]) -> Vec<IndexDescriptor> {
    let mut indexes: Vec<IndexDescriptor> = Vec::new();

    for row in rows {
        let name = extract_string(row, "index_name").unwrap_or_default();
        let column = extract_string(row, "column_name").unwrap_or_default();

        match indexes.last_mut() {
            Some(index) if index.name == name => index.columns.push(column),
            _ => indexes.push(IndexDescriptor {
                name,
                index_type: extract_string(row, "index_type").unwrap_or_default(),
                is_unique: extract_bool(row, "is_unique").unwrap_or(false),
                is_primary_key: extract_bool(row, "is_primary_key").unwrap_or(false),
                columns: vec![column],
            }),
        }
    }

    indexes
}

/// List stored procedures in a schema.
///
/// Without a pattern only the first `PROCEDURE_LISTING_LIMIT` procedures by
/// name are returned. A pattern matches anywhere in the name and is uncapped.
pub async fn list_stored_procedures(
    manager: &mut ConnectionManager,
    schema: &str,
    pattern: Option<&str>,
) -> Result<Vec<ResultRow>, ServerError> {
    let result = match pattern.filter(|p| !p.is_empty()) {
        Some(pattern) => {
            let query = r#"
                SELECT
                    ROUTINE_SCHEMA,
                    ROUTINE_NAME,
                    ROUTINE_TYPE,
                    CREATED,
                    LAST_ALTERED
                FROM INFORMATION_SCHEMA.ROUTINES
                WHERE ROUTINE_SCHEMA = @schema
                  AND ROUTINE_TYPE = 'PROCEDURE'
                  AND ROUTINE_NAME LIKE @pattern
                ORDER BY ROUTINE_NAME
            "#;
            let like = format!("%{}%", pattern);
            execute_query(
                manager,
                query,
                &params(&[("schema", schema), ("pattern", &like)]),
            )
            .await?
        }
        None => {
            let query = format!(
                r#"
                SELECT TOP {}
                    ROUTINE_SCHEMA,
                    ROUTINE_NAME,
                    ROUTINE_TYPE,
                    CREATED,
                    LAST_ALTERED
                FROM INFORMATION_SCHEMA.ROUTINES
                WHERE ROUTINE_SCHEMA = @schema AND ROUTINE_TYPE = 'PROCEDURE'
                ORDER BY ROUTINE_NAME
            "#,
                PROCEDURE_LISTING_LIMIT
            );
            execute_query(manager, &query, &params(&[("schema", schema)])).await?
        }
    };

    Ok(result.rows)
}

const OUTGOING_FK_QUERY: &str = r#"
    SELECT
        OBJECT_SCHEMA_NAME(fk.referenced_object_id) AS referenced_schema,
        OBJECT_NAME(fk.referenced_object_id) AS referenced_table,
        COL_NAME(fkc.referenced_object_id, fkc.referenced_column_id) AS referenced_column,
        COL_NAME(fkc.parent_object_id, fkc.parent_column_id) AS referencing_column,
        fk.name AS foreign_key_name
    FROM sys.foreign_keys fk
    INNER JOIN sys.foreign_key_columns fkc ON fk.object_id = fkc.constraint_object_id
    INNER JOIN sys.tables t ON fk.parent_object_id = t.object_id
    INNER JOIN sys.schemas s ON t.schema_id = s.schema_id
    WHERE s.name = @schema AND t.name = @table_name
    ORDER BY fk.name, fkc.constraint_column_id
"#;

const INCOMING_FK_QUERY: &str = r#"
    SELECT
        OBJECT_SCHEMA_NAME(fk.parent_object_id) AS referencing_schema,
        OBJECT_NAME(fk.parent_object_id) AS referencing_table,
        COL_NAME(fkc.parent_object_id, fkc.parent_column_id) AS referencing_column,
        COL_NAME(fkc.referenced_object_id, fkc.referenced_column_id) AS referenced_column,
        fk.name AS foreign_key_name
    FROM sys.foreign_keys fk
    INNER JOIN sys.foreign_key_columns fkc ON fk.object_id = fkc.constraint_object_id
    INNER JOIN sys.tables t ON fk.referenced_object_id = t.object_id
    INNER JOIN sys.schemas s ON t.schema_id = s.schema_id
    WHERE s.name = @schema AND t.name = @table_name
    ORDER BY fk.name, fkc.constraint_column_id
"#;

/// Expand one hop of the foreign-key graph around a table.
///
/// Outgoing edges come first. Each edge carries the related table's row count;
/// a count that cannot be read is recorded as `Unknown` and the call continues.
pub async fn get_related_tables(
    manager: &mut ConnectionManager,
    table: &str,
    schema: &str,
) -> Result<RelatedTables, ServerError> {
    let args = params(&[("schema", schema), ("table_name", table)]);
    let outgoing = execute_query(manager, OUTGOING_FK_QUERY, &args).await?;
    let incoming = execute_query(manager, INCOMING_FK_QUERY, &args).await?;

    let mut edges: Vec<RelatedTableEdge> = Vec::new();

    for row in &outgoing.rows {
        edges.push(RelatedTableEdge {
            schema: extract_string(row, "referenced_schema").unwrap_or_default(),
            table: extract_string(row, "referenced_table").unwrap_or_default(),
            relationship: Relationship::Parent,
            foreign_key: extract_string(row, "foreign_key_name").unwrap_or_default(),
            local_column: extract_string(row, "referencing_column").unwrap_or_default(),
            remote_column: extract_string(row, "referenced_column").unwrap_or_default(),
            row_count: RowCount::Unknown,
        });
    }

    for row in &incoming.rows {
        edges.push(RelatedTableEdge {
            schema: extract_string(row, "referencing_schema").unwrap_or_default(),
            table: extract_string(row, "referencing_table").unwrap_or_default(),
            relationship: Relationship::Child,
            foreign_key: extract_string(row, "foreign_key_name").unwrap_or_default(),
            local_column: extract_string(row, "referenced_column").unwrap_or_default(),
            remote_column: extract_string(row, "referencing_column").unwrap_or_default(),
            row_count: RowCount::Unknown,
        });
    }

    for edge in &mut edges {
        edge.row_count = match count_rows(manager, &edge.schema, &edge.table).await {
            Ok(count) => RowCount::Known(count),
            Err(e) => {
                warn!(
                    "Could not count rows of {}.{}: {}",
                    edge.schema, edge.table, e
                );
                RowCount::Unknown
            }
        };
    }

    debug!(
        "Found {} related table edges for {}.{}",
        edges.len(),
        schema,
        table
    );

    Ok(RelatedTables {
        table: format!("{}.{}", schema, table),
        related_tables: edges,
    })
}

async fn count_rows(
    manager: &mut ConnectionManager,
    schema: &str,
    table: &str,
) -> Result<i64, ServerError> {
    let query = format!(
        "SELECT COUNT_BIG(*) AS row_count FROM {}",
        qualify(schema, table)?
    );
    let result = execute_query(manager, &query, &Map::new()).await?;

    match result.rows.first() {
        None => Ok(0),
        Some(row) => extract_i64(row, "row_count")
            .ok_or_else(|| ServerError::metadata("row count is not numeric")),
    }
}

/// Describe a stored procedure's parameters and, when permitted, its result
/// columns.
///
/// Result-column discovery runs only when the caller asks for
/// `TrialExecution` and `allow_trial_execution` is set. It executes the
/// procedure with NULL arguments inside a transaction that is always rolled
/// back. Any failure there degrades to `returnColumnsNote`.
pub async fn get_procedure_details(
    manager: &mut ConnectionManager,
    procedure: &str,
    schema: &str,
    discovery: ReturnColumnDiscovery,
    allow_trial_execution: bool,
) -> Result<ProcedureDescriptor, ServerError> {
    let params_query = r#"
        SELECT
            p.name AS parameter_name,
            t.name AS data_type,
            p.max_length,
            p.precision,
            p.scale,
            p.is_output,
            p.has_default_value,
            CAST(p.default_value AS NVARCHAR(4000)) AS default_value
        FROM sys.parameters p
        INNER JOIN sys.procedures pr ON p.object_id = pr.object_id
        INNER JOIN sys.schemas s ON pr.schema_id = s.schema_id
        INNER JOIN sys.types t ON p.system_type_id = t.system_type_id AND p.user_type_id = t.user_type_id
        WHERE s.name = @schema AND pr.name = @proc_name
        ORDER BY p.parameter_id
    "#;

    let args = params(&[("schema", schema), ("proc_name", procedure)]);
    let parameter_rows = execute_query(manager, params_query, &args).await?;

    let parameters: Vec<ParameterDescriptor> = parameter_rows
        .rows
        .iter()
        .map(|row| ParameterDescriptor {
            name: extract_string(row, "parameter_name").unwrap_or_default(),
            data_type: extract_string(row, "data_type").unwrap_or_default(),
            max_length: extract_i64(row, "max_length"),
            precision: extract_i64(row, "precision"),
            scale: extract_i64(row, "scale"),
            is_output: extract_bool(row, "is_output").unwrap_or(false),
            has_default: extract_bool(row, "has_default_value").unwrap_or(false),
            default_value: extract_string(row, "default_value"),
        })
        .collect();

    let definition = get_procedure_definition(manager, procedure, schema).await?;

    let (return_columns, return_columns_note) = match (discovery, allow_trial_execution) {
        (ReturnColumnDiscovery::Skip, _) => (
            Vec::new(),
            Some(
                "Return columns not discovered. Set discoverReturnColumns to run the procedure \
                 with NULL arguments inside a rolled-back transaction."
                    .to_string(),
            ),
        ),
        (ReturnColumnDiscovery::TrialExecution, false) => (
            Vec::new(),
            Some(
                "Return column discovery is disabled. Set DB_ALLOW_UNSAFE_INTROSPECTION=true \
                 to allow trial execution."
                    .to_string(),
            ),
        ),
        (ReturnColumnDiscovery::TrialExecution, true) => {
            match discover_return_columns(manager, procedure, schema, &parameters).await {
                Ok(columns) if columns.is_empty() => (
                    columns,
                    Some("Procedure returned no result set".to_string()),
                ),
                Ok(columns) => (columns, None),
                Err(e) => {
                    debug!("Return column discovery failed for {}.{}: {}", schema, procedure, e);
                    (
                        Vec::new(),
                        Some(format!("Could not determine return columns: {}", e)),
                    )
                }
            }
        }
    };

    Ok(ProcedureDescriptor {
        name: format!("{}.{}", schema, procedure),
        parameters,
        return_columns,
        return_columns_note,
        has_definition: definition.is_some_and(|d| !d.is_empty()),
    })
}

/// Statement that runs a procedure with every parameter bound to NULL inside a
/// transaction it rolls back.
pub(crate) fn trial_execution_statement(
    procedure: &str,
    schema: &str,
    parameters: &[ParameterDescriptor],
) -> Result<BoundStatement, ServerError> {
    let assignments = parameters
        .iter()
        .map(|p| parameter_name(&p.name).map(|name| format!("@{} = NULL", name)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut exec = format!("EXEC {}", qualify(schema, procedure)?);
    if !assignments.is_empty() {
        exec.push(' ');
        exec.push_str(&assignments.join(", "));
    }

    Ok(BoundStatement::raw(format!(
        "BEGIN TRANSACTION;\n{};\nIF @@TRANCOUNT > 0 ROLLBACK TRANSACTION;",
        exec
    )))
}

pub(crate) const ROLLBACK_OPEN_TRANSACTION: &str = "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION";

async fn discover_return_columns(
    manager: &mut ConnectionManager,
    procedure: &str,
    schema: &str,
    parameters: &[ParameterDescriptor],
) -> Result<Vec<ColumnMeta>, ServerError> {
    let statement = trial_execution_statement(procedure, schema, parameters)?;
    let outcome = manager.execute(&statement).await;

    // the batch may abort before its own rollback runs
    if let Err(e) = manager
        .execute(&BoundStatement::raw(ROLLBACK_OPEN_TRANSACTION))
        .await
    {
        warn!("Rollback after trial execution failed: {:?}", e);
    }

    let output = outcome.map_err(|e| e.into_server_error(|d| ServerError::metadata(d.message)))?;
    Ok(output
        .result_sets
        .into_iter()
        .next()
        .map(|set| set.columns)
        .unwrap_or_default())
}

/// Fetch a procedure's module text, `None` when it does not exist or is
/// encrypted.
pub async fn get_procedure_definition(
    manager: &mut ConnectionManager,
    procedure: &str,
    schema: &str,
) -> Result<Option<String>, ServerError> {
    let query = r#"
        SELECT m.definition
        FROM sys.sql_modules m
        INNER JOIN sys.procedures p ON m.object_id = p.object_id
        INNER JOIN sys.schemas s ON p.schema_id = s.schema_id
        WHERE s.name = @schema AND p.name = @proc_name
    "#;

    let result = execute_query(
        manager,
        query,
        &params(&[("schema", schema), ("proc_name", procedure)]),
    )
    .await?;

    Ok(result
        .rows
        .first()
        .and_then(|row| extract_string(row, "definition")))
}

/// Search procedure names, descriptions and definitions across all schemas.
pub async fn search_stored_procedures(
    manager: &mut ConnectionManager,
    term: &str,
) -> Result<Vec<ProcedureSearchHit>, ServerError> {
    if term.trim().is_empty() {
        return Err(ServerError::invalid_input("Search term cannot be empty"));
    }

    let query = r#"
        SELECT
            p.name AS procedure_name,
            s.name AS schema_name,
            CAST(ISNULL(ep.value, '') AS NVARCHAR(MAX)) AS description,
            OBJECT_DEFINITION(p.object_id) AS procedure_definition
        FROM sys.procedures p
        INNER JOIN sys.schemas s ON p.schema_id = s.schema_id
        LEFT JOIN sys.extended_properties ep
            ON ep.major_id = p.object_id AND ep.minor_id = 0 AND ep.name = 'MS_Description'
        WHERE p.name LIKE @pattern
           OR CAST(ISNULL(ep.value, '') AS NVARCHAR(MAX)) LIKE @pattern
           OR OBJECT_DEFINITION(p.object_id) LIKE @pattern
        ORDER BY s.name, p.name
    "#;

    let like = format!("%{}%", term);
    let result = execute_query(manager, query, &params(&[("pattern", &like)])).await?;

    let hits: Vec<ProcedureSearchHit> = result
        .rows
        .iter()
        .map(|row| {
            let definition = extract_string(row, "procedure_definition").unwrap_or_default();
            ProcedureSearchHit {
                schema: extract_string(row, "schema_name").unwrap_or_default(),
                name: extract_string(row, "procedure_name").unwrap_or_default(),
                description: extract_string(row, "description").unwrap_or_default(),
                snippet: snippet_around(&definition, term, SEARCH_SNIPPET_RADIUS),
            }
        })
        .collect();

    debug!("Found {} stored procedures matching '{}'", hits.len(), term);
    Ok(hits)
}

/// Text around the first case-insensitive occurrence of `term`, wrapped in
/// ellipses. Empty when the term does not occur.
pub(crate) fn snippet_around(text: &str, term: &str, radius: usize) -> String {
    let haystack: Vec<char> = text.chars().collect();
    let needle: Vec<char> = term.chars().collect();
    if needle.is_empty() || needle.len() > haystack.len() {
        return String::new();
    }

    let same = |a: char, b: char| a == b || a.to_lowercase().eq(b.to_lowercase());
    let position = (0..=haystack.len() - needle.len()).find(|&start| {
        needle
            .iter()
            .enumerate()
            .all(|(offset, &n)| same(haystack[start + offset], n))
    });

    match position {
        Some(pos) => {
            let start = pos.saturating_sub(radius);
            let end = (pos + needle.len() + radius).min(haystack.len());
            format!("...{}...", haystack[start..end].iter().collect::<String>())
        }
        None => String::new(),
    }
}

fn extract_string(row: &ResultRow, column: &str) -> Option<String> {
    row.get(column)?.to_text()
}

fn extract_i64(row: &ResultRow, column: &str) -> Option<i64> {
    row.get(column)?.as_i64()
}

fn extract_bool(row: &ResultRow, column: &str) -> Option<bool> {
    row.get(column)?.as_bool()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::driver::{
        ConnectOptions, Credentials, DriverError, StatementOutput,
    };
    use crate::database::testing::{output, result_set, text, ScriptedConnector};
    use crate::database::types::SqlValue;
    use std::sync::Arc;
    use std::time::Duration;

    async fn connected(connector: &ScriptedConnector) -> ConnectionManager {
        let mut manager = ConnectionManager::new(Arc::new(connector.clone()));
        manager
            .connect(ConnectOptions {
                server: "db".to_string(),
                database: "Sales".to_string(),
                credentials: Credentials::from_parts(Some("sa"), Some("pw")),
                encrypt: false,
                trust_server_certificate: true,
                connect_timeout: Duration::from_secs(5),
            })
            .await
            .unwrap();
        manager
    }

    fn fk_row(schema: &str, table: &str, local: &str, remote: &str, fk: &str) -> Vec<SqlValue> {
        vec![text(schema), text(table), text(remote), text(local), text(fk)]
    }

    fn related_tables_connector() -> ScriptedConnector {
        ScriptedConnector::new(|stmt| {
            let sql = stmt.sql.as_str();
            if sql.contains("ON fk.parent_object_id = t.object_id") {
                Ok(output(vec![result_set(
                    &[
                        "referenced_schema",
                        "referenced_table",
                        "referenced_column",
                        "referencing_column",
                        "foreign_key_name",
                    ],
                    vec![
                        fk_row("dbo", "Customers", "CustomerId", "Id", "FK_Orders_Customers"),
                        fk_row("dbo", "Secret", "SecretId", "Id", "FK_Orders_Secret"),
                    ],
                )]))
            } else if sql.contains("ON fk.referenced_object_id = t.object_id") {
                Ok(output(vec![result_set(
                    &[
                        "referencing_schema",
                        "referencing_table",
                        "referencing_column",
                        "referenced_column",
                        "foreign_key_name",
                    ],
                    vec![vec![
                        text("dbo"),
                        text("OrderLines"),
                        text("OrderId"),
                        text("Id"),
                        text("FK_OrderLines_Orders"),
                    ]],
                )]))
            } else if sql.contains("[dbo].[Secret]") {
                Err(DriverError::server(
                    229,
                    "The SELECT permission was denied on the object 'Secret'.",
                ))
            } else if sql.starts_with("SELECT COUNT_BIG(*)") {
                Ok(output(vec![result_set(
                    &["row_count"],
                    vec![vec![SqlValue::I64(42)]],
                )]))
            } else {
                Ok(StatementOutput::default())
            }
        })
    }

    #[tokio::test]
    async fn test_related_tables_tolerates_count_failure() {
        let connector = related_tables_connector();
        let mut manager = connected(&connector).await;

        let related = get_related_tables(&mut manager, "Orders", "dbo").await.unwrap();
        assert_eq!(related.table, "dbo.Orders");
        assert_eq!(related.related_tables.len(), 3);

        let unknown: Vec<&RelatedTableEdge> = related
            .related_tables
            .iter()
            .filter(|e| e.row_count == RowCount::Unknown)
            .collect();
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].table, "Secret");

        assert_eq!(related.related_tables[0].relationship, Relationship::Parent);
        assert_eq!(related.related_tables[0].local_column, "CustomerId");
        assert_eq!(related.related_tables[0].remote_column, "Id");
        assert_eq!(related.related_tables[0].row_count, RowCount::Known(42));

        let child = &related.related_tables[2];
        assert_eq!(child.relationship, Relationship::Child);
        assert_eq!(child.local_column, "Id");
        assert_eq!(child.remote_column, "OrderId");

        // the failed count did not take the connection down
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_related_tables_serialization() {
        let connector = related_tables_connector();
        let mut manager = connected(&connector).await;

        let related = get_related_tables(&mut manager, "Orders", "dbo").await.unwrap();
        let value = serde_json::to_value(&related).unwrap();
        assert_eq!(value["related_tables"][0]["rowCount"], json!(42));
        assert_eq!(value["related_tables"][1]["rowCount"], json!("Unknown"));
        assert_eq!(value["related_tables"][2]["relationship"], json!("Child"));
        assert_eq!(value["related_tables"][0]["foreignKey"], json!("FK_Orders_Customers"));
    }

    #[tokio::test]
    async fn test_describe_table_groups_indexes() {
        let connector = ScriptedConnector::new(|stmt| {
            if stmt.sql.contains("INFORMATION_SCHEMA.COLUMNS") {
                Ok(output(vec![result_set(
                    &[
                        "COLUMN_NAME",
                        "DATA_TYPE",
                        "IS_NULLABLE",
                        "COLUMN_DEFAULT",
                        "CHARACTER_MAXIMUM_LENGTH",
                        "NUMERIC_PRECISION",
                        "NUMERIC_SCALE",
                        "ORDINAL_POSITION",
                    ],
                    vec![
                        vec![
                            text("Id"),
                            text("int"),
                            text("NO"),
                            SqlValue::Null,
                            SqlValue::Null,
                            SqlValue::U8(10),
                            SqlValue::I32(0),
                            SqlValue::I32(1),
                        ],
                        vec![
                            text("Email"),
                            text("nvarchar"),
                            text("YES"),
                            SqlValue::Null,
                            SqlValue::I32(256),
                            SqlValue::Null,
                            SqlValue::Null,
                            SqlValue::I32(2),
                        ],
                    ],
                )]))
            } else {
                Ok(output(vec![result_set(
                    &["index_name", "index_type", "is_unique", "is_primary_key", "column_name"],
                    vec![
                        vec![text("IX_Name"), text("NONCLUSTERED"), SqlValue::Bool(false), SqlValue::Bool(false), text("Last")],
                        vec![text("IX_Name"), text("NONCLUSTERED"), SqlValue::Bool(false), SqlValue::Bool(false), text("First")],
                        vec![text("PK_Users"), text("CLUSTERED"), SqlValue::Bool(true), SqlValue::Bool(true), text("Id")],
                    ],
                )]))
            }
        });
        let mut manager = connected(&connector).await;

        let table = describe_table(&mut manager, "Users", "dbo").await.unwrap();
        assert_eq!(table.table, "dbo.Users");
        assert_eq!(table.columns.len(), 2);
        assert!(!table.columns[0].nullable);
        assert!(table.columns[1].nullable);
        assert_eq!(table.columns[1].max_length, Some(256));
        assert_eq!(table.indexes.len(), 2);
        assert_eq!(table.indexes[0].columns, vec!["Last", "First"]);
        assert_eq!(table.primary_key, vec!["Id"]);
    }

    #[tokio::test]
    async fn test_describe_table_without_indexes() {
        let connector = ScriptedConnector::new(|_| Ok(output(vec![result_set(&["x"], Vec::new())])));
        let mut manager = connected(&connector).await;

        let table = describe_table(&mut manager, "Heap", "dbo").await.unwrap();
        assert!(table.indexes.is_empty());
        assert!(table.primary_key.is_empty());
    }

    #[tokio::test]
    async fn test_list_stored_procedures_cap_and_pattern() {
        let connector = ScriptedConnector::empty();
        let mut manager = connected(&connector).await;

        list_stored_procedures(&mut manager, "dbo", None).await.unwrap();
        list_stored_procedures(&mut manager, "dbo", Some("Report")).await.unwrap();

        let executed = connector.executed.lock();
        assert!(executed[0].sql.contains("SELECT TOP 10"));
        assert!(!executed[1].sql.contains("TOP"));
        assert_eq!(
            executed[1].values,
            vec![
                SqlValue::String("dbo".to_string()),
                SqlValue::String("%Report%".to_string())
            ]
        );
    }

    fn parameter_rows() -> StatementOutput {
        output(vec![result_set(
            &[
                "parameter_name",
                "data_type",
                "max_length",
                "precision",
                "scale",
                "is_output",
                "has_default_value",
                "default_value",
            ],
            vec![vec![
                text("@CustomerId"),
                text("int"),
                SqlValue::I16(4),
                SqlValue::U8(10),
                SqlValue::U8(0),
                SqlValue::Bool(false),
                SqlValue::Bool(false),
                SqlValue::Null,
            ]],
        )])
    }

    fn procedure_connector() -> ScriptedConnector {
        ScriptedConnector::new(|stmt| {
            let sql = stmt.sql.as_str();
            if sql.contains("FROM sys.parameters") {
                Ok(parameter_rows())
            } else if sql.contains("sys.sql_modules") {
                Ok(output(vec![result_set(
                    &["definition"],
                    vec![vec![text("CREATE PROCEDURE dbo.usp_Orders AS SELECT 1")]],
                )]))
            } else if sql.starts_with("BEGIN TRANSACTION") {
                Ok(output(vec![result_set(&["OrderId", "Total"], Vec::new())]))
            } else {
                Ok(StatementOutput::default())
            }
        })
    }

    #[tokio::test]
    async fn test_procedure_details_without_discovery_never_executes() {
        let connector = procedure_connector();
        let mut manager = connected(&connector).await;

        let details = get_procedure_details(
            &mut manager,
            "usp_Orders",
            "dbo",
            ReturnColumnDiscovery::Skip,
            true,
        )
        .await
        .unwrap();

        assert_eq!(details.name, "dbo.usp_Orders");
        assert_eq!(details.parameters.len(), 1);
        assert_eq!(details.parameters[0].name, "@CustomerId");
        assert!(details.has_definition);
        assert!(details.return_columns.is_empty());
        assert!(details.return_columns_note.is_some());
        assert!(!connector
            .executed_sql()
            .iter()
            .any(|sql| sql.contains("EXEC")));
    }

    #[tokio::test]
    async fn test_procedure_details_discovery_requires_opt_in() {
        let connector = procedure_connector();
        let mut manager = connected(&connector).await;

        let details = get_procedure_details(
            &mut manager,
            "usp_Orders",
            "dbo",
            ReturnColumnDiscovery::TrialExecution,
            false,
        )
        .await
        .unwrap();

        assert!(details.return_columns.is_empty());
        assert!(details
            .return_columns_note
            .unwrap()
            .contains("DB_ALLOW_UNSAFE_INTROSPECTION"));
        assert!(!connector
            .executed_sql()
            .iter()
            .any(|sql| sql.contains("EXEC")));
    }

    #[tokio::test]
    async fn test_trial_execution_rolls_back() {
        let connector = procedure_connector();
        let mut manager = connected(&connector).await;

        let details = get_procedure_details(
            &mut manager,
            "usp_Orders",
            "dbo",
            ReturnColumnDiscovery::TrialExecution,
            true,
        )
        .await
        .unwrap();

        let names: Vec<&str> = details.return_columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["OrderId", "Total"]);
        assert!(details.return_columns_note.is_none());

        let executed = connector.executed_sql();
        let trial = executed
            .iter()
            .position(|sql| sql.starts_with("BEGIN TRANSACTION"))
            .unwrap();
        assert!(executed[trial].contains("EXEC [dbo].[usp_Orders] @CustomerId = NULL"));
        assert_eq!(executed[trial + 1], ROLLBACK_OPEN_TRANSACTION);
    }

    #[tokio::test]
    async fn test_trial_execution_failure_becomes_note() {
        let connector = ScriptedConnector::new(|stmt| {
            let sql = stmt.sql.as_str();
            if sql.contains("FROM sys.parameters") {
                Ok(parameter_rows())
            } else if sql.starts_with("BEGIN TRANSACTION") {
                Err(DriverError::server(515, "Cannot insert the value NULL"))
            } else {
                Ok(StatementOutput::default())
            }
        });
        let mut manager = connected(&connector).await;

        let details = get_procedure_details(
            &mut manager,
            "usp_Orders",
            "dbo",
            ReturnColumnDiscovery::TrialExecution,
            true,
        )
        .await
        .unwrap();

        assert!(details.return_columns.is_empty());
        assert!(details
            .return_columns_note
            .unwrap()
            .contains("Cannot insert the value NULL"));
        assert!(!details.has_definition);
        assert!(connector
            .executed_sql()
            .contains(&ROLLBACK_OPEN_TRANSACTION.to_string()));
    }

    #[tokio::test]
    async fn test_search_builds_snippets() {
        let connector = ScriptedConnector::new(|_| {
            Ok(output(vec![result_set(
                &["procedure_name", "schema_name", "description", "procedure_definition"],
                vec![vec![
                    text("usp_Audit"),
                    text("dbo"),
                    text(""),
                    text("CREATE PROCEDURE usp_Audit AS INSERT INTO AuditLog VALUES (1)"),
                ]],
            )]))
        });
        let mut manager = connected(&connector).await;

        let hits = search_stored_procedures(&mut manager, "auditlog").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "usp_Audit");
        assert!(hits[0].snippet.contains("AuditLog"));
        assert!(hits[0].snippet.starts_with("..."));
    }

    #[test]
    fn test_snippet_around() {
        assert_eq!(snippet_around("abcHELLOdef", "hello", 2), "...bcHELLOde...");
        assert_eq!(snippet_around("hello", "HELLO", 100), "...hello...");
        assert_eq!(snippet_around("nothing here", "absent", 10), "");
        assert_eq!(snippet_around("short", "longer than text", 10), "");
    }

    #[test]
    fn test_trial_statement_rejects_odd_parameter_names() {
        let parameter = ParameterDescriptor {
            name: "@x; DROP TABLE t".to_string(),
            data_type: "int".to_string(),
            max_length: None,
            precision: None,
            scale: None,
            is_output: false,
            has_default: false,
            default_value: None,
        };
        assert!(trial_execution_statement("p", "dbo", &[parameter]).is_err());
    }
}
