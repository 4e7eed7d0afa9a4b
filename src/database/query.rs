//! Query execution and result handling.

use crate::constants::LOG_QUERY_TRUNCATE_LENGTH;
use crate::database::connection::ConnectionManager;
use crate::database::driver::RawResultSet;
use crate::database::params::bind_named;
use crate::database::types::SqlValue;
use crate::error::ServerError;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::debug;

/// A single row of query results, keyed by column name in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    values: Vec<(String, SqlValue)>,
}

impl ResultRow {
    /// Pair column names with one row of values.
    ///
    /// A repeated column name keeps its first position and its last value.
    pub fn from_values(columns: &[String], values: Vec<SqlValue>) -> Self {
        let mut row = Self {
            values: Vec::with_capacity(columns.len()),
        };
        for (name, value) in columns.iter().zip(values) {
            match row.values.iter_mut().find(|(existing, _)| existing == name) {
                Some(slot) => slot.1 = value,
                None => row.values.push((name.clone(), value)),
            }
        }
        row
    }

    /// Get a value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Get a string value by column name.
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(SqlValue::as_str)
    }

    /// Column names of this row.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// One tabular result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    /// Column names in order.
    pub columns: Vec<String>,
    /// Rows as column-to-value mappings.
    pub data: Vec<ResultRow>,
}

impl ResultSet {
    /// Build rows once from the column list.
    pub fn from_raw(raw: RawResultSet) -> Self {
        let names: Vec<String> = raw.columns.into_iter().map(|c| c.name).collect();
        let data = raw
            .rows
            .into_iter()
            .map(|values| ResultRow::from_values(&names, values))
            .collect();

        // same collapsing as the rows, so every row has exactly these keys
        let mut columns: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if !columns.contains(&name) {
                columns.push(name);
            }
        }
        Self { columns, data }
    }
}

/// Result of `execute_query`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Column names in order.
    pub columns: Vec<String>,

    /// Result rows.
    pub rows: Vec<ResultRow>,

    /// Driver-reported count when positive, else the number of fetched rows.
    pub rows_affected: u64,
}

impl QueryResult {
    /// Create an empty query result.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Run a statement with `@name` parameters and return its first result set.
///
/// Rows are fetched eagerly. Driver errors surface as `QueryExecution` with the
/// driver's message.
pub async fn execute_query(
    manager: &mut ConnectionManager,
    sql: &str,
    parameters: &Map<String, Value>,
) -> Result<QueryResult, ServerError> {
    manager.ensure_connected()?;

    let statement = bind_named(sql, parameters);
    debug!(
        "Executing query ({} parameters): {}",
        statement.values.len(),
        truncate_for_log(&statement.sql, LOG_QUERY_TRUNCATE_LENGTH)
    );

    let output = manager.execute(&statement).await.map_err(|e| {
        e.into_server_error(|d| ServerError::query_error_with_code(d.message, d.code))
    })?;

    let reported = output.rows_affected.unwrap_or(0);
    let set = output
        .result_sets
        .into_iter()
        .next()
        .map(ResultSet::from_raw)
        .unwrap_or_default();

    let rows_affected = if reported > 0 {
        reported
    } else {
        set.data.len() as u64
    };

    debug!("Query completed: {} rows", set.data.len());

    Ok(QueryResult {
        columns: set.columns,
        rows: set.data,
        rows_affected,
    })
}

/// Truncate a string for logging purposes.
pub fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::driver::{
        ConnectOptions, Credentials, DriverError, StatementOutput,
    };
    use crate::database::testing::{output, result_set, text, ScriptedConnector};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    async fn connected(connector: &ScriptedConnector) -> ConnectionManager {
        let mut manager = ConnectionManager::new(Arc::new(connector.clone()));
        manager
            .connect(ConnectOptions {
                server: "db".to_string(),
                database: "Sales".to_string(),
                credentials: Credentials::from_parts(Some("sa"), Some("pw")),
                encrypt: true,
                trust_server_certificate: true,
                connect_timeout: Duration::from_secs(30),
            })
            .await
            .unwrap();
        manager
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_select_counts_fetched_rows() {
        let connector = ScriptedConnector::new(|_| {
            Ok(output(vec![result_set(
                &["id", "name"],
                vec![
                    vec![SqlValue::I32(1), text("Alice")],
                    vec![SqlValue::I32(2), text("Bob")],
                ],
            )]))
        });
        let mut manager = connected(&connector).await;

        let result = execute_query(&mut manager, "SELECT id, name FROM Users", &Map::new())
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows_affected, 2);
        assert_eq!(result.rows[1].get_str("name"), Some("Bob"));
    }

    #[tokio::test]
    async fn test_dml_uses_driver_count() {
        let connector = ScriptedConnector::new(|_| {
            Ok(StatementOutput {
                result_sets: Vec::new(),
                rows_affected: Some(3),
            })
        });
        let mut manager = connected(&connector).await;

        let result = execute_query(
            &mut manager,
            "UPDATE Users SET active = @active",
            &params(json!({"active": 1})),
        )
        .await
        .unwrap();
        assert!(result.columns.is_empty());
        assert_eq!(result.rows_affected, 3);
    }

    #[tokio::test]
    async fn test_parameters_are_bound_positionally() {
        let connector = ScriptedConnector::empty();
        let mut manager = connected(&connector).await;

        execute_query(
            &mut manager,
            "SELECT * FROM T WHERE id=@id",
            &params(json!({"id": 5})),
        )
        .await
        .unwrap();

        let executed = connector.executed.lock();
        assert_eq!(executed[0].sql, "SELECT * FROM T WHERE id=@P1");
        assert_eq!(executed[0].values, vec![SqlValue::I64(5)]);
    }

    #[tokio::test]
    async fn test_driver_error_surfaces_message() {
        let connector = ScriptedConnector::new(|_| {
            Err(DriverError::server(102, "Incorrect syntax near 'FROMM'."))
        });
        let mut manager = connected(&connector).await;

        let err = execute_query(&mut manager, "SELECT * FROMM T", &Map::new())
            .await
            .unwrap_err();
        match err {
            ServerError::QueryExecution {
                message,
                sql_error_code,
            } => {
                assert_eq!(message, "Incorrect syntax near 'FROMM'.");
                assert_eq!(sql_error_code, Some(102));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_connected() {
        let mut manager = ConnectionManager::new(Arc::new(ScriptedConnector::empty()));
        let err = execute_query(&mut manager, "SELECT 1", &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotConnected));
    }

    #[test]
    fn test_row_serializes_as_mapping() {
        let columns = vec!["id".to_string(), "created".to_string()];
        let row = ResultRow::from_values(&columns, vec![SqlValue::I32(1), SqlValue::Null]);
        assert_eq!(
            serde_json::to_value(&row).unwrap(),
            json!({"id": 1, "created": null})
        );
        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["id", "created"]);
    }

    #[tokio::test]
    async fn test_duplicate_column_names_collapse() {
        let connector = ScriptedConnector::new(|_| {
            Ok(output(vec![result_set(
                &["a", "b", "a"],
                vec![vec![SqlValue::I32(1), SqlValue::I32(2), SqlValue::I32(3)]],
            )]))
        });
        let mut manager = connected(&connector).await;

        let result = execute_query(&mut manager, "SELECT 1 AS a, 2 AS b, 3 AS a", &Map::new())
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["a", "b"]);
        assert_eq!(
            serde_json::to_value(&result.rows[0]).unwrap(),
            json!({"a": 3, "b": 2})
        );
        assert_eq!(result.rows[0].keys().collect::<Vec<_>>(), result.columns);
    }

    #[test]
    fn test_query_result_keys() {
        let value = serde_json::to_value(QueryResult::empty()).unwrap();
        assert_eq!(value, json!({"columns": [], "rows": [], "rowsAffected": 0}));
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(truncate_for_log("this is a long string", 10), "this is a ...");
    }
}
