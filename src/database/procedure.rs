//! Stored procedure execution with multi-result-set capture.

use crate::constants::LOG_QUERY_TRUNCATE_LENGTH;
use crate::database::connection::ConnectionManager;
use crate::database::driver::BoundStatement;
use crate::database::query::{truncate_for_log, ResultRow, ResultSet};
use crate::database::types::SqlValue;
use crate::error::ServerError;
use crate::security::escape_identifier;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::debug;

/// Every result set a procedure produced, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcedureResult {
    pub recordsets: Vec<ResultSet>,
}

impl ProcedureResult {
    /// Rows of the first result set, or empty.
    pub fn recordset(&self) -> &[ResultRow] {
        self.recordsets
            .first()
            .map(|set| set.data.as_slice())
            .unwrap_or_default()
    }

    /// Row count of the first result set.
    pub fn rows_affected(&self) -> usize {
        self.recordset().len()
    }
}

impl Serialize for ProcedureResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ProcedureResult", 3)?;
        state.serialize_field("recordsets", &self.recordsets)?;
        state.serialize_field("recordset", self.recordset())?;
        state.serialize_field("rowsAffected", &self.rows_affected())?;
        state.end()
    }
}

/// Build `EXEC <name> @k1 = @P1, @k2 = @P2, ...` in mapping order.
pub fn build_exec_statement(
    procedure: &str,
    parameters: &Map<String, Value>,
) -> Result<BoundStatement, ServerError> {
    let mut statement = BoundStatement::raw(format!("EXEC {}", escape_identifier(procedure)?));

    let mut assignments = Vec::with_capacity(parameters.len());
    for (key, value) in parameters {
        let name = parameter_name(key)?;
        let placeholder = statement.push(SqlValue::from_json(value));
        assignments.push(format!("@{} = {}", name, placeholder));
    }

    if !assignments.is_empty() {
        statement.sql.push(' ');
        statement.sql.push_str(&assignments.join(", "));
    }
    Ok(statement)
}

/// Validate a parameter name for interpolation into an EXEC statement.
pub(crate) fn parameter_name(key: &str) -> Result<&str, ServerError> {
    let name = key.strip_prefix('@').unwrap_or(key);
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '#' || c == '$');
    if valid {
        Ok(name)
    } else {
        Err(ServerError::invalid_input(format!(
            "Invalid stored procedure parameter name '{}'",
            key
        )))
    }
}

/// Execute a stored procedure and capture all of its result sets.
///
/// A failure discards any result sets read before it.
pub async fn execute_stored_procedure(
    manager: &mut ConnectionManager,
    procedure: &str,
    parameters: &Map<String, Value>,
) -> Result<ProcedureResult, ServerError> {
    manager.ensure_connected()?;

    let statement = build_exec_statement(procedure, parameters)?;
    debug!(
        "Executing procedure: {}",
        truncate_for_log(&statement.sql, LOG_QUERY_TRUNCATE_LENGTH)
    );

    let output = manager.execute(&statement).await.map_err(|e| {
        e.into_server_error(|d| ServerError::procedure_error(procedure, d.message, d.code))
    })?;

    let recordsets: Vec<ResultSet> = output
        .result_sets
        .into_iter()
        .map(ResultSet::from_raw)
        .collect();

    debug!("Procedure {} returned {} result sets", procedure, recordsets.len());
    Ok(ProcedureResult { recordsets })
}
