//! The database tool service.
//!
//! One explicitly constructed `DatabaseService` is shared (as `Arc`) by the MCP
//! server, the chat loop and the shutdown path. Its single connection sits
//! behind a mutex that every operation holds for its whole duration, so calls
//! are serialized through the one handle.

use crate::config::Config;
use crate::database::metadata::{self, ReturnColumnDiscovery};
use crate::database::{
    bind_named, execute_query, execute_stored_procedure, ConnectOptions, ConnectionInfo,
    ConnectionManager, Connector, Credentials, ProcedureDescriptor, ProcedureResult,
    ProcedureSearchHit, QueryResult, RelatedTables, ResultRow, TableDescriptor,
};
use crate::error::ServerError;
use crate::templates::{TemplateExecution, TemplateResolver};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Shared service handle.
pub type SharedService = Arc<DatabaseService>;

/// Connection lifecycle plus every typed database operation.
pub struct DatabaseService {
    config: Config,
    manager: Mutex<ConnectionManager>,
    templates: TemplateResolver,
}

impl DatabaseService {
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Self {
        let templates = TemplateResolver::from_config(&config.templates);
        Self {
            config,
            manager: Mutex::new(ConnectionManager::new(connector)),
            templates,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Schema used when a caller does not name one.
    pub fn default_schema(&self) -> &str {
        &self.config.database.default_schema
    }

    /// Connect, replacing any existing connection.
    ///
    /// SQL authentication is used when both `user` and `password` are non-empty,
    /// integrated authentication otherwise.
    pub async fn connect(
        &self,
        server: &str,
        database: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<String, ServerError> {
        if server.trim().is_empty() || database.trim().is_empty() {
            return Err(ServerError::invalid_input(
                "Both server and database are required",
            ));
        }

        let options = ConnectOptions {
            server: server.trim().to_string(),
            database: database.trim().to_string(),
            credentials: Credentials::from_parts(user, password),
            encrypt: self.config.database.encrypt,
            trust_server_certificate: self.config.database.trust_server_certificate,
            connect_timeout: self.config.database.connect_timeout,
        };

        self.manager.lock().await.connect(options).await
    }

    /// Close the connection; a no-op when disconnected.
    pub async fn disconnect(&self) -> String {
        self.manager.lock().await.disconnect().await
    }

    /// Connect with the configured defaults when `DB_SERVER` and `DB_NAME` are set.
    ///
    /// Returns `Ok(None)` when no default connection is configured.
    pub async fn auto_connect(&self) -> Result<Option<String>, ServerError> {
        let db = &self.config.database;
        let (Some(server), Some(database)) = (db.server.as_deref(), db.database.as_deref()) else {
            return Ok(None);
        };

        info!("Auto-connecting to database {} on server {}", database, server);
        self.connect(server, database, db.user.as_deref(), db.password.as_deref())
            .await
            .map(Some)
    }

    /// Facts about the live connection, if any.
    pub async fn status(&self) -> Option<ConnectionInfo> {
        self.manager.lock().await.info().cloned()
    }

    pub async fn execute_query(
        &self,
        sql: &str,
        parameters: &Map<String, Value>,
    ) -> Result<QueryResult, ServerError> {
        let mut manager = self.manager.lock().await;
        execute_query(&mut manager, sql, parameters).await
    }

    pub async fn execute_stored_procedure(
        &self,
        procedure: &str,
        parameters: &Map<String, Value>,
    ) -> Result<ProcedureResult, ServerError> {
        let mut manager = self.manager.lock().await;
        execute_stored_procedure(&mut manager, procedure, parameters).await
    }

    pub async fn list_tables(&self, schema: &str) -> Result<Vec<ResultRow>, ServerError> {
        let mut manager = self.manager.lock().await;
        metadata::list_tables(&mut manager, schema).await
    }

    pub async fn describe_table(
        &self,
        table: &str,
        schema: &str,
    ) -> Result<TableDescriptor, ServerError> {
        let mut manager = self.manager.lock().await;
        metadata::describe_table(&mut manager, table, schema).await
    }

    pub async fn get_related_tables(
        &self,
        table: &str,
        schema: &str,
    ) -> Result<RelatedTables, ServerError> {
        let mut manager = self.manager.lock().await;
        metadata::get_related_tables(&mut manager, table, schema).await
    }

    pub async fn list_stored_procedures(
        &self,
        schema: &str,
        pattern: Option<&str>,
    ) -> Result<Vec<ResultRow>, ServerError> {
        let mut manager = self.manager.lock().await;
        metadata::list_stored_procedures(&mut manager, schema, pattern).await
    }

    /// Procedure parameters, plus result columns when both the caller and the
    /// configuration allow trial execution.
    pub async fn get_procedure_details(
        &self,
        procedure: &str,
        schema: &str,
        discovery: ReturnColumnDiscovery,
    ) -> Result<ProcedureDescriptor, ServerError> {
        let mut manager = self.manager.lock().await;
        metadata::get_procedure_details(
            &mut manager,
            procedure,
            schema,
            discovery,
            self.config.database.allow_unsafe_introspection,
        )
        .await
    }

    pub async fn get_procedure_definition(
        &self,
        procedure: &str,
        schema: &str,
    ) -> Result<Option<String>, ServerError> {
        let mut manager = self.manager.lock().await;
        metadata::get_procedure_definition(&mut manager, procedure, schema).await
    }

    pub async fn search_stored_procedures(
        &self,
        term: &str,
    ) -> Result<Vec<ProcedureSearchHit>, ServerError> {
        let mut manager = self.manager.lock().await;
        metadata::search_stored_procedures(&mut manager, term).await
    }

    /// Load a SQL template, bind its `@name` parameters and execute it.
    pub async fn generate_query_from_template(
        &self,
        template_file: &str,
        parameters: &Map<String, Value>,
    ) -> Result<TemplateExecution, ServerError> {
        let mut manager = self.manager.lock().await;
        manager.ensure_connected()?;

        let template = self.templates.resolve(template_file).await?;
        let final_sql = bind_named(&template.sql, parameters).sql;
        let execution_results = execute_query(&mut manager, &template.sql, parameters).await?;

        Ok(TemplateExecution {
            template_file: template_file.to_string(),
            template_path: template.path,
            template_sql: template.sql,
            final_sql,
            parameters: parameters.clone(),
            execution_results,
            locations_checked: template.locations_checked,
        })
    }

    /// Release the connection. Safe to call more than once.
    pub async fn shutdown(&self) {
        let mut manager = self.manager.lock().await;
        if manager.is_connected() {
            info!("Closing database connection");
            manager.disconnect().await;
        } else {
            debug!("Shutdown requested with no open connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::{output, result_set, ScriptedConnector};
    use crate::database::{AuthMode, SqlValue};
    use serde_json::json;
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn config(pairs: &[(&str, &str)], working_dir: PathBuf) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(working_dir, |k| vars.get(k).cloned()).unwrap()
    }

    #[tokio::test]
    async fn test_auto_connect_without_defaults_is_noop() {
        let connector = ScriptedConnector::empty();
        let service = DatabaseService::new(
            config(&[], PathBuf::from("/work")),
            Arc::new(connector.clone()),
        );

        assert_eq!(service.auto_connect().await.unwrap(), None);
        assert!(service.status().await.is_none());
        assert_eq!(connector.live_connections(), 0);
    }

    #[tokio::test]
    async fn test_auto_connect_uses_configured_login() {
        let connector = ScriptedConnector::empty();
        let service = DatabaseService::new(
            config(
                &[
                    ("DB_SERVER", "db1"),
                    ("DB_NAME", "Sales"),
                    ("DB_USER", "app"),
                    ("DB_PASSWORD", "secret"),
                ],
                PathBuf::from("/work"),
            ),
            Arc::new(connector),
        );

        let message = service.auto_connect().await.unwrap().unwrap();
        assert_eq!(message, "Successfully connected to database Sales on server db1");
        assert_eq!(service.status().await.unwrap().auth_mode, AuthMode::Sql);
    }

    #[tokio::test]
    async fn test_connect_requires_server_and_database() {
        let service = DatabaseService::new(
            config(&[], PathBuf::from("/work")),
            Arc::new(ScriptedConnector::empty()),
        );
        assert!(matches!(
            service.connect("", "Sales", None, None).await,
            Err(ServerError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_releases_connection() {
        let connector = ScriptedConnector::empty();
        let service = DatabaseService::new(
            config(&[], PathBuf::from("/work")),
            Arc::new(connector.clone()),
        );
        service.connect("db1", "Sales", None, None).await.unwrap();
        assert_eq!(connector.live_connections(), 1);

        service.shutdown().await;
        service.shutdown().await;
        assert_eq!(connector.live_connections(), 0);
        assert!(service.status().await.is_none());
    }

    #[tokio::test]
    async fn test_template_binds_one_parameter() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("templates")).unwrap();
        fs::write(
            root.path().join("templates/by_id.sql"),
            "SELECT * FROM T WHERE id=@id",
        )
        .unwrap();
        fs::write(root.path().join("by_id.sql"), "SELECT 'wrong copy'").unwrap();

        let connector = ScriptedConnector::new(|_| {
            Ok(output(vec![result_set(&["id"], vec![vec![SqlValue::I32(5)]])]))
        });
        let service = DatabaseService::new(
            config(&[], root.path().to_path_buf()),
            Arc::new(connector.clone()),
        );
        service.connect("db1", "Sales", None, None).await.unwrap();

        let params = json!({"id": 5}).as_object().cloned().unwrap();
        let outcome = service
            .generate_query_from_template("by_id.sql", &params)
            .await
            .unwrap();

        assert_eq!(outcome.template_sql, "SELECT * FROM T WHERE id=@id");
        assert_eq!(outcome.final_sql, "SELECT * FROM T WHERE id=@P1");
        assert_eq!(outcome.execution_results.rows.len(), 1);
        assert_eq!(outcome.locations_checked.len(), 6);

        let executed = connector.executed.lock();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].values, vec![SqlValue::I64(5)]);

        let value = serde_json::to_value(&outcome).unwrap();
        for key in [
            "templateFile",
            "templatePath",
            "templateSql",
            "finalSql",
            "parameters",
            "executionResults",
            "locationsChecked",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn test_template_requires_connection() {
        let service = DatabaseService::new(
            config(&[], PathBuf::from("/work")),
            Arc::new(ScriptedConnector::empty()),
        );
        assert!(matches!(
            service
                .generate_query_from_template("any.sql", &Map::new())
                .await,
            Err(ServerError::NotConnected)
        ));
    }
}
