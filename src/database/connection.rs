//! Single-connection lifecycle management.
//!
//! At most one live connection exists per manager. Connecting again closes the
//! previous handle first; a connection-level driver failure drops the handle so
//! later calls report "not connected" until the caller reconnects.

use crate::database::driver::{
    AuthMode, BoundStatement, ConnectOptions, Connector, DriverError, SqlConnection,
    StatementOutput,
};
use crate::error::ServerError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Public facts about the live connection. Never carries credentials.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub server: String,
    pub database: String,
    pub auth_mode: AuthMode,
}

struct ActiveConnection {
    conn: Box<dyn SqlConnection>,
    info: ConnectionInfo,
}

/// Failure of a statement run through the manager.
#[derive(Debug)]
pub enum ExecuteError {
    /// No live connection
    NotConnected,
    /// The driver rejected or failed the statement
    Driver(DriverError),
}

impl ExecuteError {
    /// Convert to a typed service error, wrapping driver failures with `wrap`.
    pub fn into_server_error(self, wrap: impl FnOnce(DriverError) -> ServerError) -> ServerError {
        match self {
            ExecuteError::NotConnected => ServerError::NotConnected,
            ExecuteError::Driver(e) => wrap(e),
        }
    }
}

/// Owns the one database handle of a service instance.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    active: Option<ActiveConnection>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            active: None,
        }
    }

    /// Open a connection, closing any existing one first.
    ///
    /// On failure the manager is left disconnected.
    pub async fn connect(&mut self, options: ConnectOptions) -> Result<String, ServerError> {
        if self.active.is_some() {
            debug!("Closing existing connection before reconnecting");
            self.disconnect().await;
        }

        let auth_mode = options.credentials.auth_mode();
        info!(
            "Connecting to database {} on server {} ({:?} auth)",
            options.database, options.server, auth_mode
        );

        let conn = self
            .connector
            .connect(&options)
            .await
            .map_err(|e| ServerError::connection_with_source(e.message.clone(), e))?;

        let message = format!(
            "Successfully connected to database {} on server {}",
            options.database, options.server
        );
        self.active = Some(ActiveConnection {
            conn,
            info: ConnectionInfo {
                server: options.server,
                database: options.database,
                auth_mode,
            },
        });
        Ok(message)
    }

    /// Close the connection. Calling this while disconnected is a no-op.
    pub async fn disconnect(&mut self) -> String {
        if let Some(active) = self.active.take() {
            if let Err(e) = active.conn.close().await {
                warn!("Error while closing connection: {}", e);
            }
            info!(
                "Disconnected from database {} on server {}",
                active.info.database, active.info.server
            );
        }
        "Successfully disconnected from database".to_string()
    }

    /// Fail with `NotConnected` unless a connection is live.
    pub fn ensure_connected(&self) -> Result<&ConnectionInfo, ServerError> {
        self.active
            .as_ref()
            .map(|a| &a.info)
            .ok_or(ServerError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.active.is_some()
    }

    pub fn info(&self) -> Option<&ConnectionInfo> {
        self.active.as_ref().map(|a| &a.info)
    }

    /// Run a statement on the live connection.
    pub async fn execute(&mut self, statement: &BoundStatement) -> Result<StatementOutput, ExecuteError> {
        let active = self.active.as_mut().ok_or(ExecuteError::NotConnected)?;

        match active.conn.execute(statement).await {
            Ok(output) => Ok(output),
            Err(e) => {
                if e.is_connection_lost() {
                    warn!("Connection lost, discarding handle: {}", e);
                    self.active = None;
                }
                Err(ExecuteError::Driver(e))
            }
        }
    }
}
