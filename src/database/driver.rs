//! Driver abstraction for SQL Server connections.
//!
//! The service talks to the database only through these two traits, so the
//! executors and introspection queries are independent of the wire driver.

use crate::database::types::SqlValue;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// How to authenticate against SQL Server.
#[derive(Clone)]
pub enum Credentials {
    /// Windows integrated authentication
    Integrated,
    /// SQL Server login
    SqlLogin { user: String, password: String },
}

impl Credentials {
    /// Pick SQL auth only when both user and password are present and non-empty.
    pub fn from_parts(user: Option<&str>, password: Option<&str>) -> Self {
        match (user, password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Credentials::SqlLogin {
                user: u.to_string(),
                password: p.to_string(),
            },
            _ => Credentials::Integrated,
        }
    }

    /// Authentication mode without any secret material.
    pub fn auth_mode(&self) -> AuthMode {
        match self {
            Credentials::Integrated => AuthMode::Windows,
            Credentials::SqlLogin { .. } => AuthMode::Sql,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Integrated => write!(f, "Integrated"),
            Credentials::SqlLogin { user, .. } => f
                .debug_struct("SqlLogin")
                .field("user", user)
                .field("password", &"***")
                .finish(),
        }
    }
}

/// Authentication mode of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Windows,
    Sql,
}

/// Everything needed to open one connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub server: String,
    pub database: String,
    pub credentials: Credentials,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    pub connect_timeout: Duration,
}

/// A SQL statement with positional parameters `@P1..@Pn`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

impl BoundStatement {
    /// A statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            values: Vec::new(),
        }
    }

    /// Append a positional value and return its placeholder.
    pub fn push(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        format!("@P{}", self.values.len())
    }
}

/// Name and type of one result column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "dataType")]
    pub sql_type: String,
}

/// One result set as returned by the driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResultSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// Everything a statement produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementOutput {
    /// Result sets in the order the server sent them, empty ones included.
    pub result_sets: Vec<RawResultSet>,
    /// Driver-reported affected-row count, when the driver reports one.
    pub rows_affected: Option<u64>,
}

impl StatementOutput {
    /// First result set, if any.
    pub fn first(&self) -> Option<&RawResultSet> {
        self.result_sets.first()
    }

    /// First column of the first row of the first result set.
    pub fn scalar(&self) -> Option<&SqlValue> {
        self.first()
            .and_then(|set| set.rows.first())
            .and_then(|row| row.first())
    }
}

/// Category of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The server rejected the statement or login
    Server,
    /// Network or protocol failure; the connection is unusable afterwards
    Io,
    /// Connection establishment exceeded its timeout
    Timeout,
    /// Anything else reported by the driver
    Other,
}

/// Error raised by a [`Connector`] or [`SqlConnection`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    /// SQL Server error number, for server errors
    pub code: Option<u32>,
    pub message: String,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn server(code: u32, message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Server,
            code: Some(code),
            message: message.into(),
        }
    }

    /// Whether the connection that raised this error must be discarded.
    pub fn is_connection_lost(&self) -> bool {
        self.kind == DriverErrorKind::Io
    }
}

/// Opens connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn SqlConnection>, DriverError>;
}

/// One open database connection.
#[async_trait]
pub trait SqlConnection: Send {
    /// Run a statement and eagerly collect every result set it produces.
    async fn execute(&mut self, statement: &BoundStatement) -> Result<StatementOutput, DriverError>;

    /// Close the connection.
    async fn close(self: Box<Self>) -> Result<(), DriverError>;
}
