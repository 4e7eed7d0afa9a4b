//! Scripted in-memory driver for unit tests.

use crate::database::driver::{
    BoundStatement, ColumnMeta, ConnectOptions, Connector, DriverError, RawResultSet,
    SqlConnection, StatementOutput,
};
use crate::database::types::SqlValue;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) type Handler =
    Arc<dyn Fn(&BoundStatement) -> Result<StatementOutput, DriverError> + Send + Sync>;

/// Connector whose connections answer every statement through one handler.
#[derive(Clone)]
pub(crate) struct ScriptedConnector {
    handler: Handler,
    connect_error: Option<DriverError>,
    pub live: Arc<AtomicUsize>,
    pub opened: Arc<AtomicUsize>,
    pub executed: Arc<Mutex<Vec<BoundStatement>>>,
}

impl ScriptedConnector {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&BoundStatement) -> Result<StatementOutput, DriverError> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            connect_error: None,
            live: Arc::new(AtomicUsize::new(0)),
            opened: Arc::new(AtomicUsize::new(0)),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Connector answering every statement with an empty output.
    pub fn empty() -> Self {
        Self::new(|_| Ok(StatementOutput::default()))
    }

    /// Connector whose connect attempts always fail.
    pub fn failing(error: DriverError) -> Self {
        let mut connector = Self::empty();
        connector.connect_error = Some(error);
        connector
    }

    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.executed.lock().iter().map(|s| s.sql.clone()).collect()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _options: &ConnectOptions) -> Result<Box<dyn SqlConnection>, DriverError> {
        if let Some(err) = &self.connect_error {
            return Err(err.clone());
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            handler: self.handler.clone(),
            live: self.live.clone(),
            executed: self.executed.clone(),
        }))
    }
}

struct ScriptedConnection {
    handler: Handler,
    live: Arc<AtomicUsize>,
    executed: Arc<Mutex<Vec<BoundStatement>>>,
}

#[async_trait]
impl SqlConnection for ScriptedConnection {
    async fn execute(&mut self, statement: &BoundStatement) -> Result<StatementOutput, DriverError> {
        self.executed.lock().push(statement.clone());
        (self.handler)(statement)
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Build a result set with `nvarchar` columns.
pub(crate) fn result_set(columns: &[&str], rows: Vec<Vec<SqlValue>>) -> RawResultSet {
    RawResultSet {
        columns: columns
            .iter()
            .map(|name| ColumnMeta {
                name: name.to_string(),
                sql_type: "nvarchar".to_string(),
            })
            .collect(),
        rows,
    }
}

/// Output holding the given result sets.
pub(crate) fn output(result_sets: Vec<RawResultSet>) -> StatementOutput {
    StatementOutput {
        result_sets,
        rows_affected: None,
    }
}

pub(crate) fn text(value: &str) -> SqlValue {
    SqlValue::String(value.to_string())
}
