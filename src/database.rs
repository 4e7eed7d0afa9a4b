//! Database connectivity, query execution and schema introspection.

mod connection;
pub mod driver;
pub mod metadata;
mod params;
mod procedure;
mod query;
pub mod statement;
pub mod tds;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub use connection::{ConnectionInfo, ConnectionManager, ExecuteError};
pub use driver::{
    AuthMode, BoundStatement, ColumnMeta, ConnectOptions, Connector, Credentials, DriverError,
    DriverErrorKind, RawResultSet, SqlConnection, StatementOutput,
};
pub use metadata::{
    ColumnDescriptor, IndexDescriptor, ParameterDescriptor, ProcedureDescriptor,
    ProcedureSearchHit, RelatedTableEdge, RelatedTables, Relationship, ReturnColumnDiscovery,
    RowCount, TableDescriptor,
};
pub use params::bind_named;
pub use procedure::{build_exec_statement, execute_stored_procedure, ProcedureResult};
pub use query::{execute_query, truncate_for_log, QueryResult, ResultRow, ResultSet};
pub use tds::TdsConnector;
pub use types::{SqlValue, TypeMapper};
