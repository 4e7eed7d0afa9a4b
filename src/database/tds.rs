//! SQL Server driver built on tiberius.
//!
//! Handles the full connection flow:
//! 1. Parses the server string (`host`, `host,port`, `host:port`, `host\instance`)
//! 2. Configures authentication and encryption
//! 3. Establishes the TCP connection and performs the TDS handshake under a timeout

use crate::constants::{APPLICATION_NAME, DEFAULT_SQL_PORT};
use crate::database::driver::{
    BoundStatement, ColumnMeta, ConnectOptions, Connector, Credentials, DriverError,
    DriverErrorKind, RawResultSet, SqlConnection, StatementOutput,
};
use crate::database::types::{SqlValue, TypeMapper};
use async_trait::async_trait;
use futures_util::stream::TryStreamExt;
use crate::database::statement::reports_row_count;
use tiberius::numeric::Numeric;
use tiberius::{
    AuthMethod, Client, Config, EncryptionLevel, Query, QueryItem, QueryStream, SqlBrowser,
};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

/// Type alias for a raw tiberius connection.
pub type RawConnection = Client<Compat<TcpStream>>;

/// Parsed server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: Option<u16>,
    pub instance: Option<String>,
}

impl ServerAddress {
    /// Parse `host`, `host,port`, `host:port` or `host\instance`.
    pub fn parse(server: &str) -> Result<Self, DriverError> {
        let server = server.trim().trim_start_matches("tcp:");
        if server.is_empty() {
            return Err(DriverError::new(DriverErrorKind::Other, "Server name is empty"));
        }

        if let Some((host, instance)) = server.split_once('\\') {
            let host = if host == "." || host.eq_ignore_ascii_case("(local)") {
                "localhost"
            } else {
                host
            };
            return Ok(Self {
                host: host.to_string(),
                port: None,
                instance: Some(instance.to_string()),
            });
        }

        let split = server.split_once(',').or_else(|| {
            // host:port, but leave bare IPv6 literals alone
            if server.matches(':').count() == 1 {
                server.split_once(':')
            } else {
                None
            }
        });

        match split {
            Some((host, port)) => {
                let port = port.trim().parse::<u16>().map_err(|_| {
                    DriverError::new(
                        DriverErrorKind::Other,
                        format!("Invalid port in server name '{}'", server),
                    )
                })?;
                Ok(Self {
                    host: host.trim().to_string(),
                    port: Some(port),
                    instance: None,
                })
            }
            None => Ok(Self {
                host: server.to_string(),
                port: None,
                instance: None,
            }),
        }
    }
}

/// Build a tiberius Config from connect options.
pub fn create_config(options: &ConnectOptions) -> Result<Config, DriverError> {
    let address = ServerAddress::parse(&options.server)?;
    let mut config = Config::new();

    config.host(&address.host);
    match (&address.instance, address.port) {
        (Some(instance), _) => config.instance_name(instance),
        (None, Some(port)) => config.port(port),
        (None, None) => config.port(DEFAULT_SQL_PORT),
    }

    config.database(&options.database);

    if options.encrypt {
        config.encryption(EncryptionLevel::Required);
    } else {
        config.encryption(EncryptionLevel::NotSupported);
    }
    if options.trust_server_certificate {
        config.trust_cert();
    }

    config.application_name(APPLICATION_NAME);

    match &options.credentials {
        Credentials::SqlLogin { user, password } => {
            config.authentication(AuthMethod::sql_server(user, password));
        }
        #[cfg(windows)]
        Credentials::Integrated => {
            config.authentication(AuthMethod::Integrated);
        }
        #[cfg(not(windows))]
        Credentials::Integrated => {
            return Err(DriverError::new(
                DriverErrorKind::Other,
                "Windows integrated authentication is only available on Windows; \
                 provide a user and password",
            ));
        }
    }

    Ok(config)
}

fn map_error(e: tiberius::error::Error) -> DriverError {
    use tiberius::error::Error;

    match &e {
        Error::Server(token) => DriverError::server(token.code(), token.message()),
        Error::Io { .. } | Error::Protocol(_) | Error::Tls(_) | Error::Routing { .. } => {
            DriverError::new(DriverErrorKind::Io, e.to_string())
        }
        _ => DriverError::new(DriverErrorKind::Other, e.to_string()),
    }
}

/// Opens tiberius connections.
#[derive(Debug, Default, Clone)]
pub struct TdsConnector;

impl TdsConnector {
    pub fn new() -> Self {
        Self
    }

    async fn open(config: Config) -> Result<RawConnection, DriverError> {
        // resolves named instances through SQL Browser, plain host:port otherwise
        let tcp = TcpStream::connect_named(&config).await.map_err(map_error)?;
        tcp.set_nodelay(true)
            .map_err(|e| DriverError::new(DriverErrorKind::Io, e.to_string()))?;

        Client::connect(config, tcp.compat_write())
            .await
            .map_err(map_error)
    }
}

#[async_trait]
impl Connector for TdsConnector {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn SqlConnection>, DriverError> {
        let config = create_config(options)?;
        debug!("Creating connection to {}", options.server);

        let client = tokio::time::timeout(options.connect_timeout, Self::open(config))
            .await
            .map_err(|_| {
                DriverError::new(
                    DriverErrorKind::Timeout,
                    format!(
                        "Connection to {} timed out after {} seconds",
                        options.server,
                        options.connect_timeout.as_secs()
                    ),
                )
            })??;

        debug!("Connection established successfully");
        Ok(Box::new(TdsConnection { client }))
    }
}

/// A live tiberius connection.
pub struct TdsConnection {
    client: RawConnection,
}

fn bind<'a>(query: &mut Query<'a>, value: &SqlValue) {
    match value.clone() {
        SqlValue::Null => query.bind(Option::<&str>::None),
        SqlValue::Bool(v) => query.bind(v),
        SqlValue::U8(v) => query.bind(v),
        SqlValue::I16(v) => query.bind(v),
        SqlValue::I32(v) => query.bind(v),
        SqlValue::I64(v) => query.bind(v),
        SqlValue::F32(v) => query.bind(v),
        SqlValue::F64(v) => query.bind(v),
        SqlValue::String(v) => query.bind(v),
        SqlValue::Bytes(v) => query.bind(v),
        SqlValue::Decimal(v) => query.bind(decimal_to_numeric(v)),
        SqlValue::Uuid(v) => query.bind(v),
        SqlValue::Date(v) => query.bind(v),
        SqlValue::Time(v) => query.bind(v),
        SqlValue::DateTime(v) => query.bind(v),
        SqlValue::DateTimeOffset(v) => query.bind(v),
    }
}

fn decimal_to_numeric(value: rust_decimal::Decimal) -> Numeric {
    // rust_decimal caps scale at 28, well inside u8
    Numeric::new_with_scale(value.mantissa(), value.scale() as u8)
}

/// Walk a query stream; each metadata item starts a new result set.
async fn collect_stream(mut stream: QueryStream<'_>) -> Result<Vec<RawResultSet>, DriverError> {
    let mut sets: Vec<RawResultSet> = Vec::new();

    while let Some(item) = stream.try_next().await.map_err(map_error)? {
        match item {
            QueryItem::Metadata(meta) => {
                sets.push(RawResultSet {
                    columns: meta
                        .columns()
                        .iter()
                        .map(|col| ColumnMeta {
                            name: col.name().to_string(),
                            sql_type: TypeMapper::sql_type_name(col).to_string(),
                        })
                        .collect(),
                    rows: Vec::new(),
                });
            }
            QueryItem::Row(row) => {
                if let Some(set) = sets.last_mut() {
                    let values = (0..set.columns.len())
                        .map(|idx| TypeMapper::extract_column(&row, idx))
                        .collect();
                    set.rows.push(values);
                }
            }
        }
    }

    Ok(sets)
}

#[async_trait]
impl SqlConnection for TdsConnection {
    async fn execute(&mut self, statement: &BoundStatement) -> Result<StatementOutput, DriverError> {
        if reports_row_count(&statement.sql) {
            let mut query = Query::new(statement.sql.as_str());
            for value in &statement.values {
                bind(&mut query, value);
            }
            let result = query.execute(&mut self.client).await.map_err(map_error)?;
            return Ok(StatementOutput {
                result_sets: Vec::new(),
                rows_affected: Some(result.total()),
            });
        }

        let stream = if statement.values.is_empty() {
            // plain batch, so BEGIN/ROLLBACK pairs are not wrapped in sp_executesql
            self.client
                .simple_query(statement.sql.as_str())
                .await
                .map_err(map_error)?
        } else {
            let mut query = Query::new(statement.sql.as_str());
            for value in &statement.values {
                bind(&mut query, value);
            }
            query.query(&mut self.client).await.map_err(map_error)?
        };

        Ok(StatementOutput {
            result_sets: collect_stream(stream).await?,
            rows_affected: None,
        })
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.client.close().await.map_err(map_error)
    }
}
