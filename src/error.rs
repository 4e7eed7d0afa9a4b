//! Error types for the SQL Server tools service.
//!
//! Every layer below the tool dispatcher raises a typed [`ServerError`]. The
//! dispatcher is the single boundary that turns these into `"Error: ..."` text.

use std::path::PathBuf;
use thiserror::Error;

/// Domain-specific errors for the tools service.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation needing a connection was invoked with none active.
    #[error("Database is not connected. Please connect first.")]
    NotConnected,

    /// Connect attempt failed
    #[error("Failed to connect to database: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution error, driver message kept verbatim
    #[error("Failed to execute query: {message}")]
    QueryExecution {
        message: String,
        sql_error_code: Option<u32>,
    },

    /// Stored procedure execution error, driver message kept verbatim
    #[error("Failed to execute stored procedure {procedure}: {message}")]
    ProcedureExecution {
        procedure: String,
        message: String,
        sql_error_code: Option<u32>,
    },

    /// Template absent from every searched location
    #[error("Template file '{template}' not found. Locations checked: {}", format_paths(.checked))]
    TemplateNotFound {
        template: String,
        checked: Vec<PathBuf>,
    },

    /// Best-effort metadata lookup failed. Only used inside degrade paths.
    #[error("Metadata lookup failed: {0}")]
    MetadataLookup(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// One chat completion call failed
    #[error("Model {model} request failed: {message}")]
    Model {
        model: String,
        status: Option<u16>,
        message: String,
        transient: bool,
    },

    /// Every model in the fallback list failed
    #[error("All models failed: {}", .failures.join("; "))]
    ModelsExhausted { failures: Vec<String> },

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a connection error with a source.
    pub fn connection_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query execution error.
    pub fn query_error(msg: impl Into<String>) -> Self {
        Self::QueryExecution {
            message: msg.into(),
            sql_error_code: None,
        }
    }

    /// Create a query execution error carrying the SQL Server error number.
    pub fn query_error_with_code(msg: impl Into<String>, code: Option<u32>) -> Self {
        Self::QueryExecution {
            message: msg.into(),
            sql_error_code: code,
        }
    }

    /// Create a stored procedure execution error.
    pub fn procedure_error(
        procedure: impl Into<String>,
        msg: impl Into<String>,
        code: Option<u32>,
    ) -> Self {
        Self::ProcedureExecution {
            procedure: procedure.into(),
            message: msg.into(),
            sql_error_code: code,
        }
    }

    /// Create a template-not-found error.
    pub fn template_not_found(template: impl Into<String>, checked: Vec<PathBuf>) -> Self {
        Self::TemplateNotFound {
            template: template.into(),
            checked,
        }
    }

    /// Create a metadata lookup error.
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::MetadataLookup(msg.into())
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a model request error.
    pub fn model(
        model: impl Into<String>,
        status: Option<u16>,
        msg: impl Into<String>,
        transient: bool,
    ) -> Self {
        Self::Model {
            model: model.into(),
            status,
            message: msg.into(),
            transient,
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is transient and may succeed on retry.
    ///
    /// SQL errors are never retried automatically. Only model requests that
    /// failed on timeouts, throttling or server errors qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Model { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Get a user-friendly suggestion for how to fix this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Config(_) => Some("Check your environment variables and configuration"),
            Self::NotConnected => Some("Call connect_database before running database tools"),
            Self::Connection { .. } => {
                Some("Check server name, credentials, and network connectivity")
            }
            Self::TemplateNotFound { .. } => {
                Some("Place the .sql file in the templates directory or the working directory")
            }
            Self::ModelsExhausted { .. } => Some("Check the API key and model availability"),
            _ => None,
        }
    }
}

/// Check if a model provider HTTP status is worth retrying.
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}
