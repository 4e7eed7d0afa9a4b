//! Configuration management for the SQL Server tools service.
//!
//! Configuration is loaded from environment variables following the 12-factor app pattern.
//! Nothing here is required: without `DB_SERVER`/`DB_NAME` the service simply starts
//! disconnected and waits for a `connect_database` tool call.

use crate::constants::{
    DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_MODEL_MAX_RETRIES, DEFAULT_MODEL_TIMEOUT_SECS,
    DEFAULT_OPENAI_BASE_URL, DEFAULT_SCHEMA, FALLBACK_MODELS, TEMPLATES_DIR_NAME,
};
use crate::error::ServerError;
use std::path::PathBuf;
use std::time::Duration;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database defaults and connection settings
    pub database: DatabaseConfig,

    /// SQL template search settings
    pub templates: TemplateConfig,

    /// Model provider settings
    pub model: ModelConfig,
}

/// Database defaults and connection settings.
#[derive(Clone)]
pub struct DatabaseConfig {
    /// Default server for auto-connect (`host`, `host,port`, `host:port` or `host\instance`)
    pub server: Option<String>,

    /// Default database for auto-connect
    pub database: Option<String>,

    /// SQL login user; absence means integrated authentication
    pub user: Option<String>,

    /// SQL login password
    pub password: Option<String>,

    /// Schema used when a tool call omits one
    pub default_schema: String,

    /// Connection establishment timeout
    pub connect_timeout: Duration,

    /// Enable TLS encryption
    pub encrypt: bool,

    /// Trust server certificate (for self-signed certs)
    pub trust_server_certificate: bool,

    /// Allow trial execution of procedures for return-column discovery
    pub allow_unsafe_introspection: bool,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("default_schema", &self.default_schema)
            .field("connect_timeout", &self.connect_timeout)
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("allow_unsafe_introspection", &self.allow_unsafe_introspection)
            .finish()
    }
}

/// SQL template search settings.
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    /// Directory searched first
    pub templates_dir: PathBuf,

    /// Working directory searched after the templates directory
    pub working_dir: PathBuf,
}

/// Model provider settings.
#[derive(Clone)]
pub struct ModelConfig {
    /// API key; the chat loop is unavailable without one
    pub api_key: Option<String>,

    /// Chat-completions API base
    pub base_url: String,

    /// Models tried in order
    pub models: Vec<String>,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// Attempts per model on transient errors
    pub max_retries: u32,
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("models", &self.models)
            .field("request_timeout", &self.request_timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// ## Database
    /// - `DB_SERVER`: Default server for auto-connect
    /// - `DB_NAME`: Default database for auto-connect
    /// - `DB_USER` / `DB_PASSWORD`: SQL login (omit both for integrated auth)
    /// - `DB_SCHEMA`: Default schema (default: dbo)
    /// - `DB_CONNECT_TIMEOUT`: Connection timeout in seconds (default: 30)
    /// - `DB_ENCRYPT`: Enable TLS (default: true)
    /// - `DB_TRUST_CERT`: Trust server certificate (default: true)
    /// - `DB_ALLOW_UNSAFE_INTROSPECTION`: Allow trial execution of procedures (default: false)
    ///
    /// ## Templates
    /// - `SQL_TEMPLATES_DIR`: Templates directory (default: `<cwd>/templates`)
    ///
    /// ## Model provider
    /// - `OPENAI_API_KEY`: API key (surrounding quotes are stripped)
    /// - `OPENAI_MODEL`: Preferred model, tried before the built-in fallback list
    /// - `OPENAI_BASE_URL`: API base (default: `https://api.openai.com/v1`)
    /// - `OPENAI_TIMEOUT`: Request timeout in seconds (default: 60)
    /// - `OPENAI_MAX_RETRIES`: Attempts per model on transient errors (default: 3)
    pub fn from_env() -> Result<Self, ServerError> {
        let working_dir = std::env::current_dir()
            .map_err(|e| ServerError::config(format!("Cannot read working directory: {}", e)))?;
        Self::from_vars(working_dir, |key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_vars<F>(working_dir: PathBuf, lookup: F) -> Result<Self, ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let flag = |key: &str, default: bool| {
            non_empty(key)
                .map(|v| {
                    let v = v.trim().to_lowercase();
                    v == "true" || v == "1" || v == "yes"
                })
                .unwrap_or(default)
        };

        let connect_timeout_secs = match non_empty("DB_CONNECT_TIMEOUT") {
            Some(v) => v.trim().parse::<u64>().map_err(|_| {
                ServerError::config(format!("DB_CONNECT_TIMEOUT must be a number of seconds, got '{}'", v))
            })?,
            None => DEFAULT_CONNECTION_TIMEOUT_SECS,
        };

        let templates_dir = non_empty("SQL_TEMPLATES_DIR")
            .map(PathBuf::from)
            .map(|p| if p.is_absolute() { p } else { working_dir.join(p) })
            .unwrap_or_else(|| working_dir.join(TEMPLATES_DIR_NAME));

        let mut models: Vec<String> = Vec::new();
        if let Some(preferred) = non_empty("OPENAI_MODEL") {
            models.push(preferred.trim().to_string());
        }
        for model in FALLBACK_MODELS {
            if !models.iter().any(|m| m == model) {
                models.push(model.to_string());
            }
        }

        let request_timeout_secs = non_empty("OPENAI_TIMEOUT")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_MODEL_TIMEOUT_SECS);

        let max_retries = non_empty("OPENAI_MAX_RETRIES")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_MODEL_MAX_RETRIES)
            .max(1);

        Ok(Config {
            database: DatabaseConfig {
                server: non_empty("DB_SERVER"),
                database: non_empty("DB_NAME"),
                user: non_empty("DB_USER"),
                password: non_empty("DB_PASSWORD"),
                default_schema: non_empty("DB_SCHEMA")
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
                connect_timeout: Duration::from_secs(connect_timeout_secs),
                encrypt: flag("DB_ENCRYPT", true),
                trust_server_certificate: flag("DB_TRUST_CERT", true),
                allow_unsafe_introspection: flag("DB_ALLOW_UNSAFE_INTROSPECTION", false),
            },
            templates: TemplateConfig {
                templates_dir,
                working_dir,
            },
            model: ModelConfig {
                api_key: non_empty("OPENAI_API_KEY").map(|k| strip_quotes(&k)),
                base_url: non_empty("OPENAI_BASE_URL")
                    .map(|u| u.trim().trim_end_matches('/').to_string())
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                models,
                request_timeout: Duration::from_secs(request_timeout_secs),
                max_retries,
            },
        })
    }

    /// Whether enough is configured to connect at startup.
    pub fn has_default_connection(&self) -> bool {
        self.database.server.is_some() && self.database.database.is_some()
    }
}

/// Strip whitespace and one pair of surrounding quotes from a secret.
fn strip_quotes(value: &str) -> String {
    let trimmed = value.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(PathBuf::from("/work"), |k| vars.get(k).cloned()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.database.default_schema, "dbo");
        assert_eq!(config.database.connect_timeout, Duration::from_secs(30));
        assert!(config.database.encrypt);
        assert!(config.database.trust_server_certificate);
        assert!(!config.database.allow_unsafe_introspection);
        assert!(!config.has_default_connection());
        assert_eq!(config.templates.templates_dir, PathBuf::from("/work/templates"));
        assert_eq!(config.model.models, vec!["gpt-4o", "gpt-4", "gpt-3.5-turbo"]);
    }

    #[test]
    fn test_database_defaults() {
        let config = config_from(&[
            ("DB_SERVER", "localhost,1433"),
            ("DB_NAME", "Sales"),
            ("DB_SCHEMA", "reporting"),
        ]);
        assert!(config.has_default_connection());
        assert_eq!(config.database.default_schema, "reporting");
        assert!(config.database.user.is_none());
    }

    #[test]
    fn test_preferred_model_goes_first_without_duplicates() {
        let config = config_from(&[("OPENAI_MODEL", "gpt-4")]);
        assert_eq!(config.model.models, vec!["gpt-4", "gpt-4o", "gpt-3.5-turbo"]);

        let config = config_from(&[("OPENAI_MODEL", "gpt-4.1-mini")]);
        assert_eq!(config.model.models[0], "gpt-4.1-mini");
        assert_eq!(config.model.models.len(), 4);
    }

    #[test]
    fn test_api_key_quotes_stripped() {
        let config = config_from(&[("OPENAI_API_KEY", "\"sk-test\"")]);
        assert_eq!(config.model.api_key.as_deref(), Some("sk-test"));

        let config = config_from(&[("OPENAI_API_KEY", " 'sk-single' ")]);
        assert_eq!(config.model.api_key.as_deref(), Some("sk-single"));
    }

    #[test]
    fn test_invalid_timeout_is_config_error() {
        let result = Config::from_vars(PathBuf::from("/work"), |k| {
            (k == "DB_CONNECT_TIMEOUT").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = config_from(&[("DB_PASSWORD", "hunter2"), ("OPENAI_API_KEY", "sk-secret")]);
        let text = format!("{:?}", config);
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("sk-secret"));
    }

    #[test]
    fn test_relative_templates_dir() {
        let config = config_from(&[("SQL_TEMPLATES_DIR", "my_sql")]);
        assert_eq!(config.templates.templates_dir, PathBuf::from("/work/my_sql"));
    }
}
