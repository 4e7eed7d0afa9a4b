//! Centralized constants for the SQL Server tools service.
//!
//! Default values and fixed limits used throughout the codebase.

use std::time::Duration;

// =============================================================================
// Connection Constants
// =============================================================================

/// Default connection timeout in seconds.
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Default SQL Server port when none is given in the server string.
pub const DEFAULT_SQL_PORT: u16 = 1433;

/// Application name reported to SQL Server.
pub const APPLICATION_NAME: &str = "mssql-tools-server";

// =============================================================================
// Introspection Constants
// =============================================================================

/// Schema used when a tool call does not name one.
pub const DEFAULT_SCHEMA: &str = "dbo";

/// Row cap for `list_stored_procedures` when no name pattern is given.
pub const PROCEDURE_LISTING_LIMIT: usize = 10;

/// Characters of procedure definition kept on each side of a search hit.
pub const SEARCH_SNIPPET_RADIUS: usize = 100;

// =============================================================================
// Template Constants
// =============================================================================

/// Directory name searched first for SQL templates.
pub const TEMPLATES_DIR_NAME: &str = "templates";

/// Subdirectories of the working directory searched after the templates
/// directory and the working directory itself, in order.
pub const TEMPLATE_FALLBACK_SUBDIRS: [&str; 4] = ["sql", "queries", "scripts", "sql_templates"];

// =============================================================================
// Model Provider Constants
// =============================================================================

/// Default chat-completions API base.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Models tried in order when a completion call fails.
pub const FALLBACK_MODELS: [&str; 3] = ["gpt-4o", "gpt-4", "gpt-3.5-turbo"];

/// Default per-request timeout for completion calls in seconds.
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 60;

/// Default attempts per model on transient errors.
pub const DEFAULT_MODEL_MAX_RETRIES: u32 = 3;

/// Token budget for each completion.
pub const COMPLETION_MAX_TOKENS: u32 = 2000;

/// Sampling temperature for each completion.
pub const COMPLETION_TEMPERATURE: f32 = 0.1;

// =============================================================================
// Conversation Constants
// =============================================================================

/// History length that triggers truncation once exceeded.
pub const HISTORY_MAX_ENTRIES: usize = 20;

/// Entries kept after truncation.
pub const HISTORY_RETAINED_ENTRIES: usize = 10;

// =============================================================================
// Shutdown Constants
// =============================================================================

/// Upper bound on closing the connection during shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Logging Constants
// =============================================================================

/// Default truncation length for query logging.
pub const LOG_QUERY_TRUNCATE_LENGTH: usize = 200;
