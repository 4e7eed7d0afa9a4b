//! # SQL Server Tools
//!
//! Introspection and execution tools over one Microsoft SQL Server connection,
//! for LLM tool-calling clients.
//!
//! This crate provides:
//! - **Tools**: connect, query, procedures, schema and relationship discovery,
//!   procedure search and SQL file templates
//! - **MCP server**: the tool table served over stdio
//! - **Chat loop**: an OpenAI-compatible tool-calling session over the same tools
//!
//! ## Architecture
//!
//! One [`DatabaseService`] owns the connection. The MCP server and the chat
//! session both reach it through a [`ToolDispatcher`](tools::ToolDispatcher),
//! which turns every failure into `"Error: ..."` text.

pub mod chat;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod handlers;
pub mod resilience;
pub mod security;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod templates;
pub mod tools;

pub use config::Config;
pub use error::ServerError;
pub use server::DatabaseToolServer;
pub use service::{DatabaseService, SharedService};
