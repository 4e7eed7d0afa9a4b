//! SQL template lookup.
//!
//! A template name is searched in a fixed order and the first existing file
//! wins:
//! 1. the templates directory
//! 2. the working directory
//! 3. `sql/`, `queries/`, `scripts/`, `sql_templates/` under the working directory

use crate::config::TemplateConfig;
use crate::constants::TEMPLATE_FALLBACK_SUBDIRS;
use crate::database::QueryResult;
use crate::error::ServerError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Resolves template names to files.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    templates_dir: PathBuf,
    working_dir: PathBuf,
}

/// A template found on disk.
#[derive(Debug, Clone)]
pub struct ResolvedTemplate {
    pub path: PathBuf,
    pub sql: String,
    /// Every candidate location, in search order
    pub locations_checked: Vec<PathBuf>,
}

/// Result of `generate_query_from_template`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateExecution {
    pub template_file: String,
    pub template_path: PathBuf,
    pub template_sql: String,
    /// Statement sent to the server, with positional placeholders
    pub final_sql: String,
    pub parameters: Map<String, Value>,
    pub execution_results: QueryResult,
    pub locations_checked: Vec<PathBuf>,
}

impl TemplateResolver {
    pub fn new(templates_dir: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            working_dir: working_dir.into(),
        }
    }

    pub fn from_config(config: &TemplateConfig) -> Self {
        Self::new(&config.templates_dir, &config.working_dir)
    }

    /// Candidate paths for `name`, in search order.
    pub fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let mut paths = vec![self.templates_dir.join(name), self.working_dir.join(name)];
        paths.extend(
            TEMPLATE_FALLBACK_SUBDIRS
                .iter()
                .map(|subdir| self.working_dir.join(subdir).join(name)),
        );
        paths
    }

    /// Find and read a template.
    pub async fn resolve(&self, name: &str) -> Result<ResolvedTemplate, ServerError> {
        validate_template_name(name)?;

        let locations_checked = self.candidates(name);
        for path in &locations_checked {
            if tokio::fs::metadata(path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                debug!("Using template {}", path.display());
                let sql = tokio::fs::read_to_string(path).await?;
                return Ok(ResolvedTemplate {
                    path: path.clone(),
                    sql,
                    locations_checked,
                });
            }
        }

        Err(ServerError::template_not_found(name, locations_checked))
    }
}

/// Template names are relative paths that stay inside the searched directories.
fn validate_template_name(name: &str) -> Result<(), ServerError> {
    if name.trim().is_empty() {
        return Err(ServerError::invalid_input("Template file name cannot be empty"));
    }

    let path = Path::new(name);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ServerError::invalid_input(format!(
            "Template file '{}' must be a relative path without '..'",
            name
        )));
    }
    Ok(())
}
