//! SQL Server identifier escaping utilities.
//!
//! Uses SQL Server's bracket notation `[identifier]` to safely escape identifiers.

use crate::error::ServerError;

/// Maximum length for SQL Server identifiers.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Maximum number of parts in a multipart name (`server.database.schema.object`).
const MAX_NAME_PARTS: usize = 4;

/// Escape a possibly qualified SQL Server identifier using bracket notation.
///
/// This function handles:
/// - Qualified names (`dbo.Users` -> `[dbo].[Users]`, up to four parts)
/// - Simple names (`Users` -> `[Users]`)
/// - Parts already in brackets, including brackets holding dots (`[my.schema].T`)
/// - Names that contain brackets (escaped as `]]`)
///
/// # Examples
///
/// ```
/// use mssql_tools_server::security::escape_identifier;
///
/// assert_eq!(escape_identifier("Users").unwrap(), "[Users]");
/// assert_eq!(escape_identifier("dbo.Users").unwrap(), "[dbo].[Users]");
/// assert_eq!(escape_identifier("My Table").unwrap(), "[My Table]");
/// ```
pub fn escape_identifier(identifier: &str) -> Result<String, ServerError> {
    let parts = split_name_parts(identifier)?;
    let escaped = parts
        .iter()
        .map(|part| escape_single_identifier(part))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(escaped.join("."))
}

/// Escape `schema` and `name` separately and join them.
pub fn qualify(schema: &str, name: &str) -> Result<String, ServerError> {
    Ok(format!(
        "{}.{}",
        escape_single_identifier(schema)?,
        escape_single_identifier(name)?
    ))
}

/// Escape a single identifier (no dots).
fn escape_single_identifier(identifier: &str) -> Result<String, ServerError> {
    let trimmed = identifier.trim();

    // Strip outer brackets only when both exist
    let clean = if trimmed.len() >= 2 && trimmed.starts_with('[') && trimmed.ends_with(']') {
        trimmed[1..trimmed.len() - 1].replace("]]", "]")
    } else {
        trimmed.to_string()
    };

    if clean.is_empty() {
        return Err(ServerError::invalid_input("Identifier cannot be empty"));
    }

    if clean.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(ServerError::invalid_input(format!(
            "Identifier exceeds maximum length of {} characters",
            MAX_IDENTIFIER_LENGTH
        )));
    }

    if clean.contains('\0') {
        return Err(ServerError::invalid_input("Identifier contains a null byte"));
    }

    Ok(format!("[{}]", clean.replace(']', "]]")))
}

/// Split a multipart name on dots that are outside brackets.
fn split_name_parts(identifier: &str) -> Result<Vec<String>, ServerError> {
    if identifier.trim().is_empty() {
        return Err(ServerError::invalid_input("Identifier cannot be empty"));
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_brackets = false;
    let mut chars = identifier.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '[' if !in_brackets => {
                in_brackets = true;
                current.push(c);
            }
            ']' if in_brackets => {
                current.push(c);
                if chars.peek() == Some(&']') {
                    // escaped bracket
                    current.push(']');
                    chars.next();
                } else {
                    in_brackets = false;
                }
            }
            '.' if !in_brackets => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if in_brackets {
        return Err(ServerError::invalid_input(format!(
            "Unterminated bracket in identifier '{}'",
            identifier
        )));
    }
    parts.push(current);

    if parts.len() > MAX_NAME_PARTS {
        return Err(ServerError::invalid_input(format!(
            "Identifier '{}' has more than {} parts",
            identifier, MAX_NAME_PARTS
        )));
    }

    Ok(parts)
}

/// Parse a potentially schema-qualified identifier.
///
/// Returns (schema, name). Schema is None if not specified; brackets are removed.
pub fn parse_qualified_name(identifier: &str) -> Result<(Option<String>, String), ServerError> {
    let mut parts = split_name_parts(identifier)?
        .into_iter()
        .map(|p| unbracket(&p))
        .collect::<Vec<_>>();

    if parts.iter().any(|p| p.is_empty()) {
        return Err(ServerError::invalid_input(format!(
            "Identifier '{}' has an empty part",
            identifier
        )));
    }

    let name = parts.pop().unwrap_or_default();
    Ok((parts.pop(), name))
}

fn unbracket(part: &str) -> String {
    let trimmed = part.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('[') && trimmed.ends_with(']') {
        trimmed[1..trimmed.len() - 1].replace("]]", "]")
    } else {
        trimmed.to_string()
    }
}
