//! Named-parameter binding.
//!
//! Tool callers write `@name` placeholders and pass a `{name: value}` mapping.
//! The statement text is scanned left to right and every placeholder whose name
//! is a mapping key is rewritten to the next positional `@Pn`, with its value
//! appended at the same moment. Positional values therefore always follow the
//! order in which placeholders occur in the text, whatever the mapping order.

use crate::database::driver::BoundStatement;
use crate::database::types::SqlValue;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Rewrite `@name` placeholders into positional parameters.
///
/// - Names match whole identifiers only: `@id` never matches inside `@idx`.
/// - `@@` system variables, string literals, quoted or bracketed identifiers and
///   comments are copied untouched.
/// - Mapping keys may be written with or without the leading `@`.
/// - A placeholder used twice binds its value twice.
/// - Keys that never occur in the text are ignored.
pub fn bind_named(sql: &str, parameters: &Map<String, Value>) -> BoundStatement {
    let mut statement = BoundStatement::raw(String::with_capacity(sql.len()));
    if parameters.is_empty() {
        statement.sql.push_str(sql);
        return statement;
    }

    let lookup: HashMap<&str, &Value> = parameters
        .iter()
        .map(|(k, v)| (k.trim_start_matches('@'), v))
        .collect();

    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' => i = copy_delimited(&chars, i, '\'', &mut out),
            '"' => i = copy_delimited(&chars, i, '"', &mut out),
            '[' => i = copy_delimited(&chars, i, ']', &mut out),
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(chars[i]);
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => i = copy_block_comment(&chars, i, &mut out),
            '@' if chars.get(i + 1) == Some(&'@') => {
                out.push_str("@@");
                i += 2;
                while i < chars.len() && is_identifier_char(chars[i]) {
                    out.push(chars[i]);
                    i += 1;
                }
            }
            '@' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_identifier_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                match lookup.get(name.as_str()) {
                    Some(value) if !name.is_empty() => {
                        let placeholder = statement.push(SqlValue::from_json(value));
                        out.push_str(&placeholder);
                    }
                    _ => {
                        out.push('@');
                        out.push_str(&name);
                    }
                }
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    statement.sql = out;
    statement
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '#' || c == '$'
}

/// Copy a quoted run starting at `start`. A doubled closing delimiter is an
/// escaped delimiter. Returns the index after the closing delimiter.
fn copy_delimited(chars: &[char], start: usize, close: char, out: &mut String) -> usize {
    out.push(chars[start]);
    let mut i = start + 1;
    while i < chars.len() {
        out.push(chars[i]);
        if chars[i] == close {
            if chars.get(i + 1) == Some(&close) {
                out.push(close);
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

/// Copy a possibly nested `/* ... */` comment.
fn copy_block_comment(chars: &[char], start: usize, out: &mut String) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i < chars.len() {
        if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
            depth += 1;
            out.push_str("/*");
            i += 2;
        } else if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
            depth -= 1;
            out.push_str("*/");
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_single_placeholder_binds_one_value() {
        let stmt = bind_named("SELECT * FROM T WHERE id=@id", &params(json!({"id": 5})));
        assert_eq!(stmt.sql, "SELECT * FROM T WHERE id=@P1");
        assert_eq!(stmt.values, vec![SqlValue::I64(5)]);
    }

    #[test]
    fn test_values_follow_placeholder_order_not_mapping_order() {
        // mapping lists b before a; the text uses a first
        let mut map = Map::new();
        map.insert("b".to_string(), json!("second"));
        map.insert("a".to_string(), json!("first"));

        let stmt = bind_named("SELECT * FROM T WHERE x = @a AND y = @b", &map);
        assert_eq!(stmt.sql, "SELECT * FROM T WHERE x = @P1 AND y = @P2");
        assert_eq!(
            stmt.values,
            vec![
                SqlValue::String("first".to_string()),
                SqlValue::String("second".to_string())
            ]
        );
    }

    #[test]
    fn test_repeated_placeholder_binds_twice() {
        let stmt = bind_named(
            "SELECT * FROM T WHERE a = @v OR b = @v",
            &params(json!({"v": 1})),
        );
        assert_eq!(stmt.sql, "SELECT * FROM T WHERE a = @P1 OR b = @P2");
        assert_eq!(stmt.values, vec![SqlValue::I64(1), SqlValue::I64(1)]);
    }

    #[test]
    fn test_prefix_names_do_not_collide() {
        let stmt = bind_named(
            "SELECT * FROM T WHERE idx = @idx AND id = @id",
            &params(json!({"id": 1, "idx": 2})),
        );
        assert_eq!(stmt.sql, "SELECT * FROM T WHERE idx = @P1 AND id = @P2");
        assert_eq!(stmt.values, vec![SqlValue::I64(2), SqlValue::I64(1)]);
    }

    #[test]
    fn test_literals_comments_and_system_variables_untouched() {
        let sql = "SELECT '@id', [@id], @@ROWCOUNT -- @id\n/* @id */ FROM T WHERE id = @id";
        let stmt = bind_named(sql, &params(json!({"id": 9})));
        assert_eq!(
            stmt.sql,
            "SELECT '@id', [@id], @@ROWCOUNT -- @id\n/* @id */ FROM T WHERE id = @P1"
        );
        assert_eq!(stmt.values.len(), 1);
    }

    #[test]
    fn test_escaped_quote_inside_literal() {
        let stmt = bind_named(
            "SELECT 'it''s @id' WHERE id = @id",
            &params(json!({"id": 3})),
        );
        assert_eq!(stmt.sql, "SELECT 'it''s @id' WHERE id = @P1");
    }

    #[test]
    fn test_unknown_keys_and_unbound_variables() {
        let stmt = bind_named(
            "DECLARE @local INT = 1; SELECT @local + @n",
            &params(json!({"n": 4, "unused": 7})),
        );
        assert_eq!(stmt.sql, "DECLARE @local INT = 1; SELECT @local + @P1");
        assert_eq!(stmt.values, vec![SqlValue::I64(4)]);
    }

    #[test]
    fn test_keys_with_at_prefix() {
        let stmt = bind_named("SELECT @name", &params(json!({"@name": "x"})));
        assert_eq!(stmt.sql, "SELECT @P1");
    }

    #[test]
    fn test_no_parameters_keeps_text() {
        let stmt = bind_named("SELECT 1", &Map::new());
        assert_eq!(stmt.sql, "SELECT 1");
        assert!(stmt.values.is_empty());
    }
}
