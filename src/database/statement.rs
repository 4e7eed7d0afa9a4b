//! Statement classification.
//!
//! SQL Server reports an affected-row count for `INSERT`, `UPDATE`, `DELETE`
//! and `MERGE`, but tiberius only surfaces it on the `execute` path, which
//! discards result sets. A batch goes down that path when it modifies rows and
//! cannot return any: every statement is DML or a `SET` option, and no DML
//! carries an `OUTPUT` clause.
//!
//! Batches are parsed with the MS SQL dialect first. T-SQL that the parser does
//! not understand falls back to a keyword scan over the text with comments,
//! literals and quoted identifiers blanked out.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::MsSqlDialect;
use sqlparser::parser::Parser;

/// `OUTPUT` is reserved in T-SQL, so outside brackets it is always the clause.
static OUTPUT_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bOUTPUT\b")
        .unwrap_or_else(|e| panic!("Internal error: invalid OUTPUT pattern: {}", e))
});

/// The statement a common table expression feeds, after its closing paren.
static CTE_DML: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^WITH\b.*\)\s*(INSERT|UPDATE|DELETE|MERGE)\b")
        .unwrap_or_else(|e| panic!("Internal error: invalid CTE pattern: {}", e))
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementKind {
    /// Modifies rows and reports a count.
    RowCount,
    /// Session options such as `SET NOCOUNT OFF`.
    Neutral,
    /// May produce result sets.
    Rows,
}

/// Whether the batch should run on the affected-row-count path.
pub fn reports_row_count(sql: &str) -> bool {
    let code = mask_non_code(sql);
    if OUTPUT_CLAUSE.is_match(&code) {
        return false;
    }

    let kinds: Vec<StatementKind> = match Parser::parse_sql(&MsSqlDialect {}, sql) {
        Ok(statements) => statements.iter().map(classify_parsed).collect(),
        Err(_) => code
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(classify_text)
            .collect(),
    };

    kinds.contains(&StatementKind::RowCount) && !kinds.contains(&StatementKind::Rows)
}

fn classify_parsed(statement: &Statement) -> StatementKind {
    match statement {
        Statement::Insert { .. }
        | Statement::Update { .. }
        | Statement::Delete { .. }
        | Statement::Merge { .. } => StatementKind::RowCount,
        // WITH ... INSERT/UPDATE/DELETE parses as a query around the DML
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select { .. }
            | SetExpr::Query { .. }
            | SetExpr::SetOperation { .. }
            | SetExpr::Values { .. }
            | SetExpr::Table { .. } => StatementKind::Rows,
            _ => StatementKind::RowCount,
        },
        // session options parse into several variants depending on the option
        other if is_set_option(&other.to_string()) => StatementKind::Neutral,
        _ => StatementKind::Rows,
    }
}

fn classify_text(statement: &str) -> StatementKind {
    let keyword: String = statement
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();

    match keyword.as_str() {
        "INSERT" | "UPDATE" | "DELETE" | "MERGE" => StatementKind::RowCount,
        "WITH" if CTE_DML.is_match(statement) => StatementKind::RowCount,
        "SET" => StatementKind::Neutral,
        _ => StatementKind::Rows,
    }
}

fn is_set_option(statement: &str) -> bool {
    statement
        .get(..4)
        .is_some_and(|head| head.eq_ignore_ascii_case("SET "))
}

/// Replace comments, string literals and quoted identifiers with spaces.
fn mask_non_code(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        let end = match chars[i] {
            '\'' => skip_delimited(&chars, i, '\''),
            '"' => skip_delimited(&chars, i, '"'),
            '[' => skip_delimited(&chars, i, ']'),
            '-' if chars.get(i + 1) == Some(&'-') => {
                let mut j = i;
                while j < chars.len() && chars[j] != '\n' {
                    j += 1;
                }
                j
            }
            '/' if chars.get(i + 1) == Some(&'*') => skip_block_comment(&chars, i),
            c => {
                out.push(c);
                i += 1;
                continue;
            }
        };
        out.push(' ');
        i = end;
    }

    out
}

/// Index after a quoted run; a doubled closing delimiter is escaped.
fn skip_delimited(chars: &[char], start: usize, close: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == close {
            if chars.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

/// Index after a possibly nested `/* ... */` comment.
fn skip_block_comment(chars: &[char], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i < chars.len() {
        if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
            depth += 1;
            i += 2;
        } else if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    i
}
