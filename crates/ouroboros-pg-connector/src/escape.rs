//! Identifier and literal escaping.
//!
//! Identifiers are always double-quoted and kept verbatim (PostgreSQL folds
//! unquoted names to lower case, quoted ones are case-sensitive). Literals are
//! only used for internal SQL composition such as JSON path segments; caller
//! supplied values always travel as `$n` parameters.

/// Quotes an identifier, doubling embedded double quotes.
///
/// ```
/// use ouroboros_pg_connector::escape::escape_identifier;
/// assert_eq!(escape_identifier("firstName"), "\"firstName\"");
/// assert_eq!(escape_identifier("we\"ird"), "\"we\"\"ird\"");
/// ```
pub fn escape_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Quotes a string literal.
///
/// Single quotes are doubled. When the value holds a backslash, backslashes are
/// doubled too and the literal gets the `E` prefix so the server reads them as
/// escapes.
///
/// ```
/// use ouroboros_pg_connector::escape::escape_literal;
/// assert_eq!(escape_literal("it's"), "'it''s'");
/// assert_eq!(escape_literal(r"a\b"), r"E'a\\b'");
/// ```
pub fn escape_literal(value: &str) -> String {
    let has_backslash = value.contains('\\');
    let mut out = String::with_capacity(value.len() + 4);
    if has_backslash {
        out.push('E');
    }
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Schema-qualified table reference: `"<schema>"."<table>"`.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", escape_identifier(schema), escape_identifier(table))
}
