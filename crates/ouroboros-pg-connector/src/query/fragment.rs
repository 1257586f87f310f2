//! SQL text paired with its positional parameters.

use crate::SqlValue;

/// SQL text plus ordered parameter values.
///
/// The `n`-th `$n` placeholder in the text refers to the `n`-th parameter.
/// Fragments compose with [`merge`](Self::merge), which renumbers the
/// appended fragment's placeholders so the invariant keeps holding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterizedFragment {
    sql: String,
    params: Vec<SqlValue>,
}

impl ParameterizedFragment {
    /// Creates a fragment whose placeholders are numbered from `$1`.
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self { sql: sql.into(), params }
    }

    /// Parameterless fragment.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn into_parts(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.params)
    }

    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }

    /// Appends raw SQL text.
    pub fn push_sql(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    /// Appends a placeholder bound to `value`.
    pub fn push_param(&mut self, value: SqlValue) {
        self.push_param_cast(value, None);
    }

    /// Appends a placeholder bound to `value`, followed by `::<cast>`.
    pub fn push_param_cast(&mut self, value: SqlValue, cast: Option<&str>) {
        self.params.push(value);
        self.sql.push('$');
        self.sql.push_str(&self.params.len().to_string());
        if let Some(cast) = cast {
            self.sql.push_str("::");
            self.sql.push_str(cast);
        }
    }

    /// Appends `other`, shifting its placeholders past this fragment's
    /// parameters.
    pub fn append(&mut self, other: ParameterizedFragment) {
        let shifted = adjust_param_indices(&other.sql, self.params.len());
        self.sql.push_str(&shifted);
        self.params.extend(other.params);
    }

    /// Concatenation of `self` and `other`.
    pub fn merge(mut self, other: ParameterizedFragment) -> Self {
        self.append(other);
        self
    }

    /// Joins the non-empty fragments with `separator`.
    pub fn join<I>(fragments: I, separator: &str) -> Self
    where
        I: IntoIterator<Item = ParameterizedFragment>,
    {
        let mut out = Self::empty();
        for fragment in fragments.into_iter().filter(|f| !f.is_empty()) {
            if !out.is_empty() {
                out.push_sql(separator);
            }
            out.append(fragment);
        }
        out
    }

    /// `(<sql>)`, or empty when the fragment is empty.
    pub fn parenthesize(self) -> Self {
        if self.is_empty() {
            return self;
        }
        Self::raw("(").merge(self).merge(Self::raw(")"))
    }
}

/// Adds `offset` to every `$n` placeholder outside quoted text.
///
/// Single-quoted literals and double-quoted identifiers are copied unchanged,
/// so a `$1` inside `'...'` or `"..."` is never renumbered.
pub fn adjust_param_indices(sql: &str, offset: usize) -> String {
    if offset == 0 {
        return sql.to_string();
    }

    let mut result = String::with_capacity(sql.len() + 8);
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        match quote {
            Some(q) => {
                // doubled quotes toggle out and straight back in
                if ch == q {
                    quote = None;
                }
                result.push(ch);
            }
            None if ch == '\'' || ch == '"' => {
                quote = Some(ch);
                result.push(ch);
            }
            None if ch == '$' => {
                let mut num_str = String::new();
                while let Some(&next_ch) = chars.peek() {
                    if !next_ch.is_ascii_digit() {
                        break;
                    }
                    num_str.push(next_ch);
                    chars.next();
                }

                result.push('$');
                match num_str.parse::<usize>() {
                    Ok(num) => result.push_str(&(num + offset).to_string()),
                    Err(_) => result.push_str(&num_str),
                }
            }
            None => result.push(ch),
        }
    }

    result
}

/// Highest `$n` referenced outside quoted text.
pub fn count_placeholders(sql: &str) -> usize {
    let mut highest = 0;
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if ch == '$' => {
                let mut num_str = String::new();
                while let Some(&next_ch) = chars.peek() {
                    if !next_ch.is_ascii_digit() {
                        break;
                    }
                    num_str.push(next_ch);
                    chars.next();
                }
                if let Ok(num) = num_str.parse::<usize>() {
                    highest = highest.max(num);
                }
            }
            None => {}
        }
    }
    highest
}
