//! Parameterized statement builder.
//!
//! Every statement the store issues is assembled here. Values are always
//! bound as `$n` parameters; the only text spliced into SQL is fixed
//! fragments and identifiers, which are double-quoted.

use tokio_postgres::types::ToSql;

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    BigInt(i64),
    Text(String),
}

impl Param {
    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Param::BigInt(v) => v,
            Param::Text(v) => v,
        }
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::BigInt(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

/// SQL text plus its parameters, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<Param>,
}

impl Statement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Parameters in the form tokio-postgres expects.
    pub fn bind(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(Param::as_sql).collect()
    }
}

/// Quote a single identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified name (`schema.table`).
pub fn quote_qualified(name: &str) -> String {
    match name.split_once('.') {
        Some((schema, table)) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
        None => quote_ident(name),
    }
}

/// Incremental statement builder.
#[derive(Debug, Default)]
pub struct StatementBuilder {
    sql: String,
    params: Vec<Param>,
}

impl StatementBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fixed SQL fragment.
    pub fn sql(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    /// Append a quoted column or type identifier.
    pub fn ident(&mut self, name: &str) -> &mut Self {
        self.sql.push_str(&quote_ident(name));
        self
    }

    /// Append a quoted, possibly schema-qualified, table name.
    pub fn table(&mut self, name: &str) -> &mut Self {
        self.sql.push_str(&quote_qualified(name));
        self
    }

    /// Append `alias."column"` for each name, separated by `, `.
    ///
    /// An empty alias yields bare quoted names.
    pub fn columns<'c>(
        &mut self,
        alias: &str,
        names: impl IntoIterator<Item = &'c str>,
    ) -> &mut Self {
        for (i, name) in names.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            if !alias.is_empty() {
                self.sql.push_str(alias);
                self.sql.push('.');
            }
            self.sql.push_str(&quote_ident(name));
        }
        self
    }

    /// Append `left."k" = right."k"` for each key column, joined by `AND`.
    pub fn key_match<'c>(
        &mut self,
        left: &str,
        right: &str,
        keys: impl IntoIterator<Item = &'c str>,
    ) -> &mut Self {
        for (i, key) in keys.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(" AND ");
            }
            let key = quote_ident(key);
            self.sql.push_str(&format!("{left}.{key} = {right}.{key}"));
        }
        self
    }

    /// Bind a value and append its placeholder.
    pub fn param(&mut self, value: impl Into<Param>) -> &mut Self {
        self.params.push(value.into());
        self.sql.push_str(&format!("${}", self.params.len()));
        self
    }

    pub fn build(&mut self) -> Statement {
        Statement {
            sql: std::mem::take(&mut self.sql),
            params: std::mem::take(&mut self.params),
        }
    }
}
