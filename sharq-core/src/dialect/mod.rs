//! Dialect providers.
//!
//! Every piece of database-specific syntax goes through the [`Dialect`]
//! trait; the expression visitor never embeds dialect text directly, so a new
//! dialect is a new provider table and nothing else.

pub mod mysql;
pub mod postgres;
pub mod sqlserver;

use serde::{Deserialize, Serialize};

use crate::ast::Scalar;
use crate::error::{Error, Result};

/// Database column types used by the member mapper and temp-table DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbType {
    Bool,
    Int,
    BigInt,
    Float,
    Decimal,
    Text,
    Date,
    Timestamp,
    Uuid,
}

/// Date components extractable from a date/timestamp expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Year,
    Month,
    Day,
    DayOfYear,
}

/// Units for date arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateUnit {
    Day,
    Month,
    Year,
}

/// Conflict handling for an upsert statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictAction {
    /// Ignore the incoming row.
    DoNothing,
    /// Update the listed columns from the incoming row
    /// (`EXCLUDED.col` / `VALUES(col)` per dialect).
    DoUpdate { assignments: Vec<String> },
}

/// SQL reserved words that must be quoted when used as identifiers.
const RESERVED_WORDS: &[&str] = &[
    "order", "group", "user", "table", "select", "from", "where", "join", "left", "right", "inner",
    "outer", "on", "and", "or", "not", "null", "true", "false", "limit", "offset", "as", "in",
    "is", "like", "between", "having", "union", "all", "distinct", "case", "when", "then", "else",
    "end", "create", "alter", "drop", "insert", "update", "delete", "index", "key", "primary",
    "foreign", "references", "default", "constraint", "check",
];

/// Whether an identifier needs quoting (reserved word, special chars, or a
/// leading digit). Dotted paths are checked per part by the caller.
fn needs_quoting(name: &str) -> bool {
    let lower = name.to_lowercase();
    RESERVED_WORDS.contains(&lower.as_str())
        || name.chars().any(|c| !c.is_alphanumeric() && c != '_')
        || name.chars().next().map(|c| c.is_numeric()).unwrap_or(false)
}

/// Trait for dialect-specific SQL generation. All methods are pure.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Quote one identifier part with the dialect's quote characters.
    fn quote_always(&self, name: &str) -> String;

    /// Quote an identifier only when required. Dotted identifiers are quoted
    /// per part.
    fn quote(&self, name: &str) -> String {
        if name.contains('.') {
            return name
                .split('.')
                .map(|p| self.quote(p))
                .collect::<Vec<_>>()
                .join(".");
        }
        if needs_quoting(name) {
            self.quote_always(name)
        } else {
            name.to_string()
        }
    }

    /// Render a scalar as an inline literal.
    fn literal(&self, value: &Scalar) -> String {
        match value {
            Scalar::Null => "NULL".to_string(),
            Scalar::Bool(b) => self.bool_literal(*b).to_string(),
            Scalar::Int(n) => n.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Decimal(d) => d.to_string(),
            Scalar::Str(s) => format!("'{}'", s.replace('\'', "''")),
            Scalar::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            Scalar::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S")),
            Scalar::Uuid(u) => format!("'{}'", u),
        }
    }

    /// Boolean literal (`TRUE`/`FALSE` vs `1`/`0`).
    fn bool_literal(&self, val: bool) -> &'static str;

    /// Positional placeholder used by the executor after name rewriting.
    fn placeholder(&self, index: usize) -> String;

    /// Hard ceiling on parameters per statement.
    fn max_parameters(&self) -> usize;

    /// DDL type name for a column type.
    fn db_type_name(&self, ty: DbType) -> &'static str;

    /// Explicit cast expression.
    fn cast(&self, expr: &str, ty: DbType) -> String {
        format!("CAST({} AS {})", expr, self.db_type_name(ty))
    }

    /// Extract a date component.
    fn date_part(&self, part: DatePart, expr: &str) -> String;

    /// Date arithmetic: add `amount` units to `expr`.
    fn date_add(&self, unit: DateUnit, expr: &str, amount: &str) -> String;

    /// Database clock, timestamp precision.
    fn now(&self) -> &'static str;

    /// Database clock, date precision.
    fn today(&self) -> &'static str;

    /// String concatenation expression.
    fn concat(&self, parts: &[String]) -> String;

    /// Character-length function name.
    fn length_fn(&self) -> &'static str {
        "LENGTH"
    }

    /// Substring with a one-based start.
    fn substring(&self, expr: &str, start: &str, length: &str) -> String {
        format!("SUBSTRING({} FROM {} FOR {})", expr, start, length)
    }

    /// Whether this dialect/driver pair exposes a native bulk-copy channel.
    fn supports_bulk_copy(&self) -> bool {
        false
    }

    /// Upsert clause appended to `INSERT INTO t (cols) VALUES (...)`.
    /// `conflict_cols` are already quoted; `assignments` are raw column names.
    fn upsert_clause(&self, conflict_cols: &[String], action: &ConflictAction) -> Result<String>;

    /// Whether upsert restructures the whole INSERT (MERGE-style) instead of
    /// appending a clause. When true, the insert builder calls
    /// [`merge_statement`](Self::merge_statement) rather than
    /// [`upsert_clause`](Self::upsert_clause).
    fn upsert_is_statement(&self) -> bool {
        false
    }

    /// Complete MERGE-style upsert statement. `source_cols` list the row
    /// tuple columns in order (conflict keys first), `tuples` is the
    /// placeholder tuple list, `key_cols` the quoted conflict columns,
    /// `insert_cols` the quoted columns for the not-matched branch, and
    /// `output` an already-rendered RETURNING/OUTPUT suffix or empty.
    #[allow(clippy::too_many_arguments)]
    fn merge_statement(
        &self,
        _target: &str,
        _source_cols: &[String],
        _tuples: &str,
        _key_cols: &[String],
        _insert_cols: &[String],
        _action: &ConflictAction,
        _output: &str,
    ) -> Result<String> {
        Err(self.unsupported("MERGE upsert"))
    }

    /// Reference to the incoming row's value for `col` inside an upsert
    /// assignment (`EXCLUDED.col` / `VALUES(col)`).
    fn excluded_ref(&self, col: &str) -> String;

    /// Characters with special meaning inside a LIKE pattern.
    fn like_metacharacters(&self) -> &'static [char] {
        &['%', '_', '\\']
    }

    /// ESCAPE clause paired with backslash-escaped patterns.
    fn like_escape_clause(&self) -> &'static str {
        " ESCAPE '\\'"
    }

    /// RETURNING/OUTPUT clause, or an error when the dialect has none.
    fn returning_clause(&self, cols: &[String]) -> Result<String>;

    /// Temporary-table DDL matching the bulk-merge contract.
    fn create_temp_table(
        &self,
        name: &str,
        cols: &[(String, DbType, bool)],
        key_cols: &[String],
    ) -> String {
        let mut defs: Vec<String> = cols
            .iter()
            .map(|(col, ty, not_null)| {
                let mut def = format!("{} {}", self.quote(col), self.db_type_name(*ty));
                if *not_null {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();
        if !key_cols.is_empty() {
            let keys: Vec<String> = key_cols.iter().map(|k| self.quote(k)).collect();
            defs.push(format!("PRIMARY KEY({})", keys.join(", ")));
        }
        format!(
            "CREATE TEMPORARY TABLE {} ({})",
            self.quote(name),
            defs.join(", ")
        )
    }

    fn drop_temp_table(&self, name: &str) -> String {
        format!("DROP TABLE {}", self.quote(name))
    }

    /// Set-based merge: update `target` from `temp` joined on `key_cols`,
    /// assigning `set_cols` from the temp rows.
    fn update_from_temp(
        &self,
        target: &str,
        temp: &str,
        key_cols: &[String],
        set_cols: &[String],
    ) -> String;

    fn unsupported(&self, feature: &'static str) -> Error {
        Error::DialectUnsupported {
            dialect: self.name(),
            feature,
        }
    }
}

/// Supported SQL dialect families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialectKind {
    Postgres,
    MySql,
    SqlServer,
}

impl Default for DialectKind {
    fn default() -> Self {
        Self::Postgres
    }
}

impl DialectKind {
    pub fn provider(&self) -> &'static dyn Dialect {
        match self {
            DialectKind::Postgres => &postgres::PostgresDialect,
            DialectKind::MySql => &mysql::MySqlDialect,
            DialectKind::SqlServer => &sqlserver::SqlServerDialect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_only_when_needed() {
        let pg = DialectKind::Postgres.provider();
        assert_eq!(pg.quote("Id"), "Id");
        assert_eq!(pg.quote("order"), "\"order\"");
        assert_eq!(pg.quote("users.order"), "users.\"order\"");
        assert_eq!(pg.quote("2fast"), "\"2fast\"");
    }

    #[test]
    fn literal_escapes_quotes() {
        let pg = DialectKind::Postgres.provider();
        assert_eq!(
            pg.literal(&Scalar::Str("O'Brien".into())),
            "'O''Brien'"
        );
    }
}
