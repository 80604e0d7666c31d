//! Logical-to-physical table routing.
//!
//! A sharded logical table maps to one physical table (key routing) or a list
//! of them (range or predicate routing). Resolution is pure: the same inputs
//! always produce the same physical name set, in ascending period order, so
//! compiled SQL can be cached per shard set and tests can assert exact names.

use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};

use crate::ast::Scalar;
use crate::compile::CompiledSql;
use crate::error::{Error, Result};

/// A calendar month used as a shard period. Physical names follow the
/// `{logical}_{YYYYMM}` convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Self {
        debug_assert!((1..=12).contains(&month));
        Self { year, month }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The next calendar month.
    pub fn succ(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Physical table name for a logical table in this period.
    pub fn table_name(&self, logical: &str) -> String {
        format!("{}_{}", logical, self)
    }

    /// All periods from `start` through `end`, ascending. Empty when
    /// `start > end`.
    pub fn span(start: Period, end: Period) -> Vec<Period> {
        let mut out = Vec::new();
        let mut cur = start;
        while cur <= end {
            out.push(cur);
            cur = cur.succ();
        }
        out
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

/// Maps a shard-key value to a physical table name.
pub type KeyResolver = Arc<dyn Fn(&str, &Scalar) -> String + Send + Sync>;

/// Accepts or rejects a candidate physical table name.
pub type TableFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// How a logical table routes to physical tables.
#[derive(Clone)]
pub enum ShardRoute {
    /// Logical name passes through unchanged.
    Unsharded,
    /// One physical table derived from a shard-key value.
    Key { key: Scalar, resolver: KeyResolver },
    /// All period tables between two months, inclusive.
    Range { start: Period, end: Period },
    /// Subset of a known physical-name set chosen by predicate.
    Filter {
        candidates: Vec<String>,
        filter: TableFilter,
    },
}

impl ShardRoute {
    /// Key routing with the default `{logical}_{key}` suffix drawn from the
    /// key value itself, rendered unquoted.
    pub fn by_key(key: impl Into<Scalar>) -> Self {
        ShardRoute::Key {
            key: key.into(),
            resolver: Arc::new(|logical, key| format!("{}_{}", logical, key.raw())),
        }
    }

    pub fn by_key_with(key: impl Into<Scalar>, resolver: KeyResolver) -> Self {
        ShardRoute::Key {
            key: key.into(),
            resolver,
        }
    }

    pub fn by_range(start: Period, end: Period) -> Self {
        ShardRoute::Range { start, end }
    }

    pub fn by_filter(candidates: Vec<String>, filter: TableFilter) -> Self {
        ShardRoute::Filter { candidates, filter }
    }
}

impl fmt::Debug for ShardRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardRoute::Unsharded => write!(f, "Unsharded"),
            ShardRoute::Key { key, .. } => f.debug_struct("Key").field("key", key).finish(),
            ShardRoute::Range { start, end } => f
                .debug_struct("Range")
                .field("start", start)
                .field("end", end)
                .finish(),
            ShardRoute::Filter { candidates, .. } => f
                .debug_struct("Filter")
                .field("candidates", candidates)
                .finish(),
        }
    }
}

/// Maps a shard-key value to a physical database name.
pub type DatabaseResolver = Arc<dyn Fn(&Scalar) -> String + Send + Sync>;

/// How a logical operation routes to a physical database. Multi-tenant data
/// can shard across databases as well as tables; a non-default route prefixes
/// every resolved physical table with the database name.
#[derive(Clone)]
pub enum DatabaseRoute {
    /// The ambient connection's database.
    Default,
    /// A fixed physical database.
    Named(String),
    /// Database derived from a shard-key value.
    Key {
        key: Scalar,
        resolver: DatabaseResolver,
    },
}

impl DatabaseRoute {
    pub fn named(name: impl Into<String>) -> Self {
        DatabaseRoute::Named(name.into())
    }

    pub fn by_key_with(key: impl Into<Scalar>, resolver: DatabaseResolver) -> Self {
        DatabaseRoute::Key {
            key: key.into(),
            resolver,
        }
    }

    fn database(&self) -> Option<String> {
        match self {
            DatabaseRoute::Default => None,
            DatabaseRoute::Named(name) => Some(name.clone()),
            DatabaseRoute::Key { key, resolver } => Some(resolver(key)),
        }
    }
}

impl fmt::Debug for DatabaseRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseRoute::Default => write!(f, "Default"),
            DatabaseRoute::Named(name) => f.debug_tuple("Named").field(name).finish(),
            DatabaseRoute::Key { key, .. } => f.debug_struct("Key").field("key", key).finish(),
        }
    }
}

/// A resolved routing: the logical table plus every physical table it covers,
/// in deterministic order. Physical names are database-qualified when a
/// non-default database route applies. Built per invocation, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardingTable {
    pub logical: String,
    pub database: Option<String>,
    pub physical: Vec<String>,
}

impl ShardingTable {
    /// Resolve a route against a logical table name in the default database.
    pub fn resolve(logical: &str, route: &ShardRoute) -> Result<Self> {
        Self::resolve_in(logical, route, &DatabaseRoute::Default)
    }

    /// Resolve table and database routes together.
    pub fn resolve_in(
        logical: &str,
        route: &ShardRoute,
        database: &DatabaseRoute,
    ) -> Result<Self> {
        let physical = match route {
            ShardRoute::Unsharded => vec![logical.to_string()],
            ShardRoute::Key { key, resolver } => vec![resolver(logical, key)],
            ShardRoute::Range { start, end } => {
                let periods = Period::span(*start, *end);
                if periods.is_empty() {
                    return Err(Error::unsupported(format!(
                        "shard range {}..{} for {} is empty",
                        start, end, logical
                    )));
                }
                periods.iter().map(|p| p.table_name(logical)).collect()
            }
            ShardRoute::Filter { candidates, filter } => {
                let mut names: Vec<String> = candidates
                    .iter()
                    .filter(|name| filter(name))
                    .cloned()
                    .collect();
                names.sort();
                if names.is_empty() {
                    return Err(Error::unsupported(format!(
                        "shard filter matched no physical tables for {}",
                        logical
                    )));
                }
                names
            }
        };
        let database = database.database();
        let physical = match &database {
            Some(db) => physical
                .into_iter()
                .map(|name| format!("{}.{}", db, name))
                .collect(),
            None => physical,
        };
        Ok(Self {
            logical: logical.to_string(),
            database,
            physical,
        })
    }

    pub fn is_fan_out(&self) -> bool {
        self.physical.len() > 1
    }

    /// The single physical name, when routing did not fan out.
    pub fn single(&self) -> Option<&str> {
        match self.physical.as_slice() {
            [one] => Some(one),
            _ => None,
        }
    }
}

/// One logical operation fanned out across physical tables. Elements execute
/// in list order; atomicity across elements is the caller's transaction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultipleCommand {
    pub commands: Vec<CompiledSql>,
}

impl MultipleCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: CompiledSql) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledSql> {
        self.commands.iter()
    }
}

impl IntoIterator for MultipleCommand {
    type Item = CompiledSql;
    type IntoIter = std::vec::IntoIter<CompiledSql>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}

/// Join identical-projection SELECT bodies into one statement.
pub fn union_all(bodies: &[String]) -> String {
    bodies.join(" UNION ALL ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unsharded_passes_through() {
        let t = ShardingTable::resolve("orders", &ShardRoute::Unsharded).unwrap();
        assert_eq!(t.physical, vec!["orders"]);
        assert_eq!(t.single(), Some("orders"));
    }

    #[test]
    fn string_key_resolves_unquoted_table_name() {
        let t = ShardingTable::resolve("orders", &ShardRoute::by_key("acme")).unwrap();
        assert_eq!(t.physical, vec!["orders_acme"]);
    }

    #[test]
    fn database_route_qualifies_physical_names() {
        let db = DatabaseRoute::by_key_with(
            "acme",
            Arc::new(|key| format!("tenant_{}", key.raw())),
        );
        let t = ShardingTable::resolve_in("orders", &ShardRoute::Unsharded, &db).unwrap();
        assert_eq!(t.database.as_deref(), Some("tenant_acme"));
        assert_eq!(t.physical, vec!["tenant_acme.orders"]);
    }

    #[test]
    fn database_and_table_routes_compose() {
        let db = DatabaseRoute::named("tenant_a");
        let route = ShardRoute::by_range(Period::new(2024, 1), Period::new(2024, 2));
        let t = ShardingTable::resolve_in("events", &route, &db).unwrap();
        assert_eq!(
            t.physical,
            vec!["tenant_a.events_202401", "tenant_a.events_202402"]
        );
    }

    #[test]
    fn key_route_is_deterministic() {
        let route = ShardRoute::by_key(42i64);
        let a = ShardingTable::resolve("orders", &route).unwrap();
        let b = ShardingTable::resolve("orders", &route).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.physical, vec!["orders_42"]);
    }

    #[test]
    fn range_route_yields_ascending_periods() {
        let route = ShardRoute::by_range(Period::new(2023, 11), Period::new(2024, 2));
        let t = ShardingTable::resolve("events", &route).unwrap();
        assert_eq!(
            t.physical,
            vec!["events_202311", "events_202312", "events_202401", "events_202402"]
        );
        assert!(t.is_fan_out());
    }

    #[test]
    fn empty_range_is_an_error() {
        let route = ShardRoute::by_range(Period::new(2024, 3), Period::new(2024, 1));
        assert!(ShardingTable::resolve("events", &route).is_err());
    }

    #[test]
    fn filter_route_sorts_matches() {
        let candidates = vec![
            "log_202402".to_string(),
            "log_202312".to_string(),
            "log_misc".to_string(),
        ];
        let route = ShardRoute::by_filter(
            candidates,
            Arc::new(|name| name.rsplit('_').next().is_some_and(|s| s.starts_with("20"))),
        );
        let t = ShardingTable::resolve("log", &route).unwrap();
        assert_eq!(t.physical, vec!["log_202312", "log_202402"]);
    }

    #[test]
    fn period_span_crosses_year_boundary() {
        let span = Period::span(Period::new(2023, 12), Period::new(2024, 1));
        assert_eq!(span, vec![Period::new(2023, 12), Period::new(2024, 1)]);
    }

    #[test]
    fn union_all_joins_bodies() {
        let sql = union_all(&[
            "SELECT Id FROM a".to_string(),
            "SELECT Id FROM b".to_string(),
        ]);
        assert_eq!(sql, "SELECT Id FROM a UNION ALL SELECT Id FROM b");
    }
}
