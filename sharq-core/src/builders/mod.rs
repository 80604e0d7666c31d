//! Fluent statement builders.
//!
//! Builders are single-use accumulators: each call narrows or extends the
//! statement, and `to_sql()` / `to_commands()` finalize. Finalization is
//! idempotent (repeated calls on the same built state yield byte-identical
//! SQL and parameters) and is the point where shard routing resolves.

pub mod delete;
pub mod insert;
pub mod query;
pub mod update;

use std::sync::Arc;

use crate::compile::{Compiler, FormatterRegistry};
use crate::dialect::{Dialect, DialectKind};
use crate::schema::EntityMapper;
use crate::sharding::{DatabaseRoute, ShardRoute, ShardingTable};

pub use delete::Delete;
pub use insert::{ConflictBuilder, Insert};
pub use query::{Query, SortDir};
pub use update::Update;

/// State shared by every builder: the entity mapping, the target dialect and
/// the shard routes.
#[derive(Clone)]
pub(crate) struct BuilderCore {
    pub entity: Arc<EntityMapper>,
    pub dialect: &'static dyn Dialect,
    pub route: ShardRoute,
    pub database: DatabaseRoute,
}

impl BuilderCore {
    pub fn new(entity: Arc<EntityMapper>, dialect: DialectKind) -> Self {
        Self {
            entity,
            dialect: dialect.provider(),
            route: ShardRoute::Unsharded,
            database: DatabaseRoute::Default,
        }
    }

    pub fn compiler(&self) -> Compiler<'_> {
        Compiler::new(self.dialect, FormatterRegistry::shared()).with_entity(&self.entity)
    }

    /// Resolve the routes against the entity's logical table.
    pub fn resolve_tables(&self) -> crate::error::Result<ShardingTable> {
        ShardingTable::resolve_in(&self.entity.table, &self.route, &self.database)
    }
}
