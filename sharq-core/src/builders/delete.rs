//! DELETE builder.

use std::sync::Arc;

use crate::ast::Expr;
use crate::compile::CompiledSql;
use crate::dialect::DialectKind;
use crate::error::{Error, Result};
use crate::schema::EntityMapper;
use crate::sharding::{DatabaseRoute, MultipleCommand, ShardRoute};

use super::BuilderCore;

/// Fluent DELETE accumulator. A filter is mandatory: an unfiltered DELETE
/// never leaves this builder.
pub struct Delete {
    core: BuilderCore,
    filter: Option<Expr>,
    returning: Option<Vec<String>>,
}

impl Delete {
    pub fn new(entity: Arc<EntityMapper>, dialect: DialectKind) -> Self {
        Self {
            core: BuilderCore::new(entity, dialect),
            filter: None,
            returning: None,
        }
    }

    /// Narrow the WHERE clause; successive calls AND together.
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn shard(mut self, route: ShardRoute) -> Self {
        self.core.route = route;
        self
    }

    /// Route to a physical database other than the connection's default.
    pub fn database(mut self, route: DatabaseRoute) -> Self {
        self.core.database = route;
        self
    }

    pub fn returning_all(mut self) -> Self {
        self.returning = Some(Vec::new());
        self
    }

    pub fn returning(mut self, members: &[&str]) -> Self {
        self.returning = Some(members.iter().map(|m| m.to_string()).collect());
        self
    }

    /// Finalize a single-shard delete. Idempotent.
    pub fn to_sql(&self) -> Result<CompiledSql> {
        let mut commands = self.to_commands()?;
        if commands.len() != 1 {
            return Err(Error::unsupported(
                "delete fans out to multiple statements; use to_commands()",
            ));
        }
        Ok(commands.commands.remove(0))
    }

    /// Finalize: resolve shard routing and emit one DELETE per physical
    /// table. Idempotent.
    pub fn to_commands(&self) -> Result<MultipleCommand> {
        let filter = self.filter.as_ref().ok_or_else(|| {
            Error::missing_predicate(format!(
                "delete from {} requires a filter",
                self.core.entity.entity
            ))
        })?;
        let tables = self.core.resolve_tables()?;
        let suffix = match &self.returning {
            None => String::new(),
            Some(members) => {
                let cols: Vec<String> = members
                    .iter()
                    .map(|name| {
                        self.core
                            .entity
                            .member(name)
                            .map(|m| self.core.dialect.quote(&m.column))
                            .ok_or_else(|| Error::UnknownMember {
                                entity: self.core.entity.entity.clone(),
                                member: name.to_string(),
                            })
                    })
                    .collect::<Result<_>>()?;
                self.core.dialect.returning_clause(&cols)?
            }
        };

        let mut out = MultipleCommand::new();
        for table in &tables.physical {
            let mut compiler = self.core.compiler();
            let predicate = compiler.compile_predicate(filter)?;
            let sql = format!(
                "DELETE FROM {} WHERE {}{}",
                compiler.dialect().quote(table),
                predicate,
                suffix
            );
            out.push(CompiledSql::new(sql, compiler.into_params()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{col, lit, var};
    use crate::dialect::DbType;
    use crate::sharding::Period;
    use pretty_assertions::assert_eq;

    fn users() -> Arc<EntityMapper> {
        Arc::new(
            EntityMapper::builder("User", "users")
                .identity_key("Id", DbType::BigInt)
                .column("Name", DbType::Text)
                .build(),
        )
    }

    #[test]
    fn delete_compiles_with_filter() {
        let compiled = Delete::new(users(), DialectKind::Postgres)
            .filter(col("Id").eq(var("id", 9)))
            .to_sql()
            .unwrap();
        assert_eq!(compiled.sql, "DELETE FROM users WHERE Id=@p0");
        assert_eq!(compiled.params.len(), 1);
    }

    #[test]
    fn unfiltered_delete_is_refused() {
        let err = Delete::new(users(), DialectKind::Postgres).to_sql().unwrap_err();
        assert!(matches!(err, Error::MissingPredicate(_)));
    }

    #[test]
    fn sharded_delete_fans_out_in_period_order() {
        let commands = Delete::new(users(), DialectKind::Postgres)
            .filter(col("Id").gt(lit(100)))
            .shard(ShardRoute::by_range(Period::new(2023, 12), Period::new(2024, 1)))
            .to_commands()
            .unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands.commands[0].sql, "DELETE FROM users_202312 WHERE Id>100");
        assert_eq!(commands.commands[1].sql, "DELETE FROM users_202401 WHERE Id>100");
    }

    #[test]
    fn delete_returning_appends_clause() {
        let compiled = Delete::new(users(), DialectKind::Postgres)
            .filter(col("Id").eq(lit(1)))
            .returning(&["Id"])
            .to_sql()
            .unwrap();
        assert_eq!(compiled.sql, "DELETE FROM users WHERE Id=1 RETURNING Id");
    }
}
