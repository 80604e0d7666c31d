//! UPDATE builder: predicate-scoped updates, batched by-key updates and the
//! bulk-copy merge path.

use std::sync::Arc;

use crate::ast::{Expr, Scalar};
use crate::bulk::{self, BulkMergePlan};
use crate::compile::CompiledSql;
use crate::dialect::DialectKind;
use crate::error::{Error, Result};
use crate::schema::{EntityMapper, MemberMapper, RowAccess};
use crate::sharding::{DatabaseRoute, MultipleCommand, ShardRoute};

use super::BuilderCore;

enum Assignment {
    /// Member set to a runtime value, bound as `@{Member}`.
    Value(String, Scalar),
    /// Member set to a compiled expression (e.g. `Age = Age + 1`).
    Expr(String, Expr),
}

/// Fluent UPDATE accumulator. A predicate-scoped update requires an explicit
/// filter; an unfiltered UPDATE never leaves this builder.
pub struct Update {
    core: BuilderCore,
    assignments: Vec<Assignment>,
    filter: Option<Expr>,
    rows: Vec<Box<dyn RowAccess + Send + Sync>>,
    set_members: Vec<String>,
    returning: Option<Vec<String>>,
}

impl Update {
    pub fn new(entity: Arc<EntityMapper>, dialect: DialectKind) -> Self {
        Self {
            core: BuilderCore::new(entity, dialect),
            assignments: Vec::new(),
            filter: None,
            rows: Vec::new(),
            set_members: Vec::new(),
            returning: None,
        }
    }

    pub fn set(mut self, member: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.assignments
            .push(Assignment::Value(member.into(), value.into()));
        self
    }

    pub fn set_expr(mut self, member: impl Into<String>, expr: Expr) -> Self {
        self.assignments.push(Assignment::Expr(member.into(), expr));
        self
    }

    /// Narrow the WHERE clause; successive calls AND together.
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Switch to by-key row mode: each row updates `members`, keyed on the
    /// entity's primary key.
    pub fn rows_by_key<R>(mut self, rows: impl IntoIterator<Item = R>, members: &[&str]) -> Self
    where
        R: RowAccess + Send + Sync + 'static,
    {
        for row in rows {
            self.rows.push(Box::new(row));
        }
        self.set_members = members.iter().map(|m| m.to_string()).collect();
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

    fn member(&self, name: &str) -> Result<&MemberMapper> {
        self.core
            .entity
            .member(name)
            .ok_or_else(|| Error::UnknownMember {
                entity: self.core.entity.entity.clone(),
                member: name.to_string(),
            })
    }

    fn returning_suffix(&self) -> Result<String> {
        match &self.returning {
            None => Ok(String::new()),
            Some(members) => {
                let cols: Vec<String> = members
                    .iter()
                    .map(|m| self.member(m).map(|mm| self.core.dialect.quote(&mm.column)))
                    .collect::<Result<_>>()?;
                self.core.dialect.returning_clause(&cols)
            }
        }
    }

    /// Finalize a single-statement update. Idempotent.
    pub fn to_sql(&self) -> Result<CompiledSql> {
        let mut commands = self.to_commands()?;
        if commands.len() != 1 {
            return Err(Error::unsupported(
                "update fans out to multiple statements; use to_commands()",
            ));
        }
        Ok(commands.commands.remove(0))
    }

    /// Finalize: resolve shard routing and emit one statement (or batch) per
    /// physical table. Idempotent.
    pub fn to_commands(&self) -> Result<MultipleCommand> {
        let tables = self.core.resolve_tables()?;
        if !self.rows.is_empty() {
            return self.plan_rows(&tables.physical);
        }
        let filter = self.filter.as_ref().ok_or_else(|| {
            Error::missing_predicate(format!(
                "update of {} requires a filter",
                self.core.entity.entity
            ))
        })?;
        if self.assignments.is_empty() {
            return Err(Error::EmptyBatch(format!(
                "update of {} given no assignments",
                self.core.entity.entity
            )));
        }
        let suffix = self.returning_suffix()?;

        let mut out = MultipleCommand::new();
        for table in &tables.physical {
            let mut compiler = self.core.compiler();
            let mut sets = Vec::with_capacity(self.assignments.len());
            for assignment in &self.assignments {
                let (member, rendered) = match assignment {
                    Assignment::Value(name, value) => {
                        let mm = self.member(name)?;
                        (mm, compiler.params.member(name, value.clone()))
                    }
                    Assignment::Expr(name, expr) => {
                        (self.member(name)?, compiler.compile_value(expr)?)
                    }
                };
                sets.push(format!(
                    "{}={}",
                    compiler.dialect().quote(&member.column),
                    rendered
                ));
            }
            let predicate = compiler.compile_predicate(filter)?;
            let sql = format!(
                "UPDATE {} SET {} WHERE {}{}",
                compiler.dialect().quote(table),
                sets.join(", "),
                predicate,
                suffix
            );
            out.push(CompiledSql::new(sql, compiler.into_params()));
        }
        Ok(out)
    }

    fn plan_rows(&self, tables: &[String]) -> Result<MultipleCommand> {
        let set_columns: Vec<&MemberMapper> = self
            .set_members
            .iter()
            .map(|name| self.member(name))
            .collect::<Result<_>>()?;
        let refs: Vec<&dyn RowAccess> = self
            .rows
            .iter()
            .map(|r| r.as_ref() as &dyn RowAccess)
            .collect();
        let mut out = MultipleCommand::new();
        for table in tables {
            let planned = bulk::plan_update_by_key(
                &self.core.entity,
                table,
                &set_columns,
                &refs,
                self.core.dialect,
            )?;
            for command in planned {
                out.push(command);
            }
        }
        Ok(out)
    }

    /// Finalize as a bulk-copy-then-merge plan (row mode only). Errors when
    /// the dialect has no native bulk-copy channel.
    pub fn to_merge_plan(&self) -> Result<BulkMergePlan> {
        let tables = self.core.resolve_tables()?;
        let table = tables.single().ok_or_else(|| {
            Error::unsupported("bulk merge cannot fan out across shards in one plan")
        })?;
        let set_columns: Vec<&MemberMapper> = self
            .set_members
            .iter()
            .map(|name| self.member(name))
            .collect::<Result<_>>()?;
        let refs: Vec<&dyn RowAccess> = self
            .rows
            .iter()
            .map(|r| r.as_ref() as &dyn RowAccess)
            .collect();
        bulk::plan_merge(
            &self.core.entity,
            table,
            &set_columns,
            &refs,
            self.core.dialect,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{col, lit, var};
    use crate::dialect::DbType;
    use crate::schema::MapRow;
    use crate::sharding::Period;
    use pretty_assertions::assert_eq;

    fn users() -> Arc<EntityMapper> {
        Arc::new(
            EntityMapper::builder("User", "users")
                .identity_key("Id", DbType::BigInt)
                .column("Name", DbType::Text)
                .column("Age", DbType::Int)
                .build(),
        )
    }

    #[test]
    fn set_value_binds_member_parameter() {
        let compiled = Update::new(users(), DialectKind::Postgres)
            .set("Name", "kevin")
            .filter(col("Id").eq(lit(1)))
            .to_sql()
            .unwrap();
        assert_eq!(compiled.sql, "UPDATE users SET Name=@Name WHERE Id=1");
        assert_eq!(compiled.params.len(), 1);
        assert_eq!(compiled.params[0].name, "@Name");
    }

    #[test]
    fn set_expr_compiles_in_place() {
        let compiled = Update::new(users(), DialectKind::Postgres)
            .set_expr("Age", col("Age").add(lit(1)))
            .filter(col("Id").eq(var("id", 7)))
            .to_sql()
            .unwrap();
        assert_eq!(compiled.sql, "UPDATE users SET Age=Age+1 WHERE Id=@p0");
    }

    #[test]
    fn update_without_filter_is_refused() {
        let err = Update::new(users(), DialectKind::Postgres)
            .set("Name", "x")
            .to_sql()
            .unwrap_err();
        assert!(matches!(err, Error::MissingPredicate(_)));
    }

    #[test]
    fn sharded_update_fans_out_per_table() {
        let commands = Update::new(users(), DialectKind::Postgres)
            .set("Name", "x")
            .filter(col("Id").eq(lit(1)))
            .shard(ShardRoute::by_range(Period::new(2024, 1), Period::new(2024, 2)))
            .to_commands()
            .unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands.commands[0].sql,
            "UPDATE users_202401 SET Name=@Name WHERE Id=1"
        );
        assert_eq!(
            commands.commands[1].sql,
            "UPDATE users_202402 SET Name=@Name WHERE Id=1"
        );
    }

    #[test]
    fn rows_by_key_emits_one_command_per_row() {
        let rows = vec![
            MapRow::new().set("Id", 1i64).set("Age", 21i64),
            MapRow::new().set("Id", 2i64).set("Age", 31i64),
        ];
        let commands = Update::new(users(), DialectKind::Postgres)
            .rows_by_key(rows, &["Age"])
            .to_commands()
            .unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands.commands[0].sql,
            "UPDATE users SET Age=@Age0 WHERE Id=@kId0"
        );
        assert_eq!(
            commands.commands[1].sql,
            "UPDATE users SET Age=@Age1 WHERE Id=@kId1"
        );
    }

    #[test]
    fn merge_plan_requires_single_shard() {
        let rows = vec![MapRow::new().set("Id", 1i64).set("Age", 21i64)];
        let err = Update::new(users(), DialectKind::Postgres)
            .rows_by_key(rows, &["Age"])
            .shard(ShardRoute::by_range(Period::new(2024, 1), Period::new(2024, 2)))
            .to_merge_plan()
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedExpression(_)));
    }
}
