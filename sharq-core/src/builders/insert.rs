//! INSERT / upsert builder.

use std::sync::Arc;

use crate::ast::Scalar;
use crate::bulk::{self, DEFAULT_BATCH_SIZE};
use crate::compile::{CompiledSql, ParamContext};
use crate::dialect::{ConflictAction, DialectKind};
use crate::error::{Error, Result};
use crate::schema::{EntityMapper, MemberMapper, RowAccess};
use crate::sharding::{DatabaseRoute, MultipleCommand, ShardRoute};

use super::BuilderCore;

/// Fluent INSERT accumulator. One row compiles to a single statement with
/// `@{Member}` parameters; many rows batch through the bulk planner with
/// `@{Member}{RowIndex}` parameters.
pub struct Insert {
    core: BuilderCore,
    rows: Vec<Box<dyn RowAccess + Send + Sync>>,
    include: Option<Vec<String>>,
    exclude: Vec<String>,
    batch_size: usize,
    conflict: Option<(Vec<String>, ConflictAction)>,
    /// `None` = no RETURNING; empty = `RETURNING *`; otherwise named members.
    returning: Option<Vec<String>>,
}

impl Insert {
    pub fn new(entity: Arc<EntityMapper>, dialect: DialectKind) -> Self {
        Self {
            core: BuilderCore::new(entity, dialect),
            rows: Vec::new(),
            include: None,
            exclude: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            conflict: None,
            returning: None,
        }
    }

    pub fn row(mut self, row: impl RowAccess + Send + Sync + 'static) -> Self {
        self.rows.push(Box::new(row));
        self
    }

    pub fn rows<R>(mut self, rows: impl IntoIterator<Item = R>) -> Self
    where
        R: RowAccess + Send + Sync + 'static,
    {
        for row in rows {
            self.rows.push(Box::new(row));
        }
        self
    }

    /// Restrict the insert to these members only.
    pub fn only(mut self, members: &[&str]) -> Self {
        self.include = Some(members.iter().map(|m| m.to_string()).collect());
        self
    }

    /// Skip these members.
    pub fn ignore(mut self, members: &[&str]) -> Self {
        self.exclude.extend(members.iter().map(|m| m.to_string()));
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
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

    /// Start an upsert clause.
    pub fn on_conflict(self) -> ConflictBuilder {
        ConflictBuilder {
            insert: self,
            columns: Vec::new(),
        }
    }

    /// Request `RETURNING *` (or the dialect's OUTPUT equivalent).
    pub fn returning_all(mut self) -> Self {
        self.returning = Some(Vec::new());
        self
    }

    /// Request RETURNING of specific members.
    pub fn returning(mut self, members: &[&str]) -> Self {
        self.returning = Some(members.iter().map(|m| m.to_string()).collect());
        self
    }

    fn columns(&self) -> Result<Vec<&MemberMapper>> {
        let cols: Vec<&MemberMapper> = self
            .core
            .entity
            .insertable()
            .filter(|m| match &self.include {
                Some(names) => names.iter().any(|n| n == &m.name),
                None => true,
            })
            .filter(|m| !self.exclude.iter().any(|n| n == &m.name))
            .collect();
        if cols.is_empty() {
            return Err(Error::EmptyBatch(format!(
                "insert into {} selected no columns",
                self.core.entity.entity
            )));
        }
        Ok(cols)
    }

    fn suffix(&self) -> Result<String> {
        let dialect = self.core.dialect;
        let mut suffix = String::new();
        if let Some((columns, action)) = &self.conflict {
            let conflict_cols: Vec<String> = if columns.is_empty() {
                // Conflict target inferred from the primary key.
                let keys: Vec<String> = self
                    .core
                    .entity
                    .keys()
                    .map(|k| dialect.quote(&k.column))
                    .collect();
                if keys.is_empty() {
                    return Err(Error::missing_predicate(format!(
                        "upsert on {} requires a primary key or explicit conflict columns",
                        self.core.entity.entity
                    )));
                }
                keys
            } else {
                columns
                    .iter()
                    .map(|c| self.member_column(c).map(|col| dialect.quote(&col)))
                    .collect::<Result<_>>()?
            };
            suffix.push_str(&dialect.upsert_clause(&conflict_cols, action)?);
        }
        if let Some(members) = &self.returning {
            let cols: Vec<String> = members
                .iter()
                .map(|m| self.member_column(m).map(|col| dialect.quote(&col)))
                .collect::<Result<_>>()?;
            suffix.push_str(&dialect.returning_clause(&cols)?);
        }
        Ok(suffix)
    }

    fn member_column(&self, member: &str) -> Result<String> {
        self.core
            .entity
            .member(member)
            .map(|m| m.column.clone())
            .ok_or_else(|| Error::UnknownMember {
                entity: self.core.entity.entity.clone(),
                member: member.to_string(),
            })
    }

    /// Conflict-target members: the named ones, or the primary key.
    fn conflict_members(&self, names: &[String]) -> Result<Vec<&MemberMapper>> {
        if names.is_empty() {
            let keys: Vec<&MemberMapper> = self.core.entity.keys().collect();
            if keys.is_empty() {
                return Err(Error::missing_predicate(format!(
                    "upsert on {} requires a primary key or explicit conflict columns",
                    self.core.entity.entity
                )));
            }
            return Ok(keys);
        }
        names
            .iter()
            .map(|name| {
                self.core
                    .entity
                    .member(name)
                    .ok_or_else(|| Error::UnknownMember {
                        entity: self.core.entity.entity.clone(),
                        member: name.to_string(),
                    })
            })
            .collect()
    }

    /// MERGE-shaped upsert: the source tuple carries the conflict keys first
    /// so the ON clause can reference them even when they are not insertable
    /// (identity keys).
    fn to_merge_commands(
        &self,
        tables: &[String],
        columns: &[&MemberMapper],
        conflict_names: &[String],
        action: &ConflictAction,
    ) -> Result<MultipleCommand> {
        let dialect = self.core.dialect;
        let keys = self.conflict_members(conflict_names)?;
        let mut source: Vec<&MemberMapper> = keys.clone();
        for member in columns {
            if !source.iter().any(|m| m.column == member.column) {
                source.push(member);
            }
        }
        let source_cols: Vec<String> = source.iter().map(|m| dialect.quote(&m.column)).collect();
        let key_cols: Vec<String> = keys.iter().map(|m| dialect.quote(&m.column)).collect();
        let insert_cols: Vec<String> = columns.iter().map(|m| dialect.quote(&m.column)).collect();
        let output = match &self.returning {
            None => String::new(),
            Some(members) => {
                let cols: Vec<String> = members
                    .iter()
                    .map(|m| self.member_column(m).map(|col| dialect.quote(&col)))
                    .collect::<Result<_>>()?;
                dialect.returning_clause(&cols)?
            }
        };
        let batch = bulk::effective_batch_size(self.batch_size, source.len(), dialect);

        let mut out = MultipleCommand::new();
        for table in tables {
            if let [row] = self.rows.as_slice() {
                let mut params = ParamContext::new();
                let tuple: Vec<String> = source
                    .iter()
                    .map(|m| params.member(&m.name, row.value(&m.name).unwrap_or(Scalar::Null)))
                    .collect();
                let sql = dialect.merge_statement(
                    table,
                    &source_cols,
                    &format!("({})", tuple.join(",")),
                    &key_cols,
                    &insert_cols,
                    action,
                    &output,
                )?;
                out.push(CompiledSql::new(sql, params.into_params()));
            } else {
                for (batch_index, chunk) in self.rows.chunks(batch).enumerate() {
                    let mut params = ParamContext::new();
                    let base = batch_index * batch;
                    let tuples: Vec<String> = chunk
                        .iter()
                        .enumerate()
                        .map(|(offset, row)| {
                            let placeholders: Vec<String> = source
                                .iter()
                                .map(|m| {
                                    params.row_member(
                                        &m.name,
                                        base + offset,
                                        row.value(&m.name).unwrap_or(Scalar::Null),
                                    )
                                })
                                .collect();
                            format!("({})", placeholders.join(","))
                        })
                        .collect();
                    let sql = dialect.merge_statement(
                        table,
                        &source_cols,
                        &tuples.join(","),
                        &key_cols,
                        &insert_cols,
                        action,
                        &output,
                    )?;
                    out.push(CompiledSql::new(sql, params.into_params()));
                }
            }
        }
        Ok(out)
    }

    /// Finalize a single-row, single-shard insert. Idempotent.
    pub fn to_sql(&self) -> Result<CompiledSql> {
        let mut commands = self.to_commands()?;
        if commands.len() != 1 {
            return Err(Error::unsupported(
                "insert fans out to multiple statements; use to_commands()",
            ));
        }
        Ok(commands.commands.remove(0))
    }

    /// Finalize: resolve shard routing and plan one statement per batch per
    /// physical table. Idempotent.
    pub fn to_commands(&self) -> Result<MultipleCommand> {
        if self.rows.is_empty() {
            return Err(Error::EmptyBatch(format!(
                "insert into {} given no rows",
                self.core.entity.entity
            )));
        }
        let tables = self.core.resolve_tables()?;
        let columns = self.columns()?;
        if let Some((conflict_names, action)) = &self.conflict {
            if self.core.dialect.upsert_is_statement() {
                return self.to_merge_commands(&tables.physical, &columns, conflict_names, action);
            }
        }
        let suffix = self.suffix()?;
        let dialect = self.core.dialect;

        let mut out = MultipleCommand::new();
        for table in &tables.physical {
            if let [row] = self.rows.as_slice() {
                // Single row: `@{Member}` naming, no row index.
                let mut params = ParamContext::new();
                let placeholders: Vec<String> = columns
                    .iter()
                    .map(|member| {
                        let value = row.value(&member.name).unwrap_or(Scalar::Null);
                        params.member(&member.name, value)
                    })
                    .collect();
                let column_list: Vec<String> =
                    columns.iter().map(|m| dialect.quote(&m.column)).collect();
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({}){}",
                    dialect.quote(table),
                    column_list.join(", "),
                    placeholders.join(","),
                    suffix
                );
                out.push(CompiledSql::new(sql, params.into_params()));
            } else {
                let refs: Vec<&dyn RowAccess> =
                    self.rows.iter().map(|r| r.as_ref() as &dyn RowAccess).collect();
                let planned = bulk::plan_insert(
                    &self.core.entity,
                    table,
                    &columns,
                    &refs,
                    dialect,
                    self.batch_size,
                )?;
                for command in planned {
                    out.push(CompiledSql::new(
                        format!("{}{}", command.sql, suffix),
                        command.params,
                    ));
                }
            }
        }
        Ok(out)
    }
}

/// Upsert clause sub-builder.
pub struct ConflictBuilder {
    insert: Insert,
    columns: Vec<String>,
}

impl ConflictBuilder {
    /// Infer the conflict target from the entity's key members.
    pub fn use_keys(mut self) -> Self {
        self.columns.clear();
        self
    }

    /// Explicit conflict-target members.
    pub fn columns(mut self, members: &[&str]) -> Self {
        self.columns = members.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn do_nothing(mut self) -> Insert {
        self.insert.conflict = Some((self.columns, ConflictAction::DoNothing));
        self.insert
    }

    /// `DO UPDATE SET` of these members from the incoming row. An empty list
    /// updates every non-key insertable column.
    pub fn set(mut self, members: &[&str]) -> Insert {
        let assignments: Vec<String> = if members.is_empty() {
            self.insert
                .core
                .entity
                .insertable()
                .filter(|m| !m.is_key)
                .map(|m| m.column.clone())
                .collect()
        } else {
            members.iter().map(|m| m.to_string()).collect()
        };
        self.insert.conflict = Some((self.columns, ConflictAction::DoUpdate { assignments }));
        self.insert
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DbType;
    use crate::schema::MapRow;
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
    fn single_row_uses_member_parameters() {
        let compiled = Insert::new(users(), DialectKind::Postgres)
            .row(MapRow::new().set("Name", "kevin").set("Age", 30i64))
            .to_sql()
            .unwrap();
        assert_eq!(
            compiled.sql,
            "INSERT INTO users (Name, Age) VALUES (@Name,@Age)"
        );
        assert_eq!(compiled.params[0].name, "@Name");
        assert_eq!(compiled.params[0].value, Scalar::Str("kevin".into()));
    }

    #[test]
    fn three_rows_compile_to_one_multi_row_statement() {
        let rows = vec![
            MapRow::new().set("Name", "a").set("Age", 1i64),
            MapRow::new().set("Name", "b").set("Age", 2i64),
            MapRow::new().set("Name", "c").set("Age", 3i64),
        ];
        let compiled = Insert::new(users(), DialectKind::Postgres)
            .rows(rows)
            .batch_size(50)
            .to_sql()
            .unwrap();
        assert_eq!(
            compiled.sql,
            "INSERT INTO users (Name, Age) VALUES (@Name0,@Age0),(@Name1,@Age1),(@Name2,@Age2)"
        );
        assert_eq!(compiled.params.len(), 6);
    }

    #[test]
    fn upsert_with_use_keys_targets_primary_key() {
        let compiled = Insert::new(users(), DialectKind::Postgres)
            .row(MapRow::new().set("Name", "kevin").set("Age", 30i64))
            .on_conflict()
            .use_keys()
            .set(&[])
            .to_sql()
            .unwrap();
        assert_eq!(
            compiled.sql,
            "INSERT INTO users (Name, Age) VALUES (@Name,@Age) \
             ON CONFLICT (Id) DO UPDATE SET Name = EXCLUDED.Name, Age = EXCLUDED.Age"
        );
    }

    #[test]
    fn upsert_refused_without_keys() {
        let entity = Arc::new(
            EntityMapper::builder("Log", "logs")
                .column("Msg", DbType::Text)
                .build(),
        );
        let err = Insert::new(entity, DialectKind::Postgres)
            .row(MapRow::new().set("Msg", "x"))
            .on_conflict()
            .use_keys()
            .do_nothing()
            .to_sql()
            .unwrap_err();
        assert!(matches!(err, Error::MissingPredicate(_)));
    }

    #[test]
    fn mysql_do_nothing_self_assigns_a_conflict_column() {
        let compiled = Insert::new(users(), DialectKind::MySql)
            .row(MapRow::new().set("Name", "kevin").set("Age", 30i64))
            .on_conflict()
            .use_keys()
            .do_nothing()
            .to_sql()
            .unwrap();
        assert_eq!(
            compiled.sql,
            "INSERT INTO users (Name, Age) VALUES (@Name,@Age) \
             ON DUPLICATE KEY UPDATE Id = Id"
        );
    }

    #[test]
    fn sqlserver_upsert_compiles_to_merge() {
        let compiled = Insert::new(users(), DialectKind::SqlServer)
            .row(
                MapRow::new()
                    .set("Id", 1i64)
                    .set("Name", "kevin")
                    .set("Age", 30i64),
            )
            .on_conflict()
            .use_keys()
            .set(&[])
            .to_sql()
            .unwrap();
        assert_eq!(
            compiled.sql,
            "MERGE users AS t USING (VALUES (@Id,@Name,@Age)) AS s (Id, Name, Age) \
             ON t.Id = s.Id \
             WHEN MATCHED THEN UPDATE SET t.Name = s.Name, t.Age = s.Age \
             WHEN NOT MATCHED THEN INSERT (Name, Age) VALUES (s.Name, s.Age);"
        );
        assert_eq!(compiled.params.len(), 3);
        assert_eq!(compiled.params[0].name, "@Id");
        assert_eq!(compiled.params[0].value, Scalar::Int(1));
    }

    #[test]
    fn sqlserver_do_nothing_merge_has_no_matched_branch() {
        let compiled = Insert::new(users(), DialectKind::SqlServer)
            .row(
                MapRow::new()
                    .set("Id", 1i64)
                    .set("Name", "kevin")
                    .set("Age", 30i64),
            )
            .on_conflict()
            .use_keys()
            .do_nothing()
            .to_sql()
            .unwrap();
        assert!(!compiled.sql.contains("WHEN MATCHED"));
        assert!(compiled.sql.contains("WHEN NOT MATCHED THEN INSERT (Name, Age)"));
    }

    #[test]
    fn returning_all_appends_clause() {
        let compiled = Insert::new(users(), DialectKind::Postgres)
            .row(MapRow::new().set("Name", "kevin").set("Age", 30i64))
            .returning_all()
            .to_sql()
            .unwrap();
        assert!(compiled.sql.ends_with(" RETURNING *"));
    }

    #[test]
    fn returning_is_refused_where_unsupported() {
        let err = Insert::new(users(), DialectKind::MySql)
            .row(MapRow::new().set("Name", "kevin").set("Age", 30i64))
            .returning_all()
            .to_sql()
            .unwrap_err();
        assert!(matches!(err, Error::DialectUnsupported { .. }));
    }

    #[test]
    fn include_and_exclude_filter_columns() {
        let compiled = Insert::new(users(), DialectKind::Postgres)
            .row(MapRow::new().set("Name", "kevin").set("Age", 30i64))
            .ignore(&["Age"])
            .to_sql()
            .unwrap();
        assert_eq!(compiled.sql, "INSERT INTO users (Name) VALUES (@Name)");
    }

    #[test]
    fn empty_insert_is_an_error() {
        let err = Insert::new(users(), DialectKind::Postgres).to_sql().unwrap_err();
        assert!(matches!(err, Error::EmptyBatch(_)));
    }
}
