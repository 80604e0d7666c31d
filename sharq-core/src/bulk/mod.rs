//! Bulk statement planning: multi-row inserts, batched per-row updates and
//! the bulk-copy-then-merge path.
//!
//! Parameter names are deterministic: batched row values bind as
//! `@{Member}{RowIndex}` and batched key predicates as `@k{Member}{RowIndex}`,
//! with the row index global across the whole operation. Batch boundaries
//! follow the `ceil(rows / batch_size)` law and the final partial batch always
//! flushes.

use crate::ast::Scalar;
use crate::compile::{CompiledSql, ParamContext};
use crate::dialect::{DbType, Dialect};
use crate::error::{Error, Result};
use crate::schema::{EntityMapper, MemberMapper, RowAccess};
use crate::sharding::MultipleCommand;

/// Default rows per statement; safely below every dialect parameter ceiling
/// for reasonable column counts.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Number of batches for `rows` at `batch_size` per batch.
pub fn batch_count(rows: usize, batch_size: usize) -> usize {
    debug_assert!(batch_size > 0);
    rows.div_ceil(batch_size)
}

/// Clamp a requested batch size so one statement never exceeds the dialect's
/// parameter ceiling.
pub fn effective_batch_size(requested: usize, columns: usize, dialect: &dyn Dialect) -> usize {
    let requested = requested.max(1);
    if columns == 0 {
        return requested;
    }
    let ceiling = (dialect.max_parameters() / columns).max(1);
    requested.min(ceiling)
}

fn row_value(row: &dyn RowAccess, member: &MemberMapper) -> Scalar {
    row.value(&member.name).unwrap_or(Scalar::Null)
}

/// Plan a multi-row INSERT: one statement per batch, each with
/// `VALUES (...),(...)` tuples bound as `@{Member}{RowIndex}` parameters.
pub fn plan_insert(
    entity: &EntityMapper,
    table: &str,
    columns: &[&MemberMapper],
    rows: &[&dyn RowAccess],
    dialect: &dyn Dialect,
    batch_size: usize,
) -> Result<MultipleCommand> {
    if rows.is_empty() {
        return Err(Error::EmptyBatch(format!(
            "insert into {} given no rows",
            entity.entity
        )));
    }
    if columns.is_empty() {
        return Err(Error::EmptyBatch(format!(
            "insert into {} given no columns",
            entity.entity
        )));
    }
    let batch_size = effective_batch_size(batch_size, columns.len(), dialect);
    let column_list: Vec<String> = columns.iter().map(|m| dialect.quote(&m.column)).collect();
    let prefix = format!(
        "INSERT INTO {} ({}) VALUES ",
        dialect.quote(table),
        column_list.join(", ")
    );

    let mut out = MultipleCommand::new();
    for (batch_index, batch) in rows.chunks(batch_size).enumerate() {
        let mut params = ParamContext::new();
        let base = batch_index * batch_size;
        let tuples: Vec<String> = batch
            .iter()
            .enumerate()
            .map(|(offset, row)| {
                let placeholders: Vec<String> = columns
                    .iter()
                    .map(|member| {
                        params.row_member(&member.name, base + offset, row_value(*row, member))
                    })
                    .collect();
                format!("({})", placeholders.join(","))
            })
            .collect();
        out.push(CompiledSql::new(
            format!("{}{}", prefix, tuples.join(",")),
            params.into_params(),
        ));
    }
    Ok(out)
}

/// Plan per-row UPDATEs keyed on the entity's primary key: one single-row
/// statement per row (the `MultipleCommand` carries the batch, so every
/// element stays within the driver's one-statement-per-command protocol),
/// with set values bound as `@{Member}{RowIndex}` and key values as
/// `@k{Member}{RowIndex}`, the row index global across the operation.
pub fn plan_update_by_key(
    entity: &EntityMapper,
    table: &str,
    set_columns: &[&MemberMapper],
    rows: &[&dyn RowAccess],
    dialect: &dyn Dialect,
) -> Result<MultipleCommand> {
    if rows.is_empty() {
        return Err(Error::EmptyBatch(format!(
            "update of {} given no rows",
            entity.entity
        )));
    }
    let keys: Vec<&MemberMapper> = entity.keys().collect();
    if keys.is_empty() {
        return Err(Error::missing_predicate(format!(
            "update of {} by key requires a primary key",
            entity.entity
        )));
    }
    if set_columns.is_empty() {
        return Err(Error::EmptyBatch(format!(
            "update of {} given no assignments",
            entity.entity
        )));
    }
    let table_sql = dialect.quote(table);

    let mut out = MultipleCommand::new();
    for (index, row) in rows.iter().enumerate() {
        let mut params = ParamContext::new();
        let sets: Vec<String> = set_columns
            .iter()
            .map(|member| {
                let name = params.row_member(&member.name, index, row_value(*row, member));
                format!("{}={}", dialect.quote(&member.column), name)
            })
            .collect();
        let preds: Vec<String> = keys
            .iter()
            .map(|member| {
                let name = params.key_member(&member.name, index, row_value(*row, member));
                format!("{}={}", dialect.quote(&member.column), name)
            })
            .collect();
        out.push(CompiledSql::new(
            format!(
                "UPDATE {} SET {} WHERE {}",
                table_sql,
                sets.join(", "),
                preds.join(" AND ")
            ),
            params.into_params(),
        ));
    }
    Ok(out)
}

/// The bulk-copy-then-merge plan: load rows into a temp table via the native
/// bulk channel, then merge with one set-based UPDATE, then drop.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkMergePlan {
    pub temp_table: String,
    /// DDL run before the load.
    pub create_temp: String,
    /// Column names in load order, keys first.
    pub copy_columns: Vec<String>,
    /// Column types in load order, matching `copy_columns`.
    pub copy_types: Vec<DbType>,
    /// Row values in load order, matching `copy_columns`.
    pub rows: Vec<Vec<Scalar>>,
    /// The set-based merge statement.
    pub update: String,
    /// Cleanup, run even on merge failure.
    pub drop_temp: String,
}

/// Plan a bulk update of `rows` against `table` through a temp table. Errors
/// when the dialect has no native bulk-copy channel.
pub fn plan_merge(
    entity: &EntityMapper,
    table: &str,
    set_columns: &[&MemberMapper],
    rows: &[&dyn RowAccess],
    dialect: &dyn Dialect,
) -> Result<BulkMergePlan> {
    if !dialect.supports_bulk_copy() {
        return Err(dialect.unsupported("bulk copy"));
    }
    if rows.is_empty() {
        return Err(Error::EmptyBatch(format!(
            "bulk merge into {} given no rows",
            entity.entity
        )));
    }
    let keys: Vec<&MemberMapper> = entity.keys().collect();
    if keys.is_empty() {
        return Err(Error::missing_predicate(format!(
            "bulk merge into {} requires a primary key",
            entity.entity
        )));
    }
    if set_columns.is_empty() {
        return Err(Error::EmptyBatch(format!(
            "bulk merge into {} given no assignments",
            entity.entity
        )));
    }

    let temp_table = format!("{}_load", table);
    let load_order: Vec<&MemberMapper> = keys.iter().chain(set_columns.iter()).copied().collect();
    let ddl_cols: Vec<(String, DbType, bool)> = load_order
        .iter()
        .map(|m| (m.column.clone(), m.db_type, !m.nullable))
        .collect();
    let key_cols: Vec<String> = keys.iter().map(|m| m.column.clone()).collect();
    let set_cols: Vec<String> = set_columns.iter().map(|m| m.column.clone()).collect();

    let data: Vec<Vec<Scalar>> = rows
        .iter()
        .map(|row| load_order.iter().map(|m| row_value(*row, m)).collect())
        .collect();

    Ok(BulkMergePlan {
        create_temp: dialect.create_temp_table(&temp_table, &ddl_cols, &key_cols),
        copy_columns: load_order.iter().map(|m| m.column.clone()).collect(),
        copy_types: load_order.iter().map(|m| m.db_type).collect(),
        rows: data,
        update: dialect.update_from_temp(table, &temp_table, &key_cols, &set_cols),
        drop_temp: dialect.drop_temp_table(&temp_table),
        temp_table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;
    use crate::schema::MapRow;
    use pretty_assertions::assert_eq;

    fn users() -> EntityMapper {
        EntityMapper::builder("User", "users")
            .identity_key("Id", DbType::BigInt)
            .column("Name", DbType::Text)
            .column("Age", DbType::Int)
            .build()
    }

    fn row(id: i64, name: &str, age: i64) -> MapRow {
        MapRow::new().set("Id", id).set("Name", name).set("Age", age)
    }

    #[test]
    fn batch_count_law() {
        assert_eq!(batch_count(0, 50), 0);
        assert_eq!(batch_count(1, 50), 1);
        assert_eq!(batch_count(50, 50), 1);
        assert_eq!(batch_count(51, 50), 2);
        assert_eq!(batch_count(150, 50), 3);
    }

    #[test]
    fn batch_size_clamps_to_parameter_ceiling() {
        let mssql = DialectKind::SqlServer.provider();
        // 2100-parameter ceiling, 10 columns per row.
        assert_eq!(effective_batch_size(500, 10, mssql), 210);
        assert_eq!(effective_batch_size(100, 10, mssql), 100);
    }

    #[test]
    fn three_rows_one_statement() {
        let entity = users();
        let pg = DialectKind::Postgres.provider();
        let rows = [row(1, "a", 20), row(2, "b", 30), row(3, "c", 40)];
        let refs: Vec<&dyn RowAccess> = rows.iter().map(|r| r as &dyn RowAccess).collect();
        let cols: Vec<&MemberMapper> = entity.insertable().collect();

        let plan = plan_insert(&entity, "users", &cols, &refs, pg, 50).unwrap();
        assert_eq!(plan.len(), 1);
        let stmt = &plan.commands[0];
        assert_eq!(
            stmt.sql,
            "INSERT INTO users (Name, Age) VALUES (@Name0,@Age0),(@Name1,@Age1),(@Name2,@Age2)"
        );
        assert_eq!(stmt.params.len(), 6);
        assert_eq!(stmt.params[0].name, "@Name0");
        assert_eq!(stmt.params[0].value, Scalar::Str("a".into()));
    }

    #[test]
    fn insert_splits_on_batch_boundary() {
        let entity = users();
        let pg = DialectKind::Postgres.provider();
        let rows: Vec<MapRow> = (0..5).map(|i| row(i, "n", 20)).collect();
        let refs: Vec<&dyn RowAccess> = rows.iter().map(|r| r as &dyn RowAccess).collect();
        let cols: Vec<&MemberMapper> = entity.insertable().collect();

        let plan = plan_insert(&entity, "users", &cols, &refs, pg, 2).unwrap();
        assert_eq!(plan.len(), 3);
        // Row indices are global, so the final partial batch starts at row 4.
        assert!(plan.commands[2].sql.contains("@Name4"));
        assert_eq!(plan.commands[2].params.len(), 2);
    }

    #[test]
    fn empty_insert_is_an_error() {
        let entity = users();
        let pg = DialectKind::Postgres.provider();
        let cols: Vec<&MemberMapper> = entity.insertable().collect();
        let err = plan_insert(&entity, "users", &cols, &[], pg, 50).unwrap_err();
        assert!(matches!(err, Error::EmptyBatch(_)));
    }

    #[test]
    fn update_by_key_emits_one_statement_per_row() {
        let entity = users();
        let pg = DialectKind::Postgres.provider();
        let rows = [row(1, "a", 21), row(2, "b", 31)];
        let refs: Vec<&dyn RowAccess> = rows.iter().map(|r| r as &dyn RowAccess).collect();
        let name = entity.member("Name").unwrap();

        let plan = plan_update_by_key(&entity, "users", &[name], &refs, pg).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan.commands[0].sql,
            "UPDATE users SET Name=@Name0 WHERE Id=@kId0"
        );
        assert_eq!(
            plan.commands[1].sql,
            "UPDATE users SET Name=@Name1 WHERE Id=@kId1"
        );
        assert_eq!(plan.commands[0].params.len(), 2);
        assert_eq!(plan.commands[0].params[1].name, "@kId0");
        assert_eq!(plan.commands[0].params[1].value, Scalar::Int(1));
        // Each element must be a single statement for the prepared protocol.
        assert!(plan.iter().all(|c| !c.sql.contains(';')));
    }

    #[test]
    fn update_without_key_is_refused() {
        let entity = EntityMapper::builder("Log", "logs")
            .column("Msg", DbType::Text)
            .build();
        let pg = DialectKind::Postgres.provider();
        let rows = [MapRow::new().set("Msg", "x")];
        let refs: Vec<&dyn RowAccess> = rows.iter().map(|r| r as &dyn RowAccess).collect();
        let msg = entity.member("Msg").unwrap();
        let err = plan_update_by_key(&entity, "logs", &[msg], &refs, pg).unwrap_err();
        assert!(matches!(err, Error::MissingPredicate(_)));
    }

    #[test]
    fn merge_plan_orders_keys_first() {
        let entity = users();
        let pg = DialectKind::Postgres.provider();
        let rows = [row(1, "a", 21)];
        let refs: Vec<&dyn RowAccess> = rows.iter().map(|r| r as &dyn RowAccess).collect();
        let name = entity.member("Name").unwrap();

        let plan = plan_merge(&entity, "users", &[name], &refs, pg).unwrap();
        assert_eq!(plan.temp_table, "users_load");
        assert_eq!(plan.copy_columns, vec!["Id", "Name"]);
        assert_eq!(plan.rows, vec![vec![Scalar::Int(1), Scalar::Str("a".into())]]);
        assert_eq!(
            plan.update,
            "UPDATE users SET Name = s.Name FROM users_load s WHERE users.Id = s.Id"
        );
        assert_eq!(plan.drop_temp, "DROP TABLE users_load");
    }

    #[test]
    fn merge_requires_bulk_copy_support() {
        let entity = users();
        let mysql = DialectKind::MySql.provider();
        let rows = [row(1, "a", 21)];
        let refs: Vec<&dyn RowAccess> = rows.iter().map(|r| r as &dyn RowAccess).collect();
        let name = entity.member("Name").unwrap();
        let err = plan_merge(&entity, "users", &[name], &refs, mysql).unwrap_err();
        assert!(matches!(err, Error::DialectUnsupported { .. }));
    }
}
