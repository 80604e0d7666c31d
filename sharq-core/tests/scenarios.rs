//! End-to-end statement round-trips through the builders.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use sharq_core::prelude::*;

fn users() -> Arc<EntityMapper> {
    Arc::new(
        EntityMapper::builder("User", "users")
            .identity_key("Id", DbType::BigInt)
            .column("Name", DbType::Text)
            .column("IsEnabled", DbType::Bool)
            .column("Age", DbType::Int)
            .build(),
    )
}

#[test]
fn literal_predicate_inlines_and_variable_parameterizes() {
    let entity = users();

    let inlined = Query::new(entity.clone(), DialectKind::MySql)
        .select(col("Id"))
        .filter(col("Id").eq(lit(1)).and(col("Name").contains(lit("kevin"))))
        .to_sql()
        .unwrap();
    assert_eq!(
        inlined.sql,
        "SELECT Id FROM users WHERE Id=1 AND Name LIKE '%kevin%'"
    );
    assert!(inlined.params.is_empty());

    let parameterized = Query::new(entity, DialectKind::MySql)
        .select(col("Id"))
        .filter(col("Id").eq(lit(1)).and(col("Name").contains(var("needle", "kevin"))))
        .to_sql()
        .unwrap();
    assert_eq!(
        parameterized.sql,
        "SELECT Id FROM users WHERE Id=1 AND Name LIKE @p0"
    );
    assert_eq!(parameterized.params.len(), 1);
    assert_eq!(parameterized.params[0].value, Scalar::Str("%kevin%".into()));
}

#[test]
fn conditional_projection_compiles_to_case() {
    let compiled = Query::new(users(), DialectKind::MySql)
        .select_as(
            if_else(col("IsEnabled"), lit("Enabled"), lit("Disabled")),
            "Status",
        )
        .to_sql()
        .unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT CASE WHEN IsEnabled=1 THEN 'Enabled' ELSE 'Disabled' END AS Status FROM users"
    );
}

#[test]
fn three_row_insert_is_one_multi_row_statement() {
    let rows = vec![
        MapRow::new().set("Name", "a").set("IsEnabled", true).set("Age", 1i64),
        MapRow::new().set("Name", "b").set("IsEnabled", false).set("Age", 2i64),
        MapRow::new().set("Name", "c").set("IsEnabled", true).set("Age", 3i64),
    ];
    let commands = Insert::new(users(), DialectKind::Postgres)
        .rows(rows)
        .batch_size(50)
        .to_commands()
        .unwrap();
    assert_eq!(commands.len(), 1);
    let stmt = &commands.commands[0];
    assert_eq!(
        stmt.sql,
        "INSERT INTO users (Name, IsEnabled, Age) VALUES \
         (@Name0,@IsEnabled0,@Age0),(@Name1,@IsEnabled1,@Age1),(@Name2,@IsEnabled2,@Age2)"
    );
    assert_eq!(stmt.params.len(), 9);
}

#[test]
fn upsert_with_inferred_keys() {
    let compiled = Insert::new(users(), DialectKind::Postgres)
        .row(MapRow::new().set("Name", "kevin").set("IsEnabled", true).set("Age", 30i64))
        .on_conflict()
        .use_keys()
        .set(&["Name"])
        .to_sql()
        .unwrap();
    assert_eq!(
        compiled.sql,
        "INSERT INTO users (Name, IsEnabled, Age) VALUES (@Name,@IsEnabled,@Age) \
         ON CONFLICT (Id) DO UPDATE SET Name = EXCLUDED.Name"
    );
}

#[test]
fn sharded_query_unions_two_identically_filtered_branches() {
    let compiled = Query::new(users(), DialectKind::Postgres)
        .select(col("Id"))
        .select(col("Name"))
        .filter(col("Age").gte(var("min_age", 18)))
        .shard(ShardRoute::by_range(Period::new(2024, 1), Period::new(2024, 2)))
        .to_sql()
        .unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT Id, Name FROM users_202401 WHERE Age>=@p0 \
         UNION ALL \
         SELECT Id, Name FROM users_202402 WHERE Age>=@p0"
    );
    // Identical branches share the one parameter.
    assert_eq!(compiled.params.len(), 1);
}

#[test]
fn finalization_is_deterministic() {
    let query = Query::new(users(), DialectKind::Postgres)
        .select(col("Id"))
        .filter(col("Name").starts_with(var("prefix", "ke")))
        .order_by(col("Id"), SortDir::Asc)
        .limit(20);
    let first = query.to_sql().unwrap();
    let second = query.to_sql().unwrap();
    assert_eq!(first, second);
}
