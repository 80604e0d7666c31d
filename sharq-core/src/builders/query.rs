//! SELECT builder.

use std::sync::Arc;

use crate::ast::Expr;
use crate::compile::CompiledSql;
use crate::dialect::DialectKind;
use crate::error::Result;
use crate::schema::EntityMapper;
use crate::sharding::{union_all, DatabaseRoute, ShardRoute};

use super::BuilderCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

/// Fluent SELECT accumulator. When the route fans out to several physical
/// tables, every branch projects the same columns in the same order and the
/// branches are joined with `UNION ALL`.
pub struct Query {
    core: BuilderCore,
    projections: Vec<(Expr, Option<String>)>,
    filter: Option<Expr>,
    order_by: Vec<(Expr, SortDir)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Query {
    pub fn new(entity: Arc<EntityMapper>, dialect: DialectKind) -> Self {
        Self {
            core: BuilderCore::new(entity, dialect),
            projections: Vec::new(),
            filter: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Project an expression. Without any `select` call the query projects
    /// every mapped column in declaration order.
    pub fn select(mut self, expr: Expr) -> Self {
        self.projections.push((expr, None));
        self
    }

    /// Project an expression under an output alias.
    pub fn select_as(mut self, expr: Expr, alias: impl Into<String>) -> Self {
        self.projections.push((expr, Some(alias.into())));
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

    pub fn order_by(mut self, expr: Expr, dir: SortDir) -> Self {
        self.order_by.push((expr, dir));
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
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

    /// Finalize: resolve shard routing and compile. Idempotent.
    pub fn to_sql(&self) -> Result<CompiledSql> {
        let tables = self.core.resolve_tables()?;
        let mut compiler = self.core.compiler();

        let projection = if self.projections.is_empty() {
            let cols: Vec<String> = self
                .core
                .entity
                .members
                .iter()
                .map(|m| compiler.dialect().quote(&m.column))
                .collect();
            cols.join(", ")
        } else {
            let mut cols = Vec::with_capacity(self.projections.len());
            for (expr, alias) in &self.projections {
                let sql = compiler.compile_value(expr)?;
                cols.push(match alias {
                    Some(a) => format!("{} AS {}", sql, compiler.dialect().quote(a)),
                    None => sql,
                });
            }
            cols.join(", ")
        };

        // Compile the filter once so every UNION branch is identical and
        // shares one parameter set.
        let predicate = match &self.filter {
            Some(expr) => Some(compiler.compile_predicate(expr)?),
            None => None,
        };

        let bodies: Vec<String> = tables
            .physical
            .iter()
            .map(|table| {
                let mut body = format!(
                    "SELECT {} FROM {}",
                    projection,
                    compiler.dialect().quote(table)
                );
                if let Some(pred) = &predicate {
                    body.push_str(" WHERE ");
                    body.push_str(pred);
                }
                body
            })
            .collect();
        let mut sql = union_all(&bodies);

        if !self.order_by.is_empty() {
            let mut terms = Vec::with_capacity(self.order_by.len());
            for (expr, dir) in &self.order_by {
                let rendered = compiler.compile_value(expr)?;
                terms.push(match dir {
                    SortDir::Asc => rendered,
                    SortDir::Desc => format!("{} DESC", rendered),
                });
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        if let Some(n) = self.offset {
            sql.push_str(&format!(" OFFSET {}", n));
        }

        Ok(CompiledSql::new(sql, compiler.into_params()))
    }
}
