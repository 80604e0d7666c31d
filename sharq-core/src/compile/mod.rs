//! The expression-to-SQL compilation engine.
//!
//! [`Compiler`] walks an [`Expr`] tree and produces [`SqlSegment`]s: constant
//! sub-trees are folded in-process, everything touching a table column is
//! emitted as dialect SQL with deterministic parameter placeholders.

pub mod fold;
pub mod formatters;

use serde::{Deserialize, Serialize};

use crate::ast::{BinaryOp, Expr, Scalar, UnaryOp};
use crate::dialect::{DbType, Dialect};
use crate::error::{Error, Result};
use crate::schema::EntityMapper;

pub use formatters::{Formatter, FormatterKey, FormatterRegistry};

/// Which path owns a segment's meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    /// Fully evaluated literal; may be inlined into SQL.
    Constant,
    /// Closed-over runtime value; always bound as a parameter.
    Variable,
    /// Generated SQL text referencing columns or placeholders.
    Expression,
    /// Generated SQL text produced by a method formatter.
    MethodCall,
}

/// Intermediate representation of one compiled expression node.
///
/// Invariant: when `kind` is `Constant` or `Variable` the segment is fully
/// evaluable without touching the database and `value` is authoritative;
/// otherwise `body` holds valid dialect SQL and `value` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlSegment {
    pub value: Option<Scalar>,
    pub body: String,
    pub expect_type: Option<DbType>,
    pub kind: SegmentKind,
    /// Whether any table column appears under this node.
    pub has_field: bool,
}

impl SqlSegment {
    pub fn constant(value: Scalar) -> Self {
        Self {
            value: Some(value),
            body: String::new(),
            expect_type: None,
            kind: SegmentKind::Constant,
            has_field: false,
        }
    }

    pub fn variable(value: Scalar) -> Self {
        Self {
            value: Some(value),
            body: String::new(),
            expect_type: None,
            kind: SegmentKind::Variable,
            has_field: false,
        }
    }

    pub fn expression(body: impl Into<String>) -> Self {
        Self {
            value: None,
            body: body.into(),
            expect_type: None,
            kind: SegmentKind::Expression,
            has_field: false,
        }
    }

    pub fn method_call(body: impl Into<String>) -> Self {
        Self {
            value: None,
            body: body.into(),
            expect_type: None,
            kind: SegmentKind::MethodCall,
            has_field: false,
        }
    }

    pub fn with_type(mut self, ty: DbType) -> Self {
        self.expect_type = Some(ty);
        self
    }

    pub fn with_field(mut self, has_field: bool) -> Self {
        self.has_field = has_field;
        self
    }

    /// True when the segment is evaluable without the database.
    pub fn is_resolved(&self) -> bool {
        matches!(self.kind, SegmentKind::Constant | SegmentKind::Variable)
    }

    pub fn scalar(&self) -> Option<&Scalar> {
        self.value.as_ref()
    }

    /// Kind for a folded result: any variable operand taints the output.
    pub fn folded_kind(operands: &[&SqlSegment]) -> SegmentKind {
        if operands.iter().any(|s| s.kind == SegmentKind::Variable) {
            SegmentKind::Variable
        } else {
            SegmentKind::Constant
        }
    }

}

/// One named parameter in a compiled statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlParam {
    pub name: String,
    pub value: Scalar,
}

/// Final output of a compilation: SQL text plus its ordered parameter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledSql {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl CompiledSql {
    pub fn new(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Deterministic parameter naming and collection.
#[derive(Debug, Default)]
pub struct ParamContext {
    next_anonymous: usize,
    /// Indices into `params` issued by [`anonymous`](Self::anonymous); value
    /// dedup only ever matches these, never member-named parameters.
    anonymous: Vec<usize>,
    params: Vec<SqlParam>,
}

impl ParamContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anonymous expression parameter: `@p{N}`. The same logical value reused
    /// in one statement maps to one parameter.
    pub fn anonymous(&mut self, value: &Scalar) -> String {
        if let Some(&index) = self
            .anonymous
            .iter()
            .find(|&&index| self.params[index].value == *value)
        {
            return self.params[index].name.clone();
        }
        let name = format!("@p{}", self.next_anonymous);
        self.next_anonymous += 1;
        self.anonymous.push(self.params.len());
        self.params.push(SqlParam {
            name: name.clone(),
            value: value.clone(),
        });
        name
    }

    /// Single-row fluent assignment parameter: `@{Member}`.
    pub fn member(&mut self, member: &str, value: Scalar) -> String {
        let name = format!("@{}", member);
        self.params.push(SqlParam {
            name: name.clone(),
            value,
        });
        name
    }

    /// Batched row field parameter: `@{Member}{RowIndex}`.
    pub fn row_member(&mut self, member: &str, row: usize, value: Scalar) -> String {
        let name = format!("@{}{}", member, row);
        self.params.push(SqlParam {
            name: name.clone(),
            value,
        });
        name
    }

    /// Batched key predicate parameter: `@k{Member}{RowIndex}`.
    pub fn key_member(&mut self, member: &str, row: usize, value: Scalar) -> String {
        let name = format!("@k{}{}", member, row);
        self.params.push(SqlParam {
            name: name.clone(),
            value,
        });
        name
    }

    pub fn into_params(self) -> Vec<SqlParam> {
        self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// The expression visitor. One instance per statement compilation; shared
/// state lives in the formatter registry and entity registry.
pub struct Compiler<'a> {
    dialect: &'a dyn Dialect,
    formatters: &'a FormatterRegistry,
    entity: Option<&'a EntityMapper>,
    table_alias: Option<&'a str>,
    pub params: ParamContext,
}

impl<'a> Compiler<'a> {
    pub fn new(dialect: &'a dyn Dialect, formatters: &'a FormatterRegistry) -> Self {
        Self {
            dialect,
            formatters,
            entity: None,
            table_alias: None,
            params: ParamContext::new(),
        }
    }

    pub fn with_entity(mut self, entity: &'a EntityMapper) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Prefix every column reference with this alias (sharded UNION branches).
    pub fn with_table_alias(mut self, alias: &'a str) -> Self {
        self.table_alias = Some(alias);
        self
    }

    pub fn dialect(&self) -> &'a dyn Dialect {
        self.dialect
    }

    pub fn entity(&self) -> Option<&'a EntityMapper> {
        self.entity
    }

    /// Compile an expression into a boolean SQL fragment for WHERE/HAVING.
    pub fn compile_predicate(&mut self, expr: &Expr) -> Result<String> {
        let seg = self.visit(expr)?;
        Ok(self.as_predicate(seg))
    }

    /// Compile an expression into a value-position SQL fragment.
    pub fn compile_value(&mut self, expr: &Expr) -> Result<String> {
        let seg = self.visit(expr)?;
        Ok(self.render(seg))
    }

    pub fn into_params(self) -> Vec<SqlParam> {
        self.params.into_params()
    }

    /// Visit one node and produce its segment.
    pub fn visit(&mut self, expr: &Expr) -> Result<SqlSegment> {
        match expr {
            Expr::Constant(v) => Ok(SqlSegment::constant(v.clone())),
            Expr::Var { value, .. } => Ok(SqlSegment::variable(value.clone())),
            Expr::Column { table, name } => Ok(self.visit_column(table.as_deref(), name)),
            Expr::Member {
                target,
                owner,
                name,
            } => {
                let target_seg = self.visit(target)?;
                let formatter = self.formatters.resolve(*owner, name, 0).ok_or_else(|| {
                    Error::unsupported(format!("no formatter for ({:?}, {}, 0)", owner, name))
                })?;
                formatter(self, Some(target_seg), Vec::new())
            }
            Expr::StaticMember { owner, name } => {
                let formatter = self.formatters.resolve(*owner, name, 0).ok_or_else(|| {
                    Error::unsupported(format!("no formatter for ({:?}, {}, 0)", owner, name))
                })?;
                formatter(self, None, Vec::new())
            }
            Expr::Call {
                target,
                owner,
                name,
                args,
            } => {
                let target_seg = match target {
                    Some(t) => Some(self.visit(t)?),
                    None => None,
                };
                let mut arg_segs = Vec::with_capacity(args.len());
                for arg in args {
                    arg_segs.push(self.visit(arg)?);
                }
                let formatter = self
                    .formatters
                    .resolve(*owner, name, args.len())
                    .ok_or_else(|| {
                        Error::unsupported(format!(
                            "no formatter for ({:?}, {}, {})",
                            owner,
                            name,
                            args.len()
                        ))
                    })?;
                formatter(self, target_seg, arg_segs)
            }
            Expr::Binary { op, left, right } => self.visit_binary(*op, left, right),
            Expr::Unary { op, operand } => self.visit_unary(*op, operand),
            Expr::Conditional {
                cond,
                then_expr,
                else_expr,
            } => self.visit_conditional(cond, then_expr, else_expr),
            Expr::Coalesce { left, right } => self.visit_coalesce(left, right),
            Expr::Cast { target, ty } => {
                let seg = self.visit(target)?;
                if seg.is_resolved() {
                    // Native values stay native; the type only guides later
                    // literal/parameter handling.
                    return Ok(seg.with_type(*ty));
                }
                let body = self.dialect.cast(&seg.body, *ty);
                Ok(SqlSegment::expression(body)
                    .with_type(*ty)
                    .with_field(seg.has_field))
            }
        }
    }

    fn visit_column(&self, table: Option<&str>, name: &str) -> SqlSegment {
        let (column, ty) = match self.entity.and_then(|e| e.member(name)) {
            Some(member) => (member.column.clone(), Some(member.db_type)),
            None => (name.to_string(), None),
        };
        let quoted = self.dialect.quote(&column);
        let body = match (self.table_alias, table) {
            (Some(alias), _) => format!("{}.{}", self.dialect.quote(alias), quoted),
            (None, Some(t)) => format!("{}.{}", self.dialect.quote(t), quoted),
            (None, None) => quoted,
        };
        let mut seg = SqlSegment::expression(body).with_field(true);
        seg.expect_type = ty;
        seg
    }

    fn visit_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<SqlSegment> {
        let l = self.visit(left)?;
        let r = self.visit(right)?;

        if l.is_resolved() && r.is_resolved() {
            let kind = SqlSegment::folded_kind(&[&l, &r]);
            let value = fold::binary(
                op,
                l.scalar().expect("resolved segment holds a value"),
                r.scalar().expect("resolved segment holds a value"),
            )?;
            return Ok(seg_folded(value, kind));
        }

        if op.is_logical() {
            return self.emit_logical(op, l, r);
        }

        // NULL comparisons become IS [NOT] NULL.
        if op == BinaryOp::Eq || op == BinaryOp::Ne {
            let null_side = |seg: &SqlSegment| {
                seg.is_resolved() && seg.scalar().map(Scalar::is_null).unwrap_or(false)
            };
            if null_side(&r) {
                let body = self.render(l);
                let suffix = if op == BinaryOp::Eq { "IS NULL" } else { "IS NOT NULL" };
                return Ok(SqlSegment::expression(format!("{} {}", body, suffix))
                    .with_type(DbType::Bool)
                    .with_field(true));
            }
            if null_side(&l) {
                let body = self.render(r);
                let suffix = if op == BinaryOp::Eq { "IS NULL" } else { "IS NOT NULL" };
                return Ok(SqlSegment::expression(format!("{} {}", body, suffix))
                    .with_type(DbType::Bool)
                    .with_field(true));
            }
        }

        if op == BinaryOp::Concat {
            let has_field = l.has_field || r.has_field;
            let parts = vec![self.render(l), self.render(r)];
            return Ok(SqlSegment::expression(self.dialect.concat(&parts))
                .with_type(DbType::Text)
                .with_field(has_field));
        }

        let symbol = binary_symbol(op);
        let has_field = l.has_field || r.has_field;
        let expect = if op.is_comparison() {
            Some(DbType::Bool)
        } else {
            l.expect_type.or(r.expect_type)
        };
        let lb = self.render(l);
        let rb = self.render(r);
        let mut seg = SqlSegment::expression(format!("{}{}{}", lb, symbol, rb)).with_field(has_field);
        seg.expect_type = expect;
        Ok(seg)
    }

    fn emit_logical(&mut self, op: BinaryOp, l: SqlSegment, r: SqlSegment) -> Result<SqlSegment> {
        // Short-circuit when one side folded to a boolean.
        if let Some(b) = l.scalar().and_then(Scalar::as_bool) {
            return Ok(match (op, b) {
                (BinaryOp::And, true) | (BinaryOp::Or, false) => r,
                _ => seg_folded(Scalar::Bool(b), l.kind),
            });
        }
        if let Some(b) = r.scalar().and_then(Scalar::as_bool) {
            return Ok(match (op, b) {
                (BinaryOp::And, true) | (BinaryOp::Or, false) => l,
                _ => seg_folded(Scalar::Bool(b), r.kind),
            });
        }
        let lp = self.as_predicate(l);
        let rp = self.as_predicate(r);
        let body = if op == BinaryOp::And {
            format!("{} AND {}", lp, rp)
        } else {
            format!("({} OR {})", lp, rp)
        };
        Ok(SqlSegment::expression(body)
            .with_type(DbType::Bool)
            .with_field(true))
    }

    fn visit_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<SqlSegment> {
        let seg = self.visit(operand)?;
        if seg.is_resolved() {
            let kind = seg.kind;
            let value = fold::unary(op, seg.scalar().expect("resolved segment holds a value"))?;
            return Ok(seg_folded(value, kind));
        }
        match op {
            UnaryOp::Not => {
                let has_field = seg.has_field;
                let pred = self.as_predicate(seg);
                Ok(SqlSegment::expression(format!("NOT ({})", pred))
                    .with_type(DbType::Bool)
                    .with_field(has_field))
            }
            UnaryOp::Neg => {
                let expect = seg.expect_type;
                let has_field = seg.has_field;
                let body = self.render(seg);
                let mut out = SqlSegment::expression(format!("-({})", body)).with_field(has_field);
                out.expect_type = expect;
                Ok(out)
            }
        }
    }

    fn visit_conditional(
        &mut self,
        cond: &Expr,
        then_expr: &Expr,
        else_expr: &Expr,
    ) -> Result<SqlSegment> {
        let cond_seg = self.visit(cond)?;
        if let Some(b) = cond_seg.scalar().and_then(Scalar::as_bool) {
            // Fully constant condition short-circuits the branch choice.
            return self.visit(if b { then_expr } else { else_expr });
        }
        let then_seg = self.visit(then_expr)?;
        let else_seg = self.visit(else_expr)?;
        let expect = then_seg.expect_type.or(else_seg.expect_type);
        let pred = self.as_predicate(cond_seg);
        let then_sql = self.render(then_seg);
        let else_sql = self.render(else_seg);
        let mut seg = SqlSegment::expression(format!(
            "CASE WHEN {} THEN {} ELSE {} END",
            pred, then_sql, else_sql
        ))
        .with_field(true);
        seg.expect_type = expect;
        Ok(seg)
    }

    fn visit_coalesce(&mut self, left: &Expr, right: &Expr) -> Result<SqlSegment> {
        let l = self.visit(left)?;
        if l.is_resolved() {
            let is_null = l.scalar().map(Scalar::is_null).unwrap_or(false);
            return if is_null { self.visit(right) } else { Ok(l) };
        }
        let r = self.visit(right)?;
        let expect = l.expect_type.or(r.expect_type);
        let lb = self.render(l);
        let rb = self.render(r);
        let mut seg =
            SqlSegment::expression(format!("COALESCE({},{})", lb, rb)).with_field(true);
        seg.expect_type = expect;
        Ok(seg)
    }

    /// Render a segment in value position: constants inline as dialect
    /// literals, variables become anonymous parameters, SQL text passes
    /// through.
    pub fn render(&mut self, seg: SqlSegment) -> String {
        match seg.kind {
            SegmentKind::Constant => self
                .dialect
                .literal(seg.scalar().expect("constant segment holds a value")),
            SegmentKind::Variable => self
                .params
                .anonymous(seg.scalar().expect("variable segment holds a value")),
            SegmentKind::Expression | SegmentKind::MethodCall => seg.body,
        }
    }

    /// Render a segment in boolean position. A bare boolean column becomes an
    /// explicit comparison so every dialect accepts it.
    pub fn as_predicate(&mut self, seg: SqlSegment) -> String {
        if seg.is_resolved() {
            if let Some(b) = seg.scalar().and_then(Scalar::as_bool) {
                return self.dialect.bool_literal(b).to_string();
            }
            return self.render(seg);
        }
        let bare_column = seg.expect_type == Some(DbType::Bool)
            && seg.has_field
            && !seg.body.contains(' ');
        if bare_column {
            return format!("{}={}", seg.body, self.dialect.bool_literal(true));
        }
        seg.body
    }
}

fn seg_folded(value: Scalar, kind: SegmentKind) -> SqlSegment {
    let mut seg = SqlSegment::constant(value);
    seg.kind = kind;
    seg
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "=",
        BinaryOp::Ne => "!=",
        BinaryOp::Gt => ">",
        BinaryOp::Gte => ">=",
        BinaryOp::Lt => "<",
        BinaryOp::Lte => "<=",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::And | BinaryOp::Or | BinaryOp::Concat => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{col, lit, var};
    use crate::dialect::DialectKind;
    use pretty_assertions::assert_eq;

    fn compiler<'a>() -> Compiler<'a> {
        Compiler::new(
            DialectKind::Postgres.provider(),
            FormatterRegistry::shared(),
        )
    }

    #[test]
    fn constant_comparison_folds() {
        let mut c = compiler();
        let seg = c.visit(&lit(2).add(lit(3)).eq(lit(5))).unwrap();
        assert_eq!(seg.kind, SegmentKind::Constant);
        assert_eq!(seg.scalar(), Some(&Scalar::Bool(true)));
    }

    #[test]
    fn variable_taints_fold_kind() {
        let mut c = compiler();
        let seg = c.visit(&var("n", 2).add(lit(3))).unwrap();
        assert_eq!(seg.kind, SegmentKind::Variable);
        assert_eq!(seg.scalar(), Some(&Scalar::Int(5)));
    }

    #[test]
    fn column_comparison_emits_sql() {
        let mut c = compiler();
        let sql = c.compile_predicate(&col("Id").eq(lit(1))).unwrap();
        assert_eq!(sql, "Id=1");
        assert!(c.params.is_empty());
    }

    #[test]
    fn variable_becomes_parameter() {
        let mut c = compiler();
        let sql = c.compile_predicate(&col("Id").eq(var("id", 42))).unwrap();
        assert_eq!(sql, "Id=@p0");
        assert_eq!(c.into_params(), vec![SqlParam { name: "@p0".into(), value: Scalar::Int(42) }]);
    }

    #[test]
    fn repeated_variable_reuses_one_parameter() {
        let mut c = compiler();
        let expr = col("A").eq(var("x", 7)).and(col("B").eq(var("x", 7)));
        let sql = c.compile_predicate(&expr).unwrap();
        assert_eq!(sql, "A=@p0 AND B=@p0");
        assert_eq!(c.into_params().len(), 1);
    }

    #[test]
    fn anonymous_dedup_ignores_member_parameters() {
        let mut p = ParamContext::new();
        // A member whose name happens to start with `p` must not alias an
        // anonymous parameter of equal value.
        p.member("pH", Scalar::Int(7));
        let name = p.anonymous(&Scalar::Int(7));
        assert_eq!(name, "@p0");
        assert_eq!(p.len(), 2);
        // Equal anonymous values still dedup.
        assert_eq!(p.anonymous(&Scalar::Int(7)), "@p0");
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn null_comparison_uses_is_null() {
        let mut c = compiler();
        let sql = c.compile_predicate(&col("DeletedAt").eq(lit(Scalar::Null))).unwrap();
        assert_eq!(sql, "DeletedAt IS NULL");
    }

    #[test]
    fn coalesce_emits_and_folds() {
        let mut c = compiler();
        let sql = c.compile_value(&col("Nick").coalesce(lit("anon"))).unwrap();
        assert_eq!(sql, "COALESCE(Nick,'anon')");

        let seg = c.visit(&lit(Scalar::Null).coalesce(lit(5))).unwrap();
        assert_eq!(seg.scalar(), Some(&Scalar::Int(5)));
    }

    #[test]
    fn compiled_sql_serializes_losslessly() {
        let compiled = CompiledSql::new(
            "SELECT Id FROM users WHERE Name=@p0",
            vec![SqlParam {
                name: "@p0".into(),
                value: Scalar::Str("kevin".into()),
            }],
        );
        let json = serde_json::to_string(&compiled).unwrap();
        let back: CompiledSql = serde_json::from_str(&json).unwrap();
        assert_eq!(back, compiled);
    }

    #[test]
    fn unknown_method_is_a_hard_error() {
        let mut c = compiler();
        let expr = Expr::Call {
            target: Some(Box::new(col("Name"))),
            owner: crate::ast::TypeKind::Str,
            name: "shuffle".to_string(),
            args: vec![],
        };
        let err = c.visit(&expr).unwrap_err();
        assert!(matches!(err, Error::UnsupportedExpression(_)));
    }
}
